//! Pipeline status notifications
//!
//! Every method is best-effort: transport failures are logged and reported as
//! `false`, never propagated into the collector's own work.

pub mod format;
pub mod slack;

use async_trait::async_trait;

pub use format::{format_details, format_duration};
pub use slack::{SlackClient, SlackError, SlackNotifier, SlackSettings};

/// Free-form key/value context attached to a notification
pub type Details = serde_json::Map<String, serde_json::Value>;

/// Sink for run lifecycle events
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_start(&self, details: Option<&Details>) -> bool;

    async fn notify_progress(&self, message: &str, details: Option<&Details>) -> bool;

    async fn notify_success(&self, message: &str, details: Option<&Details>) -> bool;

    async fn notify_error(
        &self,
        message: &str,
        details: Option<&Details>,
        error: Option<&(dyn std::error::Error + Send + Sync)>,
    ) -> bool;

    async fn notify_warning(&self, message: &str, details: Option<&Details>) -> bool;

    /// Reported as a progress update
    async fn notify_metric(
        &self,
        name: &str,
        value: &str,
        unit: Option<&str>,
        details: Option<&Details>,
    ) -> bool {
        let message = match unit {
            Some(unit) => format!("📊 {name}: {value} {unit}"),
            None => format!("📊 {name}: {value}"),
        };
        self.notify_progress(&message, details).await
    }
}
