//! Slack relay client and notifier
//!
//! Talks to the internal Slack relay service (nginx proxies `/slack/*` to it),
//! not to the Slack Web API directly.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Local;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};

use super::format::{format_details, format_duration};
use super::{Details, Notifier};

const DEFAULT_API_URL: &str = "https://api.visualknowledgeportal.com";
const DEFAULT_CHANNEL: &str = "default";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum SlackError {
    #[error("slack request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("slack relay returned {status}: {body}")]
    Status { status: u16, body: String },
}

// =============================================================================
// SETTINGS
// =============================================================================

/// Relay location, credentials and defaults
#[derive(Clone)]
pub struct SlackSettings {
    pub api_url: String,
    pub api_key: Option<String>,
    pub channel: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for SlackSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackSettings")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("channel", &self.channel)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for SlackSettings {
    fn default() -> Self {
        Self::from_env()
    }
}

impl SlackSettings {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: None,
            channel: DEFAULT_CHANNEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// `VK_SLACK_API_URL` (or `VK_API_URL` + `/slack/slack`), `VK_SLACK_API_KEY`,
    /// `VK_SLACK_CHANNEL`
    pub fn from_env() -> Self {
        let base = std::env::var("VK_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let api_url =
            std::env::var("VK_SLACK_API_URL").unwrap_or_else(|_| format!("{base}/slack/slack"));
        Self {
            api_url,
            api_key: std::env::var("VK_SLACK_API_KEY").ok(),
            channel: std::env::var("VK_SLACK_CHANNEL")
                .unwrap_or_else(|_| DEFAULT_CHANNEL.to_string()),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full URL for a relay endpoint
    pub fn endpoint(&self, path: &str) -> String {
        let base = self.api_url.trim_end_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, path.trim_start_matches('/'))
        }
    }
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Debug, Deserialize)]
struct ThreadStarted {
    thread_ts: Option<String>,
}

/// Low-level relay client
#[derive(Clone)]
pub struct SlackClient {
    settings: SlackSettings,
    client: reqwest::Client,
}

impl SlackClient {
    pub fn new(settings: SlackSettings) -> Result<Self, SlackError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self { settings, client })
    }

    pub fn from_env() -> Result<Self, SlackError> {
        Self::new(SlackSettings::from_env())
    }

    pub fn settings(&self) -> &SlackSettings {
        &self.settings
    }

    fn channel<'a>(&'a self, channel: Option<&'a str>) -> &'a str {
        channel.unwrap_or(&self.settings.channel)
    }

    async fn post(&self, path: &str, payload: Value) -> Result<Value, SlackError> {
        let mut request = self.client.post(self.settings.endpoint(path)).json(&payload);
        if let Some(key) = &self.settings.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SlackError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    pub async fn send_message(&self, text: &str, channel: Option<&str>) -> Result<Value, SlackError> {
        self.post(
            "message",
            json!({ "text": text, "channel": self.channel(channel) }),
        )
        .await
        .inspect_err(|e| error!("Failed to send Slack message: {}", e))
    }

    /// Returns the new thread's `thread_ts`, when the relay reports one
    pub async fn start_thread(
        &self,
        title: &str,
        initial_message: &str,
        channel: Option<&str>,
    ) -> Result<Option<String>, SlackError> {
        let response = self
            .post(
                "thread/start",
                json!({
                    "title": title,
                    "initial_message": initial_message,
                    "channel": self.channel(channel),
                }),
            )
            .await
            .inspect_err(|e| error!("Failed to start Slack thread: {}", e))?;

        Ok(serde_json::from_value::<ThreadStarted>(response)
            .ok()
            .and_then(|started| started.thread_ts))
    }

    pub async fn reply_to_thread(
        &self,
        thread_ts: &str,
        message: &str,
        channel: Option<&str>,
    ) -> Result<Value, SlackError> {
        self.post(
            "thread/reply",
            json!({
                "thread_ts": thread_ts,
                "message": message,
                "channel": self.channel(channel),
            }),
        )
        .await
        .inspect_err(|e| error!("Failed to reply to Slack thread: {}", e))
    }

    pub async fn health_check(&self) -> bool {
        let mut request = self
            .client
            .get(self.settings.endpoint("health"))
            .timeout(HEALTH_TIMEOUT);
        if let Some(key) = &self.settings.api_key {
            request = request.header("X-API-Key", key);
        }
        matches!(request.send().await, Ok(response) if response.status() == reqwest::StatusCode::OK)
    }
}

// =============================================================================
// NOTIFIER
// =============================================================================

#[derive(Debug, Default)]
struct RunState {
    thread_ts: Option<String>,
    started_at: Option<Instant>,
}

/// Per-service notifier: one Slack thread per run
pub struct SlackNotifier {
    service_name: String,
    enabled: bool,
    channel: String,
    client: SlackClient,
    state: Mutex<RunState>,
}

impl SlackNotifier {
    pub fn new(service_name: impl Into<String>, client: SlackClient) -> Self {
        let channel = client.settings().channel.clone();
        Self {
            service_name: service_name.into(),
            enabled: true,
            channel,
            client,
            state: Mutex::new(RunState::default()),
        }
    }

    pub fn from_env(service_name: impl Into<String>) -> Result<Self, SlackError> {
        Ok(Self::new(service_name, SlackClient::from_env()?))
    }

    /// `--slack off` disables notifications; any other value keeps them on
    pub fn from_flag(service_name: impl Into<String>, flag: Option<&str>) -> Result<Self, SlackError> {
        let enabled = flag.is_none_or(|f| !f.eq_ignore_ascii_case("off"));
        Ok(Self::from_env(service_name)?.enabled(enabled))
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn thread_ts(&self) -> Option<String> {
        self.state().thread_ts.clone()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_details(mut message: String, details: Option<&Details>) -> String {
        if let Some(details) = details.filter(|d| !d.is_empty()) {
            message.push('\n');
            message.push_str(&format_details(details));
        }
        message
    }

    /// Reply in the run thread, or post a plain message when there is none
    async fn deliver(&self, message: &str, kind: &str) -> bool {
        let thread_ts = self.thread_ts();
        let result = match thread_ts {
            Some(ts) => self
                .client
                .reply_to_thread(&ts, message, Some(&self.channel))
                .await
                .map(|_| ()),
            None => self
                .client
                .send_message(message, Some(&self.channel))
                .await
                .map(|_| ()),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send {} notification: {}", kind, e);
                false
            }
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify_start(&self, details: Option<&Details>) -> bool {
        if !self.enabled {
            return true;
        }

        self.state().started_at = Some(Instant::now());
        let title = format!("🚀 {} Started", self.service_name);
        let initial = Self::with_details(
            format!(
                "Service: {}\nStarted: {}",
                self.service_name,
                Local::now().format("%Y-%m-%d %H:%M:%S")
            ),
            details,
        );

        match self
            .client
            .start_thread(&title, &initial, Some(&self.channel))
            .await
        {
            Ok(thread_ts) => {
                self.state().thread_ts = thread_ts;
                true
            }
            Err(e) => {
                warn!("Failed to send start notification: {}", e);
                false
            }
        }
    }

    async fn notify_progress(&self, message: &str, details: Option<&Details>) -> bool {
        if !self.enabled {
            return true;
        }
        let Some(thread_ts) = self.thread_ts() else {
            return true;
        };

        let message = Self::with_details(message.to_string(), details);
        match self
            .client
            .reply_to_thread(&thread_ts, &message, Some(&self.channel))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to send progress notification: {}", e);
                false
            }
        }
    }

    async fn notify_success(&self, message: &str, details: Option<&Details>) -> bool {
        if !self.enabled {
            return true;
        }

        let timestamp = Local::now().format("%H:%M:%S");
        let started_at = self.state().started_at;
        let header = match started_at {
            Some(started) => format!(
                "✅ SUCCESS [{}] (Duration: {})",
                timestamp,
                format_duration(started.elapsed().as_secs_f64())
            ),
            None => format!("✅ SUCCESS [{timestamp}]"),
        };
        let text = Self::with_details(format!("{header}\n{message}"), details);
        self.deliver(&text, "success").await
    }

    async fn notify_error(
        &self,
        message: &str,
        details: Option<&Details>,
        error: Option<&(dyn std::error::Error + Send + Sync)>,
    ) -> bool {
        if !self.enabled {
            return true;
        }

        let mut text = format!("❌ ERROR [{}]\n{}", Local::now().format("%H:%M:%S"), message);
        if let Some(error) = error {
            text.push_str(&format!("\nException: {error}"));
        }
        let text = Self::with_details(text, details);
        self.deliver(&text, "error").await
    }

    async fn notify_warning(&self, message: &str, details: Option<&Details>) -> bool {
        if !self.enabled {
            return true;
        }

        let text = Self::with_details(
            format!("⚠️ WARNING [{}]\n{}", Local::now().format("%H:%M:%S"), message),
            details,
        );
        self.deliver(&text, "warning").await
    }
}
