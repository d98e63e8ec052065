//! Connection seams and the transactional scope
//!
//! A [`Connector`] opens one physical connection per call (no pooling).
//! [`with_connection`] wraps that connection in a transaction scope:
//! commit on `Ok`, rollback on `Err`, close on every path.

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{error, info, warn};

use super::types::{QueryResult, Value};
use crate::error::{DbError, DbResult};

/// An open connection with an implicit transaction in progress
#[async_trait]
pub trait Connection: Send {
    /// Run a parameterized query (`$1`, `$2`, ...) and return all rows
    async fn query(&mut self, sql: &str, params: &[Value]) -> DbResult<QueryResult>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;

    /// Release the physical connection
    async fn close(self: Box<Self>) -> DbResult<()>;
}

/// Opens connections
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> DbResult<Box<dyn Connection>>;
}

/// Run `f` inside a transaction on a fresh connection.
///
/// ```rust,ignore
/// let rows = with_connection(&connector, |conn| {
///     Box::pin(async move { conn.query("SELECT 1", &[]).await })
/// })
/// .await?;
/// ```
pub async fn with_connection<T, E, F>(connector: &dyn Connector, f: F) -> Result<T, E>
where
    F: for<'c> FnOnce(&'c mut dyn Connection) -> BoxFuture<'c, Result<T, E>> + Send,
    E: From<DbError>,
    T: Send,
{
    let mut conn = connector.connect().await?;

    let outcome = match f(&mut *conn).await {
        Ok(value) => match conn.commit().await {
            Ok(()) => Ok(value),
            Err(e) => {
                error!("Commit failed: {}", e);
                if let Err(rb) = conn.rollback().await {
                    warn!("Rollback after failed commit also failed: {}", rb);
                }
                Err(E::from(e))
            }
        },
        Err(err) => {
            if let Err(rb) = conn.rollback().await {
                warn!("Rollback failed: {}", rb);
            }
            Err(err)
        }
    };

    if let Err(e) = conn.close().await {
        warn!("Failed to close connection: {}", e);
    }

    outcome
}

/// Round-trip `SELECT 1`; failures are logged, never returned
pub async fn test_connection(connector: &dyn Connector) -> bool {
    let result = with_connection::<_, DbError, _>(connector, |conn| {
        Box::pin(async move { conn.query("SELECT 1", &[]).await })
    })
    .await;

    match result {
        Ok(_) => {
            info!("Database connection successful");
            true
        }
        Err(e) => {
            error!("Connection failed: {}", e);
            false
        }
    }
}
