//! Database connection resolution and transactional access
//!
//! - [`config`]: the configuration cascade and host detection
//! - [`connection`]: connector/connection seams and the commit/rollback scope
//! - [`postgres`]: the sqlx-backed implementation
//! - [`types`]: parameter values and result rows

pub mod config;
pub mod connection;
pub mod postgres;
pub mod types;

pub use config::{
    detect_deployment, ConfigResolver, ConnectionConfig, Deployment, HostEnvironment,
    StaticEnvironment, SystemEnvironment,
};
pub use connection::{test_connection, with_connection, Connection, Connector};
pub use postgres::{test_database_connection, PgConnector};
pub use types::{QueryResult, RowView, Value};
