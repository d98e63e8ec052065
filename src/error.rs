//! Error types for agency-lookup
//!
//! Three layers, narrowing as they go up:
//! - [`ConfigError`]: a configuration source is present but unusable (fatal)
//! - [`DbError`]: connector/query/decode failures from the storage adapter
//! - [`MappingNotFoundError`]: a lookup produced nothing (missing row or backend failure)
//! - [`LookupError`]: what lookup callers see; a config error is never masked as a miss

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors raised while resolving connection parameters
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config file {} is missing required field '{field}'", path.display())]
    MissingField { path: PathBuf, field: &'static str },

    #[error("invalid port '{value}' from {origin}")]
    InvalidPort { value: String, origin: &'static str },
}

/// Result type for storage operations
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Storage adapter errors
#[derive(Error, Debug)]
pub enum DbError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("query error: {message}")]
    Query { message: String, sql: Option<String> },

    #[error("transaction error: {message}")]
    Transaction { message: String },

    #[error("decode error on column '{column}': {message}")]
    Decode { column: String, message: String },
}

impl DbError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
        }
    }

    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }
}

/// Why a lookup produced nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotFoundReason {
    /// The query ran and matched zero rows
    Missing,
    /// The backend failed; only the failure text is kept
    Backend,
}

/// Raised when a required agency or header mapping is not in the database
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct MappingNotFoundError {
    message: String,
    reason: NotFoundReason,
    subject: String,
    state: Option<String>,
}

impl MappingNotFoundError {
    pub fn new(
        reason: NotFoundReason,
        message: impl Into<String>,
        subject: impl Into<String>,
        state: Option<&str>,
    ) -> Self {
        Self {
            message: message.into(),
            reason,
            subject: subject.into(),
            state: state.map(str::to_owned),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn reason(&self) -> NotFoundReason {
        self.reason
    }

    /// Normalized dataset key, agency name/id, or state that was looked up
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn is_backend_failure(&self) -> bool {
        self.reason == NotFoundReason::Backend
    }
}

/// Failure of a `get_*`/`require_*` lookup
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error(transparent)]
    NotFound(#[from] MappingNotFoundError),

    /// Connection parameters could not be resolved; never downgraded to a miss
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl LookupError {
    pub fn not_found(&self) -> Option<&MappingNotFoundError> {
        match self {
            Self::NotFound(err) => Some(err),
            Self::Config(_) => None,
        }
    }

    pub fn config(&self) -> Option<&ConfigError> {
        match self {
            Self::Config(err) => Some(err),
            Self::NotFound(_) => None,
        }
    }
}
