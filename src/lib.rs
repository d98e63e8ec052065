//! # agency-lookup
//!
//! Client library for the licensing-data collectors.
//!
//! ## Services
//!
//! - **Database resolution** ([`database`]): connection parameters from a
//!   prioritized cascade (environment → `~/.vk/db_config.json` → host
//!   detection → presets) and a transactional, one-connection-per-call scope.
//! - **Mapping lookups** ([`mapping`]): cached, strict-mode-aware queries that
//!   turn dataset keys such as `1301B` into header mappings and agency records.
//! - **Notifications** ([`notify`]): best-effort Slack status updates for
//!   pipeline runs.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use agency_lookup::prelude::*;
//!
//! let mut lookup = MappingLookup::new(EngineMode::strict());
//! let mapping = lookup.require_header_mapping("0401", Some("VA")).await?;
//! println!("{} ({})", mapping.agency_name, mapping.agency_id);
//!
//! // Strict convenience functions share one process-wide engine
//! let agencies = agency_lookup::get_agencies_by_state("tn").await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod database;
pub mod error;
pub mod mapping;
pub mod notify;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::database::{
        test_connection, test_database_connection, with_connection, ConfigResolver, Connection,
        ConnectionConfig, Connector, Deployment, HostEnvironment, PgConnector, QueryResult,
        SystemEnvironment, Value,
    };
    pub use crate::error::{
        ConfigError, DbError, LookupError, MappingNotFoundError, NotFoundReason,
    };
    pub use crate::mapping::{
        normalize_dataset_key, Agency, EngineMode, HeaderMapping, Lookup, LookupRegistry,
        MappingLookup,
    };
    pub use crate::notify::{Details, Notifier, SlackClient, SlackNotifier, SlackSettings};
}

pub use error::{ConfigError, DbError, LookupError, MappingNotFoundError};
pub use mapping::{
    get_agencies_by_state, get_agency_by_id, get_agency_by_name, get_header_mapping,
    install_global_registry, normalize_dataset_key, Agency, EngineMode, HeaderMapping,
    LookupRegistry, MappingLookup,
};
