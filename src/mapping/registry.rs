//! One reusable [`MappingLookup`] per strict-mode setting
//!
//! Composition roots should own a [`LookupRegistry`] (or a plain
//! `MappingLookup`) and pass it down. The process-wide registry behind the
//! free functions exists for scripts that just want a strict lookup.

use std::sync::{Arc, OnceLock};

use tokio::sync::Mutex;
use tracing::debug;

use super::lookup::{EngineMode, MappingLookup};
use super::records::{Agency, HeaderMapping};
use crate::database::Connector;
use crate::error::LookupError;

/// Holds at most one engine; switching strict mode replaces it and drops its cache
#[derive(Default)]
pub struct LookupRegistry {
    current: Option<MappingLookup>,
    connector: Option<Arc<dyn Connector>>,
}

impl LookupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engines built by this registry share `connector`
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            current: None,
            connector: Some(connector),
        }
    }

    fn build(&self, strict_mode: bool) -> MappingLookup {
        let mode = if strict_mode {
            EngineMode::strict()
        } else {
            EngineMode::lenient()
        };
        debug!(strict_mode, "Creating agency mapping lookup");
        match &self.connector {
            Some(connector) => MappingLookup::with_connector(connector.clone(), mode),
            None => MappingLookup::new(mode),
        }
    }

    /// The live engine for `strict_mode`, creating (and replacing) as needed
    pub fn get_lookup(&mut self, strict_mode: bool) -> &mut MappingLookup {
        let engine = match self.current.take() {
            Some(engine) if engine.strict_mode() == strict_mode => engine,
            _ => self.build(strict_mode),
        };
        self.current.insert(engine)
    }

    /// Mode of the live engine, if any
    pub fn current_mode(&self) -> Option<EngineMode> {
        self.current.as_ref().map(MappingLookup::mode)
    }
}

static GLOBAL_REGISTRY: OnceLock<Mutex<LookupRegistry>> = OnceLock::new();

/// Process-wide registry used by the convenience functions
pub fn global_registry() -> &'static Mutex<LookupRegistry> {
    GLOBAL_REGISTRY.get_or_init(|| Mutex::new(LookupRegistry::new()))
}

/// Install the process-wide registry (e.g. one built with
/// [`LookupRegistry::with_connector`]). Only possible before first use;
/// otherwise the registry is handed back.
pub fn install_global_registry(registry: LookupRegistry) -> Result<(), LookupRegistry> {
    GLOBAL_REGISTRY
        .set(Mutex::new(registry))
        .map_err(Mutex::into_inner)
}

/// Strict header-mapping lookup on the shared engine
pub async fn get_header_mapping(
    dataset_key: &str,
    state: Option<&str>,
) -> Result<HeaderMapping, LookupError> {
    let mut registry = global_registry().lock().await;
    registry
        .get_lookup(true)
        .require_header_mapping(dataset_key, state)
        .await
}

/// Strict agency-by-name lookup on the shared engine
pub async fn get_agency_by_name(agency_name: &str) -> Result<Agency, LookupError> {
    let mut registry = global_registry().lock().await;
    registry
        .get_lookup(true)
        .require_agency_by_name(agency_name)
        .await
}

/// Strict agency-by-id lookup on the shared engine
pub async fn get_agency_by_id(agency_id: i64) -> Result<Agency, LookupError> {
    let mut registry = global_registry().lock().await;
    registry.get_lookup(true).require_agency_by_id(agency_id).await
}

/// Strict agencies-by-state lookup on the shared engine
pub async fn get_agencies_by_state(state: &str) -> Result<Vec<Agency>, LookupError> {
    let mut registry = global_registry().lock().await;
    registry.get_lookup(true).require_agencies_by_state(state).await
}
