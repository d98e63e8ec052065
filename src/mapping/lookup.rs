//! Cached, strict-mode-aware lookups against the mapping tables
//!
//! The `find_*` methods are mode-free: they return a [`Lookup`] and leave the
//! decision to the caller. The `get_*` methods apply the engine's
//! [`EngineMode`]; the `require_*` methods always fail loudly.
//!
//! Storage failures become [`NotFoundReason::Backend`] misses. A
//! [`ConfigError`] is different: it means no database could be reached at all,
//! so every method hands it back unchanged in either mode.
//!
//! The cache is unbounded and never invalidated on its own. It assumes the
//! mapping tables do not change while the process runs; call
//! [`MappingLookup::clear_cache`] after editing them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::normalize::normalize_dataset_key;
use super::records::{all_rows, first_row, Agency, HeaderMapping};
use crate::database::{with_connection, Connector, PgConnector, QueryResult, Value};
use crate::error::{
    ConfigError, DbError, DbResult, LookupError, MappingNotFoundError, NotFoundReason,
};

// =============================================================================
// OUTCOMES AND MODES
// =============================================================================

/// Outcome of a mode-free lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound(MappingNotFoundError),
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound(_) => None,
        }
    }

    pub fn into_result(self) -> Result<T, MappingNotFoundError> {
        match self {
            Self::Found(value) => Ok(value),
            Self::NotFound(err) => Err(err),
        }
    }
}

/// Engine policy, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineMode {
    pub use_cache: bool,
    /// Misses fail instead of returning `None`/empty
    pub strict_mode: bool,
}

impl Default for EngineMode {
    fn default() -> Self {
        Self::strict()
    }
}

impl EngineMode {
    pub const fn strict() -> Self {
        Self {
            use_cache: true,
            strict_mode: true,
        }
    }

    pub const fn lenient() -> Self {
        Self {
            use_cache: true,
            strict_mode: false,
        }
    }

    pub const fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }
}

// =============================================================================
// CACHE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    /// Raw dataset key as the caller spelled it
    Header {
        dataset_key: String,
        state: Option<String>,
    },
    AgencyName(String),
    AgencyId(i64),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header {
                dataset_key,
                state: Some(state),
            } => write!(f, "{dataset_key}_{state}"),
            Self::Header {
                dataset_key,
                state: None,
            } => f.write_str(dataset_key),
            Self::AgencyName(name) => write!(f, "agency_{name}"),
            Self::AgencyId(id) => write!(f, "agency_id_{id}"),
        }
    }
}

#[derive(Debug, Clone)]
enum Cached {
    Header(HeaderMapping),
    Agency(Agency),
}

// =============================================================================
// QUERIES
// =============================================================================

fn header_mapping_sql(with_state: bool) -> String {
    let mut sql = format!(
        r#"
        SELECT {}
        FROM public.header_mappings AS hm
        JOIN licensing_agencies la ON hm.agency_name = la.agency_name
        WHERE hm.dataset ILIKE $1 ESCAPE '\'"#,
        HeaderMapping::COLUMNS
    );
    if with_state {
        sql.push_str(" AND hm.state = $2");
    }
    sql.push_str(" LIMIT 1");
    sql
}

fn agency_sql(filter: &str) -> String {
    format!(
        "SELECT {} FROM licensing_agencies WHERE {}",
        Agency::COLUMNS,
        filter
    )
}

/// `LIKE` pattern matching values that start with `prefix` literally
fn prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

// =============================================================================
// ENGINE
// =============================================================================

/// Looks up agencies and header mappings, caching single-row results
pub struct MappingLookup {
    mode: EngineMode,
    cache: Option<HashMap<CacheKey, Cached>>,
    /// Built on first query when not injected
    connector: Option<Arc<dyn Connector>>,
}

impl Default for MappingLookup {
    fn default() -> Self {
        Self::new(EngineMode::default())
    }
}

impl fmt::Debug for MappingLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingLookup")
            .field("mode", &self.mode)
            .field("cached", &self.cache_len())
            .field("connected", &self.connector.is_some())
            .finish()
    }
}

impl MappingLookup {
    /// Engine that connects to PostgreSQL with the resolved config on first use
    pub fn new(mode: EngineMode) -> Self {
        Self {
            mode,
            cache: mode.use_cache.then(HashMap::new),
            connector: None,
        }
    }

    pub fn with_connector(connector: Arc<dyn Connector>, mode: EngineMode) -> Self {
        Self {
            connector: Some(connector),
            ..Self::new(mode)
        }
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn strict_mode(&self) -> bool {
        self.mode.strict_mode
    }

    pub fn use_cache(&self) -> bool {
        self.mode.use_cache
    }

    pub fn cache_len(&self) -> usize {
        self.cache.as_ref().map_or(0, HashMap::len)
    }

    /// Cache keys in their `{dataset}_{state}` / `agency_{name}` / `agency_id_{id}` form
    pub fn cache_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .cache
            .iter()
            .flat_map(|cache| cache.keys().map(ToString::to_string))
            .collect();
        keys.sort();
        keys
    }

    pub fn clear_cache(&mut self) {
        if let Some(cache) = self.cache.as_mut() {
            cache.clear();
            debug!("Agency mapping cache cleared");
        }
    }

    fn connector(&mut self) -> Arc<dyn Connector> {
        self.connector
            .get_or_insert_with(|| Arc::new(PgConnector::default()))
            .clone()
    }

    fn cached(&self, key: &CacheKey) -> Option<&Cached> {
        let hit = self.cache.as_ref()?.get(key);
        if hit.is_some() {
            debug!(%key, "cache hit");
        }
        hit
    }

    fn store(&mut self, key: CacheKey, value: Cached) {
        if let Some(cache) = self.cache.as_mut() {
            cache.insert(key, value);
        }
    }

    async fn run_query(&mut self, sql: String, params: Vec<Value>) -> DbResult<QueryResult> {
        let connector = self.connector();
        with_connection::<_, DbError, _>(connector.as_ref(), move |conn| {
            Box::pin(async move { conn.query(&sql, &params).await })
        })
        .await
    }

    /// Apply the engine's mode to a mode-free outcome
    fn settle<T>(
        &self,
        outcome: Result<Lookup<T>, ConfigError>,
    ) -> Result<Option<T>, LookupError> {
        match outcome? {
            Lookup::Found(value) => Ok(Some(value)),
            Lookup::NotFound(err) if self.mode.strict_mode => {
                if !err.is_backend_failure() {
                    error!("{}", err);
                }
                Err(err.into())
            }
            Lookup::NotFound(err) => {
                if !err.is_backend_failure() {
                    warn!("{}", err);
                }
                Ok(None)
            }
        }
    }

    fn require<T>(outcome: Result<Lookup<T>, ConfigError>) -> Result<T, LookupError> {
        let found = outcome?.into_result().inspect_err(|err| {
            if !err.is_backend_failure() {
                error!("{}", err);
            }
        })?;
        Ok(found)
    }

    /// Split off the one storage failure that must not become a miss
    fn fatal(err: DbError) -> Result<DbError, ConfigError> {
        match err {
            DbError::Config(config) => {
                error!("Database configuration error: {}", config);
                Err(config)
            }
            other => Ok(other),
        }
    }

    // -------------------------------------------------------------------------
    // Header mappings
    // -------------------------------------------------------------------------

    /// Header mapping for a dataset key, optionally narrowed to one state.
    ///
    /// Matches stored labels that start with the normalized key. When several
    /// rows match, the first one storage returns wins; pass `state` to
    /// disambiguate.
    pub async fn find_header_mapping(
        &mut self,
        dataset_key: &str,
        state: Option<&str>,
    ) -> Result<Lookup<HeaderMapping>, ConfigError> {
        let state = state.filter(|s| !s.is_empty());
        let key = CacheKey::Header {
            dataset_key: dataset_key.to_string(),
            state: state.map(str::to_owned),
        };
        if let Some(Cached::Header(mapping)) = self.cached(&key) {
            return Ok(Lookup::Found(mapping.clone()));
        }

        let normalized = normalize_dataset_key(dataset_key);
        let mut params = vec![Value::Text(prefix_pattern(&normalized))];
        if let Some(state) = state {
            params.push(state.into());
        }

        let fetched = self
            .run_query(header_mapping_sql(state.is_some()), params)
            .await
            .and_then(|result| first_row(&result, HeaderMapping::from_row));

        let outcome = match fetched {
            Ok(Some(mapping)) => {
                debug!(
                    "Found header mapping for {}: {}",
                    normalized, mapping.agency_name
                );
                self.store(key, Cached::Header(mapping.clone()));
                Lookup::Found(mapping)
            }
            Ok(None) => {
                let mut message = format!("No header mappings found for dataset: {normalized}");
                if let Some(state) = state {
                    message.push_str(&format!(" in state: {state}"));
                }
                Lookup::NotFound(MappingNotFoundError::new(
                    NotFoundReason::Missing,
                    message,
                    normalized,
                    state,
                ))
            }
            Err(e) => {
                let e = Self::fatal(e)?;
                let message = format!("Database query failed for {normalized}: {e}");
                error!("{}", message);
                Lookup::NotFound(MappingNotFoundError::new(
                    NotFoundReason::Backend,
                    message,
                    normalized,
                    state,
                ))
            }
        };
        Ok(outcome)
    }

    pub async fn get_header_mapping(
        &mut self,
        dataset_key: &str,
        state: Option<&str>,
    ) -> Result<Option<HeaderMapping>, LookupError> {
        let outcome = self.find_header_mapping(dataset_key, state).await;
        self.settle(outcome)
    }

    pub async fn require_header_mapping(
        &mut self,
        dataset_key: &str,
        state: Option<&str>,
    ) -> Result<HeaderMapping, LookupError> {
        Self::require(self.find_header_mapping(dataset_key, state).await)
    }

    // -------------------------------------------------------------------------
    // Agencies
    // -------------------------------------------------------------------------

    /// Single-row agency query shared by the name and id lookups
    async fn find_agency(
        &mut self,
        key: CacheKey,
        filter: &str,
        param: Value,
        describe: &str,
    ) -> Result<Lookup<Agency>, ConfigError> {
        if let Some(Cached::Agency(agency)) = self.cached(&key) {
            return Ok(Lookup::Found(agency.clone()));
        }

        let fetched = self
            .run_query(agency_sql(filter), vec![param])
            .await
            .and_then(|result| first_row(&result, Agency::from_row));

        let subject = match &key {
            CacheKey::AgencyId(id) => id.to_string(),
            CacheKey::AgencyName(name) => name.clone(),
            CacheKey::Header { dataset_key, .. } => dataset_key.clone(),
        };

        let outcome = match fetched {
            Ok(Some(agency)) => {
                self.store(key, Cached::Agency(agency.clone()));
                Lookup::Found(agency)
            }
            Ok(None) => {
                let message = match key {
                    CacheKey::AgencyId(id) => format!("Agency not found with ID: {id}"),
                    _ => format!("Agency not found: {subject}"),
                };
                Lookup::NotFound(MappingNotFoundError::new(
                    NotFoundReason::Missing,
                    message,
                    subject,
                    None,
                ))
            }
            Err(e) => {
                let e = Self::fatal(e)?;
                let message = format!("Failed to get agency by {describe}: {e}");
                error!("{}", message);
                Lookup::NotFound(MappingNotFoundError::new(
                    NotFoundReason::Backend,
                    message,
                    subject,
                    None,
                ))
            }
        };
        Ok(outcome)
    }

    pub async fn find_agency_by_name(
        &mut self,
        agency_name: &str,
    ) -> Result<Lookup<Agency>, ConfigError> {
        self.find_agency(
            CacheKey::AgencyName(agency_name.to_string()),
            "agency_name = $1 LIMIT 1",
            agency_name.into(),
            &format!("name '{agency_name}'"),
        )
        .await
    }

    pub async fn get_agency_by_name(
        &mut self,
        agency_name: &str,
    ) -> Result<Option<Agency>, LookupError> {
        let outcome = self.find_agency_by_name(agency_name).await;
        self.settle(outcome)
    }

    pub async fn require_agency_by_name(
        &mut self,
        agency_name: &str,
    ) -> Result<Agency, LookupError> {
        Self::require(self.find_agency_by_name(agency_name).await)
    }

    pub async fn find_agency_by_id(
        &mut self,
        agency_id: i64,
    ) -> Result<Lookup<Agency>, ConfigError> {
        self.find_agency(
            CacheKey::AgencyId(agency_id),
            "agency_id = $1 LIMIT 1",
            agency_id.into(),
            &format!("ID '{agency_id}'"),
        )
        .await
    }

    pub async fn get_agency_by_id(
        &mut self,
        agency_id: i64,
    ) -> Result<Option<Agency>, LookupError> {
        let outcome = self.find_agency_by_id(agency_id).await;
        self.settle(outcome)
    }

    pub async fn require_agency_by_id(
        &mut self,
        agency_id: i64,
    ) -> Result<Agency, LookupError> {
        Self::require(self.find_agency_by_id(agency_id).await)
    }

    /// All agencies in a state, ordered by name. Never cached.
    pub async fn find_agencies_by_state(
        &mut self,
        state: &str,
    ) -> Result<Lookup<Vec<Agency>>, ConfigError> {
        let code = state.to_uppercase();
        let fetched = self
            .run_query(
                agency_sql("state = $1 ORDER BY agency_name"),
                vec![code.clone().into()],
            )
            .await
            .and_then(|result| all_rows(&result, Agency::from_row));

        let outcome = match fetched {
            Ok(agencies) if !agencies.is_empty() => Lookup::Found(agencies),
            Ok(_) => Lookup::NotFound(MappingNotFoundError::new(
                NotFoundReason::Missing,
                format!("No agencies found for state: {state}"),
                code.as_str(),
                Some(code.as_str()),
            )),
            Err(e) => {
                let e = Self::fatal(e)?;
                let message = format!("Failed to get agencies for state '{state}': {e}");
                error!("{}", message);
                Lookup::NotFound(MappingNotFoundError::new(
                    NotFoundReason::Backend,
                    message,
                    code.as_str(),
                    Some(code.as_str()),
                ))
            }
        };
        Ok(outcome)
    }

    /// Strict: fails on no rows. Lenient: empty vec.
    pub async fn get_agencies_by_state(
        &mut self,
        state: &str,
    ) -> Result<Vec<Agency>, LookupError> {
        let outcome = self.find_agencies_by_state(state).await;
        self.settle(outcome).map(Option::unwrap_or_default)
    }

    pub async fn require_agencies_by_state(
        &mut self,
        state: &str,
    ) -> Result<Vec<Agency>, LookupError> {
        Self::require(self.find_agencies_by_state(state).await)
    }

    // -------------------------------------------------------------------------
    // Pre-flight
    // -------------------------------------------------------------------------

    /// Check a batch of dataset keys before processing. Never fails; each key
    /// maps to whether a header mapping exists. A config error marks the key
    /// missing and is logged at error level.
    pub async fn verify_dataset_mappings<S: AsRef<str>>(
        &mut self,
        dataset_keys: &[S],
        state: Option<&str>,
    ) -> BTreeMap<String, bool> {
        let mut results = BTreeMap::new();
        let mut missing = Vec::new();

        for key in dataset_keys {
            let key = key.as_ref();
            let found = match self.get_header_mapping(key, state).await {
                Ok(found) => found.is_some(),
                Err(LookupError::Config(e)) => {
                    error!("Cannot verify {}: {}", key, e);
                    false
                }
                Err(LookupError::NotFound(_)) => false,
            };
            if !found {
                missing.push(key.to_string());
            }
            results.insert(key.to_string(), found);
        }

        if !missing.is_empty() {
            warn!("Missing mappings for datasets: {:?}", missing);
        }

        results
    }
}
