//! Lookup engine behaviour against an in-memory connector

mod common;

use std::sync::Arc;

use agency_lookup::database::{ConfigResolver, PgConnector, StaticEnvironment};
use agency_lookup::error::NotFoundReason;
use agency_lookup::mapping::Lookup;
use agency_lookup::{ConfigError, EngineMode, LookupError, MappingLookup, MappingNotFoundError};
use common::{Counters, MockConnector};
use tempfile::TempDir;

fn engine(mode: EngineMode) -> (MappingLookup, Arc<MockConnector>) {
    let connector = Arc::new(MockConnector::new());
    (MappingLookup::with_connector(connector.clone(), mode), connector)
}

fn not_found(err: LookupError) -> MappingNotFoundError {
    match err {
        LookupError::NotFound(err) => err,
        LookupError::Config(err) => panic!("expected a miss, got config error: {err}"),
    }
}

// =============================================================================
// HEADER MAPPINGS
// =============================================================================

#[tokio::test]
async fn test_header_mapping_found_and_cached() {
    let (mut lookup, connector) = engine(EngineMode::strict());

    let first = lookup.require_header_mapping("0401", None).await.unwrap();
    assert_eq!(first.agency_name, "Board for Contractors");
    assert_eq!(first.agency_id, 1);
    assert_eq!(connector.queries(), 1);

    let second = lookup.require_header_mapping("0401", None).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(connector.queries(), 1, "second lookup must be served from cache");
    assert_eq!(lookup.cache_keys(), vec!["0401".to_string()]);
}

#[tokio::test]
async fn test_header_mapping_with_state_cached() {
    let (mut lookup, connector) = engine(EngineMode::strict());

    let first = lookup.get_header_mapping("0401", Some("VA")).await.unwrap();
    let second = lookup.get_header_mapping("0401", Some("VA")).await.unwrap();

    assert!(first.is_some());
    assert_eq!(first, second);
    assert_eq!(connector.queries(), 1);
    assert_eq!(Counters::get(&connector.counters.connects), 1);
    assert_eq!(lookup.cache_keys(), vec!["0401_VA".to_string()]);

    // a different state is a different cache entry
    assert!(lookup.get_header_mapping("0401", None).await.unwrap().is_some());
    assert_eq!(connector.queries(), 2);
}

#[tokio::test]
async fn test_dataset_key_normalized_before_query() {
    let (mut lookup, _) = engine(EngineMode::strict());

    let mapping = lookup.require_header_mapping("1301b", None).await.unwrap();
    assert_eq!(mapping.dataset, "1301 B Tradesman");
    assert_eq!(mapping.business_name.as_deref(), Some("Firm"));
    // cached under the caller's spelling
    assert_eq!(lookup.cache_keys(), vec!["1301b".to_string()]);
}

#[tokio::test]
async fn test_state_filter_narrows_match() {
    let (mut lookup, _) = engine(EngineMode::strict());

    assert!(lookup
        .find_header_mapping("0401", Some("VA"))
        .await
        .unwrap()
        .is_found());
    assert_eq!(lookup.cache_keys(), vec!["0401_VA".to_string()]);

    let err = not_found(
        lookup
            .require_header_mapping("0401", Some("TN"))
            .await
            .unwrap_err(),
    );
    assert_eq!(err.reason(), NotFoundReason::Missing);
    assert_eq!(err.message(), "No header mappings found for dataset: 0401 in state: TN");
}

#[tokio::test]
async fn test_empty_state_means_unfiltered() {
    let (mut lookup, _) = engine(EngineMode::strict());
    assert!(lookup
        .find_header_mapping("103", Some(""))
        .await
        .unwrap()
        .is_found());
    assert_eq!(lookup.cache_keys(), vec!["103".to_string()]);
}

#[tokio::test]
async fn test_strict_and_lenient_miss() {
    let (mut strict, _) = engine(EngineMode::strict());
    let err = not_found(strict.get_header_mapping("0401", Some("ZZ")).await.unwrap_err());
    assert_eq!(err.subject(), "0401");
    assert_eq!(err.state(), Some("ZZ"));

    let (mut lenient, _) = engine(EngineMode::lenient());
    assert_eq!(lenient.get_header_mapping("0401", Some("ZZ")).await.unwrap(), None);
}

#[tokio::test]
async fn test_misses_are_not_cached() {
    let (mut lookup, connector) = engine(EngineMode::lenient());
    for _ in 0..2 {
        let outcome = lookup.find_header_mapping("NONEXISTENT", None).await.unwrap();
        assert!(!outcome.is_found());
    }
    assert_eq!(connector.queries(), 2);
    assert_eq!(lookup.cache_len(), 0);
}

#[tokio::test]
async fn test_backend_failure_surfaces_as_not_found() {
    let (mut lookup, connector) = engine(EngineMode::strict());
    connector.set_failing(true);

    let err = not_found(lookup.require_header_mapping("0401", None).await.unwrap_err());
    assert_eq!(err.reason(), NotFoundReason::Backend);
    assert!(err.message().starts_with("Database query failed for 0401:"));
    assert_eq!(Counters::get(&connector.counters.rollbacks), 1);
    assert_eq!(Counters::get(&connector.counters.closes), 1);

    // lenient engines swallow it like any other miss
    let (mut lenient, connector) = engine(EngineMode::lenient());
    connector.set_failing(true);
    assert_eq!(lenient.get_header_mapping("0401", None).await.unwrap(), None);
}

#[tokio::test]
async fn test_cache_disabled_always_queries() {
    let (mut lookup, connector) = engine(EngineMode::strict().with_cache(false));
    lookup.require_header_mapping("0401", None).await.unwrap();
    lookup.require_header_mapping("0401", None).await.unwrap();
    assert_eq!(connector.queries(), 2);
    assert!(lookup.cache_keys().is_empty());
}

#[tokio::test]
async fn test_clear_cache_forces_requery() {
    let (mut lookup, connector) = engine(EngineMode::strict());
    lookup.require_header_mapping("0401", None).await.unwrap();
    lookup.require_agency_by_id(2).await.unwrap();
    assert_eq!(lookup.cache_len(), 2);

    lookup.clear_cache();
    assert_eq!(lookup.cache_len(), 0);

    lookup.require_header_mapping("0401", None).await.unwrap();
    assert_eq!(connector.queries(), 3);
}

// =============================================================================
// AGENCIES
// =============================================================================

#[tokio::test]
async fn test_agency_by_name_and_id() {
    let (mut lookup, connector) = engine(EngineMode::strict());

    let by_name = lookup
        .require_agency_by_name("TN Real Estate Commission")
        .await
        .unwrap();
    assert_eq!(by_name.agency_id, 3);
    assert_eq!(by_name.state, "TN");

    let by_id = lookup.require_agency_by_id(3).await.unwrap();
    assert_eq!(by_id, by_name);

    // name and id entries are cached independently
    lookup.require_agency_by_id(3).await.unwrap();
    assert_eq!(connector.queries(), 2);
    assert_eq!(
        lookup.cache_keys(),
        vec![
            "agency_TN Real Estate Commission".to_string(),
            "agency_id_3".to_string()
        ]
    );
}

#[tokio::test]
async fn test_agency_misses() {
    let (mut strict, _) = engine(EngineMode::strict());
    let err = not_found(strict.get_agency_by_name("Nobody").await.unwrap_err());
    assert_eq!(err.message(), "Agency not found: Nobody");
    let err = not_found(strict.get_agency_by_id(999).await.unwrap_err());
    assert_eq!(err.message(), "Agency not found with ID: 999");

    let (mut lenient, _) = engine(EngineMode::lenient());
    assert_eq!(lenient.get_agency_by_name("Nobody").await.unwrap(), None);
    assert_eq!(lenient.get_agency_by_id(999).await.unwrap(), None);
    // require ignores the engine's mode
    assert!(lenient.require_agency_by_id(999).await.is_err());
}

#[tokio::test]
async fn test_agency_backend_failures() {
    let (mut strict, connector) = engine(EngineMode::strict());
    connector.set_failing(true);

    let err = not_found(strict.get_agency_by_name("Board for Contractors").await.unwrap_err());
    assert_eq!(err.reason(), NotFoundReason::Backend);
    assert!(err
        .message()
        .starts_with("Failed to get agency by name 'Board for Contractors':"));

    let err = not_found(strict.get_agency_by_id(1).await.unwrap_err());
    assert_eq!(err.reason(), NotFoundReason::Backend);
    assert!(err.message().starts_with("Failed to get agency by ID '1':"));

    let err = not_found(strict.get_agencies_by_state("tn").await.unwrap_err());
    assert_eq!(err.reason(), NotFoundReason::Backend);
    assert!(err.message().starts_with("Failed to get agencies for state 'tn':"));
    assert_eq!(err.state(), Some("TN"));
    assert_eq!(strict.cache_len(), 0);

    let (mut lenient, connector) = engine(EngineMode::lenient());
    connector.set_failing(true);
    assert_eq!(lenient.get_agency_by_name("Board for Contractors").await.unwrap(), None);
    assert_eq!(lenient.get_agency_by_id(1).await.unwrap(), None);
    assert!(lenient.get_agencies_by_state("TN").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_agencies_by_state() {
    let (mut lookup, connector) = engine(EngineMode::strict());

    let agencies = lookup.get_agencies_by_state("tn").await.unwrap();
    let names: Vec<_> = agencies.iter().map(|a| a.agency_name.as_str()).collect();
    assert_eq!(
        names,
        ["TN Board for Licensing Contractors", "TN Real Estate Commission"]
    );

    // never cached
    lookup.get_agencies_by_state("TN").await.unwrap();
    assert_eq!(connector.queries(), 2);
    assert_eq!(lookup.cache_len(), 0);

    let err = not_found(lookup.get_agencies_by_state("ZZ").await.unwrap_err());
    assert_eq!(err.message(), "No agencies found for state: ZZ");

    let (mut lenient, _) = engine(EngineMode::lenient());
    assert!(lenient.get_agencies_by_state("ZZ").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_find_reports_outcome_without_mode() {
    let (mut lookup, _) = engine(EngineMode::strict());
    match lookup.find_agency_by_id(42).await.unwrap() {
        Lookup::NotFound(err) => assert_eq!(err.subject(), "42"),
        Lookup::Found(agency) => panic!("unexpected agency {agency:?}"),
    }
}

// =============================================================================
// CONFIGURATION ERRORS
// =============================================================================

/// Engine over the real Postgres connector, reading a config file without a password
fn engine_without_password(home: &TempDir, mode: EngineMode) -> MappingLookup {
    let dir = home.path().join(".vk");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("db_config.json"), r#"{"host": "db.internal"}"#).unwrap();

    let env = StaticEnvironment::default().with_home(home.path());
    let connector = PgConnector::new(ConfigResolver::new(Arc::new(env)));
    MappingLookup::with_connector(Arc::new(connector), mode)
}

fn assert_missing_password(err: LookupError) {
    match err {
        LookupError::Config(ConfigError::MissingField { field, .. }) => {
            assert_eq!(field, "password")
        }
        other => panic!("expected missing password, got {other:?}"),
    }
}

#[tokio::test]
async fn test_config_error_is_never_a_miss() {
    let home = TempDir::new().unwrap();

    for mode in [EngineMode::strict(), EngineMode::lenient()] {
        let mut lookup = engine_without_password(&home, mode);

        assert_missing_password(lookup.get_header_mapping("0401", None).await.unwrap_err());
        assert_missing_password(lookup.get_agency_by_name("Board").await.unwrap_err());
        assert_missing_password(lookup.get_agency_by_id(1).await.unwrap_err());
        assert_missing_password(lookup.get_agencies_by_state("VA").await.unwrap_err());
        assert_missing_password(lookup.require_agency_by_id(1).await.unwrap_err());
        assert!(matches!(
            lookup.find_header_mapping("0401", Some("VA")).await,
            Err(ConfigError::MissingField { .. })
        ));
    }
}

#[tokio::test]
async fn test_verify_survives_config_error() {
    let home = TempDir::new().unwrap();
    let mut lookup = engine_without_password(&home, EngineMode::lenient());

    let results = lookup.verify_dataset_mappings(&["0401", "103"], None).await;
    assert_eq!(results.len(), 2);
    assert!(results.values().all(|found| !found));
}

// =============================================================================
// PRE-FLIGHT
// =============================================================================

#[tokio::test]
async fn test_verify_dataset_mappings() {
    for mode in [EngineMode::strict(), EngineMode::lenient()] {
        let (mut lookup, _) = engine(mode);
        let results = lookup
            .verify_dataset_mappings(&["0401", "NONEXISTENT", "1301b"], None)
            .await;

        assert_eq!(results.len(), 3);
        assert!(results["0401"]);
        assert!(!results["NONEXISTENT"]);
        assert!(results["1301b"]);
    }
}

#[tokio::test]
async fn test_verify_with_state() {
    let (mut lookup, _) = engine(EngineMode::strict());
    let results = lookup
        .verify_dataset_mappings(&["0401", "103"], Some("TN"))
        .await;
    assert!(!results["0401"]);
    assert!(results["103"]);
}
