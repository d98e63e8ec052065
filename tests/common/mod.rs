//! In-memory stand-in for the mapping tables
//!
//! `MockConnector` answers the lookup engine's three query shapes from a small
//! fixture set and counts every connection lifecycle call.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use agency_lookup::database::{Connection, Connector, QueryResult, Value};
use agency_lookup::mapping::HeaderMapping;
use agency_lookup::DbError;
use async_trait::async_trait;

type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Clone)]
pub struct AgencyRow {
    pub agency_id: i64,
    pub agency_name: &'static str,
    pub state: &'static str,
}

#[derive(Debug, Clone)]
pub struct MappingRow {
    pub id: i64,
    pub dataset: &'static str,
    pub agency_name: &'static str,
    pub state: &'static str,
    pub business_name: &'static str,
}

#[derive(Debug, Default)]
pub struct Counters {
    pub connects: AtomicUsize,
    pub queries: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub closes: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Rows served by every connection
#[derive(Debug, Clone)]
pub struct Fixture {
    pub agencies: Vec<AgencyRow>,
    pub mappings: Vec<MappingRow>,
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            agencies: vec![
                AgencyRow {
                    agency_id: 1,
                    agency_name: "Board for Contractors",
                    state: "VA",
                },
                AgencyRow {
                    agency_id: 2,
                    agency_name: "TN Board for Licensing Contractors",
                    state: "TN",
                },
                AgencyRow {
                    agency_id: 3,
                    agency_name: "TN Real Estate Commission",
                    state: "TN",
                },
            ],
            mappings: vec![
                MappingRow {
                    id: 10,
                    dataset: "0401 Contractors",
                    agency_name: "Board for Contractors",
                    state: "VA",
                    business_name: "BusinessName",
                },
                MappingRow {
                    id: 11,
                    dataset: "1301 B Tradesman",
                    agency_name: "Board for Contractors",
                    state: "VA",
                    business_name: "Firm",
                },
                MappingRow {
                    id: 12,
                    dataset: "103 Home Improvement",
                    agency_name: "TN Board for Licensing Contractors",
                    state: "TN",
                    business_name: "LICENSEE",
                },
            ],
        }
    }
}

impl Fixture {
    fn agency(&self, name: &str) -> Option<&AgencyRow> {
        self.agencies.iter().find(|a| a.agency_name == name)
    }

    fn header_rows(&self, params: &[Value]) -> QueryResult {
        let prefix = params
            .first()
            .and_then(Value::as_str)
            .map(unescape_prefix)
            .unwrap_or_default()
            .to_lowercase();
        let state = params.get(1).and_then(Value::as_str);

        let rows = self
            .mappings
            .iter()
            .filter(|m| m.dataset.to_lowercase().starts_with(&prefix))
            .filter(|m| state.is_none_or(|s| m.state == s))
            .take(1)
            .filter_map(|m| {
                let agency = self.agency(m.agency_name)?;
                Some(
                    HeaderMapping::labels()
                        .iter()
                        .map(|label| match *label {
                            "Agency ID" => Value::Int(agency.agency_id),
                            "Agency Name" => m.agency_name.into(),
                            "State Established" => m.state.into(),
                            "Business Name" => m.business_name.into(),
                            "Dataset" => m.dataset.into(),
                            "Mapping ID" => Value::Int(m.id),
                            _ => Value::Null,
                        })
                        .collect(),
                )
            })
            .collect();

        QueryResult::new(
            HeaderMapping::labels().iter().map(|l| l.to_string()).collect(),
            rows,
        )
    }

    fn agency_rows(&self, matches: impl Fn(&AgencyRow) -> bool) -> QueryResult {
        let mut selected: Vec<&AgencyRow> = self.agencies.iter().filter(|a| matches(*a)).collect();
        selected.sort_by_key(|a| a.agency_name);
        let rows = selected
            .into_iter()
            .map(|a| {
                vec![
                    Value::Int(a.agency_id),
                    a.agency_name.into(),
                    a.state.into(),
                    Value::Null,
                    Value::Null,
                    Value::Null,
                ]
            })
            .collect();
        QueryResult::new(
            ["agency_id", "agency_name", "state", "bbb_id", "agency_url", "tob_id"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            rows,
        )
    }

    fn answer(&self, sql: &str, params: &[Value]) -> DbResult<QueryResult> {
        if sql.contains("header_mappings") {
            return Ok(self.header_rows(params));
        }
        let param = params.first().cloned().unwrap_or(Value::Null);
        if sql.contains("agency_name = $1") {
            let name = param.as_str().unwrap_or_default().to_string();
            Ok(self.agency_rows(|a| a.agency_name == name))
        } else if sql.contains("agency_id = $1") {
            let id = param.as_i64();
            Ok(self.agency_rows(|a| Some(a.agency_id) == id))
        } else if sql.contains("state = $1") {
            let state = param.as_str().unwrap_or_default().to_string();
            Ok(self.agency_rows(|a| a.state == state))
        } else if sql.trim() == "SELECT 1" {
            Ok(QueryResult::new(vec!["?column?".into()], vec![vec![Value::Int(1)]]))
        } else {
            Err(DbError::query_with_sql("unexpected statement", sql))
        }
    }
}

/// `1301 B%` → `1301 B`, dropping the escape backslashes
fn unescape_prefix(pattern: &str) -> String {
    let body = pattern.strip_suffix('%').unwrap_or(pattern);
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

pub struct MockConnector {
    pub fixture: Arc<Fixture>,
    pub counters: Arc<Counters>,
    /// Every query fails while set
    pub fail_queries: Arc<AtomicBool>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::with_fixture(Fixture::default())
    }

    pub fn with_fixture(fixture: Fixture) -> Self {
        Self {
            fixture: Arc::new(fixture),
            counters: Arc::new(Counters::default()),
            fail_queries: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn queries(&self) -> usize {
        Counters::get(&self.counters.queries)
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_queries.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> DbResult<Box<dyn Connection>> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            fixture: self.fixture.clone(),
            counters: self.counters.clone(),
            fail_queries: self.fail_queries.load(Ordering::SeqCst),
        }))
    }
}

struct MockConnection {
    fixture: Arc<Fixture>,
    counters: Arc<Counters>,
    fail_queries: bool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> DbResult<QueryResult> {
        self.counters.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_queries {
            return Err(DbError::query("server closed the connection unexpectedly"));
        }
        self.fixture.answer(sql, params)
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.counters.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
