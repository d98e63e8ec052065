//! Agency and header-mapping lookups
//!
//! ```text
//! caller ─► LookupRegistry::get_lookup(strict)
//!              │
//!              ▼
//!         MappingLookup ──► cache hit ─────────────────────────► record
//!              │
//!              └─ miss ─► normalize_dataset_key ─► with_connection ─► query
//!                                                  └─► decode ─► cache ─► record
//! ```
//!
//! No fallback mappings exist: a dataset without a row in `header_mappings`
//! is a data-quality failure, not something to guess around.

pub mod lookup;
pub mod normalize;
pub mod records;
pub mod registry;

pub use lookup::{EngineMode, Lookup, MappingLookup};
pub use normalize::normalize_dataset_key;
pub use records::{Agency, HeaderMapping};
pub use registry::{
    get_agencies_by_state, get_agency_by_id, get_agency_by_name, get_header_mapping,
    global_registry, install_global_registry, LookupRegistry,
};
