//! Typed rows for `licensing_agencies` and `header_mappings`
//!
//! Rows are validated once, when they leave the storage adapter. A column
//! that is missing or has the wrong shape is a
//! [`DbError::Decode`](crate::error::DbError::Decode), which the lookup
//! engine reports like any other backend failure.

use serde::{Deserialize, Serialize};

use crate::database::RowView;
use crate::error::DbResult;

/// A licensing authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agency {
    pub agency_id: i64,
    pub agency_name: String,
    pub state: String,
    pub bbb_id: Option<String>,
    pub agency_url: Option<String>,
    pub tob_id: Option<String>,
}

impl Agency {
    pub(crate) const COLUMNS: &'static str =
        "agency_id, agency_name, state, bbb_id, agency_url, tob_id";

    pub fn from_row(row: RowView<'_>) -> DbResult<Self> {
        Ok(Self {
            agency_id: row.require_i64("agency_id")?,
            agency_name: row.require_text("agency_name")?,
            state: row.optional_text("state")?.unwrap_or_default(),
            bbb_id: row.optional_text("bbb_id")?,
            agency_url: row.optional_text("agency_url")?,
            tob_id: row.optional_text("tob_id")?,
        })
    }
}

/// How one dataset's raw columns map onto the canonical output fields.
///
/// Most fields hold the *name of the source column* that feeds the canonical
/// field, so they are optional: a dataset may simply not carry a phone number.
/// Serializes with the labels downstream collectors already use as keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMapping {
    #[serde(rename = "Agency ID")]
    pub agency_id: i64,
    #[serde(rename = "Agency Name")]
    pub agency_name: String,
    #[serde(rename = "State Established")]
    pub state_established: Option<String>,
    #[serde(rename = "Business Name")]
    pub business_name: Option<String>,
    #[serde(rename = "Street")]
    pub street: Option<String>,
    #[serde(rename = "Zip")]
    pub zip: Option<String>,
    #[serde(rename = "Date Established")]
    pub date_established: Option<String>,
    #[serde(rename = "Category")]
    pub category: Option<String>,
    #[serde(rename = "License Number")]
    pub license_number: Option<String>,
    #[serde(rename = "Phone Number")]
    pub phone_number: Option<String>,
    #[serde(rename = "Owner First Name")]
    pub owner_first_name: Option<String>,
    #[serde(rename = "Owner Last Name")]
    pub owner_last_name: Option<String>,
    #[serde(rename = "Expiration Date")]
    pub expiration_date: Option<String>,
    #[serde(rename = "License Status")]
    pub license_status: Option<String>,
    #[serde(rename = "Email")]
    pub email: Option<String>,
    #[serde(rename = "Dataset")]
    pub dataset: String,
    #[serde(rename = "Mapping ID")]
    pub mapping_id: i64,
    #[serde(rename = "TOB ID")]
    pub tob_id: Option<String>,
    #[serde(rename = "Agency URL")]
    pub agency_url: Option<String>,
    #[serde(rename = "County")]
    pub county: Option<String>,
    #[serde(rename = "Suspension Date")]
    pub suspension_date: Option<String>,
    #[serde(rename = "Revocation Date")]
    pub revocation_date: Option<String>,
    #[serde(rename = "Inactive Date")]
    pub inactive_date: Option<String>,
}

impl HeaderMapping {
    /// Select list for the `header_mappings hm JOIN licensing_agencies la` query
    pub(crate) const COLUMNS: &'static str = r#"la.agency_id AS "Agency ID",
            hm.agency_name AS "Agency Name",
            hm.state AS "State Established",
            hm.business_name AS "Business Name",
            hm.street AS "Street",
            hm.zip AS "Zip",
            hm.date_established AS "Date Established",
            hm.category AS "Category",
            hm.license_number AS "License Number",
            hm.phone_number AS "Phone Number",
            hm.owner_first_name AS "Owner First Name",
            hm.owner_last_name AS "Owner Last Name",
            hm.expiration_date AS "Expiration Date",
            hm.license_status AS "License Status",
            hm.email AS "Email",
            hm.dataset AS "Dataset",
            hm.id AS "Mapping ID",
            hm.tobid AS "TOB ID",
            hm.agency_url AS "Agency URL",
            hm.county AS "County",
            hm.suspension_date AS "Suspension Date",
            hm.revocation_date AS "Revocation Date",
            hm.inactive_date AS "Inactive Date""#;

    pub fn from_row(row: RowView<'_>) -> DbResult<Self> {
        Ok(Self {
            agency_id: row.require_i64("Agency ID")?,
            agency_name: row.require_text("Agency Name")?,
            state_established: row.optional_text("State Established")?,
            business_name: row.optional_text("Business Name")?,
            street: row.optional_text("Street")?,
            zip: row.optional_text("Zip")?,
            date_established: row.optional_text("Date Established")?,
            category: row.optional_text("Category")?,
            license_number: row.optional_text("License Number")?,
            phone_number: row.optional_text("Phone Number")?,
            owner_first_name: row.optional_text("Owner First Name")?,
            owner_last_name: row.optional_text("Owner Last Name")?,
            expiration_date: row.optional_text("Expiration Date")?,
            license_status: row.optional_text("License Status")?,
            email: row.optional_text("Email")?,
            dataset: row.require_text("Dataset")?,
            mapping_id: row.require_i64("Mapping ID")?,
            tob_id: row.optional_text("TOB ID")?,
            agency_url: row.optional_text("Agency URL")?,
            county: row.optional_text("County")?,
            suspension_date: row.optional_text("Suspension Date")?,
            revocation_date: row.optional_text("Revocation Date")?,
            inactive_date: row.optional_text("Inactive Date")?,
        })
    }

    /// Column labels in select-list order
    pub fn labels() -> [&'static str; 23] {
        [
            "Agency ID",
            "Agency Name",
            "State Established",
            "Business Name",
            "Street",
            "Zip",
            "Date Established",
            "Category",
            "License Number",
            "Phone Number",
            "Owner First Name",
            "Owner Last Name",
            "Expiration Date",
            "License Status",
            "Email",
            "Dataset",
            "Mapping ID",
            "TOB ID",
            "Agency URL",
            "County",
            "Suspension Date",
            "Revocation Date",
            "Inactive Date",
        ]
    }
}

/// Decode helper used by the engine: first row or nothing
pub(crate) fn first_row<T>(
    result: &crate::database::QueryResult,
    decode: impl Fn(RowView<'_>) -> DbResult<T>,
) -> DbResult<Option<T>> {
    result.first().map(decode).transpose()
}

/// Decode every row
pub(crate) fn all_rows<T>(
    result: &crate::database::QueryResult,
    decode: impl Fn(RowView<'_>) -> DbResult<T>,
) -> DbResult<Vec<T>> {
    result.iter().map(decode).collect()
}
