use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One raw passenger-flow record as managed through the data endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassengerRecord {
    pub id: i64,
    pub station_id: i64,
    pub station_name: String,
    #[serde(default)]
    pub line_id: Option<i64>,
    #[serde(default)]
    pub line_name: Option<String>,
    pub date: NaiveDate,
    #[serde(default)]
    pub hour: Option<u8>,
    pub passengers_in: i64,
    pub passengers_out: i64,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Partial update for a stored record; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub station_id: Option<i64>,
    pub station_name: Option<String>,
    pub line_id: Option<Option<i64>>,
    pub line_name: Option<Option<String>>,
    pub date: Option<NaiveDate>,
    pub hour: Option<Option<u8>>,
    pub passengers_in: Option<i64>,
    pub passengers_out: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPage {
    pub records: Vec<PassengerRecord>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReport {
    pub success: bool,
    pub records_processed: i64,
    pub records_imported: i64,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub row: i64,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub total_records: i64,
    pub valid_records: i64,
    pub invalid_records: i64,
    #[serde(default)]
    pub issues: Vec<ValidationIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub removed_duplicates: i64,
    pub removed_invalid: i64,
    pub remaining: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataStats {
    pub total_records: i64,
    pub station_count: i64,
    pub line_count: i64,
    pub train_count: i64,
    #[serde(default)]
    pub date_start: Option<NaiveDate>,
    #[serde(default)]
    pub date_end: Option<NaiveDate>,
    pub records_per_day: f64,
    #[serde(default)]
    pub last_updated: Option<String>,
}
