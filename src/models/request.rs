use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Time-bucket width used to group passenger counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Quarter => "quarter",
            Granularity::Year => "year",
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Granularity {
    fn default() -> Self {
        Granularity::Day
    }
}

/// The filter set that scopes every analytical query: date range,
/// granularity, and optional entity filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(rename = "time_granularity", default)]
    pub granularity: Granularity,
    #[serde(default)]
    pub station_ids: Vec<i64>,
    #[serde(default)]
    pub line_ids: Vec<i64>,
    #[serde(default)]
    pub train_ids: Vec<i64>,
    #[serde(default)]
    pub metrics: Vec<String>,
}

impl AnalysisRequest {
    /// Default window: the 30 days leading up to today, day granularity.
    pub fn last_30_days() -> Self {
        let today = Utc::now().date_naive();
        let start = today.checked_sub_days(Days::new(30)).unwrap_or(today);
        Self::for_range(start, today)
    }

    pub fn for_range(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
            granularity: Granularity::Day,
            station_ids: Vec::new(),
            line_ids: Vec::new(),
            train_ids: Vec::new(),
            metrics: Self::default_metrics(),
        }
    }

    fn default_metrics() -> Vec<String> {
        vec![
            "total_passengers".to_string(),
            "revenue".to_string(),
            "load_rate".to_string(),
        ]
    }

    /// Partial merge: only the fields present in the patch are replaced.
    pub fn merge(&mut self, patch: AnalysisPatch) {
        if let Some(start_date) = patch.start_date {
            self.start_date = start_date;
        }
        if let Some(end_date) = patch.end_date {
            self.end_date = end_date;
        }
        if let Some(granularity) = patch.granularity {
            self.granularity = granularity;
        }
        if let Some(station_ids) = patch.station_ids {
            self.station_ids = station_ids;
        }
        if let Some(line_ids) = patch.line_ids {
            self.line_ids = line_ids;
        }
        if let Some(train_ids) = patch.train_ids {
            self.train_ids = train_ids;
        }
        if let Some(metrics) = patch.metrics {
            self.metrics = metrics;
        }
    }
}

/// A partial update to the current [`AnalysisRequest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisPatch {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub granularity: Option<Granularity>,
    pub station_ids: Option<Vec<i64>>,
    pub line_ids: Option<Vec<i64>>,
    pub train_ids: Option<Vec<i64>>,
    pub metrics: Option<Vec<String>>,
}

impl AnalysisPatch {
    pub fn date_range(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date: Some(start_date),
            end_date: Some(end_date),
            ..Self::default()
        }
    }

    pub fn granularity(granularity: Granularity) -> Self {
        Self {
            granularity: Some(granularity),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Paged query against the data-management record endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordQuery {
    pub page: u32,
    pub page_size: u32,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_order: Option<SortOrder>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub station_ids: Vec<i64>,
    #[serde(default)]
    pub line_ids: Vec<i64>,
    #[serde(default)]
    pub search: Option<String>,
}

impl Default for RecordQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
            sort_by: None,
            sort_order: None,
            start_date: None,
            end_date: None,
            station_ids: Vec::new(),
            line_ids: Vec::new(),
            search: None,
        }
    }
}

/// Options accepted by the cleanup endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupOptions {
    pub remove_duplicates: bool,
    pub remove_invalid: bool,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Excel,
    Pdf,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Excel => "excel",
            ExportFormat::Pdf => "pdf",
        }
    }
}
