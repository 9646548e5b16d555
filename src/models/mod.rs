pub mod analytics;
pub mod records;
pub mod request;

use serde::{Deserialize, Serialize};

pub use analytics::{
    AnalysisSummary, AnomalySeverity, FlowAnomaly, FlowForecast, FlowLine, FlowRecord,
    FlowTrendData, FlowTrendPoint, Heatmap, HeatmapCell, LineLoadData, SpatialPoint,
    StationRanking, TimeDistribution, TimePeriod,
};
pub use records::{
    CleanupReport, DataStats, PassengerRecord, RecordPage, RecordPatch, UploadReport,
    ValidationIssue, ValidationReport,
};
pub use request::{
    AnalysisPatch, AnalysisRequest, CleanupOptions, ExportFormat, Granularity, RecordQuery,
    SortOrder,
};

/// Station metadata as served by the entity endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub telecode: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub city: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Train {
    pub id: i64,
    pub number: String,
    #[serde(default)]
    pub train_type: Option<String>,
    #[serde(default)]
    pub capacity: Option<i64>,
}

/// Dataset coverage folded from the entity endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSummary {
    pub total_records: i64,
    pub date_start: Option<chrono::NaiveDate>,
    pub date_end: Option<chrono::NaiveDate>,
    pub stations: usize,
    pub lines: usize,
    pub trains: usize,
    pub last_update: String,
}
