//! The remote analytics surface behind one trait, so the HTTP client and
//! the in-memory fixture generator are interchangeable. The implementation
//! is chosen exactly once at startup; nothing branches on mock mode per
//! call.

pub mod fixture;
pub mod http;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::ApiError;
use crate::models::{
    AnalysisRequest, CleanupOptions, CleanupReport, DataStats, DataSummary, ExportFormat,
    FlowAnomaly, FlowForecast, FlowLine, FlowTrendData, Heatmap, Line, LineLoadData, RecordPage,
    RecordQuery, SpatialPoint, Station, StationRanking, TimeDistribution, TimePeriod, Train,
    UploadReport, ValidationReport,
};

pub use fixture::FixtureBackend;
pub use http::HttpBackend;

/// Everything the dashboard asks the backend for.
#[async_trait]
pub trait Backend: Send + Sync {
    // Analytics queries, all scoped by the analysis request.
    async fn flow_trends(&self, req: &AnalysisRequest) -> Result<FlowTrendData, ApiError>;
    async fn station_rankings(&self, req: &AnalysisRequest)
        -> Result<Vec<StationRanking>, ApiError>;
    async fn line_loads(&self, req: &AnalysisRequest) -> Result<Vec<LineLoadData>, ApiError>;
    async fn time_distribution(
        &self,
        req: &AnalysisRequest,
    ) -> Result<Vec<TimeDistribution>, ApiError>;
    async fn time_periods(&self, req: &AnalysisRequest) -> Result<Vec<TimePeriod>, ApiError>;
    async fn heatmap(&self, req: &AnalysisRequest) -> Result<Heatmap, ApiError>;
    async fn flow_lines(&self, req: &AnalysisRequest) -> Result<Vec<FlowLine>, ApiError>;
    async fn spatial_distribution(
        &self,
        req: &AnalysisRequest,
    ) -> Result<Vec<SpatialPoint>, ApiError>;
    async fn flow_forecast(
        &self,
        req: &AnalysisRequest,
        horizon_days: u32,
    ) -> Result<Vec<FlowForecast>, ApiError>;
    async fn flow_anomalies(&self, req: &AnalysisRequest) -> Result<Vec<FlowAnomaly>, ApiError>;

    // Entity metadata.
    async fn stations(&self) -> Result<Vec<Station>, ApiError>;
    async fn lines(&self) -> Result<Vec<Line>, ApiError>;
    async fn trains(&self) -> Result<Vec<Train>, ApiError>;
    async fn data_summary(&self) -> Result<DataSummary, ApiError>;

    // Data management.
    async fn upload_records(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        validate_only: bool,
    ) -> Result<UploadReport, ApiError>;
    async fn records(&self, query: &RecordQuery) -> Result<RecordPage, ApiError>;
    async fn validate_records(&self) -> Result<ValidationReport, ApiError>;
    async fn cleanup_records(&self, options: &CleanupOptions) -> Result<CleanupReport, ApiError>;
    async fn delete_records(&self, ids: &[i64]) -> Result<u64, ApiError>;
    async fn data_stats(&self) -> Result<DataStats, ApiError>;
    async fn export_records(
        &self,
        query: &RecordQuery,
        format: ExportFormat,
    ) -> Result<Vec<u8>, ApiError>;
}

/// Picks the backend implementation from configuration, once, at startup.
pub fn from_config(config: &Config) -> Result<Arc<dyn Backend>, ApiError> {
    if config.api.use_mock {
        tracing::info!("Mock mode enabled, using the in-memory fixture backend");
        Ok(Arc::new(FixtureBackend::new()))
    } else {
        let backend = HttpBackend::new(&config.api)?;
        tracing::info!(base_url = %backend.base_url(), "Using the HTTP backend");
        Ok(Arc::new(backend))
    }
}
