//! Working set of passenger records and entity metadata, mirrored from the
//! backend, with targeted local mutation for editing flows and wrappers
//! around the data-management endpoints.

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::RwLock;

use crate::backend::Backend;
use crate::error::ApiError;
use crate::models::{
    CleanupOptions, CleanupReport, DataStats, ExportFormat, Line, PassengerRecord, RecordPage,
    RecordPatch, RecordQuery, Station, Train, UploadReport, ValidationReport,
};

/// Paging position of the loaded record set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageInfo {
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

pub struct RecordStore {
    backend: Arc<dyn Backend>,
    records: RwLock<Vec<PassengerRecord>>,
    page: RwLock<PageInfo>,
    stations: RwLock<Vec<Station>>,
    lines: RwLock<Vec<Line>>,
    trains: RwLock<Vec<Train>>,
    error: RwLock<Option<String>>,
}

impl RecordStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            records: RwLock::new(Vec::new()),
            page: RwLock::new(PageInfo::default()),
            stations: RwLock::new(Vec::new()),
            lines: RwLock::new(Vec::new()),
            trains: RwLock::new(Vec::new()),
            error: RwLock::new(None),
        }
    }

    /// Loads one page of records, replacing the local working set.
    pub async fn load_records(&self, query: &RecordQuery) -> Result<RecordPage, ApiError> {
        *self.error.write().await = None;
        match self.backend.records(query).await {
            Ok(page) => {
                *self.records.write().await = page.records.clone();
                *self.page.write().await = PageInfo {
                    total: page.total,
                    page: page.page,
                    page_size: page.page_size,
                    total_pages: page.total_pages,
                };
                tracing::debug!(
                    count = page.records.len(),
                    total = page.total,
                    page = page.page,
                    "Loaded record page"
                );
                Ok(page)
            }
            Err(e) => {
                *self.error.write().await = Some(e.message().to_string());
                Err(e)
            }
        }
    }

    /// Loads station, line, and train metadata concurrently.
    pub async fn load_entities(&self) -> Result<(), ApiError> {
        *self.error.write().await = None;
        match tokio::try_join!(
            self.backend.stations(),
            self.backend.lines(),
            self.backend.trains()
        ) {
            Ok((stations, lines, trains)) => {
                tracing::info!(
                    stations = stations.len(),
                    lines = lines.len(),
                    trains = trains.len(),
                    "Loaded entity metadata"
                );
                *self.stations.write().await = stations;
                *self.lines.write().await = lines;
                *self.trains.write().await = trains;
                Ok(())
            }
            Err(e) => {
                *self.error.write().await = Some(e.message().to_string());
                Err(e)
            }
        }
    }

    pub async fn last_error(&self) -> Option<String> {
        self.error.read().await.clone()
    }

    pub async fn page_info(&self) -> PageInfo {
        self.page.read().await.clone()
    }

    // --- local working set ---

    pub async fn records(&self) -> Vec<PassengerRecord> {
        self.records.read().await.clone()
    }

    pub async fn record(&self, id: i64) -> Option<PassengerRecord> {
        self.records.read().await.iter().find(|r| r.id == id).cloned()
    }

    pub async fn add_record(&self, record: PassengerRecord) {
        self.records.write().await.push(record);
    }

    /// Applies a partial update to one record. Returns false when no record
    /// with that id is loaded.
    pub async fn update_record(&self, id: i64, patch: RecordPatch) -> bool {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                if let Some(station_id) = patch.station_id {
                    record.station_id = station_id;
                }
                if let Some(station_name) = patch.station_name {
                    record.station_name = station_name;
                }
                if let Some(line_id) = patch.line_id {
                    record.line_id = line_id;
                }
                if let Some(line_name) = patch.line_name {
                    record.line_name = line_name;
                }
                if let Some(date) = patch.date {
                    record.date = date;
                }
                if let Some(hour) = patch.hour {
                    record.hour = hour;
                }
                if let Some(passengers_in) = patch.passengers_in {
                    record.passengers_in = passengers_in;
                }
                if let Some(passengers_out) = patch.passengers_out {
                    record.passengers_out = passengers_out;
                }
                true
            }
            None => false,
        }
    }

    pub async fn delete_record(&self, id: i64) -> bool {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.id != id);
        records.len() < before
    }

    pub async fn clear_all(&self) {
        self.records.write().await.clear();
        *self.page.write().await = PageInfo::default();
    }

    pub async fn records_for_station(&self, station_id: i64) -> Vec<PassengerRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.station_id == station_id)
            .cloned()
            .collect()
    }

    pub async fn records_in_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<PassengerRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.date >= start && r.date <= end)
            .cloned()
            .collect()
    }

    /// Boardings plus alightings over the loaded working set.
    pub async fn total_passengers(&self) -> i64 {
        self.records
            .read()
            .await
            .iter()
            .map(|r| r.passengers_in + r.passengers_out)
            .sum()
    }

    // --- entity metadata ---

    pub async fn stations(&self) -> Vec<Station> {
        self.stations.read().await.clone()
    }

    pub async fn lines(&self) -> Vec<Line> {
        self.lines.read().await.clone()
    }

    pub async fn trains(&self) -> Vec<Train> {
        self.trains.read().await.clone()
    }

    pub async fn station_by_id(&self, id: i64) -> Option<Station> {
        self.stations.read().await.iter().find(|s| s.id == id).cloned()
    }

    pub async fn line_by_id(&self, id: i64) -> Option<Line> {
        self.lines.read().await.iter().find(|l| l.id == id).cloned()
    }

    // --- data management ---

    pub async fn upload_file(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        validate_only: bool,
    ) -> Result<UploadReport, ApiError> {
        *self.error.write().await = None;
        match self
            .backend
            .upload_records(file_name, bytes, validate_only)
            .await
        {
            Ok(report) => {
                tracing::info!(
                    file = %file_name,
                    processed = report.records_processed,
                    imported = report.records_imported,
                    validate_only,
                    "Upload finished"
                );
                Ok(report)
            }
            Err(e) => {
                *self.error.write().await = Some(e.message().to_string());
                Err(e)
            }
        }
    }

    pub async fn validate_remote(&self) -> Result<ValidationReport, ApiError> {
        *self.error.write().await = None;
        match self.backend.validate_records().await {
            Ok(report) => Ok(report),
            Err(e) => {
                *self.error.write().await = Some(e.message().to_string());
                Err(e)
            }
        }
    }

    pub async fn run_cleanup(&self, options: &CleanupOptions) -> Result<CleanupReport, ApiError> {
        *self.error.write().await = None;
        match self.backend.cleanup_records(options).await {
            Ok(report) => {
                tracing::info!(
                    removed_duplicates = report.removed_duplicates,
                    removed_invalid = report.removed_invalid,
                    "Cleanup finished"
                );
                Ok(report)
            }
            Err(e) => {
                *self.error.write().await = Some(e.message().to_string());
                Err(e)
            }
        }
    }

    /// Deletes records remotely, then drops them from the working set.
    pub async fn delete_remote(&self, ids: &[i64]) -> Result<u64, ApiError> {
        *self.error.write().await = None;
        match self.backend.delete_records(ids).await {
            Ok(deleted) => {
                let mut records = self.records.write().await;
                records.retain(|r| !ids.contains(&r.id));
                tracing::info!(deleted, "Deleted records");
                Ok(deleted)
            }
            Err(e) => {
                *self.error.write().await = Some(e.message().to_string());
                Err(e)
            }
        }
    }

    pub async fn fetch_stats(&self) -> Result<DataStats, ApiError> {
        *self.error.write().await = None;
        match self.backend.data_stats().await {
            Ok(stats) => Ok(stats),
            Err(e) => {
                *self.error.write().await = Some(e.message().to_string());
                Err(e)
            }
        }
    }

    pub async fn export(
        &self,
        query: &RecordQuery,
        format: ExportFormat,
    ) -> Result<Vec<u8>, ApiError> {
        *self.error.write().await = None;
        match self.backend.export_records(query, format).await {
            Ok(bytes) => {
                tracing::info!(size = bytes.len(), format = %format.as_str(), "Export finished");
                Ok(bytes)
            }
            Err(e) => {
                *self.error.write().await = Some(e.message().to_string());
                Err(e)
            }
        }
    }
}
