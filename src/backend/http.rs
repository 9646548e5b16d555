//! HTTP implementation of the backend trait: one reqwest client with auth,
//! envelope unwrapping, error normalization, and per-request diagnostics.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::compute;
use crate::config::ApiConfig;
use crate::error::{self, ApiError};
use crate::models::{
    AnalysisRequest, CleanupOptions, CleanupReport, DataStats, DataSummary, ExportFormat,
    FlowAnomaly, FlowForecast, FlowLine, FlowRecord, FlowTrendData, FlowTrendPoint, Granularity,
    Heatmap, Line, LineLoadData, PassengerRecord, RecordPage, RecordQuery, SortOrder,
    SpatialPoint, Station, StationRanking, TimeDistribution, TimePeriod, Train, UploadReport,
    ValidationReport,
};

use super::Backend;

/// Confidence reported for forecast points when the backend omits one.
const DEFAULT_FORECAST_CONFIDENCE: f64 = 0.95;
/// Batch deletes are chunked so huge id lists don't exceed body limits.
const DELETE_BATCH_SIZE: usize = 500;

/// Client for the analytics REST backend.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.effective_base_url().trim_end_matches('/').to_string(),
            token: read_token(&config.token_file),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.execute(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.execute(Method::POST, path, Some(body)).await
    }

    /// Dispatches one JSON request and returns the parsed body. Every
    /// failure is logged here before it propagates.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let request_id = Uuid::new_v4().to_string();
        let start = Instant::now();

        let mut request = self.client.request(method.clone(), &url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    method = %method,
                    path = %path,
                    duration_ms = start.elapsed().as_millis() as u64,
                    error = %e,
                    "Request never reached the backend"
                );
                return Err(ApiError::Network(error::normalized_message(
                    None,
                    Some(&e.to_string()),
                )));
            }
        };

        self.read_json(response, &request_id, &method, path, start)
            .await
    }

    async fn read_json(
        &self,
        response: reqwest::Response,
        request_id: &str,
        method: &Method,
        path: &str,
        start: Instant,
    ) -> Result<Value, ApiError> {
        let status = response.status();

        let body_text = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    method = %method,
                    path = %path,
                    status = status.as_u16(),
                    error = %e,
                    "Failed to read response body"
                );
                return Err(ApiError::Network(error::normalized_message(
                    None,
                    Some(&e.to_string()),
                )));
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;

        if !status.is_success() {
            let message = error::normalized_message(
                server_message(&body_text).as_deref(),
                Some(&format!("HTTP {}", status.as_u16())),
            );
            tracing::warn!(
                request_id = %request_id,
                method = %method,
                path = %path,
                status = status.as_u16(),
                duration_ms,
                message = %message,
                "Backend returned an error"
            );
            return Err(ApiError::Http {
                status: status.as_u16(),
                message,
                body: (!body_text.is_empty()).then(|| body_text),
            });
        }

        tracing::debug!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms,
            response_size = body_text.len(),
            "Request completed"
        );

        if body_text.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body_text).map_err(|e| {
            tracing::warn!(
                request_id = %request_id,
                path = %path,
                error = %e,
                body = %truncate_for_log(&body_text, 500),
                "Failed to parse response body"
            );
            ApiError::Decode(e.to_string())
        })
    }

    /// GET returning raw bytes, used by the export endpoint.
    async fn get_bytes(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let request_id = Uuid::new_v4().to_string();
        let start = Instant::now();

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(request_id = %request_id, path = %path, error = %e, "Request never reached the backend");
                return Err(ApiError::Network(error::normalized_message(
                    None,
                    Some(&e.to_string()),
                )));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let message = error::normalized_message(
                server_message(&body_text).as_deref(),
                Some(&format!("HTTP {}", status.as_u16())),
            );
            tracing::warn!(request_id = %request_id, path = %path, status = status.as_u16(), message = %message, "Export failed");
            return Err(ApiError::Http {
                status: status.as_u16(),
                message,
                body: (!body_text.is_empty()).then(|| body_text),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::Network(error::normalized_message(None, Some(&e.to_string()))))?;
        tracing::debug!(
            request_id = %request_id,
            path = %path,
            duration_ms = start.elapsed().as_millis() as u64,
            response_size = bytes.len(),
            "Export completed"
        );
        Ok(bytes.to_vec())
    }

    async fn fetch_routes(&self) -> Result<Vec<Line>, ApiError> {
        decode_list(self.get("/routes/").await?)
    }

    async fn fetch_flow_records(
        &self,
        req: Option<&AnalysisRequest>,
    ) -> Result<Vec<FlowRecord>, ApiError> {
        let path = match req {
            Some(req) => format!("/passenger-flows/{}", range_query(req)),
            None => "/passenger-flows/".to_string(),
        };
        let rows: Vec<FlowRecordRow> = decode_list(self.get(&path).await?)?;
        Ok(rows.into_iter().map(map_flow_record).collect())
    }

    async fn fetch_rankings(&self, req: &AnalysisRequest) -> Result<Vec<StationRanking>, ApiError> {
        let path = format!("/passenger-flows/station_ranking/{}", range_query(req));
        let rows: Vec<RankingRow> = decode_list(self.get(&path).await?)?;
        Ok(rows.into_iter().map(map_ranking).collect())
    }

    async fn fetch_stations(&self) -> Result<Vec<Station>, ApiError> {
        decode_list(self.get("/analytics/stations/").await?)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn flow_trends(&self, req: &AnalysisRequest) -> Result<FlowTrendData, ApiError> {
        let body = serde_json::to_value(req).map_err(|e| ApiError::Decode(e.to_string()))?;
        let value = self.post("/analytics/flow/", &body).await?;
        let rows: Vec<FlowTrendRow> = match value {
            Value::Array(_) => decode(value)?,
            _ => decode::<FlowTrendEnvelope>(value)?.data,
        };
        Ok(map_trends(rows, req.granularity))
    }

    async fn station_rankings(
        &self,
        req: &AnalysisRequest,
    ) -> Result<Vec<StationRanking>, ApiError> {
        self.fetch_rankings(req).await
    }

    /// The backend exposes no pre-aggregated line load, so routes and flow
    /// records are fetched concurrently and joined client-side.
    async fn line_loads(&self, req: &AnalysisRequest) -> Result<Vec<LineLoadData>, ApiError> {
        let (routes, flows) =
            tokio::try_join!(self.fetch_routes(), self.fetch_flow_records(Some(req)))?;
        Ok(compute::derive_line_loads(&routes, &flows))
    }

    async fn time_distribution(
        &self,
        req: &AnalysisRequest,
    ) -> Result<Vec<TimeDistribution>, ApiError> {
        let path = format!("/passenger-flows/time_distribution/{}", range_query(req));
        decode_list(self.get(&path).await?)
    }

    async fn time_periods(&self, req: &AnalysisRequest) -> Result<Vec<TimePeriod>, ApiError> {
        let path = format!("/analytics/time-periods/{}", range_query(req));
        decode_list(self.get(&path).await?)
    }

    async fn heatmap(&self, req: &AnalysisRequest) -> Result<Heatmap, ApiError> {
        let path = format!("/analytics/heatmap/{}", range_query(req));
        let envelope: HeatmapEnvelope = decode(self.get(&path).await?)?;
        Ok(compute::flatten_heatmap(
            envelope.stations,
            envelope.times,
            envelope.values,
        ))
    }

    async fn flow_lines(&self, req: &AnalysisRequest) -> Result<Vec<FlowLine>, ApiError> {
        let path = format!("/analytics/flow/{}", range_query(req));
        decode_list(self.get(&path).await?)
    }

    /// Spatial points are joined from rankings and station metadata;
    /// stations without coordinates simply drop out.
    async fn spatial_distribution(
        &self,
        req: &AnalysisRequest,
    ) -> Result<Vec<SpatialPoint>, ApiError> {
        let (rankings, stations) =
            tokio::try_join!(self.fetch_rankings(req), self.fetch_stations())?;
        Ok(compute::derive_spatial(&rankings, &stations))
    }

    async fn flow_forecast(
        &self,
        req: &AnalysisRequest,
        horizon_days: u32,
    ) -> Result<Vec<FlowForecast>, ApiError> {
        let path = format!("/analytics/forecast/{}&days={}", range_query(req), horizon_days);
        let envelope: ForecastEnvelope = decode(self.get(&path).await?)?;
        Ok(map_forecast(envelope))
    }

    async fn flow_anomalies(&self, req: &AnalysisRequest) -> Result<Vec<FlowAnomaly>, ApiError> {
        let path = format!("/analytics/anomalies/{}", range_query(req));
        decode_list(self.get(&path).await?)
    }

    async fn stations(&self) -> Result<Vec<Station>, ApiError> {
        self.fetch_stations().await
    }

    async fn lines(&self) -> Result<Vec<Line>, ApiError> {
        decode_list(self.get("/analytics/lines/").await?)
    }

    async fn trains(&self) -> Result<Vec<Train>, ApiError> {
        decode_list(self.get("/analytics/trains/").await?)
    }

    async fn data_summary(&self) -> Result<DataSummary, ApiError> {
        let (stations, lines, trains, flows) = tokio::try_join!(
            self.fetch_stations(),
            self.fetch_routes(),
            self.trains(),
            self.fetch_flow_records(None),
        )?;
        Ok(compute::fold_data_summary(
            &stations,
            &lines,
            &trains,
            &flows,
            Utc::now().to_rfc3339(),
        ))
    }

    async fn upload_records(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        validate_only: bool,
    ) -> Result<UploadReport, ApiError> {
        let url = format!("{}/data/upload/", self.base_url);
        let request_id = Uuid::new_v4().to_string();
        let start = Instant::now();

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let mut form = reqwest::multipart::Form::new().part("file", part);
        if validate_only {
            form = form.text("validate_only", "true");
        }

        let mut request = self.client.post(&url).multipart(form);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(request_id = %request_id, file = %file_name, error = %e, "Upload never reached the backend");
                return Err(ApiError::Network(error::normalized_message(
                    None,
                    Some(&e.to_string()),
                )));
            }
        };

        let value = self
            .read_json(response, &request_id, &Method::POST, "/data/upload/", start)
            .await?;
        decode(value)
    }

    async fn records(&self, query: &RecordQuery) -> Result<RecordPage, ApiError> {
        let path = format!("/data/records/{}", record_query(query));
        let envelope: PageEnvelope = decode(self.get(&path).await?)?;
        Ok(map_record_page(envelope, query))
    }

    async fn validate_records(&self) -> Result<ValidationReport, ApiError> {
        decode(self.get("/data/validate/").await?)
    }

    async fn cleanup_records(&self, options: &CleanupOptions) -> Result<CleanupReport, ApiError> {
        let body = serde_json::to_value(options).map_err(|e| ApiError::Decode(e.to_string()))?;
        decode(self.post("/data/cleanup/", &body).await?)
    }

    /// Deletes by id in chunks, all chunks in flight concurrently.
    async fn delete_records(&self, ids: &[i64]) -> Result<u64, ApiError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let deletes: Vec<_> = ids
            .chunks(DELETE_BATCH_SIZE)
            .map(|chunk| async move {
                let body = serde_json::json!({ "ids": chunk });
                let value = self
                    .execute(Method::DELETE, "/data/records/batch/", Some(&body))
                    .await?;
                // Backends that answer with an empty body are assumed to
                // have deleted the whole chunk.
                let deleted = serde_json::from_value::<DeleteResponse>(value)
                    .map(|r| r.deleted)
                    .unwrap_or(chunk.len() as u64);
                Ok::<u64, ApiError>(deleted)
            })
            .collect();

        let deleted = futures::future::try_join_all(deletes).await?;
        Ok(deleted.into_iter().sum())
    }

    async fn data_stats(&self) -> Result<DataStats, ApiError> {
        decode(self.get("/data/stats/").await?)
    }

    async fn export_records(
        &self,
        query: &RecordQuery,
        format: ExportFormat,
    ) -> Result<Vec<u8>, ApiError> {
        let path = format!(
            "/data/export/{}&format={}",
            record_query(query),
            format.as_str()
        );
        self.get_bytes(&path).await
    }
}

fn read_token(path: &str) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let token = content.trim().to_string();
            if token.is_empty() {
                tracing::debug!(path = %path, "Token file is empty, requests stay anonymous");
                None
            } else {
                tracing::debug!(path = %path, "Loaded bearer token");
                Some(token)
            }
        }
        Err(_) => {
            tracing::debug!(path = %path, "No token file, requests stay anonymous");
            None
        }
    }
}

/// Pulls `message`/`detail` out of an error body, when it is JSON at all.
fn server_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| value.get("detail").and_then(Value::as_str))?;
    Some(message.to_string())
}

/// Truncates a body for logging without splitting a UTF-8 character.
fn truncate_for_log(body: &str, limit: usize) -> &str {
    if body.len() <= limit {
        return body;
    }
    let mut end = limit;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

/// Unwraps list bodies: either a bare JSON array or a paginated envelope
/// carrying the array under `results` (or `data`).
fn unwrap_list(value: Value) -> Result<Vec<Value>, ApiError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("results").or_else(|| map.remove("data")) {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(ApiError::Decode(format!(
                "expected a list in the envelope, got {}",
                json_type(&other)
            ))),
            None => Err(ApiError::Decode(
                "expected a list or a paginated envelope".to_string(),
            )),
        },
        other => Err(ApiError::Decode(format!(
            "expected a list, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
}

fn decode_list<T: DeserializeOwned>(value: Value) -> Result<Vec<T>, ApiError> {
    let items = unwrap_list(value)?;
    serde_json::from_value(Value::Array(items)).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Query string shared by the range-scoped GET endpoints.
fn range_query(req: &AnalysisRequest) -> String {
    let mut query = format!("?start_date={}&end_date={}", req.start_date, req.end_date);
    if !req.station_ids.is_empty() {
        query.push_str(&format!("&station_ids={}", join_ids(&req.station_ids)));
    }
    if !req.line_ids.is_empty() {
        query.push_str(&format!("&line_ids={}", join_ids(&req.line_ids)));
    }
    if !req.train_ids.is_empty() {
        query.push_str(&format!("&train_ids={}", join_ids(&req.train_ids)));
    }
    query
}

fn record_query(query: &RecordQuery) -> String {
    let mut q = format!("?page={}&page_size={}", query.page, query.page_size);
    if let Some(sort_by) = &query.sort_by {
        let prefix = match query.sort_order {
            Some(SortOrder::Desc) => "-",
            _ => "",
        };
        q.push_str(&format!(
            "&ordering={}{}",
            prefix,
            urlencoding::encode(sort_by)
        ));
    }
    if let Some(start_date) = query.start_date {
        q.push_str(&format!("&start_date={}", start_date));
    }
    if let Some(end_date) = query.end_date {
        q.push_str(&format!("&end_date={}", end_date));
    }
    if !query.station_ids.is_empty() {
        q.push_str(&format!("&station_ids={}", join_ids(&query.station_ids)));
    }
    if !query.line_ids.is_empty() {
        q.push_str(&format!("&line_ids={}", join_ids(&query.line_ids)));
    }
    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
        q.push_str(&format!("&search={}", urlencoding::encode(search)));
    }
    q
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

// --- wire formats ---

#[derive(Debug, Deserialize)]
struct FlowTrendEnvelope {
    #[serde(default)]
    data: Vec<FlowTrendRow>,
}

#[derive(Debug, Deserialize)]
struct FlowTrendRow {
    time_period: String,
    total_passengers: f64,
}

#[derive(Debug, Deserialize)]
struct RankingRow {
    station_id: i64,
    station_name: String,
    #[serde(default)]
    station_telecode: String,
    total_passengers: i64,
    passengers_in: i64,
    passengers_out: i64,
    #[serde(default)]
    total_revenue: f64,
    ranking: u32,
}

#[derive(Debug, Deserialize)]
struct FlowRecordRow {
    route: i64,
    station: i64,
    passengers_in: i64,
    passengers_out: i64,
    operation_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct HeatmapEnvelope {
    #[serde(default)]
    stations: Vec<String>,
    #[serde(default)]
    times: Vec<String>,
    #[serde(default, rename = "data")]
    values: Vec<Vec<f64>>,
}

/// Forecast arrives as parallel arrays and is zipped into points.
#[derive(Debug, Deserialize)]
struct ForecastEnvelope {
    #[serde(default)]
    timestamps: Vec<String>,
    #[serde(default)]
    forecast: Vec<f64>,
    #[serde(default)]
    confidence_lower: Vec<f64>,
    #[serde(default)]
    confidence_upper: Vec<f64>,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PageEnvelope {
    count: i64,
    #[serde(default)]
    results: Vec<PassengerRecord>,
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    #[serde(default)]
    deleted: u64,
}

fn map_trends(rows: Vec<FlowTrendRow>, granularity: Granularity) -> FlowTrendData {
    let points: Vec<FlowTrendPoint> = rows
        .into_iter()
        .map(|row| FlowTrendPoint {
            time: row.time_period,
            value: row.total_passengers,
        })
        .collect();
    let stats = compute::trend_stats(&points);
    FlowTrendData {
        granularity,
        points,
        total: stats.total,
        average: stats.average,
        max: stats.max,
        min: stats.min,
    }
}

fn map_ranking(row: RankingRow) -> StationRanking {
    StationRanking {
        station_id: row.station_id,
        station_name: row.station_name,
        station_telecode: row.station_telecode,
        total_passengers: row.total_passengers,
        passengers_in: row.passengers_in,
        passengers_out: row.passengers_out,
        revenue: row.total_revenue,
        ranking: row.ranking,
    }
}

fn map_flow_record(row: FlowRecordRow) -> FlowRecord {
    FlowRecord {
        route_id: row.route,
        station_id: row.station,
        passengers_in: row.passengers_in,
        passengers_out: row.passengers_out,
        date: row.operation_date,
    }
}

fn map_forecast(envelope: ForecastEnvelope) -> Vec<FlowForecast> {
    let confidence = envelope.confidence.unwrap_or(DEFAULT_FORECAST_CONFIDENCE);
    envelope
        .timestamps
        .into_iter()
        .zip(envelope.forecast)
        .zip(envelope.confidence_lower)
        .zip(envelope.confidence_upper)
        .map(|(((timestamp, forecast), lower), upper)| FlowForecast {
            timestamp,
            actual: None,
            forecast,
            lower_bound: lower,
            upper_bound: upper,
            confidence,
        })
        .collect()
}

fn map_record_page(envelope: PageEnvelope, query: &RecordQuery) -> RecordPage {
    let page_size = query.page_size.max(1);
    let total_pages = ((envelope.count.max(0) as u64 + page_size as u64 - 1) / page_size as u64) as u32;
    RecordPage {
        records: envelope.results,
        total: envelope.count,
        page: query.page,
        page_size: query.page_size,
        total_pages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_request() -> AnalysisRequest {
        AnalysisRequest::for_range(
            "2024-01-01".parse().expect("valid date"),
            "2024-01-31".parse().expect("valid date"),
        )
    }

    // --- envelope tests ---

    #[test]
    fn unwrap_list_accepts_bare_array() {
        let items = unwrap_list(json!([1, 2])).expect("bare array");
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn unwrap_list_accepts_paginated_envelope() {
        let items = unwrap_list(json!({"count": 2, "results": [1, 2]})).expect("envelope");
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn unwrap_list_accepts_data_envelope() {
        let items = unwrap_list(json!({"data": [1]})).expect("data envelope");
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn unwrap_list_rejects_non_lists() {
        assert!(matches!(
            unwrap_list(json!({"detail": "nope"})),
            Err(ApiError::Decode(_))
        ));
        assert!(matches!(unwrap_list(json!(42)), Err(ApiError::Decode(_))));
    }

    #[test]
    fn decode_list_parses_station_rows() {
        let value = json!({
            "count": 1,
            "results": [
                {"id": 1, "name": "成都东", "telecode": "ICW", "latitude": 30.63, "longitude": 104.14}
            ]
        });
        let stations: Vec<Station> = decode_list(value).expect("stations");
        assert_eq!(stations[0].name, "成都东");
        assert_eq!(stations[0].latitude, Some(30.63));
    }

    // --- wire mapping tests ---

    #[test]
    fn trend_rows_map_to_points_with_statistics() {
        let body = r#"{"data": [
            {"time_period": "2024-01-01", "total_passengers": 100},
            {"time_period": "2024-01-02", "total_passengers": 300}
        ]}"#;
        let envelope: FlowTrendEnvelope = serde_json::from_str(body).expect("trend body");
        let trends = map_trends(envelope.data, Granularity::Day);

        assert_eq!(trends.points.len(), 2);
        assert_eq!(trends.points[0].time, "2024-01-01");
        assert_eq!(trends.total, 400.0);
        assert_eq!(trends.average, 200.0);
        assert_eq!(trends.max, 300.0);
        assert_eq!(trends.min, 100.0);
    }

    #[test]
    fn empty_trend_body_yields_zero_statistics() {
        let trends = map_trends(Vec::new(), Granularity::Day);
        assert_eq!(trends.total, 0.0);
        assert_eq!(trends.average, 0.0);
        assert_eq!(trends.max, 0.0);
        assert_eq!(trends.min, 0.0);
    }

    #[test]
    fn ranking_row_maps_revenue_field() {
        let body = r#"{
            "station_id": 7, "station_name": "成都东", "station_telecode": "ICW",
            "total_passengers": 51234, "passengers_in": 26000, "passengers_out": 25234,
            "total_revenue": 3821345.5, "ranking": 1
        }"#;
        let row: RankingRow = serde_json::from_str(body).expect("ranking row");
        let ranking = map_ranking(row);
        assert_eq!(ranking.revenue, 3_821_345.5);
        assert_eq!(ranking.ranking, 1);
    }

    #[test]
    fn flow_record_row_maps_route_and_date() {
        let body = r#"{"route": 3, "station": 9, "passengers_in": 10, "passengers_out": 5, "operation_date": "2024-01-05"}"#;
        let row: FlowRecordRow = serde_json::from_str(body).expect("flow row");
        let record = map_flow_record(row);
        assert_eq!(record.route_id, 3);
        assert_eq!(record.station_id, 9);
        assert_eq!(record.date, "2024-01-05".parse().expect("valid date"));
    }

    #[test]
    fn forecast_zip_stops_at_shortest_array() {
        let envelope = ForecastEnvelope {
            timestamps: vec!["d1".to_string(), "d2".to_string(), "d3".to_string()],
            forecast: vec![10.0, 20.0],
            confidence_lower: vec![8.0, 16.0],
            confidence_upper: vec![12.0, 24.0],
            confidence: None,
        };
        let points = map_forecast(envelope);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].forecast, 10.0);
        assert_eq!(points[0].confidence, DEFAULT_FORECAST_CONFIDENCE);
        assert_eq!(points[1].upper_bound, 24.0);
    }

    #[test]
    fn record_page_computes_total_pages() {
        let envelope = PageEnvelope {
            count: 45,
            results: Vec::new(),
        };
        let query = RecordQuery {
            page: 2,
            page_size: 20,
            ..RecordQuery::default()
        };
        let page = map_record_page(envelope, &query);
        assert_eq!(page.total, 45);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.page, 2);
    }

    // --- query string tests ---

    #[test]
    fn range_query_includes_dates_and_filters() {
        let mut req = test_request();
        assert_eq!(
            range_query(&req),
            "?start_date=2024-01-01&end_date=2024-01-31"
        );

        req.station_ids = vec![1, 2];
        req.line_ids = vec![9];
        assert_eq!(
            range_query(&req),
            "?start_date=2024-01-01&end_date=2024-01-31&station_ids=1,2&line_ids=9"
        );
    }

    #[test]
    fn record_query_encodes_search_and_ordering() {
        let query = RecordQuery {
            page: 1,
            page_size: 50,
            sort_by: Some("date".to_string()),
            sort_order: Some(SortOrder::Desc),
            search: Some("成都 东".to_string()),
            ..RecordQuery::default()
        };
        let q = record_query(&query);
        assert!(q.starts_with("?page=1&page_size=50"));
        assert!(q.contains("&ordering=-date"));
        assert!(q.contains("&search=%E6%88%90%E9%83%BD%20%E4%B8%9C"));
    }

    // --- helper tests ---

    #[test]
    fn server_message_prefers_message_over_detail() {
        assert_eq!(
            server_message(r#"{"message": "m", "detail": "d"}"#),
            Some("m".to_string())
        );
        assert_eq!(
            server_message(r#"{"detail": "d"}"#),
            Some("d".to_string())
        );
        assert_eq!(server_message("not json"), None);
        assert_eq!(server_message(r#"{"other": 1}"#), None);
    }

    #[test]
    fn log_truncation_respects_char_boundaries() {
        let body = "成都东站".repeat(100);
        let truncated = truncate_for_log(&body, 500);
        assert!(truncated.len() <= 500);
        assert!(body.starts_with(truncated));
    }
}
