//! Analytics state: the current analysis parameters, a TTL cache of query
//! answers, and one shared holder of everything the dashboard renders.
//! The comprehensive fetch replaces the whole holder atomically so panels
//! never show results from two different parameter sets.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::backend::Backend;
use crate::cache::QueryCache;
use crate::compute;
use crate::config::Config;
use crate::error::ApiError;
use crate::models::{
    AnalysisPatch, AnalysisRequest, AnalysisSummary, FlowAnomaly, FlowForecast, FlowLine,
    FlowTrendData, Granularity, Heatmap, LineLoadData, SpatialPoint, StationRanking,
    TimeDistribution, TimePeriod,
};

/// Forecast horizon used by the comprehensive fetch.
pub const DEFAULT_FORECAST_DAYS: u32 = 7;

/// Everything the dashboard panels draw from, replaced as one unit.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsData {
    pub trends: Option<FlowTrendData>,
    pub rankings: Vec<StationRanking>,
    pub line_loads: Vec<LineLoadData>,
    pub time_distribution: Vec<TimeDistribution>,
    pub time_periods: Vec<TimePeriod>,
    pub heatmap: Option<Heatmap>,
    pub flow_lines: Vec<FlowLine>,
    pub spatial: Vec<SpatialPoint>,
    pub forecasts: Vec<FlowForecast>,
    pub anomalies: Vec<FlowAnomaly>,
    pub summary: Option<AnalysisSummary>,
}

pub type SharedAnalytics = Arc<RwLock<AnalyticsData>>;

/// Coordinates all analytical queries against the backend.
pub struct AnalyticsStore {
    backend: Arc<dyn Backend>,
    cache: QueryCache,
    params: RwLock<AnalysisRequest>,
    data: SharedAnalytics,
    error: RwLock<Option<String>>,
    /// Bumped on every parameter change; a response produced under an older
    /// generation is returned to its caller but never applied or cached.
    generation: AtomicU64,
    in_flight: AtomicUsize,
}

impl AnalyticsStore {
    pub fn new(backend: Arc<dyn Backend>, config: &Config) -> Self {
        Self {
            backend,
            cache: QueryCache::new(Duration::from_secs(config.cache.ttl_secs)),
            params: RwLock::new(AnalysisRequest::last_30_days()),
            data: Arc::new(RwLock::new(AnalyticsData::default())),
            error: RwLock::new(None),
            generation: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Shared handle to the rendered data.
    pub fn data(&self) -> SharedAnalytics {
        Arc::clone(&self.data)
    }

    pub async fn params(&self) -> AnalysisRequest {
        self.params.read().await.clone()
    }

    /// Message of the most recent failed query, cleared when a
    /// comprehensive fetch starts.
    pub async fn last_error(&self) -> Option<String> {
        self.error.read().await.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::Relaxed) > 0
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Applies a partial parameter update. Any change drops every cached
    /// answer and advances the generation, so in-flight responses for the
    /// old parameters cannot overwrite newer data when they land.
    pub async fn update_params(&self, patch: AnalysisPatch) {
        {
            let mut params = self.params.write().await;
            params.merge(patch);
        }
        self.cache.clear().await;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(generation, "Analysis parameters updated");
    }

    pub async fn set_date_range(&self, start_date: NaiveDate, end_date: NaiveDate) {
        self.update_params(AnalysisPatch::date_range(start_date, end_date))
            .await;
    }

    pub async fn set_granularity(&self, granularity: Granularity) {
        self.update_params(AnalysisPatch::granularity(granularity))
            .await;
    }

    /// Refreshes every analytical surface for the current parameters in one
    /// shot. The ten queries run concurrently and the result is
    /// all-or-nothing: if any fails, the holder keeps its previous contents.
    pub async fn fetch_comprehensive(&self) -> Result<AnalyticsData, ApiError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let req = self.params().await;
        *self.error.write().await = None;
        let started = Instant::now();

        let (
            trends,
            rankings,
            line_loads,
            time_distribution,
            time_periods,
            heatmap,
            flow_lines,
            spatial,
            forecasts,
            anomalies,
        ) = tokio::try_join!(
            self.query_trends(&req),
            self.query_rankings(&req),
            self.query_line_loads(&req),
            self.query_time_distribution(&req),
            self.query_time_periods(&req),
            self.query_heatmap(&req),
            self.query_flow_lines(&req),
            self.query_spatial(&req),
            self.query_forecast(&req, DEFAULT_FORECAST_DAYS),
            self.query_anomalies(&req),
        )?;

        let summary = compute::summarize(&trends, &rankings, &line_loads, &time_distribution);
        let snapshot = AnalyticsData {
            trends: Some(trends),
            rankings,
            line_loads,
            time_distribution,
            time_periods,
            heatmap: Some(heatmap),
            flow_lines,
            spatial,
            forecasts,
            anomalies,
            summary: Some(summary),
        };

        let applied = self
            .write_if_current(generation, |data| *data = snapshot.clone())
            .await;
        if applied {
            tracing::info!(
                duration_ms = started.elapsed().as_millis() as u64,
                stations = snapshot.rankings.len(),
                lines = snapshot.line_loads.len(),
                "Comprehensive analysis refreshed"
            );
        } else {
            tracing::debug!("Comprehensive result superseded by a parameter change");
        }
        Ok(snapshot)
    }

    /// Drops every cached answer and refetches everything.
    pub async fn refresh_all(&self) -> Result<AnalyticsData, ApiError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cache.clear().await;
        self.fetch_comprehensive().await
    }

    pub async fn fetch_trends(&self) -> Result<FlowTrendData, ApiError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let req = self.params().await;
        let trends = self.query_trends(&req).await?;
        self.write_if_current(generation, |data| data.trends = Some(trends.clone()))
            .await;
        Ok(trends)
    }

    pub async fn fetch_rankings(&self) -> Result<Vec<StationRanking>, ApiError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let req = self.params().await;
        let rankings = self.query_rankings(&req).await?;
        self.write_if_current(generation, |data| data.rankings = rankings.clone())
            .await;
        Ok(rankings)
    }

    pub async fn fetch_line_loads(&self) -> Result<Vec<LineLoadData>, ApiError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let req = self.params().await;
        let line_loads = self.query_line_loads(&req).await?;
        self.write_if_current(generation, |data| data.line_loads = line_loads.clone())
            .await;
        Ok(line_loads)
    }

    pub async fn fetch_time_distribution(&self) -> Result<Vec<TimeDistribution>, ApiError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let req = self.params().await;
        let distribution = self.query_time_distribution(&req).await?;
        self.write_if_current(generation, |data| {
            data.time_distribution = distribution.clone()
        })
        .await;
        Ok(distribution)
    }

    pub async fn fetch_time_periods(&self) -> Result<Vec<TimePeriod>, ApiError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let req = self.params().await;
        let periods = self.query_time_periods(&req).await?;
        self.write_if_current(generation, |data| data.time_periods = periods.clone())
            .await;
        Ok(periods)
    }

    pub async fn fetch_heatmap(&self) -> Result<Heatmap, ApiError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let req = self.params().await;
        let heatmap = self.query_heatmap(&req).await?;
        self.write_if_current(generation, |data| data.heatmap = Some(heatmap.clone()))
            .await;
        Ok(heatmap)
    }

    pub async fn fetch_flow_lines(&self) -> Result<Vec<FlowLine>, ApiError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let req = self.params().await;
        let flow_lines = self.query_flow_lines(&req).await?;
        self.write_if_current(generation, |data| data.flow_lines = flow_lines.clone())
            .await;
        Ok(flow_lines)
    }

    pub async fn fetch_spatial(&self) -> Result<Vec<SpatialPoint>, ApiError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let req = self.params().await;
        let spatial = self.query_spatial(&req).await?;
        self.write_if_current(generation, |data| data.spatial = spatial.clone())
            .await;
        Ok(spatial)
    }

    pub async fn fetch_forecast(&self, horizon_days: u32) -> Result<Vec<FlowForecast>, ApiError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let req = self.params().await;
        let forecasts = self.query_forecast(&req, horizon_days).await?;
        self.write_if_current(generation, |data| data.forecasts = forecasts.clone())
            .await;
        Ok(forecasts)
    }

    pub async fn fetch_anomalies(&self) -> Result<Vec<FlowAnomaly>, ApiError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let req = self.params().await;
        let anomalies = self.query_anomalies(&req).await?;
        self.write_if_current(generation, |data| data.anomalies = anomalies.clone())
            .await;
        Ok(anomalies)
    }

    async fn query_trends(&self, req: &AnalysisRequest) -> Result<FlowTrendData, ApiError> {
        let backend = Arc::clone(&self.backend);
        let call = req.clone();
        self.fetch_cached("analytics/flow", req, || async move {
            backend.flow_trends(&call).await
        })
        .await
    }

    async fn query_rankings(&self, req: &AnalysisRequest) -> Result<Vec<StationRanking>, ApiError> {
        let backend = Arc::clone(&self.backend);
        let call = req.clone();
        self.fetch_cached("analytics/rankings", req, || async move {
            backend.station_rankings(&call).await
        })
        .await
    }

    async fn query_line_loads(&self, req: &AnalysisRequest) -> Result<Vec<LineLoadData>, ApiError> {
        let backend = Arc::clone(&self.backend);
        let call = req.clone();
        self.fetch_cached("analytics/line-loads", req, || async move {
            backend.line_loads(&call).await
        })
        .await
    }

    async fn query_time_distribution(
        &self,
        req: &AnalysisRequest,
    ) -> Result<Vec<TimeDistribution>, ApiError> {
        let backend = Arc::clone(&self.backend);
        let call = req.clone();
        self.fetch_cached("analytics/time-distribution", req, || async move {
            backend.time_distribution(&call).await
        })
        .await
    }

    async fn query_time_periods(&self, req: &AnalysisRequest) -> Result<Vec<TimePeriod>, ApiError> {
        let backend = Arc::clone(&self.backend);
        let call = req.clone();
        self.fetch_cached("analytics/time-periods", req, || async move {
            backend.time_periods(&call).await
        })
        .await
    }

    async fn query_heatmap(&self, req: &AnalysisRequest) -> Result<Heatmap, ApiError> {
        let backend = Arc::clone(&self.backend);
        let call = req.clone();
        self.fetch_cached("analytics/heatmap", req, || async move {
            backend.heatmap(&call).await
        })
        .await
    }

    async fn query_flow_lines(&self, req: &AnalysisRequest) -> Result<Vec<FlowLine>, ApiError> {
        let backend = Arc::clone(&self.backend);
        let call = req.clone();
        self.fetch_cached("analytics/flow-lines", req, || async move {
            backend.flow_lines(&call).await
        })
        .await
    }

    async fn query_spatial(&self, req: &AnalysisRequest) -> Result<Vec<SpatialPoint>, ApiError> {
        let backend = Arc::clone(&self.backend);
        let call = req.clone();
        self.fetch_cached("analytics/spatial", req, || async move {
            backend.spatial_distribution(&call).await
        })
        .await
    }

    async fn query_forecast(
        &self,
        req: &AnalysisRequest,
        horizon_days: u32,
    ) -> Result<Vec<FlowForecast>, ApiError> {
        let backend = Arc::clone(&self.backend);
        let call = req.clone();
        let key_params = (req.clone(), horizon_days);
        self.fetch_cached("analytics/forecast", &key_params, || async move {
            backend.flow_forecast(&call, horizon_days).await
        })
        .await
    }

    async fn query_anomalies(&self, req: &AnalysisRequest) -> Result<Vec<FlowAnomaly>, ApiError> {
        let backend = Arc::clone(&self.backend);
        let call = req.clone();
        self.fetch_cached("analytics/anomalies", req, || async move {
            backend.flow_anomalies(&call).await
        })
        .await
    }

    /// Cache-through fetch. Returns the cached answer when fresh; otherwise
    /// runs `fetch` and caches its result. If the parameters changed while
    /// the fetch was in flight, the result is handed back to the caller but
    /// neither cached nor recorded as the current error.
    async fn fetch_cached<P, T, F, Fut>(
        &self,
        endpoint: &str,
        params: &P,
        fetch: F,
    ) -> Result<T, ApiError>
    where
        P: Serialize,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let generation = self.generation.load(Ordering::SeqCst);
        let key = QueryCache::key(endpoint, params);

        if let Some(hit) = self.cache.get(&key).await {
            match serde_json::from_value::<T>(hit) {
                Ok(value) => {
                    tracing::debug!(endpoint = %endpoint, "Cache hit");
                    return Ok(value);
                }
                Err(e) => {
                    // Shape mismatch: the entry predates a model change.
                    tracing::debug!(endpoint = %endpoint, error = %e, "Dropping unreadable cache entry");
                }
            }
        }

        let _guard = InFlightGuard::enter(&self.in_flight);
        match fetch().await {
            Ok(value) => {
                if self.generation.load(Ordering::SeqCst) == generation {
                    if let Ok(payload) = serde_json::to_value(&value) {
                        self.cache.set(key, payload).await;
                    }
                }
                Ok(value)
            }
            Err(e) => {
                if self.generation.load(Ordering::SeqCst) == generation {
                    *self.error.write().await = Some(e.message().to_string());
                }
                tracing::error!(endpoint = %endpoint, error = %e, "Query failed");
                Err(e)
            }
        }
    }

    /// Applies `mutate` to the shared holder unless the parameters changed
    /// since `generation` was captured. Re-checked under the write lock so a
    /// concurrent parameter change always wins.
    async fn write_if_current<F: FnOnce(&mut AnalyticsData)>(
        &self,
        generation: u64,
        mutate: F,
    ) -> bool {
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!("Discarding stale response");
            return false;
        }
        let mut data = self.data.write().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!("Discarding stale response");
            return false;
        }
        mutate(&mut data);
        true
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::mpsc;

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use crate::backend::FixtureBackend;
    use crate::models::{
        CleanupOptions, CleanupReport, DataStats, DataSummary, ExportFormat, Line, RecordPage,
        RecordQuery, Station, Train, UploadReport, ValidationReport,
    };

    fn date(s: &str) -> NaiveDate {
        s.parse().expect("valid date literal")
    }

    /// Fixture backend wrapped with a call counter and fault/delay hooks.
    struct InstrumentedBackend {
        inner: FixtureBackend,
        calls: AtomicUsize,
        fail_trends: AtomicBool,
        /// Delay trend queries whose range starts on this date.
        delay_start: Option<NaiveDate>,
        delay: Duration,
        started: Option<mpsc::UnboundedSender<()>>,
    }

    impl InstrumentedBackend {
        fn new() -> Self {
            Self {
                inner: FixtureBackend::new(),
                calls: AtomicUsize::new(0),
                fail_trends: AtomicBool::new(false),
                delay_start: None,
                delay: Duration::from_millis(0),
                started: None,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn tick(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Backend for InstrumentedBackend {
        async fn flow_trends(&self, req: &AnalysisRequest) -> Result<FlowTrendData, ApiError> {
            self.tick();
            if let Some(tx) = &self.started {
                let _ = tx.send(());
            }
            if self.delay_start == Some(req.start_date) {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_trends.load(Ordering::SeqCst) {
                return Err(ApiError::Http {
                    status: 503,
                    message: "service unavailable".to_string(),
                    body: None,
                });
            }
            self.inner.flow_trends(req).await
        }

        async fn station_rankings(
            &self,
            req: &AnalysisRequest,
        ) -> Result<Vec<StationRanking>, ApiError> {
            self.tick();
            self.inner.station_rankings(req).await
        }

        async fn line_loads(&self, req: &AnalysisRequest) -> Result<Vec<LineLoadData>, ApiError> {
            self.tick();
            self.inner.line_loads(req).await
        }

        async fn time_distribution(
            &self,
            req: &AnalysisRequest,
        ) -> Result<Vec<TimeDistribution>, ApiError> {
            self.tick();
            self.inner.time_distribution(req).await
        }

        async fn time_periods(&self, req: &AnalysisRequest) -> Result<Vec<TimePeriod>, ApiError> {
            self.tick();
            self.inner.time_periods(req).await
        }

        async fn heatmap(&self, req: &AnalysisRequest) -> Result<Heatmap, ApiError> {
            self.tick();
            self.inner.heatmap(req).await
        }

        async fn flow_lines(&self, req: &AnalysisRequest) -> Result<Vec<FlowLine>, ApiError> {
            self.tick();
            self.inner.flow_lines(req).await
        }

        async fn spatial_distribution(
            &self,
            req: &AnalysisRequest,
        ) -> Result<Vec<SpatialPoint>, ApiError> {
            self.tick();
            self.inner.spatial_distribution(req).await
        }

        async fn flow_forecast(
            &self,
            req: &AnalysisRequest,
            horizon_days: u32,
        ) -> Result<Vec<FlowForecast>, ApiError> {
            self.tick();
            self.inner.flow_forecast(req, horizon_days).await
        }

        async fn flow_anomalies(
            &self,
            req: &AnalysisRequest,
        ) -> Result<Vec<FlowAnomaly>, ApiError> {
            self.tick();
            self.inner.flow_anomalies(req).await
        }

        async fn stations(&self) -> Result<Vec<Station>, ApiError> {
            self.tick();
            self.inner.stations().await
        }

        async fn lines(&self) -> Result<Vec<Line>, ApiError> {
            self.tick();
            self.inner.lines().await
        }

        async fn trains(&self) -> Result<Vec<Train>, ApiError> {
            self.tick();
            self.inner.trains().await
        }

        async fn data_summary(&self) -> Result<DataSummary, ApiError> {
            self.tick();
            self.inner.data_summary().await
        }

        async fn upload_records(
            &self,
            file_name: &str,
            bytes: Vec<u8>,
            validate_only: bool,
        ) -> Result<UploadReport, ApiError> {
            self.tick();
            self.inner.upload_records(file_name, bytes, validate_only).await
        }

        async fn records(&self, query: &RecordQuery) -> Result<RecordPage, ApiError> {
            self.tick();
            self.inner.records(query).await
        }

        async fn validate_records(&self) -> Result<ValidationReport, ApiError> {
            self.tick();
            self.inner.validate_records().await
        }

        async fn cleanup_records(
            &self,
            options: &CleanupOptions,
        ) -> Result<CleanupReport, ApiError> {
            self.tick();
            self.inner.cleanup_records(options).await
        }

        async fn delete_records(&self, ids: &[i64]) -> Result<u64, ApiError> {
            self.tick();
            self.inner.delete_records(ids).await
        }

        async fn data_stats(&self) -> Result<DataStats, ApiError> {
            self.tick();
            self.inner.data_stats().await
        }

        async fn export_records(
            &self,
            query: &RecordQuery,
            format: ExportFormat,
        ) -> Result<Vec<u8>, ApiError> {
            self.tick();
            self.inner.export_records(query, format).await
        }
    }

    fn store_with(backend: Arc<InstrumentedBackend>) -> AnalyticsStore {
        AnalyticsStore::new(backend, &Config::default())
    }

    async fn january_store(backend: Arc<InstrumentedBackend>) -> AnalyticsStore {
        let store = store_with(backend);
        store
            .set_date_range(date("2024-01-01"), date("2024-01-31"))
            .await;
        store
    }

    // --- comprehensive fetch tests ---

    #[tokio::test]
    async fn comprehensive_fetch_populates_every_surface() {
        let backend = Arc::new(InstrumentedBackend::new());
        let store = january_store(Arc::clone(&backend)).await;

        let snapshot = store.fetch_comprehensive().await.expect("fetch");

        assert_eq!(snapshot.trends.as_ref().expect("trends").points.len(), 31);
        assert!(!snapshot.rankings.is_empty());
        assert!(!snapshot.line_loads.is_empty());
        assert_eq!(snapshot.time_distribution.len(), 24);
        assert_eq!(snapshot.time_periods.len(), 5);
        assert!(snapshot.heatmap.is_some());
        assert!(!snapshot.flow_lines.is_empty());
        assert!(!snapshot.spatial.is_empty());
        assert_eq!(snapshot.forecasts.len(), DEFAULT_FORECAST_DAYS as usize);
        assert_eq!(snapshot.anomalies.len(), 2);

        let summary = snapshot.summary.expect("summary");
        assert_eq!(summary.busiest_station, "成都东");
        assert_eq!(summary.busiest_line, "成渝高铁");
        assert_eq!(summary.peak_hour, 8);
        assert!(summary.total_passengers > 0.0);
        assert!(summary.total_revenue > 0.0);

        let holder = store.data();
        let data = holder.read().await;
        assert_eq!(
            data.trends.as_ref().expect("holder trends").points.len(),
            31
        );
        assert!(data.summary.is_some());
        drop(data);

        assert!(!store.is_loading());
        assert!(store.last_error().await.is_none());
        assert_eq!(backend.call_count(), 10);
    }

    #[tokio::test]
    async fn repeat_fetch_is_served_from_cache() {
        let backend = Arc::new(InstrumentedBackend::new());
        let store = january_store(Arc::clone(&backend)).await;

        store.fetch_comprehensive().await.expect("first fetch");
        assert_eq!(backend.call_count(), 10);

        store.fetch_comprehensive().await.expect("second fetch");
        assert_eq!(backend.call_count(), 10);
    }

    #[tokio::test]
    async fn parameter_change_invalidates_the_cache() {
        let backend = Arc::new(InstrumentedBackend::new());
        let store = january_store(Arc::clone(&backend)).await;

        store.fetch_comprehensive().await.expect("first fetch");
        assert_eq!(backend.call_count(), 10);

        store.set_granularity(Granularity::Week).await;
        store.fetch_comprehensive().await.expect("second fetch");
        assert_eq!(backend.call_count(), 20);
    }

    #[tokio::test]
    async fn refresh_all_bypasses_fresh_cache_entries() {
        let backend = Arc::new(InstrumentedBackend::new());
        let store = january_store(Arc::clone(&backend)).await;

        store.fetch_comprehensive().await.expect("first fetch");
        store.refresh_all().await.expect("refresh");
        assert_eq!(backend.call_count(), 20);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_data_and_records_the_error() {
        let backend = Arc::new(InstrumentedBackend::new());
        let store = january_store(Arc::clone(&backend)).await;

        store.fetch_comprehensive().await.expect("initial fetch");

        backend.fail_trends.store(true, Ordering::SeqCst);
        store
            .set_date_range(date("2024-02-01"), date("2024-02-29"))
            .await;

        let err = store
            .fetch_comprehensive()
            .await
            .expect_err("trend query fails");
        assert_eq!(err.status(), Some(503));

        // The holder still shows the January snapshot.
        let holder = store.data();
        let data = holder.read().await;
        assert_eq!(data.trends.as_ref().expect("trends").points.len(), 31);
        drop(data);

        assert_eq!(
            store.last_error().await.as_deref(),
            Some("service unavailable")
        );

        // Recovery clears the recorded error.
        backend.fail_trends.store(false, Ordering::SeqCst);
        store.refresh_all().await.expect("recovered fetch");
        assert!(store.last_error().await.is_none());
    }

    #[tokio::test]
    async fn stale_response_is_discarded_after_parameter_change() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut backend = InstrumentedBackend::new();
        backend.delay_start = Some(date("2024-01-01"));
        backend.delay = Duration::from_millis(200);
        backend.started = Some(tx);
        let backend = Arc::new(backend);

        let store = Arc::new(january_store(Arc::clone(&backend)).await);

        let slow_store = Arc::clone(&store);
        let slow = tokio::spawn(async move { slow_store.fetch_comprehensive().await });

        // Wait until the slow January trend query is actually running.
        rx.recv().await.expect("trend query started");

        store
            .set_date_range(date("2024-02-01"), date("2024-02-29"))
            .await;
        store.fetch_comprehensive().await.expect("february fetch");

        let slow_snapshot = slow
            .await
            .expect("join")
            .expect("slow fetch still returns its data");
        assert_eq!(
            slow_snapshot.trends.as_ref().expect("trends").points.len(),
            31
        );

        // The holder shows February; the late January result was discarded.
        let holder = store.data();
        let data = holder.read().await;
        let trends = data.trends.as_ref().expect("trends");
        assert_eq!(trends.points.len(), 29);
        assert_eq!(trends.points[0].time, "2024-02-01");
    }

    // --- single-surface fetch tests ---

    #[tokio::test]
    async fn single_fetch_updates_only_its_slot() {
        let backend = Arc::new(InstrumentedBackend::new());
        let store = january_store(Arc::clone(&backend)).await;

        store.fetch_trends().await.expect("trends");

        let holder = store.data();
        let data = holder.read().await;
        assert!(data.trends.is_some());
        assert!(data.rankings.is_empty());
        assert!(data.summary.is_none());
    }

    #[tokio::test]
    async fn forecast_horizon_is_part_of_the_cache_key() {
        let backend = Arc::new(InstrumentedBackend::new());
        let store = january_store(Arc::clone(&backend)).await;

        let week = store.fetch_forecast(7).await.expect("7-day forecast");
        let fortnight = store.fetch_forecast(14).await.expect("14-day forecast");
        assert_eq!(week.len(), 7);
        assert_eq!(fortnight.len(), 14);
        assert_eq!(backend.call_count(), 2);

        // Same horizon again: cache hit, no new backend call.
        store.fetch_forecast(7).await.expect("cached forecast");
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn generation_advances_with_each_parameter_change() {
        let backend = Arc::new(InstrumentedBackend::new());
        let store = store_with(backend);

        let before = store.generation();
        store.set_granularity(Granularity::Month).await;
        store
            .update_params(AnalysisPatch {
                station_ids: Some(vec![1]),
                ..AnalysisPatch::default()
            })
            .await;
        assert_eq!(store.generation(), before + 2);
    }
}
