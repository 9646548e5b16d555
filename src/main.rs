mod backend;
mod cache;
mod compute;
mod config;
mod error;
mod markers;
mod models;
mod records;
mod store;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use markers::MarkerStore;
use models::RecordQuery;
use records::RecordStore;
use store::AnalyticsStore;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load config; a missing file is not fatal, defaults plus environment
    // overrides cover development runs.
    let config_path =
        std::env::var("RAILFLOW_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let mut config = match Config::load(&config_path) {
        Ok(config) => {
            tracing::info!(path = %config_path, "Loaded configuration");
            config
        }
        Err(e) => {
            tracing::warn!(path = %config_path, error = %e, "Config not loaded, using defaults");
            Config::default()
        }
    };
    config.apply_env_overrides();
    config.warn_missing();

    let backend = backend::from_config(&config).expect("Failed to initialize backend");

    let analytics = Arc::new(AnalyticsStore::new(Arc::clone(&backend), &config));
    let records = RecordStore::new(Arc::clone(&backend));
    let map = MarkerStore::new(&config.map);

    // One comprehensive pass: run every analytical query for the default
    // window and project the spatial result onto the map layer.
    match analytics.fetch_comprehensive().await {
        Ok(data) => {
            if let Some(summary) = &data.summary {
                tracing::info!(
                    total_passengers = summary.total_passengers,
                    total_revenue = summary.total_revenue,
                    avg_occupancy_rate = summary.avg_occupancy_rate,
                    peak_hour = summary.peak_hour,
                    busiest_station = %summary.busiest_station,
                    busiest_line = %summary.busiest_line,
                    "Analysis summary"
                );
            }
            map.set_markers(markers::markers_from_spatial(&data.spatial))
                .await;
            tracing::info!(
                markers = map.markers().await.len(),
                trend_points = data.trends.as_ref().map(|t| t.points.len()).unwrap_or(0),
                anomalies = data.anomalies.len(),
                "Dashboard data ready"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Comprehensive analysis failed");
            std::process::exit(1);
        }
    }

    if let Err(e) = records.load_entities().await {
        tracing::error!(error = %e, "Entity metadata failed to load");
        std::process::exit(1);
    }

    match records.load_records(&RecordQuery::default()).await {
        Ok(page) => {
            tracing::info!(
                count = page.records.len(),
                total = page.total,
                pages = page.total_pages,
                "First record page loaded"
            );
        }
        Err(e) => {
            tracing::warn!(error = %e, "Record page unavailable");
        }
    }

    match records.fetch_stats().await {
        Ok(stats) => {
            tracing::info!(
                total_records = stats.total_records,
                stations = stats.station_count,
                lines = stats.line_count,
                trains = stats.train_count,
                records_per_day = stats.records_per_day,
                "Dataset statistics"
            );
        }
        Err(e) => {
            tracing::warn!(error = %e, "Dataset statistics unavailable");
        }
    }
}
