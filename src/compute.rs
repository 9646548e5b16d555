//! Client-side derivations over fetched analytics data: trend statistics,
//! the route × flow line-load join, map-display hints, and the summary fold.
//! Everything here is pure; empty inputs yield zeroed results, never errors.

use std::collections::{HashMap, HashSet};

use crate::models::{
    AnalysisSummary, DataSummary, FlowRecord, FlowTrendData, FlowTrendPoint, Heatmap, HeatmapCell,
    Line, LineLoadData, SpatialPoint, Station, StationRanking, TimeDistribution,
};

/// Nominal daily capacity assumed for every line when the backend does not
/// expose real capacity figures.
pub const NOMINAL_LINE_CAPACITY: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendStats {
    pub total: f64,
    pub average: f64,
    pub max: f64,
    pub min: f64,
}

/// Summary statistics over trend points. An empty point set yields all
/// zeros rather than NaN or infinities.
pub fn trend_stats(points: &[FlowTrendPoint]) -> TrendStats {
    if points.is_empty() {
        return TrendStats {
            total: 0.0,
            average: 0.0,
            max: 0.0,
            min: 0.0,
        };
    }

    let total: f64 = points.iter().map(|p| p.value).sum();
    let mut max = f64::MIN;
    let mut min = f64::MAX;
    for point in points {
        max = max.max(point.value);
        min = min.min(point.value);
    }

    TrendStats {
        total,
        average: total / points.len() as f64,
        max,
        min,
    }
}

/// Joins independently fetched routes and flow records into per-line load
/// figures: flows are grouped by route id, passenger totals summed, distinct
/// stations counted, and the load rate computed against the nominal
/// capacity. A route with no matching flows yields zero totals.
pub fn derive_line_loads(routes: &[Line], flows: &[FlowRecord]) -> Vec<LineLoadData> {
    let mut by_route: HashMap<i64, Vec<&FlowRecord>> = HashMap::new();
    for flow in flows {
        by_route.entry(flow.route_id).or_default().push(flow);
    }

    routes
        .iter()
        .map(|route| {
            let records = by_route.get(&route.id).map(Vec::as_slice).unwrap_or(&[]);
            let total_passengers: i64 = records
                .iter()
                .map(|r| r.passengers_in + r.passengers_out)
                .sum();
            let stations: HashSet<i64> = records.iter().map(|r| r.station_id).collect();
            let station_count = stations.len() as u32;
            let avg_passengers_per_station = if station_count > 0 {
                total_passengers as f64 / station_count as f64
            } else {
                0.0
            };

            LineLoadData {
                line_id: route.id,
                line_name: route.name.clone(),
                line_code: route.code.clone(),
                total_passengers,
                capacity: NOMINAL_LINE_CAPACITY,
                load_rate: total_passengers as f64 / NOMINAL_LINE_CAPACITY as f64,
                stations: station_count,
                avg_passengers_per_station,
            }
        })
        .collect()
}

/// Joins rankings with station coordinates into map points. Stations the
/// metadata has no coordinates for are skipped; when nothing has
/// coordinates the result is empty, placeholder positions are never made up.
pub fn derive_spatial(rankings: &[StationRanking], stations: &[Station]) -> Vec<SpatialPoint> {
    let coordinates: HashMap<i64, (f64, f64)> = stations
        .iter()
        .filter_map(|s| match (s.latitude, s.longitude) {
            (Some(lat), Some(lng)) => Some((s.id, (lat, lng))),
            _ => None,
        })
        .collect();

    rankings
        .iter()
        .filter_map(|ranking| {
            let (latitude, longitude) = coordinates.get(&ranking.station_id).copied()?;
            Some(SpatialPoint {
                station_id: ranking.station_id,
                station_name: ranking.station_name.clone(),
                station_telecode: ranking.station_telecode.clone(),
                latitude,
                longitude,
                total_passengers: ranking.total_passengers,
                passengers_in: ranking.passengers_in,
                passengers_out: ranking.passengers_out,
                radius: volume_radius(ranking.total_passengers),
                color: volume_color(ranking.total_passengers).to_string(),
            })
        })
        .collect()
}

/// Display radius in pixels, scaled by passenger volume.
pub fn volume_radius(total_passengers: i64) -> f64 {
    (8.0 + total_passengers as f64 / 5_000.0).min(30.0)
}

/// Display color bucketed by passenger volume.
pub fn volume_color(total_passengers: i64) -> &'static str {
    if total_passengers >= 50_000 {
        "#f5222d"
    } else if total_passengers >= 20_000 {
        "#fa8c16"
    } else {
        "#52c41a"
    }
}

/// Flattens a station × time value matrix into heatmap cells. Rows shorter
/// than the time axis simply produce fewer cells.
pub fn flatten_heatmap(stations: Vec<String>, times: Vec<String>, values: Vec<Vec<f64>>) -> Heatmap {
    let mut cells = Vec::new();
    for (y, row) in values.iter().enumerate().take(stations.len()) {
        for (x, value) in row.iter().enumerate().take(times.len()) {
            cells.push(HeatmapCell {
                x: x as u32,
                y: y as u32,
                value: *value,
            });
        }
    }
    Heatmap {
        stations,
        times,
        cells,
    }
}

/// Folds the per-domain results into the headline summary. Every fold
/// guards its empty case: average occupancy over zero lines is 0, not NaN.
pub fn summarize(
    trends: &FlowTrendData,
    rankings: &[StationRanking],
    line_loads: &[LineLoadData],
    time_distribution: &[TimeDistribution],
) -> AnalysisSummary {
    let total_revenue: f64 = rankings.iter().map(|r| r.revenue).sum();

    let avg_occupancy_rate = if line_loads.is_empty() {
        0.0
    } else {
        line_loads.iter().map(|l| l.load_rate).sum::<f64>() / line_loads.len() as f64
    };

    let peak_hour = time_distribution
        .iter()
        .max_by_key(|t| t.total_passengers)
        .map(|t| t.hour)
        .unwrap_or(0);

    let busiest_station = rankings
        .iter()
        .find(|r| r.ranking == 1)
        .or_else(|| rankings.first())
        .map(|r| r.station_name.clone())
        .unwrap_or_default();

    let busiest_line = line_loads
        .iter()
        .max_by_key(|l| l.total_passengers)
        .map(|l| l.line_name.clone())
        .unwrap_or_default();

    AnalysisSummary {
        total_passengers: trends.total,
        total_revenue,
        avg_occupancy_rate,
        peak_hour,
        busiest_station,
        busiest_line,
    }
}

/// Folds the entity lists into dataset coverage figures.
pub fn fold_data_summary(
    stations: &[Station],
    lines: &[Line],
    trains: &[crate::models::Train],
    flows: &[FlowRecord],
    last_update: String,
) -> DataSummary {
    DataSummary {
        total_records: flows.len() as i64,
        date_start: flows.iter().map(|f| f.date).min(),
        date_end: flows.iter().map(|f| f.date).max(),
        stations: stations.len(),
        lines: lines.len(),
        trains: trains.len(),
        last_update,
    }
}
