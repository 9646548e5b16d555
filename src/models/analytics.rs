use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::request::Granularity;

/// One time bucket of the flow trend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowTrendPoint {
    /// Bucket label, e.g. "2024-01-05" or "2024-01-05 08:00"
    pub time: String,
    pub value: f64,
}

/// Time-bucketed total passenger counts plus summary statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowTrendData {
    pub granularity: Granularity,
    pub points: Vec<FlowTrendPoint>,
    pub total: f64,
    pub average: f64,
    pub max: f64,
    pub min: f64,
}

/// A station's relative passenger volume for the analysed period.
/// The rank is server-assigned and never recomputed client-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRanking {
    pub station_id: i64,
    pub station_name: String,
    #[serde(default)]
    pub station_telecode: String,
    pub total_passengers: i64,
    pub passengers_in: i64,
    pub passengers_out: i64,
    pub revenue: f64,
    pub ranking: u32,
}

/// A line's utilization relative to its nominal capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineLoadData {
    pub line_id: i64,
    pub line_name: String,
    #[serde(default)]
    pub line_code: Option<String>,
    pub total_passengers: i64,
    pub capacity: i64,
    /// total_passengers / capacity
    pub load_rate: f64,
    /// Distinct stations touched by this line's flow records
    pub stations: u32,
    pub avg_passengers_per_station: f64,
}

/// A raw passenger-flow record, the input of the line-load derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub route_id: i64,
    pub station_id: i64,
    pub passengers_in: i64,
    pub passengers_out: i64,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeDistribution {
    pub hour: u8,
    pub passengers_in: i64,
    pub passengers_out: i64,
    pub total_passengers: i64,
    pub avg_passengers: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimePeriod {
    pub id: i64,
    pub name: String,
    /// Span label, e.g. "07:00-09:00"
    pub time: String,
    pub passengers: i64,
    pub percentage: f64,
    pub trains: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatmapCell {
    /// Time-axis index
    pub x: u32,
    /// Station-axis index
    pub y: u32,
    pub value: f64,
}

/// Station × time matrix flattened into cells, axis labels retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heatmap {
    pub stations: Vec<String>,
    pub times: Vec<String>,
    pub cells: Vec<HeatmapCell>,
}

/// An origin→destination passenger stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowLine {
    pub from_station_id: i64,
    pub to_station_id: i64,
    #[serde(default)]
    pub from_station_name: Option<String>,
    #[serde(default)]
    pub to_station_name: Option<String>,
    pub passenger_count: i64,
    /// Relative strength in [0, 1] for rendering line width
    pub intensity: f64,
}

/// Station passenger volume with map-display hints. Stations without
/// known coordinates never appear here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialPoint {
    pub station_id: i64,
    pub station_name: String,
    #[serde(default)]
    pub station_telecode: String,
    pub latitude: f64,
    pub longitude: f64,
    pub total_passengers: i64,
    pub passengers_in: i64,
    pub passengers_out: i64,
    pub radius: f64,
    pub color: String,
}

/// A predicted future value with uncertainty bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowForecast {
    pub timestamp: String,
    #[serde(default)]
    pub actual: Option<f64>,
    pub forecast: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowAnomaly {
    pub id: String,
    pub timestamp: String,
    pub station_id: i64,
    pub station_name: String,
    pub expected_value: f64,
    pub actual_value: f64,
    /// Relative deviation in percent
    pub deviation: f64,
    pub severity: AnomalySeverity,
    pub description: String,
}

/// Derived headline figures folded over all per-domain results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub total_passengers: f64,
    pub total_revenue: f64,
    pub avg_occupancy_rate: f64,
    pub peak_hour: u8,
    pub busiest_station: String,
    pub busiest_line: String,
}
