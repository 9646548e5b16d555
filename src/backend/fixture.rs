//! Deterministic in-memory backend. Every figure is derived from the
//! request itself, so the same query always produces the same data and
//! tests never depend on a live server.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc, Weekday};

use crate::compute;
use crate::error::ApiError;
use crate::models::{
    AnalysisRequest, AnomalySeverity, CleanupOptions, CleanupReport, DataStats, DataSummary,
    ExportFormat, FlowAnomaly, FlowForecast, FlowLine, FlowRecord, FlowTrendData, FlowTrendPoint,
    Granularity, Heatmap, Line, LineLoadData, PassengerRecord, RecordPage, RecordQuery,
    SpatialPoint, Station, StationRanking, TimeDistribution, TimePeriod, Train, UploadReport,
    ValidationIssue, ValidationReport,
};

use super::Backend;

/// Major stations of the Chengdu–Chongqing corridor:
/// (id, name, telecode, latitude, longitude, city).
const STATIONS: &[(i64, &str, &str, f64, f64, &str)] = &[
    (1, "成都东", "CDW", 30.6329, 104.1432, "成都"),
    (2, "重庆北", "CUW", 29.6074, 106.5509, "重庆"),
    (3, "成都南", "CNW", 30.6063, 104.0672, "成都"),
    (4, "重庆西", "CXW", 29.4983, 106.4462, "重庆"),
    (5, "遂宁", "SNW", 30.5085, 105.5733, "遂宁"),
    (6, "内江北", "NKW", 29.5850, 105.0585, "内江"),
    (7, "资阳北", "ZYW", 30.1216, 104.6519, "资阳"),
    (8, "永川东", "YCW", 29.3569, 105.8947, "重庆"),
    (9, "隆昌北", "LCW", 29.3378, 105.2750, "内江"),
    (10, "大足南", "DZW", 29.7000, 105.7167, "重庆"),
    (11, "荣昌北", "RCW", 29.4056, 105.5944, "重庆"),
    (12, "璧山", "BSW", 29.5917, 106.2278, "重庆"),
    (13, "沙坪坝", "SPW", 29.5589, 106.4578, "重庆"),
    (14, "简阳南", "JNW", 30.3900, 104.5514, "成都"),
    (15, "江油", "JYW", 31.7667, 104.7167, "绵阳"),
];

/// (id, name, code)
const LINES: &[(i64, &str, &str)] = &[
    (1, "成渝高铁", "CYG"),
    (2, "渝贵铁路", "YGR"),
    (3, "成贵高铁", "CGG"),
    (4, "西成高铁", "XCG"),
    (5, "渝万铁路", "YWR"),
];

/// Station ids each line passes through, in corridor order.
const LINE_STATIONS: &[&[i64]] = &[
    &[1, 14, 7, 6, 9, 11, 10, 8, 12, 13, 2],
    &[4, 12],
    &[3],
    &[1, 15],
    &[2],
];

/// (id, number, type, seats)
const TRAINS: &[(i64, &str, &str, i64)] = &[
    (1, "G8501", "高速动车组", 1015),
    (2, "G8502", "高速动车组", 1015),
    (3, "G8503", "高速动车组", 556),
    (4, "G8504", "高速动车组", 556),
    (5, "D1901", "动车组", 613),
    (6, "D1902", "动车组", 613),
    (7, "G2205", "高速动车组", 1015),
    (8, "G2206", "高速动车组", 556),
];

/// Origin→destination streams: (from, to, daily passengers).
const FLOW_PAIRS: &[(i64, i64, f64)] = &[
    (1, 2, 42_000.0),
    (2, 13, 11_000.0),
    (1, 6, 9_500.0),
    (6, 2, 8_200.0),
    (1, 7, 7_800.0),
    (4, 12, 6_400.0),
    (1, 15, 5_600.0),
    (1, 14, 4_300.0),
];

/// Relative passenger volume per hour of day; hour 8 is the peak.
const HOUR_WEIGHTS: [f64; 24] = [
    0.2, 0.1, 0.05, 0.05, 0.1, 0.4, 1.0, 1.8, 2.2, 1.6, 1.2, 1.1, 1.0, 1.1, 1.2, 1.3, 1.5, 1.9,
    2.1, 1.7, 1.2, 0.8, 0.5, 0.3,
];

/// How many records the pretend database holds.
const TOTAL_FIXTURE_RECORDS: i64 = 1245;

const AVERAGE_FARE: f64 = 75.0;
const FORECAST_CONFIDENCE: f64 = 0.95;

/// Generates corridor traffic without touching the network.
pub struct FixtureBackend;

impl FixtureBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FixtureBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for FixtureBackend {
    async fn flow_trends(&self, req: &AnalysisRequest) -> Result<FlowTrendData, ApiError> {
        let points = trend_points(req);
        let stats = compute::trend_stats(&points);
        Ok(FlowTrendData {
            granularity: req.granularity,
            points,
            total: stats.total,
            average: stats.average,
            max: stats.max,
            min: stats.min,
        })
    }

    async fn station_rankings(
        &self,
        req: &AnalysisRequest,
    ) -> Result<Vec<StationRanking>, ApiError> {
        Ok(rank_stations(req))
    }

    async fn line_loads(&self, req: &AnalysisRequest) -> Result<Vec<LineLoadData>, ApiError> {
        let routes: Vec<Line> = line_list()
            .into_iter()
            .filter(|line| req.line_ids.is_empty() || req.line_ids.contains(&line.id))
            .collect();
        let flows = flow_records_for(req);
        Ok(compute::derive_line_loads(&routes, &flows))
    }

    async fn time_distribution(
        &self,
        req: &AnalysisRequest,
    ) -> Result<Vec<TimeDistribution>, ApiError> {
        let flows = flow_records_for(req);
        let total_in: i64 = flows.iter().map(|f| f.passengers_in).sum();
        let total_out: i64 = flows.iter().map(|f| f.passengers_out).sum();
        let days = day_count(req).max(1) as f64;
        let weight_sum: f64 = HOUR_WEIGHTS.iter().sum();

        Ok((0..24u8)
            .map(|hour| {
                let share = HOUR_WEIGHTS[hour as usize] / weight_sum;
                let passengers_in = (total_in as f64 * share).round() as i64;
                let passengers_out = (total_out as f64 * share).round() as i64;
                let total_passengers = passengers_in + passengers_out;
                TimeDistribution {
                    hour,
                    passengers_in,
                    passengers_out,
                    total_passengers,
                    avg_passengers: total_passengers as f64 / days,
                }
            })
            .collect())
    }

    async fn time_periods(&self, req: &AnalysisRequest) -> Result<Vec<TimePeriod>, ApiError> {
        let distribution = self.time_distribution(req).await?;
        let all: i64 = distribution.iter().map(|d| d.total_passengers).sum();

        let spans: [(i64, &str, &str, &[u8]); 5] = [
            (1, "早高峰", "07:00-09:00", &[7, 8]),
            (2, "午间平峰", "09:00-17:00", &[9, 10, 11, 12, 13, 14, 15, 16]),
            (3, "晚高峰", "17:00-19:00", &[17, 18]),
            (4, "夜间", "19:00-23:00", &[19, 20, 21, 22]),
            (5, "凌晨", "23:00-07:00", &[23, 0, 1, 2, 3, 4, 5, 6]),
        ];

        Ok(spans
            .iter()
            .map(|(id, name, time, hours)| {
                let passengers: i64 = distribution
                    .iter()
                    .filter(|d| hours.contains(&d.hour))
                    .map(|d| d.total_passengers)
                    .sum();
                let percentage = if all == 0 {
                    0.0
                } else {
                    passengers as f64 / all as f64 * 100.0
                };
                TimePeriod {
                    id: *id,
                    name: name.to_string(),
                    time: time.to_string(),
                    passengers,
                    percentage,
                    trains: (passengers / 600).max(1) as u32,
                }
            })
            .collect())
    }

    async fn heatmap(&self, req: &AnalysisRequest) -> Result<Heatmap, ApiError> {
        let stations: Vec<&(i64, &str, &str, f64, f64, &str)> = STATIONS
            .iter()
            .filter(|s| req.station_ids.is_empty() || req.station_ids.contains(&s.0))
            .collect();
        let station_names: Vec<String> = stations.iter().map(|s| s.1.to_string()).collect();
        let times: Vec<String> = (0..24).map(|h| format!("{:02}:00", h)).collect();
        let weight_sum: f64 = HOUR_WEIGHTS.iter().sum();
        let days = day_count(req).max(1) as f64;

        let values: Vec<Vec<f64>> = stations
            .iter()
            .map(|station| {
                let station_total: i64 = flow_records_for(req)
                    .iter()
                    .filter(|f| f.station_id == station.0)
                    .map(|f| f.passengers_in + f.passengers_out)
                    .sum();
                let daily = station_total as f64 / days;
                HOUR_WEIGHTS
                    .iter()
                    .map(|w| (daily * w / weight_sum).round())
                    .collect()
            })
            .collect();

        Ok(compute::flatten_heatmap(station_names, times, values))
    }

    async fn flow_lines(&self, req: &AnalysisRequest) -> Result<Vec<FlowLine>, ApiError> {
        let days = day_count(req).max(1) as f64;
        let counts: Vec<(i64, i64, i64)> = FLOW_PAIRS
            .iter()
            .filter(|(from, to, _)| {
                req.station_ids.is_empty()
                    || req.station_ids.contains(from)
                    || req.station_ids.contains(to)
            })
            .map(|(from, to, base)| {
                let jitter = 0.9 + 0.2 * noise(mix(&[*from as u64, *to as u64]));
                (*from, *to, (base * days * jitter).round() as i64)
            })
            .collect();
        let max_count = counts.iter().map(|(_, _, c)| *c).max().unwrap_or(0);

        Ok(counts
            .into_iter()
            .map(|(from, to, passenger_count)| FlowLine {
                from_station_id: from,
                to_station_id: to,
                from_station_name: station_name(from).map(str::to_string),
                to_station_name: station_name(to).map(str::to_string),
                passenger_count,
                intensity: if max_count == 0 {
                    0.0
                } else {
                    passenger_count as f64 / max_count as f64
                },
            })
            .collect())
    }

    async fn spatial_distribution(
        &self,
        req: &AnalysisRequest,
    ) -> Result<Vec<SpatialPoint>, ApiError> {
        let rankings = rank_stations(req);
        let stations = station_list();
        Ok(compute::derive_spatial(&rankings, &stations))
    }

    async fn flow_forecast(
        &self,
        req: &AnalysisRequest,
        horizon_days: u32,
    ) -> Result<Vec<FlowForecast>, ApiError> {
        let days = day_count(req).max(1) as f64;
        let history_total: i64 = flow_records_for(req)
            .iter()
            .map(|f| f.passengers_in + f.passengers_out)
            .sum();
        let daily_avg = history_total as f64 / days;

        Ok((1..=horizon_days as u64)
            .filter_map(|offset| {
                req.end_date
                    .checked_add_days(chrono::Days::new(offset))
                    .map(|date| {
                        let drift = 0.95 + 0.1 * noise(date.num_days_from_ce() as u64);
                        let forecast = (daily_avg * weekday_factor(date) * drift).round();
                        FlowForecast {
                            timestamp: date.to_string(),
                            actual: None,
                            forecast,
                            lower_bound: (forecast * 0.88).round(),
                            upper_bound: (forecast * 1.12).round(),
                            confidence: FORECAST_CONFIDENCE,
                        }
                    })
            })
            .collect())
    }

    async fn flow_anomalies(&self, req: &AnalysisRequest) -> Result<Vec<FlowAnomaly>, ApiError> {
        // Short windows have too little history to flag anything.
        if day_count(req) < 7 {
            return Ok(Vec::new());
        }

        let mid = req
            .start_date
            .checked_add_days(chrono::Days::new((day_count(req) / 2) as u64))
            .unwrap_or(req.start_date);
        let spike_expected = station_day_total(1, mid);
        let dip_expected = station_day_total(7, req.end_date);

        Ok(vec![
            FlowAnomaly {
                id: format!("anomaly-1-{}", mid),
                timestamp: mid.to_string(),
                station_id: 1,
                station_name: "成都东".to_string(),
                expected_value: spike_expected,
                actual_value: (spike_expected * 1.42).round(),
                deviation: 42.0,
                severity: AnomalySeverity::High,
                description: "客流量异常升高，超出预期42%".to_string(),
            },
            FlowAnomaly {
                id: format!("anomaly-7-{}", req.end_date),
                timestamp: req.end_date.to_string(),
                station_id: 7,
                station_name: "资阳北".to_string(),
                expected_value: dip_expected,
                actual_value: (dip_expected * 0.65).round(),
                deviation: -35.0,
                severity: AnomalySeverity::Medium,
                description: "客流量异常下降，低于预期35%".to_string(),
            },
        ])
    }

    async fn stations(&self) -> Result<Vec<Station>, ApiError> {
        Ok(station_list())
    }

    async fn lines(&self) -> Result<Vec<Line>, ApiError> {
        Ok(line_list())
    }

    async fn trains(&self) -> Result<Vec<Train>, ApiError> {
        Ok(TRAINS
            .iter()
            .map(|(id, number, train_type, capacity)| Train {
                id: *id,
                number: number.to_string(),
                train_type: Some(train_type.to_string()),
                capacity: Some(*capacity),
            })
            .collect())
    }

    async fn data_summary(&self) -> Result<DataSummary, ApiError> {
        let req = AnalysisRequest::last_30_days();
        let flows = flow_records_for(&req);
        Ok(compute::fold_data_summary(
            &station_list(),
            &line_list(),
            &self.trains().await?,
            &flows,
            req.end_date.to_string(),
        ))
    }

    async fn upload_records(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        validate_only: bool,
    ) -> Result<UploadReport, ApiError> {
        let text = String::from_utf8_lossy(&bytes);
        let rows = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count()
            .saturating_sub(1) as i64; // header row

        tracing::info!(
            file = %file_name,
            rows,
            validate_only,
            "Fixture upload processed"
        );

        Ok(UploadReport {
            success: true,
            records_processed: rows,
            records_imported: if validate_only { 0 } else { rows },
            errors: Vec::new(),
            warnings: Vec::new(),
        })
    }

    async fn records(&self, query: &RecordQuery) -> Result<RecordPage, ApiError> {
        let page_size = query.page_size.max(1);
        let offset = (query.page.saturating_sub(1) as i64) * page_size as i64;
        let remaining = (TOTAL_FIXTURE_RECORDS - offset).max(0);
        let count = remaining.min(page_size as i64);
        let today = Utc::now().date_naive();

        let records = (0..count)
            .map(|i| {
                let id = offset + i + 1;
                let station = &STATIONS[(id as usize - 1) % STATIONS.len()];
                let line = &LINES[(id as usize - 1) % LINES.len()];
                let date = today
                    .checked_sub_days(chrono::Days::new((id % 30) as u64))
                    .unwrap_or(today);
                PassengerRecord {
                    id,
                    station_id: station.0,
                    station_name: station.1.to_string(),
                    line_id: Some(line.0),
                    line_name: Some(line.1.to_string()),
                    date,
                    hour: Some((id % 24) as u8),
                    passengers_in: 100 + (noise(mix(&[id as u64, 1])) * 500.0) as i64,
                    passengers_out: 100 + (noise(mix(&[id as u64, 2])) * 500.0) as i64,
                    created_at: Some(format!("{}T00:00:00Z", date)),
                }
            })
            .collect();

        Ok(RecordPage {
            records,
            total: TOTAL_FIXTURE_RECORDS,
            page: query.page,
            page_size: query.page_size,
            total_pages: ((TOTAL_FIXTURE_RECORDS + page_size as i64 - 1) / page_size as i64)
                as u32,
        })
    }

    async fn validate_records(&self) -> Result<ValidationReport, ApiError> {
        let issues = vec![
            ValidationIssue {
                row: 113,
                field: "operation_date".to_string(),
                message: "时间格式错误".to_string(),
            },
            ValidationIssue {
                row: 207,
                field: "station_id".to_string(),
                message: "站点ID不存在".to_string(),
            },
            ValidationIssue {
                row: 530,
                field: "passengers_in".to_string(),
                message: "客流量为负值".to_string(),
            },
        ];
        Ok(ValidationReport {
            valid: false,
            total_records: TOTAL_FIXTURE_RECORDS,
            valid_records: TOTAL_FIXTURE_RECORDS - 7,
            invalid_records: 7,
            issues,
        })
    }

    async fn cleanup_records(&self, options: &CleanupOptions) -> Result<CleanupReport, ApiError> {
        let removed_duplicates = if options.remove_duplicates { 23 } else { 0 };
        let removed_invalid = if options.remove_invalid { 7 } else { 0 };
        tracing::info!(removed_duplicates, removed_invalid, "Fixture cleanup done");
        Ok(CleanupReport {
            removed_duplicates,
            removed_invalid,
            remaining: TOTAL_FIXTURE_RECORDS - removed_duplicates - removed_invalid,
        })
    }

    async fn delete_records(&self, ids: &[i64]) -> Result<u64, ApiError> {
        tracing::info!(count = ids.len(), "Fixture delete done");
        Ok(ids.len() as u64)
    }

    async fn data_stats(&self) -> Result<DataStats, ApiError> {
        let req = AnalysisRequest::last_30_days();
        Ok(DataStats {
            total_records: TOTAL_FIXTURE_RECORDS,
            station_count: STATIONS.len() as i64,
            line_count: LINES.len() as i64,
            train_count: TRAINS.len() as i64,
            date_start: Some(req.start_date),
            date_end: Some(req.end_date),
            records_per_day: TOTAL_FIXTURE_RECORDS as f64 / 30.0,
            last_updated: Some(req.end_date.to_string()),
        })
    }

    async fn export_records(
        &self,
        query: &RecordQuery,
        format: ExportFormat,
    ) -> Result<Vec<u8>, ApiError> {
        match format {
            ExportFormat::Csv => {
                let page = self.records(query).await?;
                let mut out =
                    String::from("id,date,station,line,passengers_in,passengers_out\n");
                for record in page.records {
                    out.push_str(&format!(
                        "{},{},{},{},{},{}\n",
                        record.id,
                        record.date,
                        record.station_name,
                        record.line_name.unwrap_or_default(),
                        record.passengers_in,
                        record.passengers_out,
                    ));
                }
                Ok(out.into_bytes())
            }
            ExportFormat::Excel | ExportFormat::Pdf => Err(ApiError::Http {
                status: 501,
                message: format!("{} export is not available in mock mode", format.as_str()),
                body: None,
            }),
        }
    }
}

// --- deterministic generation ---

/// splitmix64 mapped into [0, 1).
fn noise(seed: u64) -> f64 {
    let mut x = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^= x >> 31;
    (x >> 11) as f64 / (1u64 << 53) as f64
}

/// FNV-1a fold of the seed components.
fn mix(parts: &[u64]) -> u64 {
    let mut acc = 0xcbf2_9ce4_8422_2325u64;
    for &part in parts {
        acc ^= part;
        acc = acc.wrapping_mul(0x0000_0100_0000_01b3);
    }
    acc
}

fn weekday_factor(date: NaiveDate) -> f64 {
    match date.weekday() {
        Weekday::Sat | Weekday::Sun => 1.35,
        Weekday::Fri => 1.2,
        Weekday::Mon => 1.1,
        _ => 1.0,
    }
}

fn station_weight(station_id: i64) -> f64 {
    match station_id {
        1 => 3.5,
        2 => 2.6,
        4 => 2.2,
        13 => 1.8,
        3 => 1.6,
        8 => 1.3,
        6 => 1.2,
        _ => 1.0,
    }
}

fn line_weight(line_id: i64) -> f64 {
    match line_id {
        1 => 1.6,
        5 => 1.2,
        2 => 1.1,
        3 => 0.9,
        4 => 0.7,
        _ => 1.0,
    }
}

/// Boardings/alightings for one line at one station on one day.
fn station_flow(line_id: i64, station_id: i64, date: NaiveDate) -> (i64, i64) {
    let seed = mix(&[
        line_id as u64,
        station_id as u64,
        date.num_days_from_ce() as u64,
    ]);
    let base = 1_200.0 * line_weight(line_id) * station_weight(station_id) * weekday_factor(date);
    let total = base * (0.8 + 0.4 * noise(seed));
    let in_share = 0.42 + 0.16 * noise(seed.wrapping_add(1));
    let passengers_in = (total * in_share).round() as i64;
    let passengers_out = (total * (1.0 - in_share)).round() as i64;
    (passengers_in, passengers_out)
}

fn iter_days(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |date| *date <= end)
}

fn day_count(req: &AnalysisRequest) -> i64 {
    (req.end_date - req.start_date).num_days() + 1
}

/// All flow records the request's filters allow.
fn flow_records_for(req: &AnalysisRequest) -> Vec<FlowRecord> {
    let mut records = Vec::new();
    for date in iter_days(req.start_date, req.end_date) {
        for (line_idx, stations) in LINE_STATIONS.iter().enumerate() {
            let line_id = LINES[line_idx].0;
            if !req.line_ids.is_empty() && !req.line_ids.contains(&line_id) {
                continue;
            }
            for &station_id in stations.iter() {
                if !req.station_ids.is_empty() && !req.station_ids.contains(&station_id) {
                    continue;
                }
                let (passengers_in, passengers_out) = station_flow(line_id, station_id, date);
                records.push(FlowRecord {
                    route_id: line_id,
                    station_id,
                    passengers_in,
                    passengers_out,
                    date,
                });
            }
        }
    }
    records
}

fn network_day_total(req: &AnalysisRequest, date: NaiveDate) -> f64 {
    let mut total = 0.0;
    for (line_idx, stations) in LINE_STATIONS.iter().enumerate() {
        let line_id = LINES[line_idx].0;
        if !req.line_ids.is_empty() && !req.line_ids.contains(&line_id) {
            continue;
        }
        for &station_id in stations.iter() {
            if !req.station_ids.is_empty() && !req.station_ids.contains(&station_id) {
                continue;
            }
            let (passengers_in, passengers_out) = station_flow(line_id, station_id, date);
            total += (passengers_in + passengers_out) as f64;
        }
    }
    total
}

fn station_day_total(station_id: i64, date: NaiveDate) -> f64 {
    let mut total = 0.0;
    for (line_idx, stations) in LINE_STATIONS.iter().enumerate() {
        if stations.contains(&station_id) {
            let (passengers_in, passengers_out) =
                station_flow(LINES[line_idx].0, station_id, date);
            total += (passengers_in + passengers_out) as f64;
        }
    }
    total
}

/// Time-bucketed totals; BTreeMap keys sort chronologically because every
/// label scheme is zero-padded.
fn trend_points(req: &AnalysisRequest) -> Vec<FlowTrendPoint> {
    let mut buckets: BTreeMap<String, f64> = BTreeMap::new();
    let weight_sum: f64 = HOUR_WEIGHTS.iter().sum();

    for date in iter_days(req.start_date, req.end_date) {
        let day_total = network_day_total(req, date);
        match req.granularity {
            Granularity::Hour => {
                for (hour, weight) in HOUR_WEIGHTS.iter().enumerate() {
                    let label = format!("{} {:02}:00", date, hour);
                    *buckets.entry(label).or_insert(0.0) += day_total * weight / weight_sum;
                }
            }
            granularity => {
                *buckets.entry(bucket_label(date, granularity)).or_insert(0.0) += day_total;
            }
        }
    }

    buckets
        .into_iter()
        .map(|(time, value)| FlowTrendPoint {
            time,
            value: value.round(),
        })
        .collect()
}

fn bucket_label(date: NaiveDate, granularity: Granularity) -> String {
    match granularity {
        Granularity::Hour | Granularity::Day => date.to_string(),
        Granularity::Week => {
            let week = date.iso_week();
            format!("{}-W{:02}", week.year(), week.week())
        }
        Granularity::Month => format!("{}-{:02}", date.year(), date.month()),
        Granularity::Quarter => format!("{}-Q{}", date.year(), (date.month() - 1) / 3 + 1),
        Granularity::Year => date.year().to_string(),
    }
}

fn rank_stations(req: &AnalysisRequest) -> Vec<StationRanking> {
    let mut per_station: HashMap<i64, (i64, i64)> = HashMap::new();
    for flow in flow_records_for(req) {
        let entry = per_station.entry(flow.station_id).or_insert((0, 0));
        entry.0 += flow.passengers_in;
        entry.1 += flow.passengers_out;
    }

    let mut rankings: Vec<StationRanking> = per_station
        .into_iter()
        .filter_map(|(station_id, (passengers_in, passengers_out))| {
            STATIONS.iter().find(|s| s.0 == station_id).map(|station| {
                let total = passengers_in + passengers_out;
                let fare_jitter = 0.9 + 0.2 * noise(mix(&[station_id as u64, 99]));
                StationRanking {
                    station_id,
                    station_name: station.1.to_string(),
                    station_telecode: station.2.to_string(),
                    total_passengers: total,
                    passengers_in,
                    passengers_out,
                    revenue: (total as f64 * AVERAGE_FARE * fare_jitter).round(),
                    ranking: 0,
                }
            })
        })
        .collect();

    rankings.sort_by(|a, b| {
        b.total_passengers
            .cmp(&a.total_passengers)
            .then(a.station_id.cmp(&b.station_id))
    });
    for (index, ranking) in rankings.iter_mut().enumerate() {
        ranking.ranking = index as u32 + 1;
    }
    rankings
}

fn station_name(id: i64) -> Option<&'static str> {
    STATIONS.iter().find(|s| s.0 == id).map(|s| s.1)
}

fn station_list() -> Vec<Station> {
    STATIONS
        .iter()
        .map(|(id, name, telecode, latitude, longitude, city)| Station {
            id: *id,
            name: name.to_string(),
            telecode: telecode.to_string(),
            latitude: Some(*latitude),
            longitude: Some(*longitude),
            city: Some(city.to_string()),
        })
        .collect()
}

fn line_list() -> Vec<Line> {
    LINES
        .iter()
        .map(|(id, name, code)| Line {
            id: *id,
            name: name.to_string(),
            code: Some(code.to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().expect("valid date literal")
    }

    fn january() -> AnalysisRequest {
        AnalysisRequest::for_range(date("2024-01-01"), date("2024-01-31"))
    }

    // --- generation tests ---

    #[tokio::test]
    async fn same_request_same_data() {
        let backend = FixtureBackend::new();
        let req = january();

        let first = backend.flow_trends(&req).await.expect("trends");
        let second = backend.flow_trends(&req).await.expect("trends");
        assert_eq!(first, second);

        let rankings_a = backend.station_rankings(&req).await.expect("rankings");
        let rankings_b = backend.station_rankings(&req).await.expect("rankings");
        assert_eq!(rankings_a, rankings_b);
    }

    #[tokio::test]
    async fn day_granularity_yields_one_point_per_day() {
        let backend = FixtureBackend::new();
        let trends = backend.flow_trends(&january()).await.expect("trends");

        assert_eq!(trends.points.len(), 31);
        assert_eq!(trends.points[0].time, "2024-01-01");
        assert_eq!(trends.points[30].time, "2024-01-31");
        assert!(trends.total > 0.0);
        assert!((trends.average - trends.total / 31.0).abs() < 1.0);
    }

    #[tokio::test]
    async fn hour_granularity_expands_each_day() {
        let backend = FixtureBackend::new();
        let mut req = AnalysisRequest::for_range(date("2024-01-05"), date("2024-01-05"));
        req.granularity = Granularity::Hour;

        let trends = backend.flow_trends(&req).await.expect("trends");
        assert_eq!(trends.points.len(), 24);
        assert_eq!(trends.points[8].time, "2024-01-05 08:00");
    }

    #[tokio::test]
    async fn month_granularity_groups_days() {
        let backend = FixtureBackend::new();
        let mut req = AnalysisRequest::for_range(date("2024-01-15"), date("2024-03-15"));
        req.granularity = Granularity::Month;

        let trends = backend.flow_trends(&req).await.expect("trends");
        let labels: Vec<&str> = trends.points.iter().map(|p| p.time.as_str()).collect();
        assert_eq!(labels, vec!["2024-01", "2024-02", "2024-03"]);
    }

    #[tokio::test]
    async fn rankings_are_sorted_with_sequential_ranks() {
        let backend = FixtureBackend::new();
        let rankings = backend.station_rankings(&january()).await.expect("rankings");

        assert_eq!(rankings.len(), STATIONS.len());
        assert_eq!(rankings[0].station_name, "成都东");
        for (index, ranking) in rankings.iter().enumerate() {
            assert_eq!(ranking.ranking, index as u32 + 1);
        }
        for pair in rankings.windows(2) {
            assert!(pair[0].total_passengers >= pair[1].total_passengers);
        }
    }

    #[tokio::test]
    async fn station_filter_narrows_every_surface() {
        let backend = FixtureBackend::new();
        let mut req = january();
        req.station_ids = vec![1, 2];

        let rankings = backend.station_rankings(&req).await.expect("rankings");
        assert_eq!(rankings.len(), 2);

        let heatmap = backend.heatmap(&req).await.expect("heatmap");
        assert_eq!(heatmap.stations, vec!["成都东", "重庆北"]);
    }

    #[tokio::test]
    async fn busiest_line_is_the_main_corridor() {
        let backend = FixtureBackend::new();
        let loads = backend.line_loads(&january()).await.expect("loads");

        let busiest = loads
            .iter()
            .max_by_key(|l| l.total_passengers)
            .expect("nonempty");
        assert_eq!(busiest.line_name, "成渝高铁");
        assert!(busiest.load_rate > 0.0);
    }

    #[tokio::test]
    async fn spatial_points_carry_coordinates_and_display_hints() {
        let backend = FixtureBackend::new();
        let points = backend
            .spatial_distribution(&january())
            .await
            .expect("spatial");

        assert_eq!(points.len(), STATIONS.len());
        for point in &points {
            assert!(point.latitude > 28.0 && point.latitude < 33.0);
            assert!(point.longitude > 103.0 && point.longitude < 107.0);
            assert!(point.radius >= 8.0 && point.radius <= 30.0);
            assert!(!point.color.is_empty());
        }
    }

    #[tokio::test]
    async fn time_distribution_peaks_in_the_morning() {
        let backend = FixtureBackend::new();
        let distribution = backend
            .time_distribution(&january())
            .await
            .expect("distribution");

        assert_eq!(distribution.len(), 24);
        let peak = distribution
            .iter()
            .max_by_key(|d| d.total_passengers)
            .expect("nonempty");
        assert_eq!(peak.hour, 8);
    }

    #[tokio::test]
    async fn time_periods_cover_all_passengers() {
        let backend = FixtureBackend::new();
        let periods = backend.time_periods(&january()).await.expect("periods");

        assert_eq!(periods.len(), 5);
        let total_pct: f64 = periods.iter().map(|p| p.percentage).sum();
        assert!((total_pct - 100.0).abs() < 0.5);
    }

    #[tokio::test]
    async fn forecast_extends_past_the_range_end() {
        let backend = FixtureBackend::new();
        let forecasts = backend
            .flow_forecast(&january(), 7)
            .await
            .expect("forecast");

        assert_eq!(forecasts.len(), 7);
        assert_eq!(forecasts[0].timestamp, "2024-02-01");
        for point in &forecasts {
            assert!(point.lower_bound <= point.forecast);
            assert!(point.upper_bound >= point.forecast);
            assert_eq!(point.confidence, FORECAST_CONFIDENCE);
            assert!(point.actual.is_none());
        }
    }

    #[tokio::test]
    async fn anomalies_need_a_weeks_history() {
        let backend = FixtureBackend::new();

        let short = AnalysisRequest::for_range(date("2024-01-01"), date("2024-01-03"));
        assert!(backend
            .flow_anomalies(&short)
            .await
            .expect("anomalies")
            .is_empty());

        let anomalies = backend
            .flow_anomalies(&january())
            .await
            .expect("anomalies");
        assert_eq!(anomalies.len(), 2);
        assert_eq!(anomalies[0].severity, AnomalySeverity::High);
        assert!(anomalies[0].actual_value > anomalies[0].expected_value);
        assert!(anomalies[1].actual_value < anomalies[1].expected_value);
    }

    // --- data management tests ---

    #[tokio::test]
    async fn record_pages_are_disjoint_and_counted() {
        let backend = FixtureBackend::new();
        let first = backend
            .records(&RecordQuery::default())
            .await
            .expect("page 1");
        let second = backend
            .records(&RecordQuery {
                page: 2,
                ..RecordQuery::default()
            })
            .await
            .expect("page 2");

        assert_eq!(first.records.len(), 20);
        assert_eq!(first.total, TOTAL_FIXTURE_RECORDS);
        assert_eq!(first.total_pages, 63);
        assert_eq!(first.records[0].id, 1);
        assert_eq!(second.records[0].id, 21);
    }

    #[tokio::test]
    async fn page_past_the_end_is_empty() {
        let backend = FixtureBackend::new();
        let page = backend
            .records(&RecordQuery {
                page: 99,
                page_size: 20,
                ..RecordQuery::default()
            })
            .await
            .expect("page");
        assert!(page.records.is_empty());
        assert_eq!(page.total, TOTAL_FIXTURE_RECORDS);
    }

    #[tokio::test]
    async fn upload_counts_rows_and_honors_validate_only() {
        let backend = FixtureBackend::new();
        let csv = b"station,date,in,out\n1,2024-01-01,10,5\n2,2024-01-01,8,9\n".to_vec();

        let imported = backend
            .upload_records("flows.csv", csv.clone(), false)
            .await
            .expect("upload");
        assert_eq!(imported.records_processed, 2);
        assert_eq!(imported.records_imported, 2);
        assert!(imported.success);

        let validated = backend
            .upload_records("flows.csv", csv, true)
            .await
            .expect("validate");
        assert_eq!(validated.records_processed, 2);
        assert_eq!(validated.records_imported, 0);
    }

    #[tokio::test]
    async fn cleanup_reflects_requested_options() {
        let backend = FixtureBackend::new();
        let report = backend
            .cleanup_records(&CleanupOptions {
                remove_duplicates: true,
                remove_invalid: false,
                ..CleanupOptions::default()
            })
            .await
            .expect("cleanup");
        assert_eq!(report.removed_duplicates, 23);
        assert_eq!(report.removed_invalid, 0);
        assert_eq!(report.remaining, TOTAL_FIXTURE_RECORDS - 23);
    }

    #[tokio::test]
    async fn delete_reports_the_requested_count() {
        let backend = FixtureBackend::new();
        let deleted = backend.delete_records(&[1, 2, 3]).await.expect("delete");
        assert_eq!(deleted, 3);
    }

    #[tokio::test]
    async fn csv_export_writes_one_line_per_record() {
        let backend = FixtureBackend::new();
        let query = RecordQuery {
            page_size: 5,
            ..RecordQuery::default()
        };
        let bytes = backend
            .export_records(&query, ExportFormat::Csv)
            .await
            .expect("export");
        let text = String::from_utf8(bytes).expect("utf8");

        assert!(text.starts_with("id,date,station,line"));
        assert_eq!(text.lines().count(), 6);
    }

    #[tokio::test]
    async fn binary_export_formats_are_rejected() {
        let backend = FixtureBackend::new();
        let err = backend
            .export_records(&RecordQuery::default(), ExportFormat::Pdf)
            .await
            .expect_err("unsupported");
        assert_eq!(err.status(), Some(501));
    }
}
