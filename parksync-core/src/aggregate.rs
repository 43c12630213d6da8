/*
 * AGGREGATE VIEW MODELS
 *
 * Everything here is a pure function of cache snapshots: no locking, no
 * mutation of inputs, same answer however many times it is called.
 *
 * Generic building blocks first (sum, arg-max, grouped counts, most-recent N),
 * then the screen models built on them. A screen composes whatever caches it
 * has; an absent or stale cache yields an empty or last-known-good section
 * and never blocks the others.
 */

use crate::derive::{
    parse_timestamp, AlertLevel, CapacityFields, CapacityStatus, DerivedFieldComputer,
};
use crate::models::{keys, Record};
use crate::store::ResourceCache;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use time::OffsetDateTime;

pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Sum of a numeric field; missing or non-numeric values count as zero.
pub fn sum_by(records: &[Record], field: &str) -> f64 {
    records.iter().filter_map(|r| r.f64_field(field)).sum()
}

/// Record with the largest value of `field`; on ties the earliest record wins.
pub fn arg_max_by<'a>(records: &'a [Record], field: &str) -> Option<&'a Record> {
    let mut best: Option<(&Record, f64)> = None;
    for record in records {
        let Some(value) = record.f64_field(field) else {
            continue;
        };
        match best {
            Some((_, top)) if value <= top => {}
            _ => best = Some((record, value)),
        }
    }
    best.map(|(record, _)| record)
}

/// Count per value of a categorical field; records without it fall under `"unknown"`.
pub fn count_by(records: &[Record], field: &str) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        let category = match record.get(field) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(serde_json::Value::Bool(b)) => b.to_string(),
            _ => UNKNOWN_CATEGORY.to_string(),
        };
        *counts.entry(category).or_insert(0) += 1;
    }
    counts
}

/// Newest-first by timestamp field, at most `n` records. Unparseable or
/// missing timestamps sort last, in their original order.
pub fn most_recent<'a>(records: &'a [Record], field: &str, n: usize) -> Vec<&'a Record> {
    let mut keyed: Vec<(Option<OffsetDateTime>, &Record)> = records
        .iter()
        .map(|r| (r.str_field(field).and_then(parse_timestamp), r))
        .collect();
    // stable sort keeps fetch order among equal keys
    keyed.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => b.cmp(a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    keyed.into_iter().take(n).map(|(_, r)| r).collect()
}

/// Top `n` records by a numeric field, descending, stable on ties
pub fn top_n_by<'a>(records: &'a [Record], field: &str, n: usize) -> Vec<&'a Record> {
    let mut sorted: Vec<&Record> = records.iter().collect();
    sorted.sort_by(|a, b| {
        let a = a.f64_field(field).unwrap_or(f64::NEG_INFINITY);
        let b = b.f64_field(field).unwrap_or(f64::NEG_INFINITY);
        b.total_cmp(&a)
    });
    sorted.truncate(n);
    sorted
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaLoad {
    pub area_id: String,
    pub name: Option<String>,
    pub visitors: f64,
    pub capacity: Option<f64>,
    /// `None` for an area without a capacity figure
    pub derived: Option<CapacityFields>,
}

impl AreaLoad {
    fn from_record(record: &Record, computer: &DerivedFieldComputer) -> Self {
        Self {
            area_id: record.id().to_string(),
            name: record.str_field(keys::AREA_NAME).map(str::to_string),
            visitors: record.f64_field(keys::CURRENT_VISITORS).unwrap_or(0.0),
            capacity: record.f64_field(keys::DAILY_CAPACITY),
            derived: computer.capacity(record),
        }
    }

    pub fn status(&self) -> Option<CapacityStatus> {
        self.derived.as_ref().map(|d| d.status)
    }
}

/// Flow-control and dashboard visitor statistics.
///
/// Areas without a capacity are counted and summed but carry no status,
/// so they appear in neither `status_counts` nor `average_usage`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlowOverview {
    pub area_count: usize,
    pub total_visitors: f64,
    pub total_capacity: f64,
    pub peak_area: Option<AreaLoad>,
    pub average_usage: u32,
    pub status_counts: BTreeMap<CapacityStatus, usize>,
    pub top_areas: Vec<AreaLoad>,
}

impl FlowOverview {
    pub const TOP_AREAS: usize = 5;

    pub fn compute(areas: &[Record], computer: &DerivedFieldComputer) -> Self {
        if areas.is_empty() {
            return Self::default();
        }
        let derived: Vec<CapacityFields> = areas.iter().filter_map(|a| computer.capacity(a)).collect();
        let mut status_counts = BTreeMap::new();
        for fields in &derived {
            *status_counts.entry(fields.status).or_insert(0) += 1;
        }
        let average_usage = if derived.is_empty() {
            0
        } else {
            let usage_sum: u64 = derived.iter().map(|d| u64::from(d.usage_percent)).sum();
            (usage_sum as f64 / derived.len() as f64).round() as u32
        };

        Self {
            area_count: areas.len(),
            total_visitors: sum_by(areas, keys::CURRENT_VISITORS),
            total_capacity: sum_by(areas, keys::DAILY_CAPACITY),
            peak_area: arg_max_by(areas, keys::CURRENT_VISITORS)
                .map(|r| AreaLoad::from_record(r, computer)),
            average_usage,
            status_counts,
            top_areas: top_n_by(areas, keys::CURRENT_VISITORS, Self::TOP_AREAS)
                .into_iter()
                .map(|r| AreaLoad::from_record(r, computer))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertView {
    pub id: String,
    pub level: AlertLevel,
    pub module: Option<String>,
    pub message: Option<String>,
    pub is_recent: bool,
    pub age: Option<String>,
}

/// Log/alert statistics for the dashboard and the log screen
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertSummary {
    pub total: usize,
    pub by_level: BTreeMap<String, usize>,
    pub by_module: BTreeMap<String, usize>,
    pub recent_count: usize,
    pub latest: Vec<AlertView>,
}

impl AlertSummary {
    pub fn compute(
        logs: &[Record],
        computer: &DerivedFieldComputer,
        now: OffsetDateTime,
        latest: usize,
    ) -> Self {
        let mut by_level = BTreeMap::new();
        let mut recent_count = 0;
        for record in logs {
            let fields = computer.alert(record, now);
            *by_level.entry(fields.level.as_str().to_string()).or_insert(0) += 1;
            if fields.in_recent_group {
                recent_count += 1;
            }
        }

        Self {
            total: logs.len(),
            by_level,
            by_module: count_by(logs, keys::MODULE),
            recent_count,
            latest: most_recent(logs, keys::CREATED_AT, latest)
                .into_iter()
                .map(|record| {
                    let fields = computer.alert(record, now);
                    AlertView {
                        id: record.id().to_string(),
                        level: fields.level,
                        module: record.str_field(keys::MODULE).map(str::to_string),
                        message: record.str_field("message").map(str::to_string),
                        is_recent: fields.is_recent,
                        age: fields.age,
                    }
                })
                .collect(),
        }
    }

    pub fn count(&self, level: AlertLevel) -> usize {
        self.by_level.get(level.as_str()).copied().unwrap_or(0)
    }
}

/// Device counts by operation status (ecological console)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceSummary {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
}

impl DeviceSummary {
    pub fn compute(devices: &[Record]) -> Self {
        Self {
            total: devices.len(),
            by_status: count_by(devices, keys::OPERATION_STATUS),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnvironmentSummary {
    pub total: usize,
    pub abnormal: usize,
    pub abnormal_by_indicator: BTreeMap<String, usize>,
}

impl EnvironmentSummary {
    /// Readings are judged against their indicator's bounds when the
    /// indicator is known, otherwise by the server's `is_abnormal` flag.
    pub fn compute(readings: &[Record], indicators: &[Record], computer: &DerivedFieldComputer) -> Self {
        let bounds: HashMap<&str, (f64, f64)> = indicators
            .iter()
            .filter_map(|i| {
                let lower = i.f64_field(keys::STANDARD_LOWER)?;
                let upper = i.f64_field(keys::STANDARD_UPPER)?;
                Some((i.id(), (lower, upper)))
            })
            .collect();

        let mut summary = Self {
            total: readings.len(),
            ..Self::default()
        };
        for reading in readings {
            let indicator = reading.str_field(keys::INDICATOR_ID);
            let range = indicator.and_then(|id| bounds.get(id).copied());
            if computer.reading(reading, range).is_abnormal {
                summary.abnormal += 1;
                let key = indicator.unwrap_or(UNKNOWN_CATEGORY).to_string();
                *summary.abnormal_by_indicator.entry(key).or_insert(0) += 1;
            }
        }
        summary
    }
}

/// Freshness of one section, so a screen can badge stale data
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionStatus {
    pub resource: String,
    pub records: usize,
    pub last_fetched_at: Option<OffsetDateTime>,
    pub stale: bool,
}

impl SectionStatus {
    fn of(cache: &ResourceCache, now: OffsetDateTime) -> Self {
        Self {
            resource: cache.name().to_string(),
            records: cache.len(),
            last_fetched_at: cache.last_fetched_at(),
            stale: cache.is_stale_at(now),
        }
    }
}

/// Inputs to the dashboard; any of them may be missing
#[derive(Debug, Clone, Copy, Default)]
pub struct DashboardSources<'a> {
    pub areas: Option<&'a ResourceCache>,
    pub logs: Option<&'a ResourceCache>,
    pub devices: Option<&'a ResourceCache>,
    pub readings: Option<&'a ResourceCache>,
    pub indicators: Option<&'a ResourceCache>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardModel {
    pub flow: FlowOverview,
    pub alerts: AlertSummary,
    pub devices: DeviceSummary,
    pub environment: EnvironmentSummary,
    pub sections: Vec<SectionStatus>,
}

impl DashboardModel {
    pub const LATEST_ALERTS: usize = 5;

    pub fn compute(
        sources: DashboardSources<'_>,
        computer: &DerivedFieldComputer,
        now: OffsetDateTime,
    ) -> Self {
        let records = |cache: Option<&ResourceCache>| -> Vec<Record> {
            cache.map(|c| c.records().to_vec()).unwrap_or_default()
        };
        let readings = records(sources.readings);
        let indicators = records(sources.indicators);

        let sections = [
            sources.areas,
            sources.logs,
            sources.devices,
            sources.readings,
            sources.indicators,
        ]
        .into_iter()
        .flatten()
        .map(|cache| SectionStatus::of(cache, now))
        .collect();

        Self {
            flow: FlowOverview::compute(
                sources.areas.map(ResourceCache::records).unwrap_or(&[]),
                computer,
            ),
            alerts: AlertSummary::compute(
                sources.logs.map(ResourceCache::records).unwrap_or(&[]),
                computer,
                now,
                Self::LATEST_ALERTS,
            ),
            devices: DeviceSummary::compute(sources.devices.map(ResourceCache::records).unwrap_or(&[])),
            environment: EnvironmentSummary::compute(&readings, &indicators, computer),
            sections,
        }
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.total
    }
}
