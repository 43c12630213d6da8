//! Derived display fields
//!
//! Pure and deterministic: every function takes `now` explicitly and never
//! touches the network or the clock. Results are recomputed from the latest
//! record on every render and never sent back to the server.

use crate::models::{keys, Record};
use serde::Serialize;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Absorbs float noise such as `100.0 * 0.7 == 70.00000000000001`
const BOUNDARY_EPSILON: f64 = 1e-9;

/// Threshold used when a capacity record carries none
pub const DEFAULT_WARNING_THRESHOLD: f64 = 0.8;

/// Ordered by severity: `Normal < Warning < Restricted`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacityStatus {
    Normal,
    Warning,
    Restricted,
}

impl CapacityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapacityStatus::Normal => "normal",
            CapacityStatus::Warning => "warning",
            CapacityStatus::Restricted => "restricted",
        }
    }
}

/// Capacity classification. Both boundaries are inclusive and the higher
/// severity wins: `current >= capacity` is restricted before anything else.
pub fn capacity_status(current: f64, capacity: f64, threshold: f64) -> CapacityStatus {
    if at_least(current, capacity) {
        CapacityStatus::Restricted
    } else if at_least(current, capacity * threshold) {
        CapacityStatus::Warning
    } else {
        CapacityStatus::Normal
    }
}

fn at_least(value: f64, limit: f64) -> bool {
    value + BOUNDARY_EPSILON >= limit
}

/// Usage as a whole percentage; a zero capacity counts as 1
pub fn usage_percent(current: f64, capacity: f64) -> u32 {
    let capacity = if capacity > 0.0 { capacity } else { 1.0 };
    let pct = (current.max(0.0) / capacity * 100.0).round();
    if pct.is_finite() {
        pct as u32
    } else {
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadLevel {
    Low,
    Medium,
    High,
}

pub fn load_level(percent: u32) -> LoadLevel {
    match percent {
        p if p >= 90 => LoadLevel::High,
        p if p >= 70 => LoadLevel::Medium,
        _ => LoadLevel::Low,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundStatus {
    Below,
    InRange,
    Above,
}

impl BoundStatus {
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, BoundStatus::InRange)
    }
}

/// Monitored value against its indicator bounds; the bounds themselves are in range.
pub fn bound_status(value: f64, lower: f64, upper: f64) -> BoundStatus {
    if value > upper {
        BoundStatus::Above
    } else if value < lower {
        BoundStatus::Below
    } else {
        BoundStatus::InRange
    }
}

/// Alert level tag assigned by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Security,
    Unknown,
}

impl AlertLevel {
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "info" => AlertLevel::Info,
            "warning" => AlertLevel::Warning,
            "error" => AlertLevel::Error,
            "security" => AlertLevel::Security,
            _ => AlertLevel::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Security => "security",
            AlertLevel::Unknown => "unknown",
        }
    }
}

/// Accepts RFC 3339 and the server's `YYYY-MM-DD HH:MM:SS` (UTC) form.
pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(ts);
    }
    let plain = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    if let Ok(ts) = PrimitiveDateTime::parse(raw, &plain) {
        return Some(ts.assume_utc());
    }
    let iso_naive = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    let head = raw.split('.').next().unwrap_or(raw);
    PrimitiveDateTime::parse(head, &iso_naive)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// Timestamp field of a record, `None` when missing or unparseable
pub fn record_timestamp(record: &Record, field: &str) -> Option<OffsetDateTime> {
    record.str_field(field).and_then(parse_timestamp)
}

/// True when `ts` is newer than `now - window`; future timestamps count as within.
pub fn is_within(ts: OffsetDateTime, now: OffsetDateTime, window: Duration) -> bool {
    ts > now - window
}

pub fn relative_time(ts: OffsetDateTime, now: OffsetDateTime) -> String {
    let elapsed = now - ts;
    let minutes = elapsed.whole_minutes();
    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        plural(minutes, "minute")
    } else if elapsed.whole_hours() < 24 {
        plural(elapsed.whole_hours(), "hour")
    } else {
        plural(elapsed.whole_days(), "day")
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{n} {unit}s ago")
    }
}

/// Window lengths for alert presentation; configuration, never literals at call sites
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeriveConfig {
    pub recent_window: Duration,
    pub recent_group_window: Duration,
}

impl Default for DeriveConfig {
    fn default() -> Self {
        Self {
            recent_window: Duration::from_secs(5 * 60),
            recent_group_window: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityFields {
    pub status: CapacityStatus,
    pub usage_percent: u32,
    pub load: LoadLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertFields {
    pub level: AlertLevel,
    pub created_at: Option<OffsetDateTime>,
    pub is_recent: bool,
    pub in_recent_group: bool,
    pub age: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingFields {
    pub bound: Option<BoundStatus>,
    pub is_abnormal: bool,
}

/// Maps raw records to their derived display attributes
#[derive(Debug, Clone, Copy, Default)]
pub struct DerivedFieldComputer {
    config: DeriveConfig,
}

impl DerivedFieldComputer {
    pub fn new(config: DeriveConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DeriveConfig {
        &self.config
    }

    /// `None` when the record has no usable capacity figure
    pub fn capacity(&self, record: &Record) -> Option<CapacityFields> {
        let capacity = record.f64_field(keys::DAILY_CAPACITY)?;
        let current = record.f64_field(keys::CURRENT_VISITORS).unwrap_or(0.0);
        let threshold = record
            .f64_field(keys::WARNING_THRESHOLD)
            .unwrap_or(DEFAULT_WARNING_THRESHOLD);
        let usage = usage_percent(current, capacity);
        Some(CapacityFields {
            status: capacity_status(current, capacity, threshold),
            usage_percent: usage,
            load: load_level(usage),
        })
    }

    pub fn alert(&self, record: &Record, now: OffsetDateTime) -> AlertFields {
        let level = record
            .str_field(keys::LOG_TYPE)
            .map(AlertLevel::parse)
            .unwrap_or(AlertLevel::Unknown);
        let created_at = record_timestamp(record, keys::CREATED_AT);
        AlertFields {
            level,
            created_at,
            is_recent: created_at.is_some_and(|ts| is_within(ts, now, self.config.recent_window)),
            in_recent_group: created_at
                .is_some_and(|ts| is_within(ts, now, self.config.recent_group_window)),
            age: created_at.map(|ts| relative_time(ts, now)),
        }
    }

    /// Environment reading; falls back to the server's `is_abnormal` flag
    /// when the indicator bounds are unknown.
    pub fn reading(&self, record: &Record, bounds: Option<(f64, f64)>) -> ReadingFields {
        let bound = match (record.f64_field(keys::MONITOR_VALUE), bounds) {
            (Some(value), Some((lower, upper))) => Some(bound_status(value, lower, upper)),
            _ => None,
        };
        let is_abnormal = match bound {
            Some(b) => b.is_abnormal(),
            None => record.bool_field(keys::IS_ABNORMAL).unwrap_or(false),
        };
        ReadingFields { bound, is_abnormal }
    }
}
