//! Time-bucketed aggregation of probe history
//!
//! A query period maps to a fixed number of equally wide buckets ending at
//! the caller-supplied `now`. Every record is placed into a bucket by its age,
//! and each bucket reports:
//!
//! - weighted availability (available = 1, degraded = configured weight,
//!   unavailable = 0), or "no data" when empty
//! - mean latency of the available/degraded records, rounded half-up
//! - status, timestamp and label of the newest record in the bucket
//! - per-status and per-sub-status counters
//!
//! Nothing is cached here: the sequence is rebuilt from the records on every
//! call, so identical inputs always give identical output.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::{ProbeOutcome, ProbeStatus, SubStatus};

const HOUR_SECS: i64 = 3600;
const DAY_SECS: i64 = 24 * HOUR_SECS;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported period '{0}', expected one of 24h, 1d, 7d, 30d")]
pub struct InvalidPeriod(pub String);

/// Lookback window of a status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    /// `24h` or `1d`
    Day,
    /// `7d`
    Week,
    /// `30d`
    Month,
}

impl Period {
    /// Canonical name, used in cache keys and responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Day => "24h",
            Period::Week => "7d",
            Period::Month => "30d",
        }
    }

    pub fn bucket_count(self) -> usize {
        match self {
            Period::Day => 24,
            Period::Week => 7,
            Period::Month => 30,
        }
    }

    /// Width of one bucket in seconds.
    pub fn bucket_width(self) -> i64 {
        match self {
            Period::Day => HOUR_SECS,
            Period::Week | Period::Month => DAY_SECS,
        }
    }

    /// Total lookback in seconds.
    pub fn lookback(self) -> i64 {
        self.bucket_width() * self.bucket_count() as i64
    }

    /// Oldest timestamp (epoch seconds) a query for this period needs.
    pub fn since(self, now: DateTime<Utc>) -> i64 {
        now.timestamp() - self.lookback()
    }

    fn label_format(self) -> &'static str {
        match self {
            Period::Day => "%H:%M",
            Period::Week | Period::Month => "%Y-%m-%d",
        }
    }
}

impl FromStr for Period {
    type Err = InvalidPeriod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "24h" | "1d" => Ok(Period::Day),
            "7d" => Ok(Period::Week),
            "30d" => Ok(Period::Month),
            other => Err(InvalidPeriod(other.to_string())),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tallies of statuses and their refinements within one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub available: u32,
    pub degraded: u32,
    pub unavailable: u32,
    pub slow_latency: u32,
    pub rate_limit: u32,
    pub server_error: u32,
    pub client_error: u32,
    pub auth_error: u32,
    pub invalid_request: u32,
    pub network_error: u32,
    pub content_mismatch: u32,
}

impl StatusCounts {
    /// Rate-limited probes are red: they land in `unavailable` while still
    /// bumping `rate_limit`, so availability treats them as outages.
    fn record(&mut self, status: ProbeStatus, sub_status: SubStatus) {
        match status {
            ProbeStatus::Available => self.available += 1,
            ProbeStatus::Degraded => {
                self.degraded += 1;
                match sub_status {
                    SubStatus::SlowLatency => self.slow_latency += 1,
                    SubStatus::RateLimit => self.rate_limit += 1,
                    _ => {}
                }
            }
            ProbeStatus::Unavailable => {
                self.unavailable += 1;
                match sub_status {
                    SubStatus::RateLimit => self.rate_limit += 1,
                    SubStatus::ServerError => self.server_error += 1,
                    SubStatus::ClientError => self.client_error += 1,
                    SubStatus::AuthError => self.auth_error += 1,
                    SubStatus::InvalidRequest => self.invalid_request += 1,
                    SubStatus::NetworkError => self.network_error += 1,
                    SubStatus::ContentMismatch => self.content_mismatch += 1,
                    SubStatus::None | SubStatus::SlowLatency => {}
                }
            }
        }
    }
}

/// One bucket of a timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimePoint {
    #[serde(rename = "time")]
    pub label: String,
    pub timestamp: i64,
    /// `None` serializes as -1 (no data).
    #[serde(serialize_with = "status_or_missing")]
    pub status: Option<ProbeStatus>,
    pub latency: u64,
    /// Percentage; `None` serializes as -1 (no data).
    #[serde(serialize_with = "availability_or_missing")]
    pub availability: Option<f64>,
    pub status_counts: StatusCounts,
}

fn status_or_missing<S: Serializer>(
    status: &Option<ProbeStatus>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match status {
        Some(status) => serializer.serialize_i32(i32::from(u8::from(*status))),
        None => serializer.serialize_i32(-1),
    }
}

fn availability_or_missing<S: Serializer>(
    availability: &Option<f64>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(availability.unwrap_or(-1.0))
}

pub fn availability_weight(status: ProbeStatus, degraded_weight: f64) -> f64 {
    match status {
        ProbeStatus::Available => 1.0,
        ProbeStatus::Degraded => degraded_weight,
        ProbeStatus::Unavailable => 0.0,
    }
}

#[derive(Default)]
struct BucketStats<'a> {
    total: u32,
    weighted: f64,
    latency_sum: u64,
    latency_count: u64,
    newest: Option<&'a ProbeOutcome>,
    counts: StatusCounts,
}

/// Bucket `records` into the fixed timeline of `period`, oldest bucket first.
pub fn build_timeline<'a>(
    records: impl IntoIterator<Item = &'a ProbeOutcome>,
    period: Period,
    degraded_weight: f64,
    now: DateTime<Utc>,
) -> Vec<TimePoint> {
    let count = period.bucket_count();
    let width = period.bucket_width();
    let format = period.label_format();
    let now_ts = now.timestamp();

    let mut stats: Vec<BucketStats<'a>> = (0..count).map(|_| BucketStats::default()).collect();

    for record in records {
        // future-dated records clamp into the newest bucket
        let age = (now_ts - record.timestamp).max(0);
        let from_end = (age / width) as usize;
        if from_end >= count {
            continue;
        }

        let stat = &mut stats[count - 1 - from_end];
        stat.total += 1;
        stat.weighted += availability_weight(record.status, degraded_weight);
        if record.status.is_up() {
            stat.latency_sum += record.latency_ms;
            stat.latency_count += 1;
        }
        stat.counts.record(record.status, record.sub_status);

        if stat.newest.is_none_or(|newest| record.timestamp > newest.timestamp) {
            stat.newest = Some(record);
        }
    }

    stats
        .into_iter()
        .enumerate()
        .map(|(i, stat)| {
            let slot_ts = now_ts - (count - i) as i64 * width;
            let mut point = TimePoint {
                label: format_label(slot_ts, format),
                timestamp: slot_ts,
                status: None,
                latency: 0,
                availability: None,
                status_counts: stat.counts,
            };

            if stat.total == 0 {
                return point;
            }

            point.availability = Some(stat.weighted / f64::from(stat.total) * 100.0);
            if stat.latency_count > 0 {
                point.latency = round_half_up(stat.latency_sum, stat.latency_count);
            }
            if let Some(newest) = stat.newest {
                point.status = Some(newest.status);
                point.timestamp = newest.timestamp;
                point.label = format_label(newest.timestamp, format);
            }
            point
        })
        .collect()
}

fn round_half_up(sum: u64, count: u64) -> u64 {
    (sum * 2 + count) / (count * 2)
}

fn format_label(timestamp: i64, format: &str) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|t| t.format(format).to_string())
        .unwrap_or_default()
}
