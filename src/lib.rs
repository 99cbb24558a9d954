pub mod aggregate;
pub mod alerts;
pub mod api;
pub mod cache;
pub mod config;
pub mod probe;
pub mod query;
pub mod scheduler;
pub mod storage;
pub mod util;
pub mod watcher;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identity of one monitored series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub provider: String,
    pub service: String,
    pub channel: String,
}

impl ServiceKey {
    pub fn new(
        provider: impl Into<String>,
        service: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            service: service.into(),
            channel: channel.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.provider, self.service, self.channel)
    }
}

/// Coarse result of a single probe.
///
/// The numeric values are stable: they are persisted and exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ProbeStatus {
    Unavailable = 0,
    Available = 1,
    Degraded = 2,
}

impl ProbeStatus {
    /// Whether the probe produced a usable answer (green or yellow).
    pub fn is_up(self) -> bool {
        !matches!(self, ProbeStatus::Unavailable)
    }

    pub fn label(self) -> &'static str {
        match self {
            ProbeStatus::Unavailable => "unavailable",
            ProbeStatus::Available => "available",
            ProbeStatus::Degraded => "degraded",
        }
    }
}

impl From<ProbeStatus> for u8 {
    fn from(status: ProbeStatus) -> Self {
        status as u8
    }
}

impl TryFrom<u8> for ProbeStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ProbeStatus::Unavailable),
            1 => Ok(ProbeStatus::Available),
            2 => Ok(ProbeStatus::Degraded),
            other => Err(format!("invalid probe status: {other}")),
        }
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Refinement of a red or yellow outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubStatus {
    #[default]
    #[serde(rename = "")]
    None,
    SlowLatency,
    RateLimit,
    ServerError,
    ClientError,
    AuthError,
    InvalidRequest,
    NetworkError,
    ContentMismatch,
}

impl SubStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubStatus::None => "",
            SubStatus::SlowLatency => "slow_latency",
            SubStatus::RateLimit => "rate_limit",
            SubStatus::ServerError => "server_error",
            SubStatus::ClientError => "client_error",
            SubStatus::AuthError => "auth_error",
            SubStatus::InvalidRequest => "invalid_request",
            SubStatus::NetworkError => "network_error",
            SubStatus::ContentMismatch => "content_mismatch",
        }
    }
}

impl FromStr for SubStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "" => SubStatus::None,
            "slow_latency" => SubStatus::SlowLatency,
            "rate_limit" => SubStatus::RateLimit,
            "server_error" => SubStatus::ServerError,
            "client_error" => SubStatus::ClientError,
            "auth_error" => SubStatus::AuthError,
            "invalid_request" => SubStatus::InvalidRequest,
            "network_error" => SubStatus::NetworkError,
            "content_mismatch" => SubStatus::ContentMismatch,
            other => return Err(format!("unknown sub status: {other}")),
        })
    }
}

impl fmt::Display for SubStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured result of one probe. Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub status: ProbeStatus,
    #[serde(default)]
    pub sub_status: SubStatus,
    /// Milliseconds; only meaningful when `status.is_up()`.
    pub latency_ms: u64,
    /// Epoch seconds.
    pub timestamp: i64,
}

impl ProbeOutcome {
    pub fn new(status: ProbeStatus, sub_status: SubStatus, latency_ms: u64, timestamp: i64) -> Self {
        Self {
            status,
            sub_status,
            latency_ms,
            timestamp,
        }
    }
}
