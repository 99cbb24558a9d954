//! Human-readable rendering of alerts

use chrono::DateTime;

use super::{Alert, AlertKind};
use crate::{ProbeStatus, SubStatus};

pub fn title(kind: AlertKind) -> &'static str {
    match kind {
        AlertKind::Down => "🔴 Service Down",
        AlertKind::Up => "✅ Service Recovered",
        AlertKind::ContinuousDown => "🚨 Service Still Down",
    }
}

pub fn status_name(status: ProbeStatus) -> &'static str {
    match status {
        ProbeStatus::Available => "Available",
        ProbeStatus::Degraded => "Degraded",
        ProbeStatus::Unavailable => "Unavailable",
    }
}

pub fn sub_status_description(sub_status: SubStatus) -> Option<&'static str> {
    Some(match sub_status {
        SubStatus::None => return None,
        SubStatus::SlowLatency => "slow response",
        SubStatus::RateLimit => "rate limited",
        SubStatus::ServerError => "server error (5xx)",
        SubStatus::ClientError => "client error (4xx)",
        SubStatus::AuthError => "authentication failed",
        SubStatus::InvalidRequest => "invalid request",
        SubStatus::NetworkError => "network error",
        SubStatus::ContentMismatch => "unexpected response content",
    })
}

/// Series name as shown to humans: `provider / service / channel`.
pub fn series_name(alert: &Alert) -> String {
    if alert.key.channel.is_empty() {
        format!("{} / {}", alert.key.provider, alert.key.service)
    } else {
        format!(
            "{} / {} / {}",
            alert.key.provider, alert.key.service, alert.key.channel
        )
    }
}

fn format_time(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Plain-text body of an alert.
pub fn render(alert: &Alert) -> String {
    let mut lines = vec![
        format!("**{}**: `{}`", title(alert.kind), series_name(alert)),
        format!(
            "Status: {} → {}",
            status_name(alert.previous),
            status_name(alert.current)
        ),
    ];

    if let Some(reason) = sub_status_description(alert.sub_status) {
        lines.push(format!("Reason: {reason}"));
    }

    match alert.kind {
        AlertKind::Down => {}
        AlertKind::ContinuousDown => {
            lines.push(format!("Consecutive failures: {}", alert.failure_count));
            if let Some(since) = alert.down_since {
                lines.push(format!("Down since: {}", format_time(since)));
            }
        }
        AlertKind::Up => {
            lines.push(format!("Latency: {} ms", alert.latency_ms));
            if alert.failure_count > 0 {
                lines.push(format!("Failed checks before recovery: {}", alert.failure_count));
            }
        }
    }

    lines.push(format!("Time: {}", format_time(alert.timestamp)));
    lines.join("\n")
}
