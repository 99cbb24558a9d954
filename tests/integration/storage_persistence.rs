//! Integration tests for SQLite persistence
//!
//! These tests verify that:
//! - Records survive closing and reopening the database
//! - Retention cleanup only removes old rows
//! - The channel backfill is idempotent
//! - Query results built from SQLite match the stored history

use std::sync::Arc;

use chrono::Utc;
use relay_pulse::aggregate::Period;
use relay_pulse::config::ChannelMapping;
use relay_pulse::query::StatusService;
use relay_pulse::storage::{ProbeStore, sqlite::SqliteStore};
use relay_pulse::{ProbeOutcome, ProbeStatus, ServiceKey, SubStatus};
use tempfile::tempdir;

use crate::helpers::{create_test_config, create_test_monitor};

fn outcome(status: ProbeStatus, ago_secs: i64) -> ProbeOutcome {
    ProbeOutcome::new(status, SubStatus::None, 150, Utc::now().timestamp() - ago_secs)
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("monitor.db");
    let key = ServiceKey::new("acme", "chat", "vip");

    {
        let store = SqliteStore::new(&path).await.unwrap();
        store.save(&key, &outcome(ProbeStatus::Available, 120)).await.unwrap();
        store.save(&key, &outcome(ProbeStatus::Degraded, 60)).await.unwrap();
        store.close().await.unwrap();
    }

    let store = SqliteStore::new(&path).await.unwrap();
    let history = store.history(&key, 0).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].timestamp() < history[1].timestamp());

    let latest = store.latest(&key).await.unwrap().unwrap();
    assert_eq!(latest.outcome.status, ProbeStatus::Degraded);
    assert!(store.health_check().await.unwrap().healthy);
}

#[tokio::test]
async fn test_cleanup_keeps_recent_rows() {
    let dir = tempdir().unwrap();
    let store = SqliteStore::new(dir.path().join("monitor.db")).await.unwrap();
    let key = ServiceKey::new("acme", "chat", "");

    store.save(&key, &outcome(ProbeStatus::Available, 40 * 86_400)).await.unwrap();
    store.save(&key, &outcome(ProbeStatus::Available, 31 * 86_400)).await.unwrap();
    store.save(&key, &outcome(ProbeStatus::Available, 3600)).await.unwrap();

    assert_eq!(store.cleanup(30).await.unwrap(), 2);
    assert_eq!(store.history(&key, 0).await.unwrap().len(), 1);
    assert_eq!(store.cleanup(30).await.unwrap(), 0);
}

#[tokio::test]
async fn test_channel_backfill_is_idempotent() {
    let dir = tempdir().unwrap();
    let store = SqliteStore::new(dir.path().join("monitor.db")).await.unwrap();
    let legacy = ServiceKey::new("acme", "chat", "");
    let other = ServiceKey::new("beta", "chat", "");

    store.save(&legacy, &outcome(ProbeStatus::Available, 60)).await.unwrap();
    store.save(&legacy, &outcome(ProbeStatus::Unavailable, 30)).await.unwrap();
    store.save(&other, &outcome(ProbeStatus::Available, 30)).await.unwrap();

    let mappings = vec![ChannelMapping {
        provider: "acme".into(),
        service: "chat".into(),
        channel: "vip".into(),
    }];
    assert_eq!(store.migrate_channels(&mappings).await.unwrap(), 2);
    assert_eq!(store.migrate_channels(&mappings).await.unwrap(), 0);

    let migrated = store
        .history(&ServiceKey::new("acme", "chat", "vip"), 0)
        .await
        .unwrap();
    assert_eq!(migrated.len(), 2);
    assert!(store.history(&legacy, 0).await.unwrap().is_empty());
    assert_eq!(store.history(&other, 0).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_status_query_over_sqlite() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SqliteStore::new(dir.path().join("monitor.db")).await.unwrap());
    let key = ServiceKey::new("acme", "chat", "");

    store.save(&key, &outcome(ProbeStatus::Available, 600)).await.unwrap();
    store.save(&key, &outcome(ProbeStatus::Unavailable, 300)).await.unwrap();
    // outside the 24h window, only visible to the 7d query
    store.save(&key, &outcome(ProbeStatus::Available, 2 * 86_400)).await.unwrap();

    let config = Arc::new(create_test_config(vec![create_test_monitor(
        "acme",
        "chat",
        "https://api.example.com/",
    )]));
    let service = StatusService::new(config, store);

    let day = service.query(Period::Day, "all", "all").await.unwrap();
    let newest = day.data[0].timeline.last().unwrap();
    assert_eq!(newest.availability, Some(50.0));
    assert_eq!(newest.status_counts.unavailable, 1);
    let day_total: u32 = day.data[0]
        .timeline
        .iter()
        .map(|p| p.status_counts.available + p.status_counts.unavailable)
        .sum();
    assert_eq!(day_total, 2);

    let week = service.query(Period::Week, "all", "all").await.unwrap();
    let week_total: u32 = week.data[0]
        .timeline
        .iter()
        .map(|p| p.status_counts.available + p.status_counts.unavailable)
        .sum();
    assert_eq!(week_total, 3);
}
