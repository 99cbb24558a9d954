use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use relay_pulse::{
    alerts::AlertDispatcher,
    config::{AppConfig, StorageConfig},
    probe::HttpProber,
    query::StatusService,
    scheduler::{SchedulerDeps, SchedulerHandle},
    storage::{self, ProbeStore},
    watcher::ConfigWatcher,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, long, default_value = "config.json")]
    file: PathBuf,

    /// Log level of the hub's own targets
    #[arg(long, default_value_t = LevelFilter::TRACE)]
    log_level: LevelFilter,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("relay_pulse", level),
        ("pulse_hub", level),
        ("tower_http", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    if dotenv::dotenv().is_ok() {
        info!("loaded environment from .env");
    }

    let config = AppConfig::load(&args.file)
        .with_context(|| format!("failed to load config {}", args.file.display()))?;
    let config = Arc::new(config);
    info!(
        "loaded {} monitors, probing every {}s",
        config.monitors.len(),
        config.interval
    );

    let shutdown = CancellationToken::new();

    let store = storage::open_store(&config.storage).await?;
    migrate_channels(&store, &config).await;

    if let StorageConfig::Sqlite { retention_days, .. } = &config.storage {
        storage::spawn_retention_task(store.clone(), *retention_days, shutdown.clone());
    }

    let dispatcher = config.notifier.enabled.then(|| {
        let dispatcher = Arc::new(AlertDispatcher::from_config(
            &config.notifier,
            shutdown.clone(),
        ));
        dispatcher.spawn_eviction_task(config.notifier.state_retention());
        dispatcher
    });

    let scheduler = Arc::new(SchedulerHandle::start(
        SchedulerDeps {
            prober: Arc::new(HttpProber::new()),
            store: store.clone(),
            alerts: dispatcher.clone(),
        },
        config.clone(),
        config.cadence(),
        &shutdown,
    ));

    let status = Arc::new(StatusService::new(config.clone(), store.clone()));

    #[cfg(feature = "api")]
    {
        use relay_pulse::api::{ApiState, spawn_api_server};
        let bind = relay_pulse::util::get_bind_addr().unwrap_or(config.api.bind);
        spawn_api_server(
            bind,
            ApiState::new(status.clone()),
            shutdown.clone(),
        )
        .await?;
    }

    match ConfigWatcher::new(&args.file).spawn(shutdown.clone()) {
        Ok(reloads) => {
            tokio::spawn(apply_reloads(
                reloads,
                store.clone(),
                status.clone(),
                dispatcher.clone(),
                scheduler.clone(),
            ));
        }
        Err(e) => warn!("config watcher unavailable, hot reload disabled: {}", e),
    }

    wait_for_signal().await;
    info!("shutting down");
    shutdown.cancel();

    scheduler.stop().await;
    if let Some(dispatcher) = &dispatcher {
        dispatcher.close().await;
    }
    if let Err(e) = store.close().await {
        error!("failed to close store: {}", e);
    }

    info!("bye");
    Ok(())
}

async fn migrate_channels(store: &Arc<dyn ProbeStore>, config: &AppConfig) {
    let mappings = config.channel_mappings();
    if mappings.is_empty() {
        return;
    }
    match store.migrate_channels(&mappings).await {
        Ok(0) => trace!("no legacy records to backfill"),
        Ok(updated) => info!("backfilled channel on {} legacy records", updated),
        Err(e) => error!("channel backfill failed: {}", e),
    }
}

#[instrument(skip_all)]
async fn apply_reloads(
    mut reloads: mpsc::Receiver<Arc<AppConfig>>,
    store: Arc<dyn ProbeStore>,
    status: Arc<StatusService>,
    dispatcher: Option<Arc<AlertDispatcher>>,
    scheduler: Arc<SchedulerHandle>,
) {
    while let Some(config) = reloads.recv().await {
        if let Err(e) = scheduler.update_config(config.clone()).await {
            error!("failed to hand reloaded config to scheduler: {}", e);
            continue;
        }
        status.update_config(config.clone());
        if let Some(dispatcher) = &dispatcher {
            dispatcher.update_config(&config.notifier);
        }
        migrate_channels(&store, &config).await;
        // new monitors should not wait a full interval for their first probe
        if let Err(e) = scheduler.trigger_now().await {
            error!("failed to trigger round after reload: {}", e);
        }
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
