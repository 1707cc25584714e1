use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use stationbus_config::StationConfig;
use stationbus_proto::Source;
use tokio_util::sync::CancellationToken;
use tracing::info;

use stationbus::broker::{Broker, RedisBroker};
use stationbus::broker_monitor::BrokerMonitor;
use stationbus::command_sender::CommandSender;
use stationbus::dispatcher::Dispatcher;
use stationbus::estop::EstopCoordinator;
use stationbus::hub::Hub;
use stationbus::registry::Registry;
use stationbus::store::{SledStore, Store};
use stationbus::test_run::TestRunManager;
use stationbus::{http, station_poller, subscribers, telemetry, types};

/// The stationbus central controller.
///
/// Coordinates field stations and browser operators over a shared
/// message broker.
///
/// Configuration is loaded from (in order, later wins):
/// 1. Compiled defaults
/// 2. /etc/stationbus/config.toml
/// 3. ~/.config/stationbus/config.toml
/// 4. ./stationbus.toml (or --config path)
/// 5. Environment variables (STATIONBUS_*)
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (overrides ./stationbus.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP/WebSocket listen address.
    #[arg(long)]
    listen: Option<String>,

    /// Override the broker (Redis) connection address.
    #[arg(long)]
    broker: Option<String>,

    /// Show loaded configuration and exit.
    #[arg(long)]
    show_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) =
        StationConfig::load_with_sources_from(cli.config.as_deref()).context("failed to load configuration")?;

    if let Some(listen) = &cli.listen {
        config.infra.bind.listen_address = listen.clone();
    }
    if let Some(broker) = &cli.broker {
        config.infra.bind.broker_address = broker.clone();
    }

    if cli.show_config {
        println!("# Configuration sources:");
        for path in &sources.files {
            println!("#   - {}", path.display());
        }
        if !sources.env_overrides.is_empty() {
            println!("# Environment overrides:");
            for var in &sources.env_overrides {
                println!("#   - {var}");
            }
        }
        println!("{config:#?}");
        return Ok(());
    }

    telemetry::init(&config.infra.telemetry.log_level, config.infra.telemetry.otlp_endpoint.as_deref())
        .context("failed to initialize telemetry")?;

    info!("configuration loaded from:");
    for path in &sources.files {
        info!("   - {}", path.display());
    }
    if !sources.env_overrides.is_empty() {
        info!("   environment overrides: {:?}", sources.env_overrides);
    }

    let source = Source {
        service: "stationbus".to_string(),
        instance: format!("ctrl-{}", uuid::Uuid::new_v4().simple()),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    // Database open failure is fatal at startup per spec.md §6/§7.
    std::fs::create_dir_all(&config.infra.paths.database_path)
        .context("failed to create database directory")?;
    let store: Arc<dyn Store> =
        Arc::new(SledStore::open(&config.infra.paths.database_path).context("failed to open durable store")?);
    info!(path = %config.infra.paths.database_path.display(), "durable store ready");

    // Broker unreachable at boot is fatal per spec.md §6.
    let broker: Arc<dyn Broker> = Arc::new(
        RedisBroker::connect(&config.infra.bind.broker_address)
            .await
            .context("failed to connect to broker")?,
    );
    info!(address = %config.infra.bind.broker_address, "broker connected");

    let registry = Arc::new(Registry::new());
    let dispatcher = Arc::new(Dispatcher::new());
    let command_sender = Arc::new(CommandSender::new(broker.clone()));
    let hub = Arc::new(Hub::new(config.infra.tunables.hub_queue_depth));
    let test_runs = Arc::new(TestRunManager::new(store.clone()));
    let estop = Arc::new(EstopCoordinator::new());
    let broker_monitor = Arc::new(BrokerMonitor::new(
        broker.clone(),
        Duration::from_secs(config.infra.tunables.broker_probe_interval_secs),
    ));

    // The e-stop coordinator's single callback fans out to exactly three
    // consumers, per spec.md §9's "callback coupling" design note: the
    // hub, the durable store, and the test-run manager. Each is spawned
    // so the callback itself never blocks the coordinator's lock.
    {
        let hub = hub.clone();
        let store = store.clone();
        let test_runs = test_runs.clone();
        estop
            .set_callback(Arc::new(move |state: types::EstopState| {
                let hub = hub.clone();
                let store = store.clone();
                let test_runs = test_runs.clone();
                tokio::spawn(async move {
                    hub.broadcast_event(
                        "estop",
                        serde_json::json!({
                            "active": state.active,
                            "reason": state.reason.clone(),
                            "description": state.description,
                            "initiator": state.initiator,
                            "triggered_at": state.triggered_at,
                        }),
                    )
                    .await;
                    let _ = store
                        .append_event(types::EventRecord {
                            id: uuid::Uuid::new_v4().to_string(),
                            timestamp: state.triggered_at,
                            kind: "estop_triggered".to_string(),
                            station: None,
                            device: None,
                            detail: state.reason.clone(),
                        })
                        .await;
                    test_runs.handle_estop(state.triggered_at).await;
                });
            }))
            .await;
    }

    let cancel = CancellationToken::new();

    let mut tasks = Vec::new();
    tasks.push(subscribers::spawn_heartbeat_loop(
        broker.clone(),
        registry.clone(),
        test_runs.clone(),
        hub.clone(),
        cancel.clone(),
    ));
    tasks.push(subscribers::spawn_estop_loop(broker.clone(), estop.clone(), cancel.clone()));
    tasks.push(subscribers::spawn_response_loop(
        broker.clone(),
        dispatcher.clone(),
        hub.clone(),
        source.instance.clone(),
        cancel.clone(),
    ));
    tasks.push(subscribers::spawn_presence_probe(
        broker.clone(),
        registry.clone(),
        Duration::from_secs(config.infra.tunables.health_sweep_interval_secs),
        store.clone(),
        cancel.clone(),
    ));
    tasks.push(station_poller::spawn(
        registry.clone(),
        command_sender.clone(),
        source.clone(),
        Duration::from_secs(config.infra.tunables.station_poll_interval_secs),
        cancel.clone(),
    ));

    {
        let monitor = broker_monitor.clone();
        let monitor_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move { monitor.run(monitor_cancel).await }));
    }

    {
        let hub = hub.clone();
        let hub_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move { hub.run(hub_cancel).await }));
    }

    {
        let registry = registry.clone();
        let test_runs = test_runs.clone();
        let sweep_cancel = cancel.clone();
        let interval = Duration::from_secs(config.infra.tunables.health_sweep_interval_secs);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let newly_offline = registry.run_health_check(types::now_secs()).await;
                        for station in newly_offline {
                            test_runs.handle_station_offline(&station, types::now_secs()).await;
                        }
                    }
                    _ = sweep_cancel.cancelled() => break,
                }
            }
        }));
    }

    let app_state = http::AppState {
        registry,
        estop,
        dispatcher,
        command_sender,
        broker_monitor,
        hub,
        store: store.clone(),
        test_runs,
        source,
        default_command_timeout: Duration::from_millis(config.infra.tunables.default_command_timeout_ms),
    };
    let app = http::router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.infra.bind.listen_address)
        .await
        .with_context(|| format!("failed to bind {}", config.infra.bind.listen_address))?;
    info!(address = %config.infra.bind.listen_address, "http surface listening");

    let server_cancel = cancel.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        server_cancel.cancelled().await;
        info!("draining http surface");
    });
    let server_handle = tokio::spawn(server);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
            cancel.cancel();
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("received SIGTERM, shutting down");
            cancel.cancel();
        }
    }

    let drain = Duration::from_secs(config.infra.tunables.shutdown_drain_secs);
    if tokio::time::timeout(drain, server_handle).await.is_err() {
        tracing::warn!("http surface did not drain within {:?}", drain);
    }

    for task in tasks {
        task.abort();
    }

    info!("shutdown complete");
    Ok(())
}
