//! Liftbank - elevator bank dispatch and movement engine
//!
//! Simulates a bank of elevator cars: calls come in over HTTP, an
//! assignment algorithm picks a car, and a movement scheduler drives each
//! transit floor by floor with durable state, an ordered event log and
//! MQTT fan-out for live subscribers.
//!
//! Module structure:
//! - `domain/` - Core types and the elevator state machine
//! - `io/` - External interfaces (store, event log, MQTT, HTTP)
//! - `services/` - Business logic (Dispatcher, Assignment, Scheduler)
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use clap::Parser;
use liftbank::infra::{Config, Metrics};
use liftbank::io::{create_notify_channel, JsonlEventLog, MemoryStore, MqttPublisher};
use liftbank::services::{Dispatcher, MovementScheduler};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Liftbank - elevator bank dispatch and movement engine
#[derive(Parser, Debug)]
#[command(name = "liftbank", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-step visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "liftbank starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    // Embedded MQTT broker for local subscribers
    liftbank::infra::broker::start_embedded_broker(&config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        floors = %config.floors(),
        initial_cars = %config.initial_cars(),
        floor_travel_ms = %config.floor_travel_ms(),
        scheduler_workers = %config.scheduler_workers(),
        max_attempts = %config.max_attempts(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        http_port = %config.http_port(),
        event_log = %config.event_log_file(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Shared components
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let log = Arc::new(JsonlEventLog::new(config.event_log_file()));
    let metrics = Arc::new(Metrics::new());

    // Notification fan-out (bounded for backpressure, drop-on-full)
    let (notify, notify_rx) = create_notify_channel(1000, config.site_id().to_string());
    if config.notify_enabled() {
        let publisher = MqttPublisher::new(&config, notify_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        // Periodic metrics snapshots to the metrics topic
        let metrics_notify = notify.clone();
        let metrics_for_notify = metrics.clone();
        let notify_interval = config.notify_metrics_interval_secs();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(notify_interval));
            loop {
                interval.tick().await;
                metrics_notify.send_metrics(metrics_for_notify.report().to_payload());
            }
        });
    }
    // With notify disabled the receiver is dropped and senders become no-ops

    // Movement scheduler and worker pool
    let scheduler = MovementScheduler::new(
        store.clone(),
        log.clone(),
        notify.clone(),
        metrics.clone(),
        config.clone(),
    );
    scheduler.spawn_workers(&shutdown_rx);

    // Dispatcher over the same store/log
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        log.clone(),
        notify,
        scheduler.clone(),
        metrics.clone(),
        config.clone(),
    ));

    // Provision the fleet, then resume any movement interrupted by the
    // previous process
    dispatcher.init_fleet().await?;
    scheduler.recover().await;

    // HTTP API (if port > 0)
    let http_port = config.http_port();
    if http_port > 0 {
        let http_dispatcher = dispatcher.clone();
        let http_metrics = metrics.clone();
        let http_site = config.site_id().to_string();
        let http_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = liftbank::io::http::start_http_server(
                http_port,
                http_dispatcher,
                http_metrics,
                http_site,
                http_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "HTTP server error");
            }
        });
    }

    // Periodic metrics summary log
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Park until the shutdown signal flips
    let mut wait = shutdown_rx.clone();
    while !*wait.borrow() {
        if wait.changed().await.is_err() {
            break;
        }
    }

    // Give in-flight publishes a moment to drain
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    info!("liftbank shutdown complete");
    Ok(())
}
