//! Mesurable Agent - host telemetry over MQTT
//!
//! Publishes system probes through the telemetry agent:
//! - Status and config snapshots on their own timers
//! - Remote interval and enable commands, persisted across restarts
//! - Extended device info (hostname, OS, uptime)

mod discovery;
mod metrics;

use anyhow::{Context, Result};
use discovery::DeviceInfo;
use mesurable_agent::{AgentConfig, JsonFileStore, MonotonicClock, MqttTransport, TelemetryAgent};
use metrics::SystemProbe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mesurable_agent=info")),
        )
        .init();

    info!("Mesurable Agent v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = AgentConfig::load()
        .await
        .context("Failed to load configuration")?;
    if AgentConfig::is_first_time_setup() {
        config
            .save()
            .await
            .context("Failed to write default configuration")?;
        info!(
            "Default configuration written to {}",
            AgentConfig::config_file_path()?.display()
        );
    }

    let storage_path = config.storage_path()?;
    let store = JsonFileStore::open(&storage_path)
        .with_context(|| format!("Failed to open unit settings at {}", storage_path.display()))?;

    let client_id = config.client_id();
    let (transport, mut link) = MqttTransport::new(&config.mqtt, &client_id);
    info!(
        "MQTT broker {}:{} (client {})",
        config.mqtt.broker_host, config.mqtt.broker_port, client_id
    );

    let mut agent = TelemetryAgent::new(
        &config.device_id,
        transport,
        store,
        Arc::new(MonotonicClock::new()),
        &config.publish,
    )
    .context("Failed to create telemetry agent")?;

    agent.on_config_change(|unit, interval_ms| {
        info!("Unit {} now publishes every {} ms", unit, interval_ms);
    });
    agent.on_enable_change(|unit, enabled| {
        info!("Unit {} {}", unit, if enabled { "enabled" } else { "disabled" });
    });
    agent.on_connection_change(|connected| {
        if connected {
            info!("Broker link up");
        } else {
            warn!("Broker link down, waiting for reconnect");
        }
    });

    let mut probe = SystemProbe::new();
    probe
        .register(&mut agent)
        .context("Failed to register system probes")?;

    let device_info = DeviceInfo::discover(&config.device_id);
    agent.set_info_provider(move || device_info.snapshot());

    agent.connect().context("Failed to start MQTT transport")?;

    let mut ticker = interval(Duration::from_millis(config.publish.tick_millis.max(10)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                probe.sample(&mut agent);
                agent.tick();
            }

            Some(event) = link.recv() => {
                agent.handle_link_event(event);
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
