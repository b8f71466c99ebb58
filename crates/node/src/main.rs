mod actuator;
mod adc;
mod climate;
mod command;
mod config;
mod control;
mod display;
mod error;
mod link;
mod mode;
mod relay;
mod remote;
mod sensor;
#[cfg(feature = "sim")]
mod sim;
mod state;
mod telemetry;
mod web;

#[cfg(not(any(feature = "sim", feature = "hw")))]
compile_error!("enable the `sim` or `hw` feature to get a sensor source");

use anyhow::{Context, Result};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use actuator::{RoofActuator, ServoPair};
use command::CommandChannel;
use control::{ControlLoop, LoopParts};
use link::{Link, TcpProbe};
use mode::ModeArbiter;
use relay::{RelayController, RelayPin};
use remote::{BackendClient, CommandFeed};
use sensor::SensorReader;
use state::EventKind;
use telemetry::TelemetryPublisher;

#[cfg(feature = "hw")]
fn sensor_source(cfg: &config::Config) -> Result<Box<dyn SensorReader>> {
    Ok(Box::new(adc::ClimateSensors::new(&cfg.sensors)?))
}

#[cfg(all(feature = "sim", not(feature = "hw")))]
fn sensor_source(cfg: &config::Config) -> Result<Box<dyn SensorReader>> {
    let scenario = sim::Scenario::from_str_lossy(&cfg.sensors.scenario);
    info!(%scenario, seed = ?cfg.sensors.seed, "using simulated greenhouse");
    Ok(Box::new(
        sim::GreenhouseSim::new(scenario, cfg.sensors.seed)
            .with_day_length(cfg.sensors.day_length_secs),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "canopy_node=info".into()),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "node.toml".to_string());
    let cfg = config::load(&config_path)?;
    info!(device = %cfg.device_id, backend = %cfg.backend.url, "config loaded");

    // ── Shared state ────────────────────────────────────────────────
    let status = state::shared();
    status
        .write()
        .await
        .record(EventKind::System, "node started".to_string());

    // ── Hardware ────────────────────────────────────────────────────
    let sensor = sensor_source(&cfg)?;
    let servos = ServoPair::new(&cfg.servo).context("servo init failed")?;
    let actuator = RoofActuator::new(Box::new(servos), status.clone());

    let relay_pin =
        RelayPin::new(cfg.relay.gpio_pin, cfg.relay.active_low).context("relay init failed")?;
    let relay = Arc::new(RelayController::new(
        Box::new(relay_pin),
        Duration::from_secs(cfg.relay.max_duration_secs),
        status.clone(),
    ));

    // ── Mode & commands ─────────────────────────────────────────────
    let engine = cfg.engine();
    let mode = Arc::new(ModeArbiter::new(cfg.placement_table(), status.clone()));
    let commands = Arc::new(CommandChannel::new(
        mode,
        Arc::clone(&relay),
        status.clone(),
        Duration::from_secs(cfg.relay.default_duration_secs),
    ));

    // ── Network ─────────────────────────────────────────────────────
    let timeout = Duration::from_secs(cfg.backend.timeout_secs);
    let probe = TcpProbe::from_url(&cfg.backend.url, timeout, status.clone())?;
    let client = BackendClient::new(&cfg.backend)?;
    info!(probe = probe.addr(), backend = client.base_url(), "network configured");
    let link: Arc<dyn Link> = Arc::new(probe);
    let feed: Arc<dyn CommandFeed> = Arc::new(client);

    let sinks = telemetry::build_sinks(&cfg.sinks, &cfg.device_id, &cfg.backend.url, timeout)?;
    let publisher = TelemetryPublisher::new(sinks, Arc::clone(&link), timeout, status.clone());
    info!(sinks = publisher.sink_count(), "telemetry sinks ready");

    // ── Web server ──────────────────────────────────────────────────
    let web_state = web::WebState {
        commands: Arc::clone(&commands),
        status: status.clone(),
    };
    let (bind, port) = (cfg.web.bind.clone(), cfg.web.port);
    tokio::spawn(async move {
        if let Err(e) = web::serve(web_state, &bind, port).await {
            error!("web server stopped: {e:#}");
        }
    });

    // ── Control loop ────────────────────────────────────────────────
    let control = ControlLoop::new(LoopParts {
        device_id: cfg.device_id.clone(),
        settings: cfg.control.clone(),
        poll_every_ticks: cfg.backend.poll_every_ticks,
        network_timeout: timeout,
        sensor,
        engine,
        commands,
        actuator,
        display: Box::new(display::LogDisplay::default()),
        publisher,
        feed: Some(feed),
        link,
        status,
    });

    let outcome = tokio::select! {
        res = control.run() => res.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown requested");
            Ok(())
        }
    };

    // Never leave the relay energised on the way out.
    if relay.is_active().await {
        warn!("relay active at shutdown, switching off");
    }
    relay.force_off().await;
    info!("relay released, exiting");
    outcome.context("control loop stopped")
}
