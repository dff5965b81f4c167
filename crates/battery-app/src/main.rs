use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use battery_app::BatteryAppConfig;
use battery_controller::Battery;
use sunspec_client::ModelSource;
use sunspec_parser::ModelCatalog;

#[derive(Parser, Debug)]
#[command(name = "battery-app", version, about = "Battery inverter control over Modbus TCP and SunSpec")]
struct Args {
    /// Output power in watts. Positive feeds the grid, negative charges the battery.
    #[arg(short = 's', long, value_name = "WATTS", allow_negative_numbers = true)]
    set_power: Option<f64>,

    /// Print the device's SunSpec values as JSON. Default when no setpoint is given.
    #[arg(short = 'r', long, conflicts_with = "set_power")]
    read: bool,

    /// Configuration file (TOML, or JSON by extension). Falls back to BATTERY_CONFIG.
    #[arg(long, value_name = "PATH")]
    config: Option<String>,

    /// Inverter host, overrides the configuration.
    #[arg(long)]
    host: Option<String>,

    /// Inverter Modbus TCP port, overrides the configuration.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = BatteryAppConfig::load_with_path(args.config.clone()).context("load config failed")?;
    if let Some(host) = args.host.clone() {
        config.battery.device.host = host;
    }
    if let Some(port) = args.port {
        config.battery.device.port = port;
    }
    config.validate().context("config validation failed")?;

    if let Some(ref listen) = config.metrics_listen {
        install_metrics(listen)?;
    }

    let catalog = load_catalog(&config)?;
    let battery = Battery::connect(&config.battery, catalog)
        .await
        .with_context(|| format!("connect to battery at {}", config.battery.device))?;

    match args.set_power {
        Some(watts) if !args.read => run_setpoint(battery, watts).await,
        _ => {
            let snapshot = battery.read_values().await.context("read battery values failed");
            battery.shutdown().await;
            let json = serde_json::to_string_pretty(&snapshot?).context("render snapshot")?;
            println!("---------------");
            println!("Battery values:");
            println!("---------------");
            println!("{json}");
            Ok(())
        }
    }
}

async fn run_setpoint<S>(battery: Battery<S>, watts: f64) -> Result<()>
where
    S: ModelSource,
{
    let limits = battery.limits();
    if !limits.contains(watts) {
        battery.shutdown().await;
        anyhow::bail!(
            "operating battery outside limits: {watts} W not in [{}, {}]",
            limits.min_watts,
            limits.max_watts
        );
    }
    let limited = battery.change_power(watts).context("invalid setpoint")?;
    info!(watts = limited, "setpoint applied, press Ctrl-C to stop");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    notify_ready();
    let watchdog_handle = start_watchdog(shutdown_rx);

    tokio::signal::ctrl_c().await.context("listen for ctrl-c")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    battery.shutdown().await;
    if let Some(handle) = watchdog_handle {
        if let Err(err) = handle.await {
            warn!(error = %err, "watchdog task ended abnormally");
        }
    }
    Ok(())
}

fn install_metrics(listen: &str) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid metrics listen address {listen}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("install prometheus exporter")?;
    info!(%addr, "prometheus exporter listening");
    Ok(())
}

fn load_catalog(config: &BatteryAppConfig) -> Result<ModelCatalog> {
    let mut catalog = ModelCatalog::builtin();
    for path in &config.model_files {
        let content = fs::read_to_string(path)
            .with_context(|| format!("read model file {}", path.display()))?;
        let ids = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => catalog.parse_json(&content),
            _ => catalog.parse_xml(&content),
        }
        .with_context(|| format!("parse model file {}", path.display()))?;
        info!(path = %path.display(), models = ?ids, "model definitions loaded");
    }
    Ok(catalog)
}

#[cfg(target_os = "linux")]
fn notify_ready() {
    if let Err(err) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %err, "systemd ready notify failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn notify_ready() {}

#[cfg(target_os = "linux")]
fn start_watchdog(
    mut shutdown: watch::Receiver<bool>,
) -> Option<tokio::task::JoinHandle<()>> {
    let interval = watchdog_interval()?;
    Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sleep(interval) => {
                    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Watchdog]) {
                        warn!(error = %err, "systemd watchdog notify failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }))
}

#[cfg(not(target_os = "linux"))]
fn start_watchdog(_shutdown: watch::Receiver<bool>) -> Option<tokio::task::JoinHandle<()>> {
    None
}

#[cfg(target_os = "linux")]
fn watchdog_interval() -> Option<Duration> {
    let watchdog_usec = std::env::var("WATCHDOG_USEC").ok()?.parse::<u64>().ok()?;
    if let Some(pid) = std::env::var("WATCHDOG_PID")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
    {
        if pid != std::process::id() {
            return None;
        }
    }

    let interval = watchdog_usec.saturating_div(2).max(100_000);
    Some(Duration::from_micros(interval))
}
