use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use battery_controller::BatteryConfig;

/// Largest register count a single Modbus read may request.
const MAX_READ_REGISTERS: u16 = 125;
/// Highest assignable Modbus unit id.
const MAX_UNIT_ID: u8 = 247;

#[derive(Clone, Debug, Default)]
pub struct BatteryAppConfig {
    pub battery: BatteryConfig,
    /// Extra SunSpec model files (SMDX XML or JSON) loaded on top of the built-in catalog.
    pub model_files: Vec<PathBuf>,
    /// Prometheus exporter listen address; metrics are not exported when unset.
    pub metrics_listen: Option<String>,
}

impl BatteryAppConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(config_path: Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = load_file_config(config_path.as_deref())? {
            apply_file_config(&mut config, file_config);
        }

        apply_env_overrides(&mut config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let battery = &self.battery;

        if battery.device.host.trim().is_empty() {
            anyhow::bail!("device.host must be non-empty");
        }
        if battery.device.port == 0 {
            anyhow::bail!("device.port must be between 1 and 65535");
        }
        validate_unit_id("device.control_unit_id", battery.device.control_unit_id)?;
        validate_unit_id("device.sunspec_unit_id", battery.device.sunspec_unit_id)?;

        if let Some(max_batch) = battery.modbus.max_batch_size {
            if max_batch == 0 || max_batch > MAX_READ_REGISTERS {
                anyhow::bail!("modbus.max_batch_size must be between 1 and {MAX_READ_REGISTERS}");
            }
        }
        if battery.modbus.timeout_ms == 0 {
            anyhow::bail!("modbus.timeout_ms must be >= 1");
        }
        if battery.modbus.retry_backoff_ms == 0 {
            anyhow::bail!("modbus.retry_backoff_ms must be >= 1");
        }
        if battery.modbus.retry_max_backoff_ms < battery.modbus.retry_backoff_ms {
            anyhow::bail!("modbus.retry_max_backoff_ms must be >= modbus.retry_backoff_ms");
        }
        if let Some(delay) = battery.modbus.inter_read_delay_ms {
            if delay == 0 {
                anyhow::bail!("modbus.inter_read_delay_ms must be >= 1 when set");
            }
        }

        if battery.sunspec.max_models == 0 {
            anyhow::bail!("sunspec.max_models must be >= 1");
        }
        if battery.read_models.iter().any(|name| name.trim().is_empty()) {
            anyhow::bail!("sunspec.read_models must not contain empty names");
        }

        if battery.scheduler.interval.is_zero() {
            anyhow::bail!("control.interval_ms must be >= 1");
        }
        if battery.limits.min_watts > 0 || battery.limits.max_watts < 0 {
            anyhow::bail!("control limits must satisfy min_watts <= 0 <= max_watts");
        }

        if let Some(ref listen) = self.metrics_listen {
            listen
                .parse::<SocketAddr>()
                .with_context(|| format!("metrics.listen must be a socket address, got {listen}"))?;
        }

        Ok(())
    }
}

fn validate_unit_id(field: &str, unit_id: u8) -> Result<()> {
    if unit_id == 0 || unit_id > MAX_UNIT_ID {
        anyhow::bail!("{field} must be between 1 and {MAX_UNIT_ID}");
    }
    Ok(())
}

fn apply_env_overrides(config: &mut BatteryAppConfig) {
    let battery = &mut config.battery;

    if let Ok(value) = env::var("BATTERY_HOST") {
        battery.device.host = value;
    }
    if let Some(port) = parse_env("BATTERY_PORT") {
        battery.device.port = port;
    }
    if let Some(unit_id) = parse_env("BATTERY_CONTROL_UNIT_ID") {
        battery.device.control_unit_id = unit_id;
    }
    if let Some(unit_id) = parse_env("BATTERY_SUNSPEC_UNIT_ID") {
        battery.device.sunspec_unit_id = unit_id;
    }

    if let Some(timeout_ms) = parse_env("BATTERY_MODBUS_TIMEOUT_MS") {
        battery.modbus.timeout_ms = timeout_ms;
    }
    if let Some(max_batch) = parse_env("BATTERY_MAX_BATCH_SIZE") {
        battery.modbus.max_batch_size = Some(max_batch);
    }

    if let Some(base) = parse_env("BATTERY_SUNSPEC_BASE_ADDRESS") {
        battery.sunspec.base_address = Some(base);
    }
    if let Ok(value) = env::var("BATTERY_READ_MODELS") {
        battery.read_models = split_list(&value);
    }
    if let Ok(value) = env::var("BATTERY_MODEL_FILES") {
        config.model_files = split_list(&value).into_iter().map(PathBuf::from).collect();
    }

    let battery = &mut config.battery;
    if let Some(interval_ms) = parse_env("BATTERY_INTERVAL_MS") {
        battery.scheduler.interval = Duration::from_millis(interval_ms);
    }
    if let Some(max_retries) = parse_env("BATTERY_MAX_RETRIES") {
        battery.retry.max_retries = max_retries;
    }
    if let Some(backoff_ms) = parse_env("BATTERY_RETRY_BACKOFF_MS") {
        battery.retry.backoff = Duration::from_millis(backoff_ms);
    }
    battery.limits.min_watts = parse_env("BATTERY_MIN_WATTS").unwrap_or(battery.limits.min_watts);
    battery.limits.max_watts = parse_env("BATTERY_MAX_WATTS").unwrap_or(battery.limits.max_watts);

    config.metrics_listen = env::var("BATTERY_METRICS_LISTEN").ok().or(config.metrics_listen.take());
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    device: Option<FileDeviceConfig>,
    modbus: Option<FileModbusConfig>,
    sunspec: Option<FileSunspecConfig>,
    control: Option<FileControlConfig>,
    metrics: Option<FileMetricsConfig>,
}

#[derive(Debug, Deserialize)]
struct FileDeviceConfig {
    host: Option<String>,
    port: Option<u16>,
    control_unit_id: Option<u8>,
    sunspec_unit_id: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct FileModbusConfig {
    max_batch_size: Option<u16>,
    timeout_ms: Option<u64>,
    retry_count: Option<usize>,
    retry_backoff_ms: Option<u64>,
    retry_max_backoff_ms: Option<u64>,
    inter_read_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileSunspecConfig {
    base_address: Option<u16>,
    max_models: Option<usize>,
    lenient: Option<bool>,
    read_models: Option<Vec<String>>,
    model_files: Option<Vec<PathBuf>>,
}

#[derive(Debug, Deserialize)]
struct FileControlConfig {
    interval_ms: Option<u64>,
    max_retries: Option<usize>,
    retry_backoff_ms: Option<u64>,
    min_watts: Option<i32>,
    max_watts: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct FileMetricsConfig {
    listen: Option<String>,
}

fn load_file_config(config_path: Option<&str>) -> Result<Option<FileConfig>> {
    let path = match config_path {
        Some(path) => path.to_string(),
        None => match env::var("BATTERY_CONFIG") {
            Ok(value) => value,
            Err(_) => return Ok(None),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("read config file {path}"))?;
    let ext = Path::new(&path).extension().and_then(|value| value.to_str());

    let config = match ext {
        Some("json") => serde_json::from_str(&content).context("parse json config")?,
        _ => toml::from_str(&content).context("parse toml config")?,
    };

    Ok(Some(config))
}

fn apply_file_config(config: &mut BatteryAppConfig, file: FileConfig) {
    let battery = &mut config.battery;

    if let Some(device) = file.device {
        if let Some(host) = device.host {
            battery.device.host = host;
        }
        if let Some(port) = device.port {
            battery.device.port = port;
        }
        if let Some(unit_id) = device.control_unit_id {
            battery.device.control_unit_id = unit_id;
        }
        if let Some(unit_id) = device.sunspec_unit_id {
            battery.device.sunspec_unit_id = unit_id;
        }
    }

    if let Some(modbus) = file.modbus {
        if let Some(max_batch) = modbus.max_batch_size {
            battery.modbus.max_batch_size = Some(max_batch);
        }
        if let Some(timeout_ms) = modbus.timeout_ms {
            battery.modbus.timeout_ms = timeout_ms;
        }
        if let Some(retry_count) = modbus.retry_count {
            battery.modbus.retry_count = retry_count;
        }
        if let Some(backoff) = modbus.retry_backoff_ms {
            battery.modbus.retry_backoff_ms = backoff;
        }
        if let Some(max_backoff) = modbus.retry_max_backoff_ms {
            battery.modbus.retry_max_backoff_ms = max_backoff;
        }
        if let Some(delay) = modbus.inter_read_delay_ms {
            battery.modbus.inter_read_delay_ms = Some(delay);
        }
    }

    if let Some(sunspec) = file.sunspec {
        if let Some(base) = sunspec.base_address {
            battery.sunspec.base_address = Some(base);
        }
        if let Some(max_models) = sunspec.max_models {
            battery.sunspec.max_models = max_models;
        }
        if let Some(lenient) = sunspec.lenient {
            battery.sunspec.lenient = lenient;
        }
        if let Some(read_models) = sunspec.read_models {
            battery.read_models = read_models;
        }
        if let Some(model_files) = sunspec.model_files {
            config.model_files = model_files;
        }
    }

    let battery = &mut config.battery;
    if let Some(control) = file.control {
        if let Some(interval_ms) = control.interval_ms {
            battery.scheduler.interval = Duration::from_millis(interval_ms);
        }
        if let Some(max_retries) = control.max_retries {
            battery.retry.max_retries = max_retries;
        }
        if let Some(backoff_ms) = control.retry_backoff_ms {
            battery.retry.backoff = Duration::from_millis(backoff_ms);
        }
        if let Some(min_watts) = control.min_watts {
            battery.limits.min_watts = min_watts;
        }
        if let Some(max_watts) = control.max_watts {
            battery.limits.max_watts = max_watts;
        }
    }

    if let Some(metrics) = file.metrics {
        config.metrics_listen = metrics.listen.or(config.metrics_listen.take());
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
