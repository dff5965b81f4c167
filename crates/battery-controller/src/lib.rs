use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use modbus_client::{ClientConfig, ClientError, ModbusClient, RegisterTransport};
use sunspec_client::{ModelSource, SunSpecClient, SunSpecConfig, SunSpecError};
use sunspec_parser::ModelCatalog;
use types::{DeviceIdentity, DeviceSnapshot};

pub mod reader;
pub mod scheduler;
pub mod setpoint;
pub mod writer;

pub use reader::{DeviceReader, ReadError, DEFAULT_READ_MODELS};
pub use scheduler::{
    SchedulerConfig, SetpointScheduler, TickOutcome, ACTIVATE_CONTROL_ADDRESS,
    CHANGE_POWER_ADDRESS, CONTROL_ACTIVE,
};
pub use setpoint::{PowerLimits, PowerSetter, Setpoint, SetpointError};
pub use writer::{RegisterWriter, RetryPolicy, WriteError, WriteOutcome};

#[derive(Debug, Clone)]
pub struct BatteryConfig {
    /// Host, port and unit ids; these take precedence over the matching fields of `modbus` and `sunspec`.
    pub device: DeviceIdentity,
    pub modbus: ClientConfig,
    pub sunspec: SunSpecConfig,
    pub scheduler: SchedulerConfig,
    pub retry: RetryPolicy,
    pub limits: PowerLimits,
    pub read_models: Vec<String>,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            device: DeviceIdentity::default(),
            modbus: ClientConfig::default(),
            sunspec: SunSpecConfig::default(),
            scheduler: SchedulerConfig::default(),
            retry: RetryPolicy::default(),
            limits: PowerLimits::default(),
            read_models: DEFAULT_READ_MODELS.iter().map(|name| name.to_string()).collect(),
        }
    }
}

impl BatteryConfig {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            host: self.device.host.clone(),
            port: self.device.port,
            ..self.modbus.clone()
        }
    }

    pub fn sunspec_config(&self) -> SunSpecConfig {
        SunSpecConfig {
            unit_id: self.device.sunspec_unit_id,
            ..self.sunspec.clone()
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to connect to modbus device: {0}")]
    Modbus(#[from] ClientError),
    #[error("failed to discover sunspec models: {0}")]
    SunSpec(#[from] SunSpecError),
}

/// Battery inverter handle: setpoint control through a background scheduler plus on-demand SunSpec reads.
pub struct Battery<S> {
    power: PowerSetter,
    reader: DeviceReader,
    models: Mutex<S>,
    shutdown: watch::Sender<bool>,
    scheduler: JoinHandle<()>,
}

impl Battery<SunSpecClient<ModbusClient>> {
    /// Opens the control and SunSpec connections, then starts the scheduler.
    pub async fn connect(config: &BatteryConfig, catalog: ModelCatalog) -> Result<Self, ConnectError> {
        let client_config = config.client_config();
        let control = ModbusClient::connect(client_config.clone()).await?;
        let sunspec_transport = ModbusClient::connect(client_config).await?;
        let models = SunSpecClient::connect(sunspec_transport, &config.sunspec_config(), catalog).await?;
        info!(device = %config.device, "battery connected");
        Ok(Self::start(control, models, config))
    }
}

impl<S: ModelSource> Battery<S> {
    /// Spawns the scheduler on the current tokio runtime.
    pub fn start<T>(transport: T, models: S, config: &BatteryConfig) -> Self
    where
        T: RegisterTransport + 'static,
    {
        let setpoint = Setpoint::default();
        let writer = RegisterWriter::new(transport, config.device.control_unit_id, config.retry.clone());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let scheduler = SetpointScheduler::new(
            writer,
            setpoint.clone(),
            config.scheduler.clone(),
            shutdown_rx,
        );

        Self {
            power: PowerSetter::new(setpoint, config.limits),
            reader: DeviceReader::new(config.read_models.clone()),
            models: Mutex::new(models),
            shutdown,
            scheduler: tokio::spawn(scheduler.run()),
        }
    }

    /// Clamps and stores the setpoint; the scheduler sends it on its next tick.
    pub fn change_power(&self, watts: f64) -> Result<i32, SetpointError> {
        self.power.set_power(watts)
    }

    pub fn setpoint(&self) -> i32 {
        self.power.setpoint().get()
    }

    pub fn limits(&self) -> PowerLimits {
        self.power.limits()
    }

    pub async fn read_values(&self) -> Result<DeviceSnapshot, ReadError> {
        let mut models = self.models.lock().await;
        self.reader.read_snapshot(&mut *models).await
    }

    /// Stops the scheduler. A tick in progress is abandoned, so this returns without waiting out write retries.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.scheduler.await {
            warn!(error = %err, "scheduler task ended abnormally");
        }
        info!("battery controller stopped");
    }
}
