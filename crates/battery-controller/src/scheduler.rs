use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use modbus_client::{RegisterKind, RegisterTransport};

use crate::setpoint::Setpoint;
use crate::writer::{RegisterWriter, WriteError, WriteOutcome};

/// Active power setpoint, int32 watts.
pub const CHANGE_POWER_ADDRESS: u16 = 40_149;
/// Effective/reactive power control via communication, uint32 enum.
pub const ACTIVATE_CONTROL_ADDRESS: u16 = 40_151;
/// 802: control via communication active (803 releases it).
pub const CONTROL_ACTIVE: u32 = 0x0322;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub activate_control_address: u16,
    pub change_power_address: u16,
    pub control_active_value: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            activate_control_address: ACTIVATE_CONTROL_ADDRESS,
            change_power_address: CHANGE_POWER_ADDRESS,
            control_active_value: CONTROL_ACTIVE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Sent { watts: i32 },
    Skipped,
}

/// Keep-alive loop: the device falls back to internal control unless
/// control activation and the setpoint are re-asserted every interval.
pub struct SetpointScheduler<T> {
    writer: RegisterWriter<T>,
    setpoint: Setpoint,
    config: SchedulerConfig,
    shutdown: watch::Receiver<bool>,
}

impl<T: RegisterTransport> SetpointScheduler<T> {
    pub fn new(
        writer: RegisterWriter<T>,
        setpoint: Setpoint,
        config: SchedulerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            writer,
            setpoint,
            config,
            shutdown,
        }
    }

    /// Runs until shutdown is signalled or the shutdown sender is dropped.
    /// A tick in flight, retry backoff included, is abandoned on shutdown.
    pub async fn run(self) {
        info!(
            interval_ms = self.config.interval.as_millis(),
            "start scheduled sending"
        );
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                biased;
                _ = shutdown_signalled(&mut shutdown) => {
                    info!("scheduler shutdown requested");
                    break;
                }
                outcome = self.tick() => match outcome {
                    Ok(TickOutcome::Sent { watts }) => debug!(watts, "setpoint sent"),
                    Ok(TickOutcome::Skipped) => warn!("tick skipped while reconnecting"),
                    Err(err) => warn!(error = %err, "setpoint tick failed"),
                },
            }

            tokio::select! {
                biased;
                _ = shutdown_signalled(&mut shutdown) => {
                    info!("scheduler shutdown requested");
                    break;
                }
                _ = sleep(self.config.interval) => {},
            }
        }
    }

    /// Activation first, then the setpoint. A skipped or failed activation skips the setpoint.
    pub async fn tick(&self) -> Result<TickOutcome, WriteError> {
        let watts = self.setpoint.get();
        info!(watts, "sending setpoint");

        let activation = self
            .writer
            .write(
                self.config.activate_control_address,
                i64::from(self.config.control_active_value),
                RegisterKind::Uint32,
            )
            .await?;
        if activation == WriteOutcome::Skipped {
            return Ok(TickOutcome::Skipped);
        }

        let outcome = self
            .writer
            .write(
                self.config.change_power_address,
                i64::from(watts),
                RegisterKind::Int32,
            )
            .await?;
        Ok(match outcome {
            WriteOutcome::Written => TickOutcome::Sent { watts },
            WriteOutcome::Skipped => TickOutcome::Skipped,
        })
    }
}

/// Resolves once shutdown is set to true or the sender is gone.
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
