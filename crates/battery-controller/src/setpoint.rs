use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use metrics::gauge;
use thiserror::Error;
use tracing::info;

/// Allowed setpoint range in watts. Positive discharges to the grid, negative charges the battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerLimits {
    pub min_watts: i32,
    pub max_watts: i32,
}

impl Default for PowerLimits {
    fn default() -> Self {
        Self {
            min_watts: -5_500,
            max_watts: 5_500,
        }
    }
}

impl PowerLimits {
    pub fn contains(&self, watts: f64) -> bool {
        f64::from(self.min_watts) <= watts && watts <= f64::from(self.max_watts)
    }

    /// `max(min(watts, max), min)`, truncated toward zero.
    pub fn clamp(&self, watts: f64) -> Result<i32, SetpointError> {
        if watts.is_nan() {
            return Err(SetpointError::NotFinite);
        }
        let limited = watts
            .min(f64::from(self.max_watts))
            .max(f64::from(self.min_watts));
        Ok(limited as i32)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SetpointError {
    #[error("requested power is not a number")]
    NotFinite,
}

/// Current power setpoint shared between the caller and the scheduler task.
#[derive(Debug, Clone, Default)]
pub struct Setpoint {
    watts: Arc<AtomicI32>,
}

impl Setpoint {
    pub fn get(&self) -> i32 {
        self.watts.load(Ordering::Acquire)
    }

    fn set(&self, watts: i32) {
        self.watts.store(watts, Ordering::Release);
    }
}

/// Clamps requested power into the configured limits and publishes it as the setpoint.
#[derive(Debug, Clone)]
pub struct PowerSetter {
    setpoint: Setpoint,
    limits: PowerLimits,
}

impl PowerSetter {
    pub fn new(setpoint: Setpoint, limits: PowerLimits) -> Self {
        Self { setpoint, limits }
    }

    pub fn limits(&self) -> PowerLimits {
        self.limits
    }

    pub fn setpoint(&self) -> &Setpoint {
        &self.setpoint
    }

    /// Takes effect on the next scheduler tick; nothing is written here.
    pub fn set_power(&self, watts: f64) -> Result<i32, SetpointError> {
        let limited = self.limits.clamp(watts)?;
        self.setpoint.set(limited);
        gauge!("battery_setpoint_watts").set(f64::from(limited));
        info!(requested = watts, limited, "setpoint changed");
        Ok(limited)
    }
}
