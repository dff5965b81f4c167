mod config;

pub use config::BatteryAppConfig;
