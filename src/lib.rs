mod client;
mod config;
mod coordinator;
mod diff;
mod error;
mod logger;
mod protocol;
mod snapshot;
mod types;

pub use client::{ShellyClient, ShellyClientBuilder};
pub use config::{
    DEFAULT_SCAN_INTERVAL, DEFAULT_TIMEOUT, MAX_TARGET_C, MIN_TARGET_C, validate_host,
};
pub use coordinator::{ShellyThermostat, ThermostatBuilder};
pub use error::{Error, Result};
pub use logger::MessageLogMode;
pub use protocol::{DEFAULT_HYSTERESIS_C, ExtTemperatureSetting, mode_settings, target_settings};
pub use snapshot::DeviceSnapshot;
pub use types::*;
