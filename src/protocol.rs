use crate::types::{HvacMode, RelayAction, Temperature};

pub const STATUS_PATH: &str = "/status";
pub const SETTINGS_PATH: &str = "/settings";
/// Settings endpoint of the first external temperature sensor.
pub const EXT_TEMPERATURE_PATH: &str = "/settings/ext_temperature/0";

pub const DEFAULT_HYSTERESIS_C: f64 = 0.4;

/// One query-parameter write against [`EXT_TEMPERATURE_PATH`].
/// The device has no batched write, so every setting is its own request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExtTemperatureSetting {
    OvertempThreshold(Temperature),
    UndertempThreshold(Temperature),
    OvertempAct(RelayAction),
    UndertempAct(RelayAction),
}

impl ExtTemperatureSetting {
    pub fn key(&self) -> &'static str {
        match self {
            ExtTemperatureSetting::OvertempThreshold(_) => "overtemp_threshold_tC",
            ExtTemperatureSetting::UndertempThreshold(_) => "undertemp_threshold_tC",
            ExtTemperatureSetting::OvertempAct(_) => "overtemp_act",
            ExtTemperatureSetting::UndertempAct(_) => "undertemp_act",
        }
    }

    pub fn value(&self) -> String {
        match self {
            ExtTemperatureSetting::OvertempThreshold(t)
            | ExtTemperatureSetting::UndertempThreshold(t) => t.celsius().to_string(),
            ExtTemperatureSetting::OvertempAct(a) | ExtTemperatureSetting::UndertempAct(a) => {
                a.as_shelly_str().to_string()
            }
        }
    }
}

/// Splits the hysteresis band evenly around `target`: over threshold first.
pub fn target_settings(target: Temperature, hysteresis: f64) -> [ExtTemperatureSetting; 2] {
    let half = hysteresis / 2.0;
    let over = Temperature::from_celsius(target.celsius() + half);
    let under = Temperature::from_celsius(target.celsius() - half);
    [
        ExtTemperatureSetting::OvertempThreshold(over),
        ExtTemperatureSetting::UndertempThreshold(under),
    ]
}

/// `None` for [`HvacMode::Unknown`], which has no action pair to write.
pub fn mode_settings(mode: HvacMode) -> Option<[ExtTemperatureSetting; 2]> {
    let (over, under) = mode.action_pair()?;
    Some([
        ExtTemperatureSetting::OvertempAct(over),
        ExtTemperatureSetting::UndertempAct(under),
    ])
}
