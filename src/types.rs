use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::Error;

/// Temperature stored as Celsius, the unit the Shelly add-on reports.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Temperature(f64);

impl Temperature {
    pub fn from_celsius(c: f64) -> Self {
        Self(c)
    }

    pub fn celsius(&self) -> f64 {
        self.0
    }

    /// Midpoint of two thresholds. This is how a target is read back.
    pub fn midpoint(a: Temperature, b: Temperature) -> Self {
        Self((a.0 + b.0) / 2.0)
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}\u{00b0}C", self.0)
    }
}

/// What the relay does when a temperature threshold is crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayAction {
    RelayOn,
    RelayOff,
    Disabled,
}

impl RelayAction {
    pub fn as_shelly_str(&self) -> &'static str {
        match self {
            RelayAction::RelayOn => "relay_on",
            RelayAction::RelayOff => "relay_off",
            RelayAction::Disabled => "disabled",
        }
    }

    pub fn from_shelly_str(s: &str) -> Option<Self> {
        match s {
            "relay_on" => Some(RelayAction::RelayOn),
            "relay_off" => Some(RelayAction::RelayOff),
            "disabled" => Some(RelayAction::Disabled),
            _ => None,
        }
    }
}

/// Thermostat mode, inferred from which threshold switches the relay on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacMode {
    Heat,
    Cool,
    Off,
    /// The device holds an action pair no mode maps to.
    Unknown,
}

impl HvacMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HvacMode::Heat => "heat",
            HvacMode::Cool => "cool",
            HvacMode::Off => "off",
            HvacMode::Unknown => "unknown",
        }
    }

    /// `(overtemp_act, undertemp_act)` for this mode. `None` for `Unknown`.
    pub fn action_pair(&self) -> Option<(RelayAction, RelayAction)> {
        use RelayAction::*;
        match self {
            HvacMode::Heat => Some((RelayOff, RelayOn)),
            HvacMode::Cool => Some((RelayOn, RelayOff)),
            HvacMode::Off => Some((Disabled, Disabled)),
            HvacMode::Unknown => None,
        }
    }

    /// Total inverse of [`HvacMode::action_pair`].
    pub fn from_action_pair(overtemp: RelayAction, undertemp: RelayAction) -> Self {
        use RelayAction::*;
        match (overtemp, undertemp) {
            (RelayOff, RelayOn) => HvacMode::Heat,
            (RelayOn, RelayOff) => HvacMode::Cool,
            (Disabled, Disabled) => HvacMode::Off,
            _ => HvacMode::Unknown,
        }
    }
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses the writable modes only; `"unknown"` is rejected.
impl FromStr for HvacMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heat" => Ok(HvacMode::Heat),
            "cool" => Ok(HvacMode::Cool),
            "off" => Ok(HvacMode::Off),
            other => Err(Error::InvalidMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacAction {
    Heating,
    Cooling,
    Idle,
    #[default]
    Off,
}

impl HvacAction {
    /// An `Unknown` mode reports `Off`: nothing is known to be driving the relay.
    pub fn derive(mode: HvacMode, output_active: bool) -> Self {
        match (mode, output_active) {
            (HvacMode::Heat, true) => HvacAction::Heating,
            (HvacMode::Cool, true) => HvacAction::Cooling,
            (HvacMode::Heat | HvacMode::Cool, false) => HvacAction::Idle,
            (HvacMode::Off | HvacMode::Unknown, _) => HvacAction::Off,
        }
    }
}

/// The logical thermostat view of one successful poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThermostatState {
    pub mac: String,
    pub name: Option<String>,
    pub model: String,
    pub current_temperature: Temperature,
    pub target_temperature: Temperature,
    pub output_active: bool,
    pub mode: HvacMode,
    pub hvac_action: HvacAction,
    pub updated_at: DateTime<Utc>,
}

/// Emitted to `on_event` listeners after each poll.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TemperatureChanged { temp: Temperature },
    TargetTemperatureChanged { target: Temperature },
    ModeChanged { mode: HvacMode },
    ActionChanged { action: HvacAction },
    OutputChanged { active: bool },
    UpdateFailed { reason: String },
}
