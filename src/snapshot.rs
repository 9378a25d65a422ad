use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use crate::types::*;
use crate::{Error, Result};

/// Raw bodies of one poll, exactly as the device returned them.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub status: Value,
    pub settings: Value,
}

impl DeviceSnapshot {
    /// Derives the thermostat view. Fails only on missing or non-numeric fields;
    /// an action pair that maps to no mode yields [`HvacMode::Unknown`].
    pub fn to_state(&self, updated_at: DateTime<Utc>) -> Result<ThermostatState> {
        let status = &self.status;
        let settings = &self.settings;

        let current = number_at(status, "/ext_temperature/0/tC")?;
        let output_active = status
            .pointer("/relays/0/ison")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| Error::malformed("/relays/0/ison", "missing or not a bool"))?;
        let mac = string_at(status, "/mac")?;

        let over_threshold = number_at(settings, "/ext_temperature/0/overtemp_threshold_tC")?;
        let under_threshold = number_at(settings, "/ext_temperature/0/undertemp_threshold_tC")?;
        let over_act = string_at(settings, "/ext_temperature/0/overtemp_act")?;
        let under_act = string_at(settings, "/ext_temperature/0/undertemp_act")?;
        let model = string_at(settings, "/device/type")?;
        let name = settings
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let mode = match (
            RelayAction::from_shelly_str(&over_act),
            RelayAction::from_shelly_str(&under_act),
        ) {
            (Some(over), Some(under)) => HvacMode::from_action_pair(over, under),
            _ => HvacMode::Unknown,
        };
        if mode == HvacMode::Unknown {
            warn!(
                overtemp_act = %over_act,
                undertemp_act = %under_act,
                "action pair maps to no thermostat mode"
            );
        }

        Ok(ThermostatState {
            mac,
            name,
            model,
            current_temperature: Temperature::from_celsius(current),
            target_temperature: Temperature::midpoint(
                Temperature::from_celsius(over_threshold),
                Temperature::from_celsius(under_threshold),
            ),
            output_active,
            mode,
            hvac_action: HvacAction::derive(mode, output_active),
            updated_at,
        })
    }
}

/// The add-on reports temperatures as numbers on some firmwares and as
/// strings on others. `"NaN"` and `"inf"` parse as floats but are not readings.
fn number_at(body: &Value, pointer: &str) -> Result<f64> {
    let value = match body.pointer(pointer) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| Error::malformed(pointer, "number out of range"))?,
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| Error::malformed(pointer, format!("not numeric: {s:?}")))?,
        Some(other) => return Err(Error::malformed(pointer, format!("not numeric: {other}"))),
        None => return Err(Error::malformed(pointer, "missing")),
    };
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::malformed(pointer, "not a finite number"))
    }
}

fn string_at(body: &Value, pointer: &str) -> Result<String> {
    body.pointer(pointer)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::malformed(pointer, "missing or not a string"))
}
