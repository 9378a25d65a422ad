use serde_json::{Map, Value};

use crate::types::*;

/// Collects `(dotted.path, old, new)` for every leaf that differs. A key that
/// disappeared is reported with `new` set to `null`.
pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<(String, Value, Value)>,
) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = join_path(path_prefix, key);
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None if curr_val.is_object() => {
                        diff_json(&Value::Object(Map::new()), curr_val, &path, changes);
                    }
                    None => changes.push((path, Value::Null, curr_val.clone())),
                }
            }
            for (key, prev_val) in prev_map {
                if !curr_map.contains_key(key) {
                    changes.push((join_path(path_prefix, key), prev_val.clone(), Value::Null));
                }
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Events for each logical field that differs from the previous state.
/// With no previous state every field is reported.
pub(crate) fn diff_states(
    previous: Option<&ThermostatState>,
    current: &ThermostatState,
) -> Vec<Event> {
    let mut events = Vec::new();

    if previous.map(|p| p.current_temperature) != Some(current.current_temperature) {
        events.push(Event::TemperatureChanged {
            temp: current.current_temperature,
        });
    }
    if previous.map(|p| p.target_temperature) != Some(current.target_temperature) {
        events.push(Event::TargetTemperatureChanged {
            target: current.target_temperature,
        });
    }
    if previous.map(|p| p.mode) != Some(current.mode) {
        events.push(Event::ModeChanged { mode: current.mode });
    }
    if previous.map(|p| p.hvac_action) != Some(current.hvac_action) {
        events.push(Event::ActionChanged {
            action: current.hvac_action,
        });
    }
    if previous.map(|p| p.output_active) != Some(current.output_active) {
        events.push(Event::OutputChanged {
            active: current.output_active,
        });
    }

    events
}
