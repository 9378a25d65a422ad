use std::env;
use std::time::Duration;

use shelly_thermostat::{HvacMode, ShellyThermostat};

#[tokio::main]
async fn main() -> shelly_thermostat::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let host = args
        .get(1)
        .expect("usage: monitor <host> [--mode heat|cool|off] [--target <C>] [--interval <secs>]");
    let flag = |name: &str| {
        args.iter()
            .position(|a| a == name)
            .and_then(|i| args.get(i + 1))
            .cloned()
    };

    let mut builder = ShellyThermostat::builder(host)
        .on_event(|event| {
            println!("{event:?}");
        })
        .on_snapshot(|state| {
            println!(
                "[{}] {} ({}) | {:.1}\u{00b0}C -> {:.1}\u{00b0}C | mode: {} | {:?}{}",
                state.mac,
                state.name.as_deref().unwrap_or("unnamed"),
                state.model,
                state.current_temperature.celsius(),
                state.target_temperature.celsius(),
                state.mode,
                state.hvac_action,
                if state.output_active { " | RELAY ON" } else { "" },
            );
        });

    if let Some(secs) = flag("--interval").and_then(|s| s.parse().ok()) {
        builder = builder.scan_interval(Duration::from_secs(secs));
    }

    println!("Connecting to {host}...");
    let thermostat = builder.start().await?;

    if let Some(mode) = flag("--mode") {
        let mode: HvacMode = mode.parse()?;
        thermostat.set_hvac_mode(mode).await?;
    }
    if let Some(target) = flag("--target").and_then(|s| s.parse().ok()) {
        thermostat.set_target_temperature(target).await?;
    }

    println!("Polling every {:?}. Ctrl-C to stop.", thermostat.scan_interval());
    loop {
        tokio::time::sleep(Duration::from_secs(60)).await;
        if !thermostat.last_update_success() {
            eprintln!(
                "Device not updating: {}",
                thermostat
                    .last_error()
                    .map(|e| e.to_string())
                    .unwrap_or_default()
            );
        }
    }
}
