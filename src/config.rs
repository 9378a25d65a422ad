use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use crate::{Error, Result};

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Setpoint range of the climate entity.
pub const MIN_TARGET_C: f64 = 5.0;
pub const MAX_TARGET_C: f64 = 35.0;

/// Accepts an IP address, a hostname made of `[A-Za-z0-9-]` labels, either
/// optionally followed by `:port`, or a bracketed IPv6 address with port.
pub fn validate_host(host: &str) -> Result<()> {
    if host.parse::<IpAddr>().is_ok() || host.parse::<SocketAddr>().is_ok() {
        return Ok(());
    }

    let name = match host.rsplit_once(':') {
        Some((name, port)) if port.parse::<u16>().is_ok() => name,
        Some(_) => return Err(Error::InvalidHost(host.to_string())),
        None => host,
    };

    let valid = name.split('.').all(|label| {
        !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidHost(host.to_string()))
    }
}

/// `host` as it goes into a URL; bare IPv6 addresses need brackets.
pub(crate) fn url_host(host: &str) -> String {
    match host.parse::<Ipv6Addr>() {
        Ok(_) => format!("[{host}]"),
        Err(_) => host.to_string(),
    }
}

pub(crate) fn validate_target(target: f64) -> Result<()> {
    if target.is_finite() && (MIN_TARGET_C..=MAX_TARGET_C).contains(&target) {
        Ok(())
    } else {
        Err(Error::InvalidTarget(target))
    }
}
