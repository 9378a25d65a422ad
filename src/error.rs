use std::fmt;
use std::sync::Arc;

/// Errors surfaced by the device client and the refresh coordinator.
///
/// `Clone` so one poll outcome can be handed to every caller that joined it.
#[derive(Debug, Clone)]
pub enum Error {
    /// Transport failure, timeout, or non-success HTTP status.
    DeviceUnreachable { url: String, reason: String },
    /// A body was not JSON, or a required field was missing or not numeric.
    MalformedResponse { field: String, reason: String },
    InvalidMode(String),
    InvalidTarget(f64),
    InvalidHost(String),
    InvalidConfig(String),
    /// The first refresh failed, so there is no state to fall back on.
    Setup(Box<Error>),
    Io(Arc<std::io::Error>),
}

impl Error {
    pub(crate) fn unreachable(url: &str, e: &reqwest::Error) -> Self {
        let reason = if e.is_timeout() {
            "request timed out".to_string()
        } else if let Some(status) = e.status() {
            format!("HTTP {status}")
        } else {
            e.to_string()
        };
        Error::DeviceUnreachable {
            url: url.to_string(),
            reason,
        }
    }

    pub(crate) fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedResponse {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DeviceUnreachable { url, reason } => {
                write!(f, "device unreachable ({url}): {reason}")
            }
            Error::MalformedResponse { field, reason } => {
                write!(f, "malformed response at {field}: {reason}")
            }
            Error::InvalidMode(mode) => write!(f, "invalid mode: {mode}"),
            Error::InvalidTarget(t) => write!(f, "invalid target temperature: {t}"),
            Error::InvalidHost(host) => write!(f, "invalid host: {host}"),
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Error::Setup(e) => write!(f, "setup failed: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Setup(e) => Some(e.as_ref()),
            Error::Io(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
