use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, trace};

use crate::config::{DEFAULT_TIMEOUT, url_host, validate_host};
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{
    EXT_TEMPERATURE_PATH, ExtTemperatureSetting, SETTINGS_PATH, STATUS_PATH, mode_settings,
    target_settings,
};
use crate::snapshot::DeviceSnapshot;
use crate::types::*;
use crate::{Error, Result};

pub struct ShellyClientBuilder {
    host: String,
    protocol: String,
    timeout: Duration,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl ShellyClientBuilder {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            protocol: "http".to_string(),
            timeout: DEFAULT_TIMEOUT,
            log_mode: None,
            log_path: None,
        }
    }

    pub fn protocol(mut self, proto: &str) -> Self {
        self.protocol = proto.to_string();
        self
    }

    /// Per-request timeout, applied by the transport.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ShellyClient> {
        validate_host(&self.host)?;
        if self.protocol != "http" && self.protocol != "https" {
            return Err(Error::InvalidConfig(format!(
                "unsupported protocol: {}",
                self.protocol
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("HTTP client: {e}")))?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Mutex::new(MessageLogger::new(mode, &path)?)),
            _ => None,
        };

        Ok(ShellyClient {
            http,
            base_url: format!("{}://{}", self.protocol, url_host(&self.host)),
            logger,
        })
    }
}

/// Speaks the Shelly Gen1 HTTP dialect for one device. Holds no device state.
pub struct ShellyClient {
    http: reqwest::Client,
    base_url: String,
    logger: Option<Mutex<MessageLogger>>,
}

impl ShellyClient {
    pub fn builder(host: impl Into<String>) -> ShellyClientBuilder {
        ShellyClientBuilder::new(host)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Reads `/status` then `/settings` and returns both bodies untouched.
    pub async fn fetch_snapshot(&self) -> Result<DeviceSnapshot> {
        let status = self.get_json(STATUS_PATH).await?;
        let settings = self.get_json(SETTINGS_PATH).await?;
        Ok(DeviceSnapshot { status, settings })
    }

    /// Writes `target ± hysteresis/2` as the over/under thresholds.
    pub async fn write_target_temperature(
        &self,
        target: Temperature,
        hysteresis: f64,
    ) -> Result<()> {
        for setting in target_settings(target, hysteresis) {
            self.write_setting(setting).await?;
        }
        Ok(())
    }

    /// Writes the action pair for `mode`. `Unknown` is rejected before any request.
    pub async fn write_mode(&self, mode: HvacMode) -> Result<()> {
        let settings =
            mode_settings(mode).ok_or_else(|| Error::InvalidMode(mode.as_str().to_string()))?;
        for setting in settings {
            self.write_setting(setting).await?;
        }
        Ok(())
    }

    async fn write_setting(&self, setting: ExtTemperatureSetting) -> Result<()> {
        let url = format!("{}{}", self.base_url, EXT_TEMPERATURE_PATH);
        let (key, value) = (setting.key(), setting.value());
        debug!(url = %url, key, value = %value, "writing setting");

        if let Some(logger) = &self.logger {
            logger
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .log_write(EXT_TEMPERATURE_PATH, key, &value);
        }

        self.http
            .get(&url)
            .query(&[(key, value.as_str())])
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| Error::unreachable(&url, &e))?;
        Ok(())
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "reading");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| Error::unreachable(&url, &e))?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| Error::unreachable(&url, &e))?;

        let json: Value = serde_json::from_str(&body)
            .map_err(|e| Error::malformed(path, format!("invalid JSON: {e}")))?;
        if !json.is_object() {
            return Err(Error::malformed(path, "expected a JSON object"));
        }
        trace!(path, bytes = body.len(), "read ok");

        if let Some(logger) = &self.logger {
            logger
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .log_read(path, status, &json);
        }

        Ok(json)
    }
}
