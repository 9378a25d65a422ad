use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::client::{ShellyClient, ShellyClientBuilder};
use crate::config::{DEFAULT_SCAN_INTERVAL, validate_target};
use crate::diff::diff_states;
use crate::logger::MessageLogMode;
use crate::protocol::{DEFAULT_HYSTERESIS_C, mode_settings};
use crate::types::*;
use crate::{Error, Result};

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;
type SnapshotCallback = Box<dyn Fn(&ThermostatState) + Send + Sync>;
type Outcome = Option<Result<Arc<ThermostatState>>>;

/// Read epoch of a poll that has not reached the device yet.
const READ_PENDING: u64 = u64::MAX;

pub struct ThermostatBuilder {
    client: ShellyClientBuilder,
    scan_interval: Duration,
    hysteresis: f64,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
}

impl ThermostatBuilder {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            client: ShellyClientBuilder::new(host),
            scan_interval: DEFAULT_SCAN_INTERVAL,
            hysteresis: DEFAULT_HYSTERESIS_C,
            event_callbacks: Vec::new(),
            snapshot_callbacks: Vec::new(),
        }
    }

    pub fn protocol(mut self, proto: &str) -> Self {
        self.client = self.client.protocol(proto);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.client = self.client.timeout(timeout);
        self
    }

    pub fn scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    /// Width of the band written around a target, in °C.
    pub fn hysteresis(mut self, hysteresis: f64) -> Self {
        self.hysteresis = hysteresis;
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.client = self.client.message_log(mode, path);
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn on_snapshot(mut self, f: impl Fn(&ThermostatState) + Send + Sync + 'static) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    /// Validates the configuration. Makes no request and starts no timer.
    pub fn build(self) -> Result<ShellyThermostat> {
        if self.scan_interval.is_zero() {
            return Err(Error::InvalidConfig("scan interval must be non-zero".into()));
        }
        if !self.hysteresis.is_finite() || self.hysteresis < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "hysteresis must be finite and >= 0, got {}",
                self.hysteresis
            )));
        }

        let client = self.client.build()?;
        Ok(ShellyThermostat {
            inner: Arc::new(Inner {
                client,
                hysteresis: self.hysteresis,
                scan_interval: self.scan_interval,
                device_gate: AsyncMutex::new(()),
                write_epoch: AtomicU64::new(0),
                in_flight: Mutex::new(None),
                published: RwLock::new(Published::default()),
                event_callbacks: self.event_callbacks,
                snapshot_callbacks: self.snapshot_callbacks,
                timer: Mutex::new(None),
            }),
        })
    }

    /// Builds, runs the first refresh, then starts the periodic poll.
    /// A failed first refresh is returned as [`Error::Setup`].
    pub async fn start(self) -> Result<ShellyThermostat> {
        let thermostat = self.build()?;
        thermostat.first_refresh().await?;
        thermostat.start_polling();
        Ok(thermostat)
    }
}

struct InFlight {
    outcome: watch::Receiver<Outcome>,
    /// Write epoch seen when the poll took the device gate.
    read_epoch: Arc<AtomicU64>,
}

#[derive(Default)]
struct Published {
    state: Option<Arc<ThermostatState>>,
    last_error: Option<Error>,
}

struct Inner {
    client: ShellyClient,
    hysteresis: f64,
    scan_interval: Duration,
    /// Held for every device round-trip, reads and writes alike.
    device_gate: AsyncMutex<()>,
    /// Bumped by every write before it touches the device.
    write_epoch: AtomicU64,
    in_flight: Mutex<Option<InFlight>>,
    published: RwLock<Published>,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn is_fresh(&self, poll: &InFlight) -> bool {
        let read = poll.read_epoch.load(Ordering::SeqCst);
        read == READ_PENDING || read >= self.write_epoch.load(Ordering::SeqCst)
    }

    /// Spawned so that a caller dropping its future never cancels the round-trip.
    fn spawn_poll(inner: &Arc<Inner>) -> InFlight {
        let (tx, rx) = watch::channel(None);
        let read_epoch = Arc::new(AtomicU64::new(READ_PENDING));

        let task_inner = Arc::clone(inner);
        let task_epoch = Arc::clone(&read_epoch);
        tokio::spawn(async move {
            let result = task_inner.poll(&task_epoch).await;
            lock(&task_inner.in_flight).take();
            tx.send_replace(Some(result));
        });

        InFlight {
            outcome: rx,
            read_epoch,
        }
    }

    async fn poll(&self, read_epoch: &AtomicU64) -> Result<Arc<ThermostatState>> {
        let fetched = {
            let _gate = self.device_gate.lock().await;
            read_epoch.store(self.write_epoch.load(Ordering::SeqCst), Ordering::SeqCst);
            self.client.fetch_snapshot().await
        };

        match fetched.and_then(|snapshot| snapshot.to_state(Utc::now())) {
            Ok(state) => Ok(self.publish(state)),
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    fn publish(&self, state: ThermostatState) -> Arc<ThermostatState> {
        let state = Arc::new(state);
        let previous = {
            let mut published = self.published.write().unwrap_or_else(PoisonError::into_inner);
            published.last_error = None;
            published.state.replace(Arc::clone(&state))
        };

        let events = diff_states(previous.as_deref(), &state);
        debug!(
            mode = %state.mode,
            temperature = %state.current_temperature,
            target = %state.target_temperature,
            changes = events.len(),
            "published snapshot"
        );

        for event in &events {
            for cb in &self.event_callbacks {
                cb(event);
            }
        }
        for cb in &self.snapshot_callbacks {
            cb(&state);
        }

        state
    }

    fn record_failure(&self, error: &Error) {
        self.published
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .last_error = Some(error.clone());

        let event = Event::UpdateFailed {
            reason: error.to_string(),
        };
        for cb in &self.event_callbacks {
            cb(&event);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let timer = self.timer.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = timer.take() {
            handle.abort();
        }
    }
}

/// Owns the published thermostat state of one device and coordinates every
/// read and write against it. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct ShellyThermostat {
    inner: Arc<Inner>,
}

impl ShellyThermostat {
    pub fn builder(host: impl Into<String>) -> ThermostatBuilder {
        ThermostatBuilder::new(host)
    }

    /// The last published state; `None` until a poll has succeeded.
    pub fn snapshot(&self) -> Option<Arc<ThermostatState>> {
        self.inner
            .published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .clone()
    }

    pub fn is_available(&self) -> bool {
        self.snapshot().is_some()
    }

    /// False while the most recent poll failed, even if a snapshot is still shown.
    pub fn last_update_success(&self) -> bool {
        self.last_error().is_none()
    }

    pub fn last_error(&self) -> Option<Error> {
        self.inner
            .published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_error
            .clone()
    }

    pub fn scan_interval(&self) -> Duration {
        self.inner.scan_interval
    }

    pub fn base_url(&self) -> &str {
        self.inner.client.base_url()
    }

    /// Polls the device, or joins the poll already in flight.
    ///
    /// With `force`, a joined poll must have read the device after the latest
    /// write; an older one is waited out and a new poll started. On failure the
    /// previous snapshot stays published.
    pub async fn refresh(&self, force: bool) -> Result<Arc<ThermostatState>> {
        loop {
            let (mut rx, stale) = {
                let mut slot = lock(&self.inner.in_flight);
                let joined = slot
                    .as_ref()
                    .map(|poll| (poll.outcome.clone(), force && !self.inner.is_fresh(poll)));
                match joined {
                    Some(joined) => {
                        debug!(stale = joined.1, "joining in-flight poll");
                        joined
                    }
                    None => {
                        let poll = Inner::spawn_poll(&self.inner);
                        let rx = poll.outcome.clone();
                        *slot = Some(poll);
                        (rx, false)
                    }
                }
            };

            let outcome = self.wait(&mut rx).await;
            if !stale {
                return outcome;
            }
        }
    }

    /// The startup refresh. Failing with nothing published is a setup failure.
    pub async fn first_refresh(&self) -> Result<Arc<ThermostatState>> {
        match self.refresh(true).await {
            Ok(state) => Ok(state),
            Err(e) if !self.is_available() => Err(Error::Setup(Box::new(e))),
            Err(e) => Err(e),
        }
    }

    /// Writes the threshold pair for `target`, then polls. The poll runs even
    /// when the write fails; the write error takes precedence.
    pub async fn set_target_temperature(&self, target: f64) -> Result<Arc<ThermostatState>> {
        validate_target(target)?;
        let written = {
            let _gate = self.inner.device_gate.lock().await;
            self.inner.write_epoch.fetch_add(1, Ordering::SeqCst);
            self.inner
                .client
                .write_target_temperature(Temperature::from_celsius(target), self.inner.hysteresis)
                .await
        };
        let refreshed = self.refresh(true).await;
        written?;
        refreshed
    }

    /// Writes the action pair for `mode`, then polls. `Unknown` is rejected
    /// without contacting the device.
    pub async fn set_hvac_mode(&self, mode: HvacMode) -> Result<Arc<ThermostatState>> {
        if mode_settings(mode).is_none() {
            return Err(Error::InvalidMode(mode.as_str().to_string()));
        }
        let written = {
            let _gate = self.inner.device_gate.lock().await;
            self.inner.write_epoch.fetch_add(1, Ordering::SeqCst);
            self.inner.client.write_mode(mode).await
        };
        let refreshed = self.refresh(true).await;
        written?;
        refreshed
    }

    /// Starts the periodic `refresh(false)`. Calling it again is a no-op.
    pub fn start_polling(&self) {
        let mut timer = lock(&self.inner.timer);
        if timer.is_some() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.scan_interval;
        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let thermostat = ShellyThermostat { inner };
                if let Err(e) = thermostat.refresh(false).await {
                    warn!(error = %e, "scheduled refresh failed");
                }
            }
        }));
    }

    /// Stops the periodic poll. The last snapshot stays readable.
    pub fn shutdown(&self) {
        if let Some(handle) = lock(&self.inner.timer).take() {
            handle.abort();
        }
    }

    async fn wait(&self, rx: &mut watch::Receiver<Outcome>) -> Result<Arc<ThermostatState>> {
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            // The poll task died without reporting; drop its slot so the next
            // caller starts over.
            let mut slot = lock(&self.inner.in_flight);
            if slot.as_ref().is_some_and(|poll| poll.outcome.same_channel(rx)) {
                *slot = None;
            }
            Err(Error::DeviceUnreachable {
                url: self.base_url().to_string(),
                reason: "poll task ended without a result".into(),
            })
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
