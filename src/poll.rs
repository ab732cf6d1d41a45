//! Periodic state refresh with bounded retries.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tokio::sync::{Notify, watch};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, error, info, warn};

use crate::config::{NetworkConfig, PollConfig};
use crate::device::AirPurifier;
use crate::error::{AppError, Result};
use crate::protocol::DeviceState;
use crate::transport::Transport;

/// Where the coordinator is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Polling,
    Success,
    Failed,
}

/// What a host should show for the device right now.
#[derive(Debug, Clone, PartialEq)]
pub enum Availability {
    Available(DeviceState),
    Unavailable,
}

/// Timing of one coordinator.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub reply_timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl PollSettings {
    pub fn from_config(network: &NetworkConfig, poll: &PollConfig) -> Self {
        Self {
            interval: poll.interval(),
            reply_timeout: network.reply_timeout(),
            max_attempts: poll.max_attempts.max(1),
            backoff: poll.backoff(),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from_config(&NetworkConfig::default(), &PollConfig::default())
    }
}

/// Keeps one device's state fresh.
pub struct PollCoordinator<T> {
    device: Arc<AirPurifier<T>>,
    settings: PollSettings,
    phase: watch::Sender<PollPhase>,
    available: AtomicBool,
    /// Unix milliseconds of the last successful tick; 0 until then.
    last_success_ms: AtomicI64,
    refresh: Notify,
}

impl<T: Transport> PollCoordinator<T> {
    pub fn new(device: Arc<AirPurifier<T>>, settings: PollSettings) -> Self {
        let (phase, _) = watch::channel(PollPhase::Idle);
        Self {
            device,
            settings,
            phase,
            available: AtomicBool::new(false),
            last_success_ms: AtomicI64::new(0),
            refresh: Notify::new(),
        }
    }

    pub fn device(&self) -> &Arc<AirPurifier<T>> {
        &self.device
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    pub fn phase(&self) -> PollPhase {
        *self.phase.borrow()
    }

    /// Receive every phase transition.
    pub fn subscribe_phase(&self) -> watch::Receiver<PollPhase> {
        self.phase.subscribe()
    }

    /// Latest state if the last tick succeeded.
    pub fn availability(&self) -> Availability {
        match self.device.state() {
            Some(state) if self.available.load(Ordering::Acquire) => Availability::Available(state),
            _ => Availability::Unavailable,
        }
    }

    /// When the last tick succeeded.
    pub fn last_success(&self) -> Option<DateTime<Local>> {
        match self.last_success_ms.load(Ordering::Acquire) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms).map(|t| t.with_timezone(&Local)),
        }
    }

    /// Ask the run loop for an immediate tick. Requests made before the loop
    /// wakes up are merged.
    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    /// The notifier behind [`request_refresh`](Self::request_refresh).
    pub fn refresh_trigger(&self) -> &Notify {
        &self.refresh
    }

    /// Run one tick: query up to `max_attempts` times, sleeping `backoff` in between.
    ///
    /// On failure the stored state is left untouched and the device is marked
    /// unavailable. Transport errors end the tick without further attempts.
    pub async fn poll_once(&self) -> Result<DeviceState> {
        self.phase.send_replace(PollPhase::Polling);
        let attempts = self.settings.max_attempts.max(1);

        for attempt in 1..=attempts {
            match self.device.query_state(self.settings.reply_timeout).await {
                Ok(Some(state)) => {
                    debug!("{}: state received on attempt {attempt}", self.device.mac());
                    self.available.store(true, Ordering::Release);
                    self.last_success_ms.store(Utc::now().timestamp_millis(), Ordering::Release);
                    self.phase.send_replace(PollPhase::Success);
                    return Ok(state);
                }
                Ok(None) => {
                    warn!(
                        "{}: no state reply (attempt {attempt}/{attempts})",
                        self.device.mac()
                    );
                }
                Err(e) => {
                    self.mark_failed();
                    return Err(e);
                }
            }

            if attempt < attempts {
                sleep(self.settings.backoff).await;
            }
        }

        self.mark_failed();
        Err(AppError::PollTimeout { attempts })
    }

    fn mark_failed(&self) {
        self.available.store(false, Ordering::Release);
        self.phase.send_replace(PollPhase::Failed);
    }

    /// Poll every `interval` (and on [`request_refresh`](Self::request_refresh))
    /// until `shutdown` resolves. Failed ticks are logged and never stop the loop.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
                _ = self.refresh.notified() => ticker.reset(),
            }

            let tick = tokio::select! {
                _ = &mut shutdown => {
                    self.phase.send_replace(PollPhase::Idle);
                    break;
                }
                tick = self.poll_once() => tick,
            };

            match tick {
                Ok(state) => info!(
                    "{} ({}): {} speed {} pm2.5 {}",
                    self.device.name(),
                    self.device.mac(),
                    state.switch,
                    state.wind_speed,
                    state.pm25
                ),
                Err(e) if e.is_transient() => {
                    warn!("{} ({}) unavailable: {e}", self.device.name(), self.device.mac())
                }
                Err(e) => error!("{} ({}) poll failed: {e}", self.device.name(), self.device.mac()),
            }
            self.phase.send_replace(PollPhase::Idle);
        }

        debug!("{}: poller stopped", self.device.mac());
    }
}
