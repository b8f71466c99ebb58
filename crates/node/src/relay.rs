//! Irrigation relay with a timed activation.
//!
//! ```text
//! Idle ──[activate(d), output ON ok]──▶ Active ──[d elapsed | cancel]──▶ Idle
//!  ▲                                      │
//!  └──────[output ON failed: forced OFF]──┘ (never leaves Idle)
//! ```
//!
//! At most one activation at a time: the check and the transition happen
//! under one lock. Deactivation is owned by a single timer task per
//! activation, which retakes the lock before flipping the state back.
//!
//! The `hw` feature gates the rppal GPIO output; without it a mock output
//! logs state changes.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tracing::{error, info};

#[cfg(feature = "hw")]
use rppal::gpio::{Gpio, OutputPin};

use crate::error::RelayError;
use crate::state::{EventKind, SharedStatus};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub gpio_pin: u8,
    /// Many relay boards switch on a LOW level.
    pub active_low: bool,
    pub default_duration_secs: u64,
    pub max_duration_secs: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            gpio_pin: 26,
            active_low: true,
            default_duration_secs: 10,
            max_duration_secs: 300,
        }
    }
}

/// Snapshot of the relay, as reported by `/relay_status` and `/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayState {
    pub active: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub activated_at: Option<OffsetDateTime>,
    pub duration_secs: u64,
    pub remaining_secs: u64,
}

impl RelayState {
    pub fn idle() -> Self {
        Self {
            active: false,
            activated_at: None,
            duration_secs: 0,
            remaining_secs: 0,
        }
    }
}

/// An accepted activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayActivation {
    pub duration: Duration,
}

/// Hardware seam for the relay coil.
pub trait RelayOutput: Send {
    fn set(&mut self, on: bool) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Real relay output (production: requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "hw")]
pub struct RelayPin {
    pin: OutputPin,
    active_low: bool,
}

#[cfg(feature = "hw")]
impl RelayPin {
    pub fn new(gpio_pin: u8, active_low: bool) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pin = gpio.get(gpio_pin)?.into_output();

        // Fail-safe: ensure "OFF" at startup
        if active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }
        info!(gpio_pin, active_low, "relay output initialised");
        Ok(Self { pin, active_low })
    }
}

#[cfg(feature = "hw")]
impl RelayOutput for RelayPin {
    fn set(&mut self, on: bool) -> Result<()> {
        // active-low: LOW = ON, HIGH = OFF
        if on != self.active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mock relay output (development: no hardware, logs state)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "hw"))]
pub struct RelayPin {
    pub(crate) on: bool,
}

#[cfg(not(feature = "hw"))]
impl RelayPin {
    pub fn new(gpio_pin: u8, _active_low: bool) -> Result<Self> {
        info!(gpio_pin, "[mock-gpio] relay registered (not wired)");
        Ok(Self { on: false })
    }
}

#[cfg(not(feature = "hw"))]
impl RelayOutput for RelayPin {
    fn set(&mut self, on: bool) -> Result<()> {
        self.on = on;
        info!("[mock-gpio] relay set {}", if on { "ON" } else { "OFF" });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

struct RelayInner {
    output: Box<dyn RelayOutput>,
    state: RelayState,
    since: Option<Instant>,
    cancel: Option<oneshot::Sender<()>>,
    /// Bumped on every activation; a timer only releases its own.
    generation: u64,
}

impl RelayInner {
    /// Drive the output to its inactive level and return to Idle. A failing
    /// output is logged; the state is reset regardless.
    fn release(&mut self) {
        if let Err(e) = self.output.set(false) {
            error!("relay: failed to switch output OFF: {e:#}");
        }
        self.state = RelayState::idle();
        self.since = None;
        self.cancel = None;
    }

    fn snapshot(&self) -> RelayState {
        let mut state = self.state;
        if let Some(since) = self.since {
            state.remaining_secs = state
                .duration_secs
                .saturating_sub(since.elapsed().as_secs());
        }
        state
    }
}

pub struct RelayController {
    inner: Arc<Mutex<RelayInner>>,
    max_duration: Duration,
    status: SharedStatus,
}

impl RelayController {
    pub fn new(output: Box<dyn RelayOutput>, max_duration: Duration, status: SharedStatus) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RelayInner {
                output,
                state: RelayState::idle(),
                since: None,
                cancel: None,
                generation: 0,
            })),
            max_duration,
            status,
        }
    }

    /// Switch the relay on for `duration`. A request while active is
    /// rejected, not queued. If the output cannot be switched on it is
    /// forced OFF before returning.
    pub async fn activate(&self, duration: Duration) -> Result<RelayActivation, RelayError> {
        if duration < Duration::from_secs(1) || duration > self.max_duration {
            return Err(RelayError::InvalidDuration {
                requested: duration,
                max: self.max_duration,
            });
        }

        let (cancelled, generation) = {
            let mut inner = self.inner.lock().await;
            if inner.state.active {
                return Err(RelayError::AlreadyActive);
            }
            if let Err(e) = inner.output.set(true) {
                inner.release();
                drop(inner);
                self.status
                    .write()
                    .await
                    .record(EventKind::Error, format!("relay output fault: {e:#}"));
                return Err(RelayError::Output(e));
            }

            let (tx, rx) = oneshot::channel();
            inner.generation += 1;
            inner.cancel = Some(tx);
            inner.since = Some(Instant::now());
            inner.state = RelayState {
                active: true,
                activated_at: Some(OffsetDateTime::now_utc()),
                duration_secs: duration.as_secs(),
                remaining_secs: duration.as_secs(),
            };
            (rx, inner.generation)
        };

        info!(duration_sec = duration.as_secs(), "relay: activated");
        self.status.write().await.record(
            EventKind::Relay,
            format!("relay ON for {}s", duration.as_secs()),
        );

        let inner = Arc::clone(&self.inner);
        let status = self.status.clone();
        tokio::spawn(async move {
            let was_cancelled = tokio::select! {
                _ = tokio::time::sleep(duration) => false,
                _ = cancelled => true,
            };

            let held = {
                let mut inner = inner.lock().await;
                if inner.generation != generation || !inner.state.active {
                    // Already released by force_off, possibly re-activated since.
                    return;
                }
                let held = inner.since.map(|s| s.elapsed().as_secs()).unwrap_or(0);
                inner.release();
                held
            };

            info!(held_sec = held, was_cancelled, "relay: deactivated");
            let detail = if was_cancelled {
                format!("relay OFF after {held}s (cancelled)")
            } else {
                format!("relay OFF after {held}s")
            };
            status.write().await.record(EventKind::Relay, detail);
        });

        Ok(RelayActivation { duration })
    }

    /// Ask the running activation to end early. The timer task performs the
    /// actual deactivation. Returns false when the relay was idle.
    pub async fn cancel(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.cancel.take() {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Force the output OFF immediately. Used on shutdown and fatal errors.
    pub async fn force_off(&self) {
        self.inner.lock().await.release();
    }

    pub async fn state(&self) -> RelayState {
        self.inner.lock().await.snapshot()
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.state.active
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state;
    use std::sync::Mutex as StdMutex;

    /// Records every level written; optionally refuses to switch ON.
    struct ProbeOutput {
        log: Arc<StdMutex<Vec<bool>>>,
        fail_on: bool,
    }

    impl RelayOutput for ProbeOutput {
        fn set(&mut self, on: bool) -> Result<()> {
            self.log.lock().unwrap().push(on);
            if on && self.fail_on {
                anyhow::bail!("coil driver not responding");
            }
            Ok(())
        }
    }

    fn controller(fail_on: bool) -> (RelayController, Arc<StdMutex<Vec<bool>>>) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let out = ProbeOutput {
            log: Arc::clone(&log),
            fail_on,
        };
        let ctl = RelayController::new(Box::new(out), Duration::from_secs(300), state::shared());
        (ctl, log)
    }

    // -- Activation protocol --------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn second_activation_while_active_is_rejected() {
        let (ctl, _) = controller(false);
        ctl.activate(Duration::from_secs(10)).await.unwrap();
        let err = ctl.activate(Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, RelayError::AlreadyActive));
    }

    #[tokio::test(start_paused = true)]
    async fn relay_returns_to_idle_after_duration() {
        let (ctl, log) = controller(false);
        ctl.activate(Duration::from_secs(10)).await.unwrap();
        assert!(ctl.is_active().await);

        tokio::time::sleep(Duration::from_secs(11)).await;

        assert!(!ctl.is_active().await);
        assert_eq!(*log.lock().unwrap(), vec![true, false]);
        // A fresh activation is accepted again.
        ctl.activate(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn relay_still_active_before_duration() {
        let (ctl, _) = controller(false);
        ctl.activate(Duration::from_secs(10)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(ctl.is_active().await);
        assert_eq!(ctl.state().await.remaining_secs, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_activations_accept_exactly_one() {
        let (ctl, _) = controller(false);
        let ctl = Arc::new(ctl);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = Arc::clone(&ctl);
            handles.push(tokio::spawn(async move {
                c.activate(Duration::from_secs(10)).await.is_ok()
            }));
        }
        let mut accepted = 0;
        for h in handles {
            if h.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }

    // -- Cancel ----------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn cancel_deactivates_through_timer_task() {
        let (ctl, log) = controller(false);
        ctl.activate(Duration::from_secs(60)).await.unwrap();
        assert!(ctl.cancel().await);

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!ctl.is_active().await);
        assert_eq!(*log.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn cancel_when_idle_returns_false() {
        let (ctl, _) = controller(false);
        assert!(!ctl.cancel().await);
    }

    // -- Error paths -----------------------------------------------------------

    #[tokio::test]
    async fn output_failure_forces_inactive_level() {
        let (ctl, log) = controller(true);
        let err = ctl.activate(Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, RelayError::Output(_)));
        assert_eq!(log.lock().unwrap().last(), Some(&false));
        assert!(!ctl.is_active().await);
    }

    #[tokio::test]
    async fn zero_duration_rejected() {
        let (ctl, log) = controller(false);
        let err = ctl.activate(Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidDuration { .. }));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn duration_above_max_rejected() {
        let (ctl, _) = controller(false);
        let err = ctl.activate(Duration::from_secs(301)).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidDuration { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn force_off_releases_immediately() {
        let (ctl, log) = controller(false);
        ctl.activate(Duration::from_secs(60)).await.unwrap();
        ctl.force_off().await;
        assert!(!ctl.is_active().await);
        assert_eq!(log.lock().unwrap().last(), Some(&false));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_does_not_end_next_activation() {
        let (ctl, _) = controller(false);
        ctl.activate(Duration::from_secs(60)).await.unwrap();
        ctl.force_off().await;
        ctl.activate(Duration::from_secs(30)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(ctl.is_active().await);
        assert_eq!(ctl.state().await.duration_secs, 30);
    }

    // -- RelayPin (mock) -------------------------------------------------------

    #[cfg(not(feature = "hw"))]
    #[test]
    fn mock_relay_pin_starts_off_and_switches() {
        let mut pin = RelayPin::new(26, true).unwrap();
        assert!(!pin.on);
        pin.set(true).unwrap();
        assert!(pin.on);
    }
}
