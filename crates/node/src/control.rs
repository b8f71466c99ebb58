//! The device's top-level scheduler.
//!
//! ```text
//! INIT ──▶ RUNNING (every tick, forever)
//!            read ─▶ decide ─▶ poll backend* ─▶ arbitrate ─▶ apply ─▶ display ─▶ publish*
//!                                                                     (* on their own cadence)
//! ```
//!
//! INIT probes connectivity, drives the roof to the safe default and, if the
//! backend is reachable, restores the mode it holds. RUNNING never ends on
//! its own: sensor failures degrade to the safe default, network failures
//! skip the poll or publish step. Poll and publish share one network deadline
//! per tick. Only an actuator fault stops the loop.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::actuator::RoofActuator;
use crate::climate::{ClimateEngine, RoofTarget};
use crate::command::{Command, CommandChannel, CommandReply};
use crate::display::{self, StatusDisplay};
use crate::error::{ActuatorFault, NetworkError};
use crate::link::Link;
use crate::mode::{Arbitration, Mode};
use crate::remote::CommandFeed;
use crate::sensor::{Reading, SensorReader};
use crate::state::{EventKind, SharedStatus};
use crate::telemetry::{PublishOutcome, TelemetryFrame, TelemetryPublisher};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    pub tick_ms: u64,
    /// Publish telemetry every N ticks (the first tick always publishes).
    pub publish_every_ticks: u64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            publish_every_ticks: 15,
        }
    }
}

/// Everything the loop owns or shares, assembled by `main`.
pub struct LoopParts {
    pub device_id: String,
    pub settings: ControlSettings,
    pub poll_every_ticks: u64,
    /// Budget for all network work in one tick, poll and publish together.
    pub network_timeout: Duration,
    pub sensor: Box<dyn SensorReader>,
    pub engine: ClimateEngine,
    pub commands: Arc<CommandChannel>,
    pub actuator: RoofActuator,
    pub display: Box<dyn StatusDisplay>,
    pub publisher: TelemetryPublisher,
    pub feed: Option<Arc<dyn CommandFeed>>,
    pub link: Arc<dyn Link>,
    pub status: SharedStatus,
}

/// What one tick did.
#[derive(Debug)]
pub struct TickReport {
    pub tick: u64,
    pub reading: Option<Reading>,
    pub decided: RoofTarget,
    /// The roof target in force after arbitration.
    pub effective: RoofTarget,
    /// Angle written this tick; `None` when MANUAL held the roof.
    pub applied: Option<u8>,
    pub command: Option<CommandReply>,
    pub published: Option<PublishOutcome>,
}

pub struct ControlLoop {
    device_id: String,
    settings: ControlSettings,
    poll_every: u64,
    network_timeout: Duration,
    sensor: Box<dyn SensorReader>,
    engine: ClimateEngine,
    commands: Arc<CommandChannel>,
    actuator: RoofActuator,
    display: Box<dyn StatusDisplay>,
    publisher: TelemetryPublisher,
    feed: Option<Arc<dyn CommandFeed>>,
    link: Arc<dyn Link>,
    status: SharedStatus,

    ticks: u64,
    current: RoofTarget,
    sensor_failing: bool,
    /// Last mode the backend reported; only a change is adopted, so a local
    /// mode switch is not overwritten on the next poll.
    last_remote_mode: Option<Mode>,
}

impl ControlLoop {
    pub fn new(parts: LoopParts) -> Self {
        let current = parts.engine.safe_default();
        Self {
            device_id: parts.device_id,
            settings: parts.settings,
            poll_every: parts.poll_every_ticks,
            network_timeout: parts.network_timeout,
            sensor: parts.sensor,
            engine: parts.engine,
            commands: parts.commands,
            actuator: parts.actuator,
            display: parts.display,
            publisher: parts.publisher,
            feed: parts.feed,
            link: parts.link,
            status: parts.status,
            ticks: 0,
            current,
            sensor_failing: false,
            last_remote_mode: None,
        }
    }

    // -----------------------------------------------------------------------
    // INIT
    // -----------------------------------------------------------------------

    pub async fn init(&mut self) -> Result<(), ActuatorFault> {
        let link_up = self.link.acquire().await;
        if !link_up {
            warn!("no network link at startup; publishing and polling wait for it");
        }

        let safe = self.engine.safe_default();
        let angle = self.actuator.apply(&safe).await?;
        self.sensor.observe_roof(angle);
        self.current = safe;
        info!(angle, "roof at safe default");

        if link_up {
            if let Some(feed) = &self.feed {
                let fetch = tokio::time::timeout(self.network_timeout, feed.fetch_mode());
                let fetched = match fetch.await {
                    Ok(r) => r,
                    Err(_) => Err(NetworkError::Timeout(self.network_timeout)),
                };
                match fetched {
                    Ok(mode) => {
                        self.commands.mode().set_mode(mode).await;
                        self.last_remote_mode = Some(mode);
                        info!(%mode, "mode restored from backend");
                    }
                    Err(e) => warn!("mode restore failed, staying AUTO: {e}"),
                }
            }
        }

        self.status
            .write()
            .await
            .record(EventKind::System, format!("{} control loop started", self.device_id));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // RUNNING
    // -----------------------------------------------------------------------

    pub async fn tick(&mut self) -> Result<TickReport, ActuatorFault> {
        self.ticks += 1;
        let tick = self.ticks;
        let deadline = Instant::now() + self.network_timeout;

        let reading = self.read_sensor().await;
        let decided = self.engine.decide(reading.as_ref());
        debug!(tick, angle = decided.angle, reason = decided.describe(), "decided");

        // Remote mode/command land before arbitration so they govern this tick.
        let command = if due(tick, self.poll_every) {
            self.poll_remote(deadline).await
        } else {
            None
        };

        let applied = match self.commands.mode().resolve(decided).await {
            Arbitration::Apply(target) => {
                let angle = self.actuator.apply(&target).await?;
                self.sensor.observe_roof(angle);
                self.current = target;
                Some(angle)
            }
            Arbitration::Hold => {
                debug!(tick, position = ?self.actuator.position(), "manual hold");
                None
            }
        };
        let effective = self.current;

        let mode = self.commands.mode().mode().await;
        let link_up = {
            let mut st = self.status.write().await;
            st.record_tick(reading, effective);
            st.link_up
        };
        self.display
            .show(&display::lines(reading.as_ref(), &effective, mode, link_up));

        let published = if due(tick, self.settings.publish_every_ticks) {
            match &reading {
                Some(r) => {
                    let frame = TelemetryFrame::new(&self.device_id, r, effective.label(), mode);
                    match timeout_at(deadline, self.publisher.publish(&frame)).await {
                        Ok(outcome) => Some(outcome),
                        Err(_) => {
                            warn!(tick, "publish abandoned: tick network budget spent");
                            Some(PublishOutcome::TimedOut)
                        }
                    }
                }
                None => {
                    debug!(tick, "publish skipped: no valid reading");
                    None
                }
            }
        } else {
            None
        };

        Ok(TickReport {
            tick,
            reading,
            decided,
            effective,
            applied,
            command,
            published,
        })
    }

    pub async fn run(mut self) -> Result<(), ActuatorFault> {
        self.init().await?;

        let mut interval = tokio::time::interval(Duration::from_millis(self.settings.tick_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(fault) = self.tick().await {
                error!("{fault:#}");
                self.status
                    .write()
                    .await
                    .record(EventKind::Error, fault.to_string());
                return Err(fault);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    async fn read_sensor(&mut self) -> Option<Reading> {
        let result = match self.sensor.read() {
            Ok(r) if r.is_plausible() => Ok(r),
            Ok(r) => Err(format!(
                "implausible reading t={} h={} l={}",
                r.temperature, r.humidity, r.light
            )),
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(r) => {
                if self.sensor_failing {
                    info!("sensor recovered");
                    self.sensor_failing = false;
                }
                Some(r)
            }
            Err(detail) => {
                warn!("sensor: {detail}; using safe default");
                if !self.sensor_failing {
                    self.sensor_failing = true;
                    self.status.write().await.record(EventKind::Error, detail);
                }
                None
            }
        }
    }

    async fn poll_remote(&mut self, deadline: Instant) -> Option<CommandReply> {
        let feed = self.feed.clone()?;
        if !self.link.is_up().await {
            return None;
        }

        let polled = match timeout_at(deadline, feed.poll()).await {
            Ok(r) => r,
            Err(_) => Err(NetworkError::Timeout(self.network_timeout)),
        };
        let poll = match polled {
            Ok(p) => p,
            Err(e) => {
                warn!("command poll failed: {e}");
                return None;
            }
        };

        if let Some(remote) = poll.mode {
            if self.last_remote_mode != Some(remote) {
                self.last_remote_mode = Some(remote);
                self.commands.mode().set_mode(remote).await;
            }
        }

        let token = poll.command?;
        // The hub switches its mode on enqueue, so a mode command that
        // disagrees with the mode in the same answer has been superseded.
        if let (Ok(cmd), Some(remote)) = (token.parse::<Command>(), poll.mode) {
            if cmd.mode().is_some_and(|m| m != remote) {
                info!(command = %token, backend_mode = %remote, "superseded mode command dropped");
                return None;
            }
        }

        match self.commands.dispatch_token(&token, "backend").await {
            Ok(reply) => Some(reply),
            Err(e) => {
                self.status
                    .write()
                    .await
                    .record(EventKind::Error, format!("backend: {e}"));
                None
            }
        }
    }
}

/// Whether a step on an every-N cadence runs on `tick` (1-based).
fn due(tick: u64, every: u64) -> bool {
    every > 0 && (tick - 1) % every == 0
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::RoofDrive;
    use crate::climate::{PlacementTable, ReasonCode};
    use crate::error::{NetworkError, SensorError};
    use crate::mode::ModeArbiter;
    use crate::relay::{RelayController, RelayOutput};
    use crate::remote::ControlPoll;
    use crate::state;
    use crate::telemetry::TelemetrySink;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    // -- Doubles ----------------------------------------------------------------

    /// Plays back a script, then keeps returning a temperate reading.
    struct ScriptedSensor(VecDeque<Result<Reading, SensorError>>);

    impl SensorReader for ScriptedSensor {
        fn read(&mut self) -> Result<Reading, SensorError> {
            self.0
                .pop_front()
                .unwrap_or_else(|| Ok(Reading::new(25.0, 60.0, 700.0)))
        }
    }

    struct RecordingDrive {
        writes: Arc<Mutex<Vec<(u8, u8)>>>,
        fail_after: Option<usize>,
    }

    impl RoofDrive for RecordingDrive {
        fn write(&mut self, primary: u8, secondary: u8) -> anyhow::Result<()> {
            let mut w = self.writes.lock().unwrap();
            if self.fail_after.is_some_and(|n| w.len() >= n) {
                anyhow::bail!("servo stalled");
            }
            w.push((primary, secondary));
            Ok(())
        }
    }

    struct NullOutput;

    impl RelayOutput for NullOutput {
        fn set(&mut self, _: bool) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct FixedLink(AtomicBool);

    #[async_trait]
    impl Link for FixedLink {
        async fn is_up(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
        async fn acquire(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
        async fn mark_down(&self) {
            self.0.store(false, Ordering::SeqCst);
        }
    }

    struct ScriptedFeed {
        polls: Mutex<VecDeque<ControlPoll>>,
        mode: Option<Mode>,
        polled: AtomicUsize,
    }

    impl ScriptedFeed {
        fn new(mode: Option<Mode>, polls: Vec<ControlPoll>) -> Arc<Self> {
            Arc::new(Self {
                polls: Mutex::new(polls.into()),
                mode,
                polled: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CommandFeed for ScriptedFeed {
        async fn poll(&self) -> Result<ControlPoll, NetworkError> {
            self.polled.fetch_add(1, Ordering::SeqCst);
            Ok(self.polls.lock().unwrap().pop_front().unwrap_or_default())
        }
        async fn fetch_mode(&self) -> Result<Mode, NetworkError> {
            self.mode.ok_or(NetworkError::Status {
                url: "test://get_mode".into(),
                status: 503,
            })
        }
    }

    /// A backend that accepts the connection and never answers.
    struct HangingFeed;

    #[async_trait]
    impl CommandFeed for HangingFeed {
        async fn poll(&self) -> Result<ControlPoll, NetworkError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ControlPoll::default())
        }
        async fn fetch_mode(&self) -> Result<Mode, NetworkError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Mode::Auto)
        }
    }

    struct CountingSink(Arc<AtomicUsize>);

    #[async_trait]
    impl TelemetrySink for CountingSink {
        fn name(&self) -> &str {
            "count"
        }
        async fn send(&self, _: &TelemetryFrame) -> Result<(), NetworkError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    // -- Harness ----------------------------------------------------------------

    struct Harness {
        lp: ControlLoop,
        writes: Arc<Mutex<Vec<(u8, u8)>>>,
        sent: Arc<AtomicUsize>,
        commands: Arc<CommandChannel>,
    }

    struct Setup {
        script: Vec<Result<Reading, SensorError>>,
        feed: Option<Arc<dyn CommandFeed>>,
        link_up: bool,
        publish_every: u64,
        fail_after: Option<usize>,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                script: Vec::new(),
                feed: None,
                link_up: true,
                publish_every: 15,
                fail_after: None,
            }
        }
    }

    fn harness(setup: Setup) -> Harness {
        let status = state::shared();
        let writes = Arc::new(Mutex::new(Vec::new()));
        let sent = Arc::new(AtomicUsize::new(0));
        let link: Arc<dyn Link> = Arc::new(FixedLink(AtomicBool::new(setup.link_up)));

        let mode = Arc::new(ModeArbiter::new(PlacementTable::default(), status.clone()));
        let relay = Arc::new(RelayController::new(
            Box::new(NullOutput),
            Duration::from_secs(300),
            status.clone(),
        ));
        let commands = Arc::new(CommandChannel::new(
            mode,
            relay,
            status.clone(),
            Duration::from_secs(10),
        ));

        let publisher = TelemetryPublisher::new(
            vec![Box::new(CountingSink(Arc::clone(&sent)))],
            Arc::clone(&link),
            Duration::from_secs(10),
            status.clone(),
        );

        let lp = ControlLoop::new(LoopParts {
            device_id: "gh-test".into(),
            settings: ControlSettings {
                tick_ms: 1000,
                publish_every_ticks: setup.publish_every,
            },
            poll_every_ticks: 1,
            network_timeout: Duration::from_secs(10),
            sensor: Box::new(ScriptedSensor(setup.script.into())),
            engine: ClimateEngine::default(),
            commands: Arc::clone(&commands),
            actuator: RoofActuator::new(
                Box::new(RecordingDrive {
                    writes: Arc::clone(&writes),
                    fail_after: setup.fail_after,
                }),
                status.clone(),
            ),
            display: Box::new(display::LogDisplay::default()),
            publisher,
            feed: setup.feed,
            link,
            status,
        });

        Harness {
            lp,
            writes,
            sent,
            commands,
        }
    }

    fn hot() -> Result<Reading, SensorError> {
        Ok(Reading::new(35.0, 50.0, 500.0))
    }

    fn broken() -> Result<Reading, SensorError> {
        Err(SensorError::ReadFailed {
            sensor: "sht4x",
            detail: "i2c nack".into(),
        })
    }

    // -- INIT ---------------------------------------------------------------------

    #[tokio::test]
    async fn init_drives_roof_to_safe_default() {
        let mut h = harness(Setup::default());
        h.lp.init().await.unwrap();
        assert_eq!(*h.writes.lock().unwrap(), vec![(160, 20)]);
    }

    #[tokio::test]
    async fn init_restores_backend_mode() {
        let feed = ScriptedFeed::new(Some(Mode::Manual), vec![]);
        let mut h = harness(Setup {
            feed: Some(feed),
            ..Default::default()
        });
        h.lp.init().await.unwrap();
        assert_eq!(h.commands.mode().mode().await, Mode::Manual);
    }

    #[tokio::test]
    async fn init_without_link_stays_auto() {
        let feed = ScriptedFeed::new(Some(Mode::Manual), vec![]);
        let mut h = harness(Setup {
            feed: Some(feed),
            link_up: false,
            ..Default::default()
        });
        h.lp.init().await.unwrap();
        assert_eq!(h.commands.mode().mode().await, Mode::Auto);
    }

    // -- RUNNING ------------------------------------------------------------------

    #[tokio::test]
    async fn hot_reading_closes_roof() {
        let mut h = harness(Setup {
            script: vec![hot()],
            ..Default::default()
        });
        h.lp.init().await.unwrap();
        let report = h.lp.tick().await.unwrap();
        assert_eq!(report.decided.reason, ReasonCode::TemperatureHigh);
        assert_eq!(report.applied, Some(0));
        assert_eq!(h.writes.lock().unwrap().last(), Some(&(0, 180)));
    }

    #[tokio::test]
    async fn sensor_failure_degrades_to_safe_default_and_continues() {
        let mut h = harness(Setup {
            script: vec![hot(), broken()],
            ..Default::default()
        });
        h.lp.init().await.unwrap();
        h.lp.tick().await.unwrap();

        let report = h.lp.tick().await.unwrap();
        assert!(report.reading.is_none());
        assert_eq!(report.decided.reason, ReasonCode::SensorError);
        assert_eq!(report.applied, Some(160));

        let report = h.lp.tick().await.unwrap();
        assert!(report.reading.is_some());
        assert_eq!(h.lp.ticks, 3);
    }

    #[tokio::test]
    async fn manual_without_command_holds_angle_over_ticks() {
        let mut h = harness(Setup {
            script: vec![hot()],
            ..Default::default()
        });
        h.lp.init().await.unwrap();
        h.lp.tick().await.unwrap();
        h.commands.mode().set_mode(Mode::Manual).await;

        for _ in 0..5 {
            let report = h.lp.tick().await.unwrap();
            assert_eq!(report.applied, None);
            assert_eq!(report.effective.angle, 0);
        }
        assert_eq!(*h.writes.lock().unwrap(), vec![(160, 20), (0, 180)]);
    }

    #[tokio::test]
    async fn backend_manual_open_applies_in_same_tick() {
        let feed = ScriptedFeed::new(
            None,
            vec![ControlPoll {
                mode: Some(Mode::Manual),
                command: Some("open".into()),
            }],
        );
        let mut h = harness(Setup {
            script: vec![hot()],
            feed: Some(feed),
            ..Default::default()
        });
        h.lp.init().await.unwrap();
        let report = h.lp.tick().await.unwrap();
        assert!(report.command.is_some());
        assert_eq!(report.effective.reason, ReasonCode::ManualOpen);
        assert_eq!(report.effective.angle, 160);
    }

    #[tokio::test]
    async fn unknown_backend_command_changes_nothing() {
        let feed = ScriptedFeed::new(
            None,
            vec![ControlPoll {
                mode: None,
                command: Some("dance".into()),
            }],
        );
        let mut h = harness(Setup {
            feed: Some(feed),
            ..Default::default()
        });
        h.lp.init().await.unwrap();
        let report = h.lp.tick().await.unwrap();
        assert!(report.command.is_none());
        assert_eq!(h.commands.mode().mode().await, Mode::Auto);
        assert!(!h.commands.relay().is_active().await);
    }

    #[tokio::test]
    async fn repeated_backend_mode_does_not_override_local_switch() {
        let auto = ControlPoll {
            mode: Some(Mode::Auto),
            command: None,
        };
        let feed = ScriptedFeed::new(Some(Mode::Auto), vec![auto.clone(), auto]);
        let mut h = harness(Setup {
            feed: Some(feed),
            ..Default::default()
        });
        h.lp.init().await.unwrap();
        h.commands.mode().set_mode(Mode::Manual).await;
        h.lp.tick().await.unwrap();
        h.lp.tick().await.unwrap();
        assert_eq!(h.commands.mode().mode().await, Mode::Manual);
    }

    #[tokio::test]
    async fn superseded_mode_command_does_not_override_backend_mode() {
        let poll = |command: &str| ControlPoll {
            mode: Some(Mode::Auto),
            command: Some(command.into()),
        };
        // Operator sent MANUAL, OPEN, AUTO; newest-first delivery.
        let feed = ScriptedFeed::new(
            Some(Mode::Auto),
            vec![poll("auto"), poll("open"), poll("manual")],
        );
        let mut h = harness(Setup {
            script: vec![hot()],
            feed: Some(feed),
            ..Default::default()
        });
        h.lp.init().await.unwrap();
        let mut replies = Vec::new();
        for _ in 0..6 {
            replies.push(h.lp.tick().await.unwrap().command);
        }
        assert_eq!(h.commands.mode().mode().await, Mode::Auto);
        assert!(replies[2].is_none());
        assert!(h.writes.lock().unwrap().len() > 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_backend_cannot_stall_the_tick() {
        let mut h = harness(Setup {
            script: vec![hot()],
            feed: Some(Arc::new(HangingFeed)),
            publish_every: 1,
            ..Default::default()
        });
        // Mode restore gives up after the same budget.
        h.lp.init().await.unwrap();
        assert_eq!(h.commands.mode().mode().await, Mode::Auto);

        let started = Instant::now();
        let report = tokio::time::timeout(Duration::from_secs(15), h.lp.tick())
            .await
            .expect("tick overran its network budget")
            .unwrap();
        assert!(started.elapsed() <= Duration::from_secs(10));
        assert!(report.command.is_none());
        assert_eq!(report.applied, Some(0));
        assert!(report.published.is_some());
    }

    #[tokio::test]
    async fn publish_follows_its_own_cadence() {
        let mut h = harness(Setup {
            publish_every: 3,
            ..Default::default()
        });
        h.lp.init().await.unwrap();
        let mut published_on = Vec::new();
        for _ in 0..7 {
            let r = h.lp.tick().await.unwrap();
            if r.published.is_some() {
                published_on.push(r.tick);
            }
        }
        assert_eq!(published_on, vec![1, 4, 7]);
        assert_eq!(h.sent.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn no_publish_without_valid_reading() {
        let mut h = harness(Setup {
            script: vec![broken()],
            publish_every: 1,
            ..Default::default()
        });
        h.lp.init().await.unwrap();
        let report = h.lp.tick().await.unwrap();
        assert!(report.published.is_none());
        assert_eq!(h.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn offline_suppresses_only_network_steps() {
        let feed = ScriptedFeed::new(None, vec![]);
        let mut h = harness(Setup {
            script: vec![hot()],
            feed: Some(feed.clone() as Arc<dyn CommandFeed>),
            link_up: false,
            publish_every: 1,
            ..Default::default()
        });
        h.lp.init().await.unwrap();
        let report = h.lp.tick().await.unwrap();
        assert_eq!(report.applied, Some(0));
        assert_eq!(report.published, Some(PublishOutcome::Skipped));
        assert_eq!(feed.polled.load(Ordering::SeqCst), 0);
        assert_eq!(h.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn actuator_fault_is_fatal() {
        let mut h = harness(Setup {
            script: vec![hot()],
            fail_after: Some(1),
            ..Default::default()
        });
        h.lp.init().await.unwrap();
        let err = h.lp.tick().await.unwrap_err();
        assert_eq!(err.angle, 0);
    }

    #[test]
    fn cadence_helper() {
        assert!(due(1, 15));
        assert!(!due(2, 15));
        assert!(due(16, 15));
        assert!(!due(1, 0));
    }
}
