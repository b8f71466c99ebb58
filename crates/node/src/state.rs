use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::climate::RoofTarget;
use crate::mode::Mode;
use crate::relay::RelayState;
use crate::sensor::Reading;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedStatus = Arc<RwLock<DeviceStatus>>;

pub fn shared() -> SharedStatus {
    Arc::new(RwLock::new(DeviceStatus::new()))
}

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// What the device last saw and did. Read by the display, the local HTTP
/// surface and telemetry. Mode and relay state live behind their own locks.
pub struct DeviceStatus {
    pub started_at: Instant,
    pub link_up: bool,
    pub reading: Option<Reading>,
    pub target: Option<RoofTarget>,
    pub roof: Option<RoofPosition>,
    pub events: VecDeque<DeviceEvent>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RoofPosition {
    pub primary: u8,
    /// Mirror servo, always `180 - primary`.
    pub secondary: u8,
    #[serde(with = "time::serde::rfc3339")]
    pub applied_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Roof,
    Relay,
    Mode,
    Command,
    Telemetry,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what GET /status returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusSnapshot {
    pub uptime_secs: u64,
    pub mode: Mode,
    pub relay: RelayState,
    pub link_up: bool,
    pub reading: Option<Reading>,
    pub target: Option<RoofTarget>,
    pub roof: Option<RoofPosition>,
    pub events: Vec<DeviceEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl DeviceStatus {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            link_up: false,
            reading: None,
            target: None,
            roof: None,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Record the outcome of one control tick. A failed read clears the
    /// stored reading so nothing older than one tick is reported.
    pub fn record_tick(&mut self, reading: Option<Reading>, target: RoofTarget) {
        self.reading = reading;
        self.target = Some(target);
    }

    /// Record a roof move (or a no-op re-apply, which refreshes the time).
    pub fn record_roof(&mut self, primary: u8, secondary: u8) {
        let moved = self.roof.map(|r| r.primary) != Some(primary);
        self.roof = Some(RoofPosition {
            primary,
            secondary,
            applied_at: OffsetDateTime::now_utc(),
        });
        if moved {
            self.push_event(EventKind::Roof, format!("roof moved to {primary}°"));
        }
    }

    pub fn set_link(&mut self, up: bool) {
        if self.link_up != up {
            let detail = if up { "network link up" } else { "network link down" };
            self.push_event(EventKind::System, detail.to_string());
        }
        self.link_up = up;
    }

    pub fn record(&mut self, kind: EventKind, detail: String) {
        self.push_event(kind, detail);
    }

    pub fn to_snapshot(&self, mode: Mode, relay: RelayState) -> StatusSnapshot {
        StatusSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mode,
            relay,
            link_up: self.link_up,
            reading: self.reading,
            target: self.target,
            roof: self.roof,
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(DeviceEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climate::ClimateEngine;

    #[test]
    fn event_ring_buffer_is_bounded() {
        let mut st = DeviceStatus::new();
        for i in 0..(MAX_EVENTS + 25) {
            st.record(EventKind::System, format!("e{i}"));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        assert_eq!(st.events.front().unwrap().detail, "e25");
    }

    #[test]
    fn snapshot_lists_newest_event_first() {
        let mut st = DeviceStatus::new();
        st.record(EventKind::Mode, "first".into());
        st.record(EventKind::Mode, "second".into());
        let snap = st.to_snapshot(Mode::Auto, RelayState::idle());
        assert_eq!(snap.events[0].detail, "second");
    }

    #[test]
    fn reapplying_same_angle_refreshes_time_without_event() {
        let mut st = DeviceStatus::new();
        st.record_roof(90, 90);
        let first = st.roof.unwrap().applied_at;
        st.record_roof(90, 90);
        assert_eq!(st.events.len(), 1);
        assert!(st.roof.unwrap().applied_at >= first);
    }

    #[test]
    fn failed_read_clears_previous_reading() {
        let mut st = DeviceStatus::new();
        let engine = ClimateEngine::default();
        let r = Reading::new(25.0, 60.0, 700.0);
        st.record_tick(Some(r), engine.decide(Some(&r)));
        st.record_tick(None, engine.decide(None));
        assert!(st.reading.is_none());
    }

    #[test]
    fn link_change_is_recorded_once() {
        let mut st = DeviceStatus::new();
        st.set_link(true);
        st.set_link(true);
        assert_eq!(st.events.len(), 1);
        assert!(st.link_up);
    }
}
