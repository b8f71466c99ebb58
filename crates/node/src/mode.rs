//! Automatic / manual arbitration.
//!
//! ```text
//! AUTO ──[MANUAL cmd]──▶ MANUAL (no explicit command: hold position)
//!  ▲                        │
//!  └──────[AUTO cmd]────────┘   OPEN/CLOSE in MANUAL: latest one governs
//! ```
//!
//! Only AUTO/MANUAL commands change the mode; there is no reversion timer.
//! The control loop reads the mode once per tick, so a change applies from
//! the next arbitration onwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::info;

use crate::climate::{PlacementTable, ReasonCode, RoofTarget};
use crate::state::{EventKind, SharedStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Auto,
    Manual,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("AUTO"),
            Self::Manual => f.write_str("MANUAL"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(Self::Auto),
            "MANUAL" => Ok(Self::Manual),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

/// Explicit roof commands that govern the roof in MANUAL mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoofCommand {
    Open,
    Close,
}

/// What the control loop should do with the roof this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arbitration {
    Apply(RoofTarget),
    /// MANUAL without an explicit command: leave the roof where it is.
    Hold,
}

struct ModeState {
    mode: Mode,
    manual: Option<RoofCommand>,
}

pub struct ModeArbiter {
    inner: Mutex<ModeState>,
    placements: PlacementTable,
    status: SharedStatus,
}

impl ModeArbiter {
    /// Boots in AUTO.
    pub fn new(placements: PlacementTable, status: SharedStatus) -> Self {
        Self {
            inner: Mutex::new(ModeState {
                mode: Mode::Auto,
                manual: None,
            }),
            placements,
            status,
        }
    }

    pub async fn mode(&self) -> Mode {
        self.inner.lock().await.mode
    }

    /// Set the mode and return the previous one. Entering MANUAL starts with
    /// no explicit command, so the roof holds until OPEN/CLOSE arrives.
    pub async fn set_mode(&self, mode: Mode) -> Mode {
        let previous = {
            let mut st = self.inner.lock().await;
            let previous = st.mode;
            if previous != mode {
                st.mode = mode;
                st.manual = None;
            }
            previous
        };

        if previous != mode {
            info!(from = %previous, to = %mode, "mode changed");
            self.status
                .write()
                .await
                .record(EventKind::Mode, format!("mode {previous} -> {mode}"));
        }
        previous
    }

    /// Record an explicit OPEN/CLOSE. Only MANUAL mode keeps it; returns the
    /// mode it was received in.
    pub async fn request(&self, cmd: RoofCommand) -> Mode {
        let mut st = self.inner.lock().await;
        if st.mode == Mode::Manual {
            st.manual = Some(cmd);
        }
        st.mode
    }

    /// Merge the engine's decision with the current mode.
    pub async fn resolve(&self, decided: RoofTarget) -> Arbitration {
        let st = self.inner.lock().await;
        match (st.mode, st.manual) {
            (Mode::Auto, _) => Arbitration::Apply(decided),
            (Mode::Manual, Some(RoofCommand::Open)) => {
                Arbitration::Apply(self.placements.target(ReasonCode::ManualOpen))
            }
            (Mode::Manual, Some(RoofCommand::Close)) => {
                Arbitration::Apply(self.placements.target(ReasonCode::ManualClose))
            }
            (Mode::Manual, None) => Arbitration::Hold,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
