//! Climate decision engine: maps one reading to a roof target.
//!
//! Rules are evaluated in a fixed priority order, first match wins:
//!
//! ```text
//! 1. temp  >= temp_high                         -> temperature_high
//! 2. temp  <= temp_low                          -> temperature_low
//! 3. hum   >= humidity_high                     -> humidity_high
//! 4. hum   <= humidity_low                      -> humidity_low
//! 5. light >  light_bright && temp > temp_warm  -> bright_and_hot
//! 6. light >  light_medium && temp in ideal     -> bright_ideal
//! 7. light <= light_medium                      -> overcast
//! 8. otherwise                                  -> normal
//! ```
//!
//! Thresholds pick the reason; the placement table turns the reason into a
//! roof state and servo angle. Neither is hardcoded in the rule chain.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sensor::Reading;

pub const MAX_ANGLE: u8 = 180;

// ---------------------------------------------------------------------------
// Reason codes and roof states
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    TemperatureHigh,
    TemperatureLow,
    HumidityHigh,
    HumidityLow,
    BrightAndHot,
    BrightIdeal,
    Overcast,
    Normal,
    SensorError,
    ManualOpen,
    ManualClose,
}

impl ReasonCode {
    #[cfg(test)]
    pub const ALL: [ReasonCode; 11] = [
        Self::TemperatureHigh,
        Self::TemperatureLow,
        Self::HumidityHigh,
        Self::HumidityLow,
        Self::BrightAndHot,
        Self::BrightIdeal,
        Self::Overcast,
        Self::Normal,
        Self::SensorError,
        Self::ManualOpen,
        Self::ManualClose,
    ];

    /// Human-readable reason shown on the display and in logs.
    pub fn describe(self) -> &'static str {
        match self {
            Self::TemperatureHigh => "temperature too high",
            Self::TemperatureLow => "temperature too low",
            Self::HumidityHigh => "humidity too high",
            Self::HumidityLow => "humidity too low",
            Self::BrightAndHot => "bright and hot",
            Self::BrightIdeal => "bright, ideal temperature",
            Self::Overcast => "overcast or night",
            Self::Normal => "normal conditions",
            Self::SensorError => "SENSOR_ERROR",
            Self::ManualOpen => "manual open",
            Self::ManualClose => "manual close",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoofState {
    Closed,
    Partial,
    WideOpen,
    Open,
}

impl RoofState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Partial => "PARTIAL",
            Self::WideOpen => "WIDE-OPEN",
            Self::Open => "OPEN",
        }
    }
}

impl fmt::Display for RoofState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The commanded roof position for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoofTarget {
    pub angle: u8,
    pub state: RoofState,
    pub reason: ReasonCode,
}

impl RoofTarget {
    pub fn label(&self) -> &'static str {
        self.state.label()
    }

    pub fn describe(&self) -> &'static str {
        self.reason.describe()
    }
}

// ---------------------------------------------------------------------------
// Placement table
// ---------------------------------------------------------------------------

/// One row of the reason -> (state, angle) table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub reason: ReasonCode,
    pub state: RoofState,
    pub angle: u8,
}

const fn row(reason: ReasonCode, state: RoofState, angle: u8) -> Placement {
    Placement {
        reason,
        state,
        angle,
    }
}

/// Stock greenhouse calibration.
pub const DEFAULT_PLACEMENTS: [Placement; 11] = [
    row(ReasonCode::TemperatureHigh, RoofState::Closed, 0),
    row(ReasonCode::TemperatureLow, RoofState::Open, 180),
    row(ReasonCode::HumidityHigh, RoofState::Open, 180),
    row(ReasonCode::HumidityLow, RoofState::Closed, 0),
    row(ReasonCode::BrightAndHot, RoofState::Partial, 90),
    row(ReasonCode::BrightIdeal, RoofState::WideOpen, 135),
    row(ReasonCode::Overcast, RoofState::Open, 160),
    row(ReasonCode::Normal, RoofState::Open, 160),
    row(ReasonCode::SensorError, RoofState::Open, 160),
    row(ReasonCode::ManualOpen, RoofState::Open, 160),
    row(ReasonCode::ManualClose, RoofState::Closed, 0),
];

/// Complete reason -> placement mapping. Always covers every reason code.
#[derive(Debug, Clone)]
pub struct PlacementTable {
    rows: Vec<Placement>,
}

impl Default for PlacementTable {
    fn default() -> Self {
        Self {
            rows: DEFAULT_PLACEMENTS.to_vec(),
        }
    }
}

impl PlacementTable {
    /// Start from the stock table and replace any row named in `overrides`.
    /// Angles are clamped to 0..=180.
    pub fn with_overrides(overrides: &[Placement]) -> Self {
        let mut table = Self::default();
        for o in overrides {
            if let Some(row) = table.rows.iter_mut().find(|r| r.reason == o.reason) {
                *row = Placement {
                    angle: o.angle.min(MAX_ANGLE),
                    ..*o
                };
            }
        }
        table
    }

    pub fn target(&self, reason: ReasonCode) -> RoofTarget {
        // Every reason has a row; the fallback only guards a hand-built table.
        let p = self
            .rows
            .iter()
            .find(|r| r.reason == reason)
            .copied()
            .unwrap_or(row(reason, RoofState::Open, 160));
        RoofTarget {
            angle: p.angle,
            state: p.state,
            reason,
        }
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub temp_high: f32,
    pub temp_low: f32,
    pub humidity_high: f32,
    pub humidity_low: f32,
    pub light_bright: f32,
    pub temp_warm: f32,
    pub light_medium: f32,
    /// Exclusive lower bound of the ideal band.
    pub ideal_min: f32,
    /// Inclusive upper bound of the ideal band.
    pub ideal_max: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            temp_high: 32.0,
            temp_low: 18.0,
            humidity_high: 80.0,
            humidity_low: 40.0,
            light_bright: 800.0,
            temp_warm: 28.0,
            light_medium: 600.0,
            ideal_min: 22.0,
            ideal_max: 28.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ClimateEngine {
    thresholds: Thresholds,
    placements: PlacementTable,
}

impl ClimateEngine {
    pub fn new(thresholds: Thresholds, placements: PlacementTable) -> Self {
        Self {
            thresholds,
            placements,
        }
    }

    /// Pure and total: a missing or implausible reading yields the safe
    /// default instead of an error.
    pub fn decide(&self, reading: Option<&Reading>) -> RoofTarget {
        let reason = match reading {
            Some(r) if r.is_plausible() => self.classify(r),
            _ => ReasonCode::SensorError,
        };
        self.placements.target(reason)
    }

    /// Target the roof is driven to at boot and on sensor failure.
    pub fn safe_default(&self) -> RoofTarget {
        self.placements.target(ReasonCode::SensorError)
    }

    fn classify(&self, r: &Reading) -> ReasonCode {
        let t = &self.thresholds;
        let temp = r.temperature;
        let hum = r.humidity;
        let light = r.light;

        if temp >= t.temp_high {
            ReasonCode::TemperatureHigh
        } else if temp <= t.temp_low {
            ReasonCode::TemperatureLow
        } else if hum >= t.humidity_high {
            ReasonCode::HumidityHigh
        } else if hum <= t.humidity_low {
            ReasonCode::HumidityLow
        } else if light > t.light_bright && temp > t.temp_warm {
            ReasonCode::BrightAndHot
        } else if light > t.light_medium && temp > t.ideal_min && temp <= t.ideal_max {
            ReasonCode::BrightIdeal
        } else if light <= t.light_medium {
            ReasonCode::Overcast
        } else {
            ReasonCode::Normal
        }
    }
}

impl Default for ClimateEngine {
    fn default() -> Self {
        Self::new(Thresholds::default(), PlacementTable::default())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
