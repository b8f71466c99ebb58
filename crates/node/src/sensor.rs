use serde::Serialize;
use time::OffsetDateTime;

use crate::error::SensorError;

/// One sample of the greenhouse climate, taken once per control tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    /// Degrees Celsius.
    pub temperature: f32,
    /// Relative humidity, percent.
    pub humidity: f32,
    /// Raw light level in ADC units (12-bit scale).
    pub light: f32,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
}

impl Reading {
    pub fn new(temperature: f32, humidity: f32, light: f32) -> Self {
        Self {
            temperature,
            humidity,
            light,
            captured_at: OffsetDateTime::now_utc(),
        }
    }

    /// False for values no working sensor can produce (NaN, negative light,
    /// humidity outside 0..=100).
    pub fn is_plausible(&self) -> bool {
        self.temperature.is_finite()
            && self.humidity.is_finite()
            && self.light.is_finite()
            && (0.0..=100.0).contains(&self.humidity)
            && self.light >= 0.0
    }
}

/// Source of climate readings. Implementations may block briefly on I/O.
pub trait SensorReader: Send {
    fn read(&mut self) -> Result<Reading, SensorError>;

    /// Feedback hook for simulated sensors: the roof angle just applied.
    fn observe_roof(&mut self, _angle: u8) {}
}

// ===========================================================================
// Tests
// ===========================================================================
