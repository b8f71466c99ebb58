//! Roof actuation. Two servos move in opposition; the secondary angle is
//! always derived from the primary so the pair cannot drift apart.
//!
//! The `hw` feature gates the rppal software-PWM driver; without it a mock
//! servo pair logs the pulse widths it would have written.

use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

#[cfg(feature = "hw")]
use rppal::gpio::{Gpio, OutputPin};

use crate::climate::{RoofTarget, MAX_ANGLE};
use crate::error::ActuatorFault;
use crate::state::SharedStatus;

/// Standard hobby-servo frame: 50 Hz.
const SERVO_PERIOD: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServoSettings {
    pub primary_pin: u8,
    pub secondary_pin: u8,
    pub min_pulse_us: u64,
    pub max_pulse_us: u64,
}

impl Default for ServoSettings {
    fn default() -> Self {
        Self {
            primary_pin: 13,
            secondary_pin: 12,
            min_pulse_us: 500,
            max_pulse_us: 2400,
        }
    }
}

/// Linear angle -> pulse-width mapping over `[min_us, max_us]`.
pub fn pulse_width(angle: u8, min_us: u64, max_us: u64) -> Duration {
    let angle = u64::from(angle.min(MAX_ANGLE));
    let span = max_us.saturating_sub(min_us);
    Duration::from_micros(min_us + span * angle / u64::from(MAX_ANGLE))
}

/// The complementary position of the mirrored servo.
pub fn mirror(primary: u8) -> u8 {
    MAX_ANGLE - primary.min(MAX_ANGLE)
}

/// Hardware seam for the servo pair.
pub trait RoofDrive: Send {
    fn write(&mut self, primary: u8, secondary: u8) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Real servo pair (production: requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "hw")]
pub struct ServoPair {
    primary: OutputPin,
    secondary: OutputPin,
    settings: ServoSettings,
}

#[cfg(feature = "hw")]
impl ServoPair {
    pub fn new(settings: &ServoSettings) -> Result<Self> {
        let gpio = Gpio::new()?;
        let primary = gpio.get(settings.primary_pin)?.into_output_low();
        let secondary = gpio.get(settings.secondary_pin)?.into_output_low();
        info!(
            primary = settings.primary_pin,
            secondary = settings.secondary_pin,
            "servo pair initialised"
        );
        Ok(Self {
            primary,
            secondary,
            settings: settings.clone(),
        })
    }
}

#[cfg(feature = "hw")]
impl RoofDrive for ServoPair {
    fn write(&mut self, primary: u8, secondary: u8) -> Result<()> {
        let s = &self.settings;
        self.primary
            .set_pwm(SERVO_PERIOD, pulse_width(primary, s.min_pulse_us, s.max_pulse_us))?;
        self.secondary
            .set_pwm(SERVO_PERIOD, pulse_width(secondary, s.min_pulse_us, s.max_pulse_us))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mock servo pair (development: no hardware, logs pulse widths)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "hw"))]
pub struct ServoPair {
    settings: ServoSettings,
    /// Last `(primary, secondary)` written.
    pub(crate) last: Option<(u8, u8)>,
}

#[cfg(not(feature = "hw"))]
impl ServoPair {
    pub fn new(settings: &ServoSettings) -> Result<Self> {
        info!(
            primary = settings.primary_pin,
            secondary = settings.secondary_pin,
            "[mock-servo] servo pair initialised (no hardware)"
        );
        Ok(Self {
            settings: settings.clone(),
            last: None,
        })
    }
}

#[cfg(not(feature = "hw"))]
impl RoofDrive for ServoPair {
    fn write(&mut self, primary: u8, secondary: u8) -> Result<()> {
        let s = &self.settings;
        debug!(
            primary,
            secondary,
            previous = ?self.last,
            primary_pulse = ?pulse_width(primary, s.min_pulse_us, s.max_pulse_us),
            secondary_pulse = ?pulse_width(secondary, s.min_pulse_us, s.max_pulse_us),
            period = ?SERVO_PERIOD,
            "[mock-servo] write"
        );
        self.last = Some((primary, secondary));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Owns the roof drive and the last physical position.
pub struct RoofActuator {
    drive: Box<dyn RoofDrive>,
    status: SharedStatus,
    position: Option<u8>,
}

impl RoofActuator {
    pub fn new(drive: Box<dyn RoofDrive>, status: SharedStatus) -> Self {
        Self {
            drive,
            status,
            position: None,
        }
    }

    /// Move to `target.angle` (clamped). Re-applying the current angle does
    /// not touch the drive but still refreshes the applied timestamp.
    pub async fn apply(&mut self, target: &RoofTarget) -> Result<u8, ActuatorFault> {
        let primary = target.angle.min(MAX_ANGLE);
        let secondary = mirror(primary);

        if self.position != Some(primary) {
            self.drive
                .write(primary, secondary)
                .map_err(|source| ActuatorFault {
                    angle: primary,
                    source,
                })?;
            debug!(
                primary,
                secondary,
                state = %target.state,
                reason = target.describe(),
                "roof moved"
            );
            self.position = Some(primary);
        }

        self.status.write().await.record_roof(primary, secondary);
        Ok(primary)
    }

    /// Last angle written to the drive, `None` before the first apply.
    pub fn position(&self) -> Option<u8> {
        self.position
    }
}

// ===========================================================================
// Tests
// ===========================================================================
