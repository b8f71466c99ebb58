//! Node configuration: one TOML file, every field defaulted, a handful of
//! environment overrides, and validation that reports every problem at once.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use crate::actuator::ServoSettings;
use crate::climate::{
    ClimateEngine, Placement, PlacementTable, ReasonCode, RoofState, Thresholds, MAX_ANGLE,
};
use crate::control::ControlSettings;
use crate::relay::RelaySettings;
use crate::remote::BackendSettings;
use crate::telemetry::SinkSettings;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device_id: String,
    pub control: ControlSettings,
    pub thresholds: Thresholds,
    /// Overrides for rows of the stock placement table.
    pub placements: Vec<Placement>,
    pub manual: ManualSettings,
    pub servo: ServoSettings,
    pub relay: RelaySettings,
    pub backend: BackendSettings,
    pub web: WebSettings,
    pub sensors: SensorSettings,
    pub sinks: Vec<SinkSettings>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: "greenhouse-1".to_string(),
            control: ControlSettings::default(),
            thresholds: Thresholds::default(),
            placements: Vec::new(),
            manual: ManualSettings::default(),
            servo: ServoSettings::default(),
            relay: RelaySettings::default(),
            backend: BackendSettings::default(),
            web: WebSettings::default(),
            sensors: SensorSettings::default(),
            sinks: vec![SinkSettings::Store { url: None }],
        }
    }
}

/// Roof angles for explicit OPEN/CLOSE commands in MANUAL mode.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManualSettings {
    pub open_angle: u8,
    pub close_angle: u8,
}

impl Default for ManualSettings {
    fn default() -> Self {
        Self {
            open_angle: 160,
            close_angle: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSettings {
    pub bind: String,
    pub port: u16,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    pub i2c_bus: u8,
    pub sht4x_address: u16,
    pub ads1115_address: u16,
    /// ADS1115 single-ended input the LDR divider is wired to (0-3).
    pub light_channel: u8,
    /// Simulator profile: temperate, heatwave, humid or flaky.
    pub scenario: String,
    /// Simulated seconds per day/night cycle.
    pub day_length_secs: f64,
    pub seed: Option<u64>,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            sht4x_address: 0x44,
            ads1115_address: 0x48,
            light_channel: 0,
            scenario: "temperate".to_string(),
            day_length_secs: 600.0,
            seed: None,
        }
    }
}

/// BCM GPIO pins on the 40-pin header available for general use.
const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

// ---------------------------------------------------------------------------
// Derived values
// ---------------------------------------------------------------------------

impl Config {
    /// Stock table, then `[[placements]]`, then the `[manual]` angles.
    pub fn placement_table(&self) -> PlacementTable {
        let mut rows = self.placements.clone();
        rows.push(Placement {
            reason: ReasonCode::ManualOpen,
            state: RoofState::Open,
            angle: self.manual.open_angle,
        });
        rows.push(Placement {
            reason: ReasonCode::ManualClose,
            state: RoofState::Closed,
            angle: self.manual.close_angle,
        });
        PlacementTable::with_overrides(&rows)
    }

    pub fn engine(&self) -> ClimateEngine {
        ClimateEngine::new(self.thresholds, self.placement_table())
    }

    /// Apply `BACKEND_URL`, `WEB_PORT` and `RELAY_ACTIVE_LOW`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var("BACKEND_URL") {
            self.backend.url = url;
        }
        if let Some(port) = var("WEB_PORT") {
            self.web.port = port
                .parse()
                .with_context(|| format!("WEB_PORT '{port}' is not a port number"))?;
        }
        if let Some(v) = var("RELAY_ACTIVE_LOW") {
            self.relay.active_low = v == "1" || v.eq_ignore_ascii_case("true");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate everything. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.device_id.trim().is_empty() {
            errors.push("device_id is empty".to_string());
        }
        self.validate_control(&mut errors);
        self.validate_thresholds(&mut errors);
        self.validate_placements(&mut errors);
        self.validate_hardware(&mut errors);
        self.validate_network(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_control(&self, errors: &mut Vec<String>) {
        if self.control.tick_ms == 0 {
            errors.push("control.tick_ms must be positive".to_string());
        }
        if self.control.publish_every_ticks == 0 {
            errors.push("control.publish_every_ticks must be positive".to_string());
        }
    }

    fn validate_thresholds(&self, errors: &mut Vec<String>) {
        let t = &self.thresholds;

        if t.temp_low >= t.temp_high {
            errors.push(format!(
                "thresholds: temp_low ({}) must be below temp_high ({})",
                t.temp_low, t.temp_high
            ));
        }
        for (name, v) in [("humidity_low", t.humidity_low), ("humidity_high", t.humidity_high)] {
            if !(0.0..=100.0).contains(&v) {
                errors.push(format!("thresholds: {name} {v} out of range [0, 100]"));
            }
        }
        if t.humidity_low >= t.humidity_high {
            errors.push(format!(
                "thresholds: humidity_low ({}) must be below humidity_high ({})",
                t.humidity_low, t.humidity_high
            ));
        }
        if t.light_medium > t.light_bright {
            errors.push(format!(
                "thresholds: light_medium ({}) must not exceed light_bright ({})",
                t.light_medium, t.light_bright
            ));
        }
        if t.light_medium < 0.0 {
            errors.push(format!("thresholds: light_medium {} is negative", t.light_medium));
        }
        if t.ideal_min >= t.ideal_max {
            errors.push(format!(
                "thresholds: ideal_min ({}) must be below ideal_max ({})",
                t.ideal_min, t.ideal_max
            ));
        }
    }

    fn validate_placements(&self, errors: &mut Vec<String>) {
        let mut seen: HashSet<ReasonCode> = HashSet::new();
        for p in &self.placements {
            if p.angle > MAX_ANGLE {
                errors.push(format!(
                    "placement '{}': angle {} exceeds {MAX_ANGLE}",
                    p.reason.describe(),
                    p.angle
                ));
            }
            if !seen.insert(p.reason) {
                errors.push(format!("placement '{}': duplicate reason", p.reason.describe()));
            }
        }
        if self.manual.open_angle > MAX_ANGLE {
            errors.push(format!(
                "manual.open_angle {} exceeds {MAX_ANGLE}",
                self.manual.open_angle
            ));
        }
        if self.manual.close_angle > MAX_ANGLE {
            errors.push(format!(
                "manual.close_angle {} exceeds {MAX_ANGLE}",
                self.manual.close_angle
            ));
        }
    }

    fn validate_hardware(&self, errors: &mut Vec<String>) {
        let mut seen_pins: HashSet<u8> = HashSet::new();
        for (name, pin) in [
            ("servo.primary_pin", self.servo.primary_pin),
            ("servo.secondary_pin", self.servo.secondary_pin),
            ("relay.gpio_pin", self.relay.gpio_pin),
        ] {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "{name} {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if !seen_pins.insert(pin) {
                errors.push(format!("{name} {pin} is already used"));
            }
        }

        if self.servo.min_pulse_us >= self.servo.max_pulse_us {
            errors.push(format!(
                "servo: min_pulse_us ({}) must be below max_pulse_us ({})",
                self.servo.min_pulse_us, self.servo.max_pulse_us
            ));
        }

        let r = &self.relay;
        if r.max_duration_secs == 0 {
            errors.push("relay.max_duration_secs must be positive".to_string());
        }
        if r.default_duration_secs == 0 || r.default_duration_secs > r.max_duration_secs {
            errors.push(format!(
                "relay.default_duration_secs {} outside 1..={}",
                r.default_duration_secs, r.max_duration_secs
            ));
        }

        if self.sensors.light_channel > 3 {
            errors.push(format!(
                "sensors.light_channel {} out of range [0, 3]",
                self.sensors.light_channel
            ));
        }
        if self.sensors.day_length_secs.is_nan() || self.sensors.day_length_secs < 1.0 {
            errors.push(format!(
                "sensors.day_length_secs must be at least 1, got {}",
                self.sensors.day_length_secs
            ));
        }
    }

    fn validate_network(&self, errors: &mut Vec<String>) {
        let b = &self.backend;
        if !(b.url.starts_with("http://") || b.url.starts_with("https://")) {
            errors.push(format!("backend.url '{}' must start with http:// or https://", b.url));
        }
        if b.timeout_secs == 0 {
            errors.push("backend.timeout_secs must be positive".to_string());
        }
        if b.poll_every_ticks == 0 {
            errors.push("backend.poll_every_ticks must be positive".to_string());
        }
        if self.web.port == 0 {
            errors.push("web.port must be non-zero".to_string());
        }

        for (i, s) in self.sinks.iter().enumerate() {
            match s {
                SinkSettings::Store { url: Some(url) } if url.trim().is_empty() => {
                    errors.push(format!("sinks[{i}] (store): url is empty"));
                }
                SinkSettings::Store { .. } => {}
                SinkSettings::Ubidots { url, token } => {
                    if url.trim().is_empty() {
                        errors.push(format!("sinks[{i}] (ubidots): url is empty"));
                    }
                    if token.trim().is_empty() {
                        errors.push(format!("sinks[{i}] (ubidots): token is empty"));
                    }
                }
                SinkSettings::Mqtt { host, port, .. } => {
                    if host.trim().is_empty() {
                        errors.push(format!("sinks[{i}] (mqtt): host is empty"));
                    }
                    if *port == 0 {
                        errors.push(format!("sinks[{i}] (mqtt): port must be non-zero"));
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse `path` (stock defaults if it does not exist), apply the
/// process environment, then validate.
pub fn load(path: &str) -> Result<Config> {
    let mut config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        toml::from_str::<Config>(&contents)
            .with_context(|| format!("failed to parse config: {path}"))?
    } else {
        info!(path, "no config file, using defaults");
        Config::default()
    };

    config.apply_env(|k| std::env::var(k).ok())?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
