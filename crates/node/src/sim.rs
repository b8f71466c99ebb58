//! Simulated greenhouse for development without sensors attached.
//!
//! Models the physics the roof actually influences:
//! - Day/night light cycle on a compressed clock
//! - Solar heating, reduced when the roof is open
//! - Heat and moisture exchange with the outside, faster when the roof is open
//! - Plant transpiration raising humidity during the day
//! - Per-reading noise, occasional spikes and (flaky profile) failed reads
//!
//! The roof angle is fed back through `SensorReader::observe_roof`, so the
//! control loop sees the consequences of its own decisions.

use std::f64::consts::PI;
use std::fmt;

use crate::error::SensorError;
use crate::sensor::{Reading, SensorReader};

/// Full-scale light value (12-bit ADC).
const LIGHT_MAX: f64 = 4095.0;

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `[sensors] scenario`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Mild day, readings mostly inside the ideal band.
    Temperate,
    /// Hot, dry and very bright. Exercises the high-temperature rules.
    Heatwave,
    /// Overcast and damp. Exercises the humidity and overcast rules.
    Humid,
    /// Temperate climate behind a failing sensor: noise, spikes and
    /// roughly one read in twelve failing outright.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "heatwave" => Self::Heatwave,
            "humid" => Self::Humid,
            "flaky" => Self::Flaky,
            _ => Self::Temperate,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temperate => write!(f, "temperate"),
            Self::Heatwave => write!(f, "heatwave"),
            Self::Humid => write!(f, "humid"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

struct Profile {
    outside_temp: f64,
    outside_humidity: f64,
    start_temp: f64,
    start_humidity: f64,
    solar_gain: f64,
    peak_light: f64,
    noise: f64,
    spike_prob: f64,
    failure_prob: f64,
}

impl Profile {
    fn of(scenario: Scenario) -> Self {
        let temperate = Profile {
            outside_temp: 22.0,
            outside_humidity: 60.0,
            start_temp: 24.0,
            start_humidity: 60.0,
            solar_gain: 1.0,
            peak_light: 1100.0,
            noise: 0.1,
            spike_prob: 0.005,
            failure_prob: 0.0,
        };
        match scenario {
            Scenario::Temperate => temperate,
            Scenario::Heatwave => Profile {
                outside_temp: 34.0,
                outside_humidity: 35.0,
                start_temp: 33.0,
                start_humidity: 45.0,
                solar_gain: 1.6,
                peak_light: 1800.0,
                ..temperate
            },
            Scenario::Humid => Profile {
                outside_temp: 20.0,
                outside_humidity: 90.0,
                start_temp: 21.0,
                start_humidity: 85.0,
                solar_gain: 0.6,
                peak_light: 500.0,
                ..temperate
            },
            Scenario::Flaky => Profile {
                noise: 0.6,
                spike_prob: 0.05,
                failure_prob: 0.08,
                ..temperate
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct GreenhouseSim {
    rng: fastrand::Rng,
    profile: Profile,

    temperature: f64,
    humidity: f64,
    /// Roof opening, 0.0 (closed) to 1.0 (fully open).
    openness: f64,

    clock_s: f64,
    step_s: f64,
    day_length_s: f64,
}

impl GreenhouseSim {
    /// `seed` makes the run reproducible; `None` seeds from the OS.
    pub fn new(scenario: Scenario, seed: Option<u64>) -> Self {
        let profile = Profile::of(scenario);
        Self {
            rng: seed.map(fastrand::Rng::with_seed).unwrap_or_default(),
            temperature: profile.start_temp,
            humidity: profile.start_humidity,
            profile,
            openness: 160.0 / 180.0,
            clock_s: 0.0,
            step_s: 1.0,
            day_length_s: 600.0,
        }
    }

    /// Length of one simulated day in simulated seconds (default 600).
    pub fn with_day_length(mut self, secs: f64) -> Self {
        self.day_length_s = secs.max(1.0);
        self
    }

    /// Approximate N(mean, sigma) via Irwin-Hall: 12 uniforms minus 6.
    fn gaussian(&mut self, mean: f64, sigma: f64) -> f64 {
        let sum: f64 = (0..12).map(|_| self.rng.f64()).sum();
        mean + sigma * (sum - 6.0)
    }

    /// Sun intensity 0..1; the clock starts an eighth of a day after sunrise.
    fn sun(&self) -> f64 {
        let phase = 2.0 * PI * (self.clock_s / self.day_length_s + 0.125);
        phase.sin().max(0.0)
    }

    /// Advance the true climate by one step.
    fn evolve(&mut self) {
        self.clock_s += self.step_s;
        let sun = self.sun();
        let p = &self.profile;

        let heating = 0.05 * p.solar_gain * sun * (1.0 - 0.6 * self.openness);
        let exchange = (0.01 + 0.05 * self.openness) * (self.temperature - p.outside_temp);
        let temperature = self.temperature + heating - exchange;

        let transpiration = 0.2 * sun;
        let venting = (0.005 + 0.05 * self.openness) * (self.humidity - p.outside_humidity);
        let humidity = (self.humidity + transpiration - venting).clamp(5.0, 100.0);

        self.temperature = temperature + self.gaussian(0.0, 0.03);
        self.humidity = humidity;
    }

    /// One noisy sample of the current climate.
    pub fn sample(&mut self) -> Result<Reading, SensorError> {
        self.evolve();

        if self.rng.f64() < self.profile.failure_prob {
            return Err(SensorError::ReadFailed {
                sensor: "sim",
                detail: "simulated bus timeout".to_string(),
            });
        }

        let noise = self.profile.noise;
        let spike = if self.rng.f64() < self.profile.spike_prob {
            self.gaussian(0.0, 8.0)
        } else {
            0.0
        };

        let temperature = self.temperature + self.gaussian(0.0, noise) + spike;
        let humidity = (self.humidity + self.gaussian(0.0, noise * 2.0)).clamp(0.0, 100.0);
        let light_true = self.profile.peak_light * self.sun() + 30.0;
        let light = (light_true + self.gaussian(0.0, 15.0)).clamp(0.0, LIGHT_MAX);

        Ok(Reading::new(
            temperature as f32,
            humidity as f32,
            light.round() as f32,
        ))
    }
}

impl SensorReader for GreenhouseSim {
    fn read(&mut self) -> Result<Reading, SensorError> {
        self.sample()
    }

    fn observe_roof(&mut self, angle: u8) {
        self.openness = f64::from(angle.min(180)) / 180.0;
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climate::{ClimateEngine, ReasonCode};

    fn run(sim: &mut GreenhouseSim, n: usize) -> Vec<Reading> {
        (0..n).filter_map(|_| sim.sample().ok()).collect()
    }

    #[test]
    fn readings_within_physical_range() {
        let mut sim = GreenhouseSim::new(Scenario::Heatwave, Some(7));
        for r in run(&mut sim, 2000) {
            assert!((0.0..=100.0).contains(&r.humidity), "humidity {}", r.humidity);
            assert!((0.0..=4095.0).contains(&r.light), "light {}", r.light);
            assert!(r.is_plausible());
        }
    }

    #[test]
    fn same_seed_same_run() {
        let a = run(&mut GreenhouseSim::new(Scenario::Flaky, Some(42)), 100);
        let b = run(&mut GreenhouseSim::new(Scenario::Flaky, Some(42)), 100);
        let temps = |v: &[Reading]| v.iter().map(|r| r.temperature).collect::<Vec<_>>();
        assert_eq!(temps(&a), temps(&b));
    }

    #[test]
    fn closed_roof_runs_hotter() {
        let mut closed = GreenhouseSim::new(Scenario::Temperate, Some(1));
        let mut open = GreenhouseSim::new(Scenario::Temperate, Some(1));
        closed.observe_roof(0);
        open.observe_roof(180);
        run(&mut closed, 120);
        run(&mut open, 120);
        assert!(
            closed.temperature > open.temperature,
            "closed={:.1} open={:.1}",
            closed.temperature,
            open.temperature
        );
    }

    #[test]
    fn open_roof_vents_humidity() {
        let mut closed = GreenhouseSim::new(Scenario::Temperate, Some(3));
        let mut open = GreenhouseSim::new(Scenario::Temperate, Some(3));
        closed.observe_roof(0);
        open.observe_roof(180);
        run(&mut closed, 120);
        run(&mut open, 120);
        assert!(closed.humidity > open.humidity);
    }

    #[test]
    fn light_follows_day_night_cycle() {
        let mut sim = GreenhouseSim::new(Scenario::Temperate, Some(5)).with_day_length(100.0);
        let readings = run(&mut sim, 100);
        let max = readings.iter().map(|r| r.light).fold(0.0, f32::max);
        let min = readings.iter().map(|r| r.light).fold(f32::MAX, f32::min);
        assert!(max > 900.0, "no daylight: max={max}");
        assert!(min < 150.0, "no night: min={min}");
    }

    #[test]
    fn flaky_scenario_fails_some_reads() {
        let mut sim = GreenhouseSim::new(Scenario::Flaky, Some(11));
        let failures = (0..500).filter(|_| sim.sample().is_err()).count();
        assert!(failures > 10, "expected failed reads, got {failures}");

        let mut sim = GreenhouseSim::new(Scenario::Temperate, Some(11));
        assert!((0..500).all(|_| sim.sample().is_ok()));
    }

    #[test]
    fn heatwave_starts_too_hot() {
        let mut sim = GreenhouseSim::new(Scenario::Heatwave, Some(2));
        let engine = ClimateEngine::default();
        let hot = run(&mut sim, 20)
            .iter()
            .filter(|r| engine.decide(Some(r)).reason == ReasonCode::TemperatureHigh)
            .count();
        assert!(hot > 10, "only {hot} of 20 readings were too hot");
    }

    #[test]
    fn humid_starts_above_humidity_threshold() {
        let mut sim = GreenhouseSim::new(Scenario::Humid, Some(4));
        let r = sim.sample().unwrap();
        assert!(r.humidity >= 80.0, "humidity {}", r.humidity);
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("HEATWAVE"), Scenario::Heatwave);
        assert_eq!(Scenario::from_str_lossy("humid"), Scenario::Humid);
        assert_eq!(Scenario::from_str_lossy("Flaky"), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy("temperate"), Scenario::Temperate);
        assert_eq!(Scenario::from_str_lossy(""), Scenario::Temperate);
    }

    #[test]
    fn scenario_display() {
        assert_eq!(Scenario::Heatwave.to_string(), "heatwave");
        assert_eq!(Scenario::Flaky.to_string(), "flaky");
    }
}
