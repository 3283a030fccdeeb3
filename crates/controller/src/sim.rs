//! Stateful sensor simulators for local development.
//!
//! Models enough realism to exercise the control paths:
//! - readings stay temporally coherent (random walk, pulled back to a mean)
//! - gradual soil drying drift
//! - per-reading electronic noise and occasional spikes
//! - rain showers that build up and decay
//! - injected read faults (flaky scenario) to exercise the sentinel path
//! - a pulse source that runs only while the pump does

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;

use crate::flow::PulseCounter;
use crate::sensor::{AnalogSensor, Climate, ClimateSensor};
use crate::state::StateStore;

/// How often the simulated flow sensor emits a pulse burst.
const PULSE_TICK_MS: u64 = 100;

// ---------------------------------------------------------------------------
// Gaussian noise
// ---------------------------------------------------------------------------

/// Irwin-Hall approximation of N(0,1): twelve uniforms minus six.
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

/// Draw from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Weather profiles for the whole sensor suite, picked at startup through
/// the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Mild weather, slow drying, no injected faults. Default.
    Normal,
    /// Hot and dry: fast soil drying, no rain showers. Good for watching
    /// watering cycles actually move the numbers.
    Drought,
    /// Frequent showers, wet soil, cool air.
    Rainy,
    /// High noise, spiky readings and injected read failures. Exercises the
    /// NAN sentinel and telemetry sanitization live.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "drought" => Self::Drought,
            "rainy" => Self::Rainy,
            "flaky" => Self::Flaky,
            _ => Self::Normal, // default
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Drought => write!(f, "drought"),
            Self::Rainy => write!(f, "rainy"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

// ---------------------------------------------------------------------------
// Climate
// ---------------------------------------------------------------------------

/// Simulated temperature and humidity probe.
pub struct ClimateSim {
    temperature: f64,
    humidity: f64,
    temp_center: f64,
    hum_center: f64,
    walk_sigma: f64,
    fault_prob: f32,
}

impl ClimateSim {
    pub fn new(scenario: Scenario) -> Self {
        // (temp_center, hum_center, walk_sigma, fault_prob)
        let (temp_center, hum_center, walk_sigma, fault_prob) = match scenario {
            Scenario::Normal => (21.0, 50.0, 0.06, 0.0_f32),
            Scenario::Drought => (33.0, 22.0, 0.08, 0.0),
            Scenario::Rainy => (16.0, 86.0, 0.05, 0.0),
            Scenario::Flaky => (21.0, 50.0, 0.30, 0.08),
        };
        Self {
            temperature: gaussian(temp_center, 1.5),
            humidity: gaussian(hum_center, 4.0).clamp(0.0, 100.0),
            temp_center,
            hum_center,
            walk_sigma,
            fault_prob,
        }
    }
}

impl ClimateSensor for ClimateSim {
    fn sample(&mut self) -> anyhow::Result<Climate> {
        if fastrand::f32() < self.fault_prob {
            bail!("simulated probe timeout");
        }

        // Mean reversion keeps the walk near the scenario's climate.
        self.temperature += 0.02 * (self.temp_center - self.temperature)
            + gaussian(0.0, self.walk_sigma);
        self.humidity = (self.humidity
            + 0.02 * (self.hum_center - self.humidity)
            + gaussian(0.0, self.walk_sigma * 4.0))
        .clamp(0.0, 100.0);

        Ok(Climate {
            temperature: self.temperature as f32,
            humidity: self.humidity as f32,
        })
    }
}

// ---------------------------------------------------------------------------
// Soil
// ---------------------------------------------------------------------------

/// Simulated capacitive soil probe in the 12-bit domain. High raw values
/// mean dry soil, so the drying drift is positive.
pub struct SoilSim {
    raw: f64,
    drift: f64,
    walk_sigma: f64,
    noise_sigma: f64,
    spike_prob: f32,
    spike_sigma: f64,
    fault_prob: f32,
}

impl SoilSim {
    pub fn new(scenario: Scenario) -> Self {
        // (start, drift, walk_sigma, noise_sigma, spike_prob, spike_sigma, fault_prob)
        let (start, drift, walk_sigma, noise_sigma, spike_prob, spike_sigma, fault_prob) =
            match scenario {
                Scenario::Normal => (2000.0, 1.5, 25.0, 12.0, 0.01_f32, 400.0, 0.0_f32),
                Scenario::Drought => (2600.0, 6.0, 30.0, 12.0, 0.01, 400.0, 0.0),
                Scenario::Rainy => (1100.0, 0.5, 20.0, 12.0, 0.01, 300.0, 0.0),
                Scenario::Flaky => (2000.0, 1.5, 90.0, 60.0, 0.10, 1200.0, 0.08),
            };
        Self {
            raw: gaussian(start, 120.0).clamp(0.0, 4095.0),
            drift,
            walk_sigma,
            noise_sigma,
            spike_prob,
            spike_sigma,
            fault_prob,
        }
    }
}

impl AnalogSensor for SoilSim {
    fn sample(&mut self) -> anyhow::Result<u16> {
        if fastrand::f32() < self.fault_prob {
            bail!("simulated adc fault");
        }

        self.raw = (self.raw + self.drift + gaussian(0.0, self.walk_sigma)).clamp(0.0, 4095.0);

        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, self.spike_sigma)
        } else {
            0.0
        };
        let reading = self.raw + gaussian(0.0, self.noise_sigma) + spike;

        Ok(reading.round().clamp(0.0, 4095.0) as u16)
    }
}

// ---------------------------------------------------------------------------
// Rain
// ---------------------------------------------------------------------------

/// Simulated analog rain gauge. Showers arrive at random, push the level
/// up and then drain away tick by tick.
pub struct RainSim {
    level: f64,
    shower_prob: f32,
    decay: f64,
    fault_prob: f32,
}

impl RainSim {
    pub fn new(scenario: Scenario) -> Self {
        // (shower_prob, decay, fault_prob)
        let (shower_prob, decay, fault_prob) = match scenario {
            Scenario::Normal => (0.01_f32, 0.97, 0.0_f32),
            Scenario::Drought => (0.0, 0.97, 0.0),
            Scenario::Rainy => (0.08, 0.985, 0.0),
            Scenario::Flaky => (0.01, 0.97, 0.08),
        };
        Self {
            level: 0.0,
            shower_prob,
            decay,
            fault_prob,
        }
    }
}

impl AnalogSensor for RainSim {
    fn sample(&mut self) -> anyhow::Result<u16> {
        if fastrand::f32() < self.fault_prob {
            bail!("simulated adc fault");
        }

        if fastrand::f32() < self.shower_prob {
            self.level = (self.level + 800.0 + fastrand::f64() * 1700.0).min(4095.0);
        }
        self.level *= self.decay;

        let reading = self.level + gaussian(0.0, 8.0);
        Ok(reading.round().clamp(0.0, 4095.0) as u16)
    }
}

// ---------------------------------------------------------------------------
// Flow pulses
// ---------------------------------------------------------------------------

/// Pulse source for the flow counter. Emits a plausible burst every tick
/// while the pump runs and stays quiet otherwise, like a real line with a
/// closed valve. Intended to be `tokio::spawn`-ed from main.
pub async fn pulse_feed(store: Arc<StateStore>, counter: Arc<PulseCounter>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(PULSE_TICK_MS));
    loop {
        ticker.tick().await;
        if store.pump_running().await {
            for _ in 0..fastrand::u64(7..=9) {
                counter.record();
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Collect n good readings, skipping injected faults.
    fn collect_analog(sim: &mut impl AnalogSensor, n: usize) -> Vec<u16> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            if let Ok(v) = sim.sample() {
                out.push(v);
            }
        }
        out
    }

    // -- Scenario parsing ---------------------------------------------------

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("normal"), Scenario::Normal);
        assert_eq!(Scenario::from_str_lossy("DROUGHT"), Scenario::Drought);
        assert_eq!(Scenario::from_str_lossy("Rainy"), Scenario::Rainy);
        assert_eq!(Scenario::from_str_lossy("flaky"), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy("unknown"), Scenario::Normal);
        assert_eq!(Scenario::from_str_lossy(""), Scenario::Normal);
    }

    #[test]
    fn scenario_display() {
        assert_eq!(Scenario::Normal.to_string(), "normal");
        assert_eq!(Scenario::Drought.to_string(), "drought");
        assert_eq!(Scenario::Rainy.to_string(), "rainy");
        assert_eq!(Scenario::Flaky.to_string(), "flaky");
    }

    // -- Climate ------------------------------------------------------------

    #[test]
    fn normal_climate_never_faults() {
        let mut sim = ClimateSim::new(Scenario::Normal);
        for _ in 0..500 {
            assert!(sim.sample().is_ok());
        }
    }

    #[test]
    fn normal_climate_stays_plausible() {
        let mut sim = ClimateSim::new(Scenario::Normal);
        for _ in 0..500 {
            let c = sim.sample().unwrap();
            assert!((-10.0..=50.0).contains(&c.temperature), "temp {}", c.temperature);
            assert!((0.0..=100.0).contains(&c.humidity), "hum {}", c.humidity);
        }
    }

    #[test]
    fn flaky_climate_faults_sometimes() {
        let mut sim = ClimateSim::new(Scenario::Flaky);
        let faults = (0..500).filter(|_| sim.sample().is_err()).count();
        // 8 % fault rate over 500 samples; zero faults is vanishingly rare.
        assert!(faults > 0, "expected injected faults");
    }

    // -- Soil ---------------------------------------------------------------

    #[test]
    fn soil_readings_stay_in_domain() {
        let mut sim = SoilSim::new(Scenario::Flaky);
        for v in collect_analog(&mut sim, 500) {
            assert!(v <= 4095, "reading out of domain: {v}");
        }
    }

    #[test]
    fn drought_dries_faster_than_normal() {
        fn settled_mean(scenario: Scenario) -> f64 {
            let mut sim = SoilSim::new(scenario);
            let samples = collect_analog(&mut sim, 300);
            samples[280..].iter().map(|&v| f64::from(v)).sum::<f64>() / 20.0
        }
        // Drought starts drier and dries four times faster; after 300 ticks
        // the gap dwarfs walk noise.
        assert!(settled_mean(Scenario::Drought) > settled_mean(Scenario::Normal));
    }

    #[test]
    fn normal_soil_is_temporally_coherent() {
        let mut sim = SoilSim::new(Scenario::Normal);
        let samples = collect_analog(&mut sim, 200);
        let max_jump = samples
            .windows(2)
            .map(|w| (i32::from(w[1]) - i32::from(w[0])).abs())
            .max()
            .unwrap();
        // Rare spikes allowed for, but nothing near the full domain width.
        assert!(max_jump < 2500, "max consecutive jump too large: {max_jump}");
    }

    // -- Rain ---------------------------------------------------------------

    #[test]
    fn rainy_scenario_sees_showers() {
        let mut sim = RainSim::new(Scenario::Rainy);
        let peak = collect_analog(&mut sim, 400).into_iter().max().unwrap();
        // 8 % shower chance per tick over 400 ticks; staying dry throughout
        // is practically impossible.
        assert!(peak > 500, "expected at least one shower, peak {peak}");
    }

    #[test]
    fn drought_scenario_stays_dry() {
        let mut sim = RainSim::new(Scenario::Drought);
        let peak = collect_analog(&mut sim, 400).into_iter().max().unwrap();
        assert!(peak < 100, "drought must not rain, peak {peak}");
    }
}
