//! Sensor sampling tasks. Each sensor family sits behind a small trait so
//! the simulated and hardware backends swap without touching the loops. A
//! failed read publishes the NAN sentinel for that cycle and the next tick
//! starts from scratch; there is no retry inside a cycle.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::state::StateStore;

// ---------------------------------------------------------------------------
// Sensor traits
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct Climate {
    pub temperature: f32,
    pub humidity: f32,
}

/// Combined temperature and humidity probe.
pub trait ClimateSensor {
    fn sample(&mut self) -> anyhow::Result<Climate>;
}

/// A single-channel analog input in the 12-bit domain (0..=4095).
pub trait AnalogSensor {
    fn sample(&mut self) -> anyhow::Result<u16>;
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Map a raw soil reading to percent moisture. The probe reads high when
/// dry: 4095 is 0 % and 0 is 100 %. Values outside the 12-bit domain clamp.
pub fn soil_percent(raw: u16) -> f32 {
    let pct = (4095.0 - f32::from(raw)) * 100.0 / 4095.0;
    pct.clamp(0.0, 100.0)
}

// ---------------------------------------------------------------------------
// Sampling cycles
// ---------------------------------------------------------------------------

async fn climate_cycle(store: &StateStore, sensor: &mut impl ClimateSensor) {
    match sensor.sample() {
        Ok(c) => store.set_climate(c.temperature, c.humidity).await,
        Err(e) => {
            warn!("climate: read failed, publishing sentinel: {e}");
            store.set_climate(f32::NAN, f32::NAN).await;
        }
    }
}

async fn soil_cycle(store: &StateStore, sensor: &mut impl AnalogSensor) {
    match sensor.sample() {
        Ok(raw) => store.set_soil(soil_percent(raw)).await,
        Err(e) => {
            warn!("soil: read failed, publishing sentinel: {e}");
            store.set_soil(f32::NAN).await;
        }
    }
}

async fn rain_cycle(store: &StateStore, sensor: &mut impl AnalogSensor) {
    match sensor.sample() {
        // Rain is reported as the raw analog level, no mapping.
        Ok(raw) => store.set_rain(f32::from(raw)).await,
        Err(e) => {
            warn!("rain: read failed, publishing sentinel: {e}");
            store.set_rain(f32::NAN).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Task loops
// ---------------------------------------------------------------------------

/// Climate sampling loop. Intended to be `tokio::spawn`-ed from main.
pub async fn climate_task(
    store: Arc<StateStore>,
    mut sensor: impl ClimateSensor + Send + 'static,
    period_ms: u64,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(period_ms));
    loop {
        ticker.tick().await;
        climate_cycle(&store, &mut sensor).await;
    }
}

/// Soil moisture sampling loop.
pub async fn soil_task(
    store: Arc<StateStore>,
    mut sensor: impl AnalogSensor + Send + 'static,
    period_ms: u64,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(period_ms));
    loop {
        ticker.tick().await;
        soil_cycle(&store, &mut sensor).await;
    }
}

/// Rain level sampling loop.
pub async fn rain_task(
    store: Arc<StateStore>,
    mut sensor: impl AnalogSensor + Send + 'static,
    period_ms: u64,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(period_ms));
    loop {
        ticker.tick().await;
        rain_cycle(&store, &mut sensor).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct FixedClimate(f32, f32);

    impl ClimateSensor for FixedClimate {
        fn sample(&mut self) -> anyhow::Result<Climate> {
            Ok(Climate {
                temperature: self.0,
                humidity: self.1,
            })
        }
    }

    struct FailingClimate;

    impl ClimateSensor for FailingClimate {
        fn sample(&mut self) -> anyhow::Result<Climate> {
            bail!("sensor timeout")
        }
    }

    struct FixedAnalog(u16);

    impl AnalogSensor for FixedAnalog {
        fn sample(&mut self) -> anyhow::Result<u16> {
            Ok(self.0)
        }
    }

    struct FailingAnalog;

    impl AnalogSensor for FailingAnalog {
        fn sample(&mut self) -> anyhow::Result<u16> {
            bail!("adc read failed")
        }
    }

    // -- Soil conversion ----------------------------------------------------

    #[test]
    fn soil_percent_endpoints() {
        assert_eq!(soil_percent(4095), 0.0);
        assert_eq!(soil_percent(0), 100.0);
    }

    #[test]
    fn soil_percent_midpoint() {
        assert!((soil_percent(2047) - 50.0).abs() < 0.05);
        assert!((soil_percent(2048) - 50.0).abs() < 0.05);
    }

    #[test]
    fn soil_percent_is_monotone_decreasing() {
        assert!(soil_percent(1000) > soil_percent(3000));
    }

    #[test]
    fn soil_percent_clamps_out_of_domain_values() {
        assert_eq!(soil_percent(5000), 0.0);
        assert_eq!(soil_percent(u16::MAX), 0.0);
    }

    // -- Cycles -------------------------------------------------------------

    #[tokio::test]
    async fn climate_cycle_publishes_reading() {
        let store = StateStore::new();
        climate_cycle(&store, &mut FixedClimate(21.5, 48.0)).await;
        let snap = store.snapshot().await;
        assert_eq!(snap.sensors.temperature, 21.5);
        assert_eq!(snap.sensors.humidity, 48.0);
    }

    #[tokio::test]
    async fn climate_cycle_failure_publishes_sentinel() {
        let store = StateStore::new();
        climate_cycle(&store, &mut FixedClimate(21.5, 48.0)).await;
        climate_cycle(&store, &mut FailingClimate).await;
        let snap = store.snapshot().await;
        assert!(snap.sensors.temperature.is_nan());
        assert!(snap.sensors.humidity.is_nan());
    }

    #[tokio::test]
    async fn soil_cycle_converts_raw_to_percent() {
        let store = StateStore::new();
        soil_cycle(&store, &mut FixedAnalog(4095)).await;
        assert_eq!(store.snapshot().await.sensors.soil_pct, 0.0);
        soil_cycle(&store, &mut FixedAnalog(0)).await;
        assert_eq!(store.snapshot().await.sensors.soil_pct, 100.0);
    }

    #[tokio::test]
    async fn soil_cycle_failure_leaves_other_fields_alone() {
        let store = StateStore::new();
        store.set_climate(20.0, 40.0).await;
        soil_cycle(&store, &mut FailingAnalog).await;
        let snap = store.snapshot().await;
        assert!(snap.sensors.soil_pct.is_nan());
        assert_eq!(snap.sensors.temperature, 20.0);
    }

    #[tokio::test]
    async fn rain_cycle_passes_raw_level_through() {
        let store = StateStore::new();
        rain_cycle(&store, &mut FixedAnalog(1523)).await;
        assert_eq!(store.snapshot().await.sensors.rain_level, 1523.0);
    }

    #[tokio::test]
    async fn recovery_replaces_the_sentinel() {
        let store = StateStore::new();
        soil_cycle(&store, &mut FailingAnalog).await;
        assert!(store.snapshot().await.sensors.soil_pct.is_nan());
        soil_cycle(&store, &mut FixedAnalog(2047)).await;
        assert!(!store.snapshot().await.sensors.soil_pct.is_nan());
    }
}
