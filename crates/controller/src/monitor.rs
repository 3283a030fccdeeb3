//! Periodic local status log. Reports the same readings telemetry sends,
//! but to the console, so a controller with no broker still shows what it
//! is doing. NAN sentinels are called out per sensor.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::state::{ControllerState, SensorSnapshot, StateStore};

/// Sensors whose current reading is the NAN sentinel. The climate sensor
/// supplies both temperature and humidity; either field being NAN flags it.
fn invalid_sensors(s: &SensorSnapshot) -> Vec<&'static str> {
    let mut out = Vec::new();
    if s.temperature.is_nan() || s.humidity.is_nan() {
        out.push("climate");
    }
    if s.soil_pct.is_nan() {
        out.push("soil");
    }
    if s.rain_level.is_nan() {
        out.push("rain");
    }
    out
}

fn report(snap: &ControllerState) {
    for sensor in invalid_sensors(&snap.sensors) {
        warn!("monitor: {sensor} sensor disconnected or failing");
    }

    info!(
        temp = format!("{:.2}", snap.sensors.temperature),
        hum = format!("{:.2}", snap.sensors.humidity),
        soil = format!("{:.2}", snap.sensors.soil_pct),
        rain = format!("{:.2}", snap.sensors.rain_level),
        water_ml = format!("{:.2}", snap.sensors.total_ml),
        pump = %snap.pump.status,
        mode = %snap.pump.mode,
        broker = snap.broker_connected,
        "monitor: status"
    );
}

/// Status loop. The snapshot is taken first and logged after it, so the
/// data lock is never held across console output.
pub async fn monitor_task(store: Arc<StateStore>, period_ms: u64) {
    let mut ticker = tokio::time::interval(Duration::from_millis(period_ms));
    loop {
        ticker.tick().await;
        let snap = store.snapshot().await;
        report(&snap);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
