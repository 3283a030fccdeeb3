//! Telemetry publishing. Every cycle takes one consistent snapshot,
//! sanitizes NAN sentinels to zero and publishes the five readings as
//! 2-decimal strings. Cycles that find the broker offline are dropped,
//! never queued. A SHA-256 digest of the sanitized values goes to the
//! debug log as a correlation aid for the remote end.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error};

use crate::state::{SensorSnapshot, StateStore};

/// Outbound sensor topic.
pub const TOPIC_TELEMETRY: &str = "device/sensor/data";

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Wire payload. Consumers parse the values from strings, so the format
/// is pinned to two fractional digits.
#[derive(Debug, Serialize)]
pub struct TelemetryPayload {
    temp: String,
    hum: String,
    soil: String,
    rain: String,
    water_ml: String,
}

/// Replace NAN sentinels with 0.0 across all fields.
pub fn sanitized(mut s: SensorSnapshot) -> SensorSnapshot {
    for v in [
        &mut s.temperature,
        &mut s.humidity,
        &mut s.soil_pct,
        &mut s.rain_level,
        &mut s.total_ml,
    ] {
        if v.is_nan() {
            *v = 0.0;
        }
    }
    s
}

pub fn build_payload(s: &SensorSnapshot) -> TelemetryPayload {
    TelemetryPayload {
        temp: format!("{:.2}", s.temperature),
        hum: format!("{:.2}", s.humidity),
        soil: format!("{:.2}", s.soil_pct),
        rain: format!("{:.2}", s.rain_level),
        water_ml: format!("{:.2}", s.total_ml),
    }
}

// ---------------------------------------------------------------------------
// Diagnostic digest
// ---------------------------------------------------------------------------

/// SHA-256 over the five readings as little-endian f32 bytes, in the fixed
/// order temperature, humidity, soil, total volume, rain. The remote end
/// computes the same digest to spot transport-level corruption.
pub fn telemetry_digest(s: &SensorSnapshot) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(s.temperature.to_le_bytes());
    hasher.update(s.humidity.to_le_bytes());
    hasher.update(s.soil_pct.to_le_bytes());
    hasher.update(s.total_ml.to_le_bytes());
    hasher.update(s.rain_level.to_le_bytes());
    hasher.finalize().into()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Publish cycle
// ---------------------------------------------------------------------------

/// One publish cycle. A cycle that finds the broker offline publishes
/// nothing; the next tick starts over with fresh data. Returns whether a
/// payload was handed to the mqtt client.
async fn telemetry_cycle(store: &StateStore, mqtt: &AsyncClient) -> bool {
    let snap = store.snapshot().await;
    if !snap.broker_connected {
        debug!("telemetry: broker offline, skipping publish");
        return false;
    }

    let clean = sanitized(snap.sensors);
    debug!(
        digest = hex(&telemetry_digest(&clean)),
        "telemetry: snapshot digest"
    );

    let body = match serde_json::to_vec(&build_payload(&clean)) {
        Ok(b) => b,
        Err(e) => {
            error!("telemetry: payload serialization failed: {e}");
            return false;
        }
    };

    match mqtt
        .publish(TOPIC_TELEMETRY, QoS::AtLeastOnce, false, body)
        .await
    {
        Ok(()) => true,
        Err(e) => {
            error!("telemetry: publish failed: {e}");
            false
        }
    }
}

/// Telemetry loop. Interval-driven, so a slow cycle does not shift the
/// ones after it.
pub async fn telemetry_task(store: Arc<StateStore>, mqtt: AsyncClient, period_ms: u64) {
    let mut ticker = tokio::time::interval(Duration::from_millis(period_ms));
    loop {
        ticker.tick().await;
        telemetry_cycle(&store, &mqtt).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
