//! Shared controller state. A single exclusive lock guards the sensor
//! snapshot and pump state; every method takes the lock for a short copy or
//! merge and releases it before the caller does any I/O or logging.

use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Latest value from every sensor path. `f32::NAN` marks a reading that is
/// missing or failed; `total_ml` starts at zero and never decreases.
#[derive(Clone, Copy, Debug)]
pub struct SensorSnapshot {
    pub temperature: f32,
    pub humidity: f32,
    pub soil_pct: f32,
    pub rain_level: f32,
    pub total_ml: f32,
}

impl Default for SensorSnapshot {
    fn default() -> Self {
        Self {
            temperature: f32::NAN,
            humidity: f32::NAN,
            soil_pct: f32::NAN,
            rain_level: f32::NAN,
            total_ml: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PumpStatus {
    #[default]
    Idle,
    Running,
}

impl fmt::Display for PumpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpStatus::Idle => write!(f, "idle"),
            PumpStatus::Running => write!(f, "running"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PumpMode {
    #[default]
    Manual,
    Automatic,
}

impl PumpMode {
    /// Binary wire mapping: 1 selects automatic, any other byte falls back
    /// to manual.
    pub fn from_wire(byte: u8) -> Self {
        if byte == 1 {
            PumpMode::Automatic
        } else {
            PumpMode::Manual
        }
    }

    /// JSON label mapping: the string "automatic" selects automatic,
    /// anything else (including absence) falls back to manual.
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some("automatic") => PumpMode::Automatic,
            _ => PumpMode::Manual,
        }
    }
}

impl fmt::Display for PumpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpMode::Manual => write!(f, "manual"),
            PumpMode::Automatic => write!(f, "automatic"),
        }
    }
}

/// Invariant: `started_at.is_some()` exactly when `status` is `Running`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PumpState {
    pub status: PumpStatus,
    pub mode: PumpMode,
    pub started_at: Option<Instant>,
    pub requested_duration: Option<Duration>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ControllerState {
    pub sensors: SensorSnapshot,
    pub pump: PumpState,
    pub broker_connected: bool,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Owner of the data lock. Construction cannot fail, so the store exists
/// before any task that touches it is spawned.
#[derive(Default)]
pub struct StateStore {
    inner: Mutex<ControllerState>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full consistent copy of the controller state.
    pub async fn snapshot(&self) -> ControllerState {
        *self.inner.lock().await
    }

    pub async fn set_climate(&self, temperature: f32, humidity: f32) {
        let mut s = self.inner.lock().await;
        s.sensors.temperature = temperature;
        s.sensors.humidity = humidity;
    }

    pub async fn set_soil(&self, pct: f32) {
        self.inner.lock().await.sensors.soil_pct = pct;
    }

    pub async fn set_rain(&self, level: f32) {
        self.inner.lock().await.sensors.rain_level = level;
    }

    /// Credit drained flow volume, but only while the pump is running. The
    /// status check and the addition happen under one lock so a stop cannot
    /// slip in between them. Returns whether the volume was applied.
    pub async fn add_volume_if_running(&self, ml: f32) -> bool {
        let mut s = self.inner.lock().await;
        if s.pump.status == PumpStatus::Running {
            s.sensors.total_ml += ml;
            true
        } else {
            false
        }
    }

    /// Transition to `Running`. A start while already running restarts the
    /// cycle: the new mode and duration replace the old ones (latest wins).
    /// Returns the status the pump had before the call.
    pub async fn pump_start(&self, mode: PumpMode, duration: Duration) -> PumpStatus {
        let mut s = self.inner.lock().await;
        let prev = s.pump.status;
        s.pump.status = PumpStatus::Running;
        s.pump.mode = mode;
        s.pump.started_at = Some(Instant::now());
        s.pump.requested_duration = Some(duration);
        prev
    }

    /// Transition to `Idle`. Returns the measured run time, or `None` when
    /// the pump was already idle (stop is an accepted no-op then).
    pub async fn pump_stop(&self) -> Option<Duration> {
        let mut s = self.inner.lock().await;
        let ran = s.pump.started_at.take().map(|t| t.elapsed());
        s.pump.status = PumpStatus::Idle;
        s.pump.requested_duration = None;
        ran
    }

    /// Mode can change in either pump state.
    pub async fn set_pump_mode(&self, mode: PumpMode) {
        self.inner.lock().await.pump.mode = mode;
    }

    pub async fn set_broker_connected(&self, connected: bool) {
        self.inner.lock().await.broker_connected = connected;
    }

    pub async fn pump_running(&self) -> bool {
        self.inner.lock().await.pump.status == PumpStatus::Running
    }
}

// ===========================================================================
// Tests
// ===========================================================================
