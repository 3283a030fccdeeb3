//! Pump actuation via a relay pin. The `gpio` feature gates the real rppal
//! driver; without it, a mock records the commanded state for tests and dry
//! runs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::state::{PumpMode, PumpStatus, StateStore};

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

// ---------------------------------------------------------------------------
// Real relay (production, requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct Relay {
    pin: OutputPin,
    active_low: bool, // most relay boards are active-low
}

#[cfg(feature = "gpio")]
impl Relay {
    pub fn new(pin_num: u8, active_low: bool) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pin = gpio.get(pin_num)?.into_output();

        // Fail-safe: pump OFF at startup
        if active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }

        Ok(Self { pin, active_low })
    }

    pub fn set(&mut self, on: bool) {
        let level_high = on != self.active_low;
        if level_high {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }

    pub fn is_on(&self) -> bool {
        self.pin.is_set_high() != self.active_low
    }
}

// ---------------------------------------------------------------------------
// Mock relay (development, no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct Relay {
    on: bool,
}

#[cfg(not(feature = "gpio"))]
impl Relay {
    pub fn new(pin_num: u8, _active_low: bool) -> Result<Self> {
        tracing::debug!(gpio = pin_num, "mock relay registered (not wired)");
        Ok(Self { on: false })
    }

    pub fn set(&mut self, on: bool) {
        self.on = on;
    }

    pub fn is_on(&self) -> bool {
        self.on
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Sole owner of the relay. Every transition goes through here, so the pin
/// and the store never disagree for longer than one call.
pub struct PumpController {
    relay: Relay,
    store: Arc<StateStore>,
}

impl PumpController {
    pub fn new(relay: Relay, store: Arc<StateStore>) -> Self {
        Self { relay, store }
    }

    /// Start, or restart when already running (latest request wins). The
    /// duration is advisory metadata: the controller never stops the pump
    /// on its own when it elapses, that decision stays with the sender.
    pub async fn start(&mut self, duration: Duration, mode: PumpMode) {
        self.relay.set(true);
        let prev = self.store.pump_start(mode, duration).await;
        match prev {
            PumpStatus::Idle => {
                info!(duration_s = duration.as_secs(), %mode, "pump: started")
            }
            PumpStatus::Running => info!(
                duration_s = duration.as_secs(),
                %mode,
                "pump: restarted, new request replaces the old one"
            ),
        }
    }

    /// Stop. De-asserts the relay even when the store already reads idle,
    /// so a stop command always leaves the hardware off.
    pub async fn stop(&mut self, reported_run: Duration) {
        self.relay.set(false);
        match self.store.pump_stop().await {
            Some(ran) => info!(
                reported_run_s = reported_run.as_secs(),
                measured_run_s = ran.as_secs(),
                "pump: stopped"
            ),
            None => info!(
                reported_run_s = reported_run.as_secs(),
                "pump: stop while idle, nothing to do"
            ),
        }
    }

    /// Mode changes are store-only and valid in either pump state.
    pub async fn set_mode(&mut self, mode: PumpMode) {
        self.store.set_pump_mode(mode).await;
        info!(%mode, "pump: mode set");
    }

    /// Relay line state as last commanded.
    pub fn relay_on(&self) -> bool {
        self.relay.is_on()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pump() -> (Arc<StateStore>, PumpController) {
        let store = Arc::new(StateStore::new());
        let relay = Relay::new(17, true).unwrap();
        let pump = PumpController::new(relay, store.clone());
        (store, pump)
    }

    // -- Relay --------------------------------------------------------------

    #[test]
    fn relay_starts_off() {
        let relay = Relay::new(17, true).unwrap();
        assert!(!relay.is_on());
    }

    #[test]
    fn relay_set_round_trip() {
        let mut relay = Relay::new(17, true).unwrap();
        relay.set(true);
        assert!(relay.is_on());
        relay.set(false);
        assert!(!relay.is_on());
    }

    // -- Start / stop -------------------------------------------------------

    #[tokio::test]
    async fn start_asserts_relay_and_store() {
        let (store, mut pump) = test_pump();
        pump.start(Duration::from_secs(10), PumpMode::Manual).await;

        assert!(pump.relay_on());
        let snap = store.snapshot().await;
        assert_eq!(snap.pump.status, PumpStatus::Running);
        assert_eq!(snap.pump.mode, PumpMode::Manual);
        assert_eq!(snap.pump.requested_duration, Some(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn restart_keeps_relay_on_and_replaces_request() {
        let (store, mut pump) = test_pump();
        pump.start(Duration::from_secs(10), PumpMode::Manual).await;
        pump.start(Duration::from_secs(120), PumpMode::Automatic)
            .await;

        assert!(pump.relay_on());
        let snap = store.snapshot().await;
        assert_eq!(snap.pump.status, PumpStatus::Running);
        assert_eq!(snap.pump.mode, PumpMode::Automatic);
        assert_eq!(snap.pump.requested_duration, Some(Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn stop_deasserts_relay_and_idles_store() {
        let (store, mut pump) = test_pump();
        pump.start(Duration::from_secs(10), PumpMode::Manual).await;
        pump.stop(Duration::from_secs(3)).await;

        assert!(!pump.relay_on());
        assert_eq!(store.snapshot().await.pump.status, PumpStatus::Idle);
    }

    #[tokio::test]
    async fn stop_while_idle_is_harmless() {
        let (store, mut pump) = test_pump();
        pump.stop(Duration::from_secs(0)).await;

        assert!(!pump.relay_on());
        assert_eq!(store.snapshot().await.pump.status, PumpStatus::Idle);
    }

    #[tokio::test]
    async fn set_mode_leaves_relay_alone() {
        let (store, mut pump) = test_pump();
        pump.set_mode(PumpMode::Automatic).await;

        assert!(!pump.relay_on());
        let snap = store.snapshot().await;
        assert_eq!(snap.pump.mode, PumpMode::Automatic);
        assert_eq!(snap.pump.status, PumpStatus::Idle);
    }
}
