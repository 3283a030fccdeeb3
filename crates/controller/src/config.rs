//! TOML config file loading and validation. Every section and field has a
//! default, so a missing file boots the sim profile with zero setup; an
//! unreadable or invalid file is still fatal.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::str::FromStr;

use crate::command::CommandCodec;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub pump: PumpConfig,
    pub flow: FlowConfig,
    pub adc: AdcConfig,
    pub climate: ClimateConfig,
    pub sampling: SamplingConfig,
    pub command: CommandConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 1883,
            client_id: "irrigation-controller".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    pub gpio_pin: i64,
    pub active_low: bool,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            gpio_pin: 17,
            active_low: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub gpio_pin: i64,
    /// Calibration factor of the flow sensor.
    pub ml_per_pulse: f32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            gpio_pin: 27,
            ml_per_pulse: 2.22,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AdcConfig {
    pub i2c_addr: u16,
    pub soil_channel: u8,
    pub rain_channel: u8,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            i2c_addr: 0x48,
            soil_channel: 0,
            rain_channel: 1,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ClimateConfig {
    pub i2c_addr: u16,
}

impl Default for ClimateConfig {
    fn default() -> Self {
        Self { i2c_addr: 0x44 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub climate_ms: u64,
    pub soil_ms: u64,
    pub rain_ms: u64,
    pub flow_drain_ms: u64,
    pub telemetry_ms: u64,
    pub monitor_ms: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            climate_ms: 2000,
            soil_ms: 2000,
            rain_ms: 2000,
            flow_drain_ms: 200,
            telemetry_ms: 5000,
            monitor_ms: 2000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// "binary" or "json"; which decoder handles inbound commands.
    pub codec: String,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            codec: "binary".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// General-purpose BCM pins on the Raspberry Pi 40-pin header. GPIO 0-1
/// belong to the ID EEPROM and GPIO 28+ are not brought out.
const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

/// Usable 7-bit I2C address range; below 0x08 and above 0x77 are reserved.
const I2C_ADDR_RANGE: std::ops::RangeInclusive<u16> = 0x08..=0x77;

/// Highest single-ended ADS1115 channel.
const MAX_ADC_CHANNEL: u8 = 3;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate the whole config. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_broker(&mut errors);
        self.validate_pins(&mut errors);
        self.validate_i2c(&mut errors);
        self.validate_sampling(&mut errors);
        self.validate_flow(&mut errors);
        self.validate_command(&mut errors);

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

    fn validate_broker(&self, errors: &mut Vec<String>) {
        if self.broker.host.trim().is_empty() {
            errors.push("broker.host is empty".into());
        }
        if self.broker.port == 0 {
            errors.push("broker.port must be nonzero".into());
        }
        if self.broker.client_id.trim().is_empty() {
            errors.push("broker.client_id is empty".into());
        }
    }

    fn validate_pins(&self, errors: &mut Vec<String>) {
        for (label, pin) in [
            ("pump.gpio_pin", self.pump.gpio_pin),
            ("flow.gpio_pin", self.flow.gpio_pin),
        ] {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "{label} {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            }
        }
        if self.pump.gpio_pin == self.flow.gpio_pin {
            errors.push(format!(
                "pump.gpio_pin and flow.gpio_pin are both {}",
                self.pump.gpio_pin
            ));
        }
    }

    fn validate_i2c(&self, errors: &mut Vec<String>) {
        for (label, addr) in [
            ("adc.i2c_addr", self.adc.i2c_addr),
            ("climate.i2c_addr", self.climate.i2c_addr),
        ] {
            if !I2C_ADDR_RANGE.contains(&addr) {
                errors.push(format!(
                    "{label} 0x{addr:02x} outside the usable 7-bit range [0x08, 0x77]"
                ));
            }
        }
        if self.adc.i2c_addr == self.climate.i2c_addr {
            errors.push(format!(
                "adc.i2c_addr and climate.i2c_addr are both 0x{:02x}",
                self.adc.i2c_addr
            ));
        }

        for (label, ch) in [
            ("adc.soil_channel", self.adc.soil_channel),
            ("adc.rain_channel", self.adc.rain_channel),
        ] {
            if ch > MAX_ADC_CHANNEL {
                errors.push(format!(
                    "{label} {ch} out of range (0-{MAX_ADC_CHANNEL})"
                ));
            }
        }
        if self.adc.soil_channel == self.adc.rain_channel {
            errors.push(format!(
                "adc.soil_channel and adc.rain_channel are both {}",
                self.adc.soil_channel
            ));
        }
    }

    fn validate_sampling(&self, errors: &mut Vec<String>) {
        for (label, period) in [
            ("climate_ms", self.sampling.climate_ms),
            ("soil_ms", self.sampling.soil_ms),
            ("rain_ms", self.sampling.rain_ms),
            ("flow_drain_ms", self.sampling.flow_drain_ms),
            ("telemetry_ms", self.sampling.telemetry_ms),
            ("monitor_ms", self.sampling.monitor_ms),
        ] {
            if period == 0 {
                errors.push(format!("sampling.{label} must be positive"));
            }
        }
    }

    fn validate_flow(&self, errors: &mut Vec<String>) {
        let factor = self.flow.ml_per_pulse;
        if !(factor.is_finite() && factor > 0.0) {
            errors.push(format!(
                "flow.ml_per_pulse must be a positive finite number, got {factor}"
            ));
        }
    }

    fn validate_command(&self, errors: &mut Vec<String>) {
        if let Err(e) = CommandCodec::from_str(&self.command.codec) {
            errors.push(format!("command.codec: {e}"));
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Load `path` when it exists, otherwise fall back to the built-in
/// defaults. An unreadable or invalid file still fails loudly.
pub fn load_or_default(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        load(path)
    } else {
        tracing::info!(path, "config file not found, using defaults");
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
