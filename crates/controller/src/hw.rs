//! Raspberry Pi hardware backends: SHT31 climate probe and ADS1115 analog
//! inputs over I2C, and the flow sensor pulse input via a GPIO interrupt.
//!
//! The ADS1115 runs single-ended at PGA ±4.096 V, 128 SPS, single-shot.
//! Both analog channels share one converter, so reads are serialized
//! through a bus lock; a conversion takes under 10 ms.

use std::sync::{Arc, Mutex};
use std::{thread, time::Duration};

use anyhow::{anyhow, Context, Result};
use rppal::gpio::{Gpio, InputPin, Trigger};
use rppal::i2c::I2c;

use crate::flow::PulseCounter;
use crate::sensor::{AnalogSensor, Climate, ClimateSensor};

// ── ADS1115 register addresses ──────────────────────────────────────────────

/// Read-only conversion result, 16-bit signed.
const REG_CONVERSION: u8 = 0x00;
/// Read/write configuration register.
const REG_CONFIG: u8 = 0x01;

// ── ADS1115 config register bit fields ──────────────────────────────────────
//
// Layout (MSB first):
//   [15]    OS:   write 1 to start a single-shot conversion
//   [14:12] MUX:  input multiplexer, selects the channel
//   [11:9]  PGA:  programmable gain amplifier
//   [8]     MODE: 0 continuous, 1 single-shot
//   [7:5]   DR:   data rate
//   [4:0]   comparator fields, disabled here

/// Bits common to every read: OS set, PGA 001 for ±4.096 V full scale,
/// single-shot mode, 128 SPS, comparator off.
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

/// Per-channel MUX codes, AINx measured against ground.
const MUX_SHIFT: u8 = 12;
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

/// Conversion time at 128 SPS is ~7.8 ms; wait 9 ms for margin.
const CONVERSION_WAIT: Duration = Duration::from_millis(9);

/// Bit 15 of the config register reads back as conversion-ready.
const OS_READY_BIT: u16 = 1 << 15;

/// A single-ended conversion spans 0..=32767; shifting out the low three
/// bits lands it in the controller's 12-bit domain (0..=4095).
const RESULT_SHIFT: u8 = 3;

/// Config word that kicks off a single-ended read of `channel`.
fn config_for_channel(channel: u8) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[usize::from(channel) & 3] << MUX_SHIFT)
}

/// Scale a raw conversion into the 12-bit domain. Negative values are bus
/// noise on a single-ended input and clamp to zero.
fn scale_result(raw: i16) -> u16 {
    (raw.max(0) as u16) >> RESULT_SHIFT
}

// ── ADS1115 driver ──────────────────────────────────────────────────────────

/// ADS1115 bus protocol. Shared between the per-channel inputs through a
/// lock, since the converter handles one conversion at a time.
pub struct Ads1115 {
    i2c: I2c,
}

impl Ads1115 {
    /// Open I2C bus 1 and address the converter.
    pub fn new(addr: u16) -> Result<Self> {
        let mut i2c = I2c::new().context("opening i2c bus for ads1115")?;
        i2c.set_slave_address(addr)?;
        tracing::info!(addr = format_args!("0x{addr:02x}"), "ads1115 initialised");
        Ok(Self { i2c })
    }

    /// Single-shot read on `channel`, scaled to the 12-bit domain.
    fn read_channel(&mut self, channel: u8) -> Result<u16> {
        let config_bytes = config_for_channel(channel).to_be_bytes();
        self.i2c.block_write(REG_CONFIG, &config_bytes)?;

        thread::sleep(CONVERSION_WAIT);

        // One wait normally suffices at 128 SPS; poll briefly to be sure.
        for _ in 0..3 {
            let mut buf = [0u8; 2];
            self.i2c.block_read(REG_CONFIG, &mut buf)?;
            if u16::from_be_bytes(buf) & OS_READY_BIT != 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let mut buf = [0u8; 2];
        self.i2c.block_read(REG_CONVERSION, &mut buf)?;
        Ok(scale_result(i16::from_be_bytes(buf)))
    }
}

/// One ADS1115 channel presented as an analog sensor.
pub struct AdsInput {
    bus: Arc<Mutex<Ads1115>>,
    channel: u8,
}

impl AdsInput {
    pub fn new(bus: Arc<Mutex<Ads1115>>, channel: u8) -> Self {
        Self { bus, channel }
    }
}

impl AnalogSensor for AdsInput {
    fn sample(&mut self) -> Result<u16> {
        let mut bus = self
            .bus
            .lock()
            .map_err(|_| anyhow!("ads1115 bus lock poisoned"))?;
        bus.read_channel(self.channel)
    }
}

// ── SHT31 climate probe ─────────────────────────────────────────────────────

/// Single-shot measurement, high repeatability, clock stretching disabled.
const SHT31_MEASURE: [u8; 2] = [0x24, 0x00];
/// A high-repeatability conversion takes up to 15 ms.
const SHT31_MEASURE_WAIT: Duration = Duration::from_millis(16);

/// SHT3x CRC-8: polynomial 0x31, init 0xFF, no final XOR.
fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0xFF_u8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn convert_temperature(raw: u16) -> f32 {
    -45.0 + 175.0 * f32::from(raw) / 65535.0
}

fn convert_humidity(raw: u16) -> f32 {
    100.0 * f32::from(raw) / 65535.0
}

/// SHT31 driver backed by `rppal::i2c`.
pub struct Sht31 {
    i2c: I2c,
}

impl Sht31 {
    pub fn new(addr: u16) -> Result<Self> {
        let mut i2c = I2c::new().context("opening i2c bus for sht31")?;
        i2c.set_slave_address(addr)?;
        tracing::info!(addr = format_args!("0x{addr:02x}"), "sht31 initialised");
        Ok(Self { i2c })
    }
}

impl ClimateSensor for Sht31 {
    fn sample(&mut self) -> Result<Climate> {
        self.i2c.write(&SHT31_MEASURE)?;
        thread::sleep(SHT31_MEASURE_WAIT);

        // [temp_hi, temp_lo, temp_crc, hum_hi, hum_lo, hum_crc]
        let mut buf = [0u8; 6];
        self.i2c.read(&mut buf)?;

        if crc8(&buf[0..2]) != buf[2] || crc8(&buf[3..5]) != buf[5] {
            return Err(anyhow!("sht31 crc mismatch"));
        }

        Ok(Climate {
            temperature: convert_temperature(u16::from_be_bytes([buf[0], buf[1]])),
            humidity: convert_humidity(u16::from_be_bytes([buf[3], buf[4]])),
        })
    }
}

// ── Flow pulse input ────────────────────────────────────────────────────────

/// Flow sensor edge source. The interrupt callback touches nothing but the
/// shared atomic counter. The pin must stay alive for the interrupt to
/// remain armed, so the struct holds it.
pub struct FlowPulseInput {
    _pin: InputPin,
}

impl FlowPulseInput {
    pub fn new(pin_num: u8, counter: Arc<PulseCounter>) -> Result<Self> {
        let gpio = Gpio::new().context("opening gpio for flow sensor")?;
        let mut pin = gpio.get(pin_num)?.into_input_pullup();
        pin.set_async_interrupt(Trigger::FallingEdge, move |_| counter.record())
            .context("arming flow sensor interrupt")?;
        tracing::info!(gpio = pin_num, "flow pulse input armed");
        Ok(Self { _pin: pin })
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // -- ADS1115 config register ---------------------------------------------

    #[test]
    fn config_register_per_channel() {
        assert_eq!(config_for_channel(0), 0xC383);
        assert_eq!(config_for_channel(1), 0xD383);
        assert_eq!(config_for_channel(2), 0xE383);
        assert_eq!(config_for_channel(3), 0xF383);
    }

    #[test]
    fn config_base_is_single_shot_128sps() {
        assert_eq!((CONFIG_BASE >> 15) & 1, 1, "OS starts a conversion");
        assert_eq!((CONFIG_BASE >> 9) & 0b111, 0b001, "PGA ±4.096 V");
        assert_eq!((CONFIG_BASE >> 8) & 1, 1, "single-shot mode");
        assert_eq!((CONFIG_BASE >> 5) & 0b111, 0b100, "128 SPS");
    }

    // -- Result scaling -------------------------------------------------------

    #[test]
    fn scale_maps_full_range_into_12_bits() {
        assert_eq!(scale_result(0), 0);
        assert_eq!(scale_result(32767), 4095);
        assert_eq!(scale_result(16384), 2048);
    }

    #[test]
    fn scale_clamps_negative_noise_to_zero() {
        assert_eq!(scale_result(-1), 0);
        assert_eq!(scale_result(i16::MIN), 0);
    }

    // -- SHT31 ----------------------------------------------------------------

    #[test]
    fn crc8_matches_datasheet_example() {
        // SHT3x datasheet: CRC(0xBEEF) = 0x92.
        assert_eq!(crc8(&[0xBE, 0xEF]), 0x92);
    }

    #[test]
    fn crc8_detects_corruption() {
        assert_ne!(crc8(&[0xBE, 0xEE]), 0x92);
    }

    #[test]
    fn temperature_conversion_endpoints() {
        assert_eq!(convert_temperature(0), -45.0);
        assert_eq!(convert_temperature(65535), 130.0);
        assert!((convert_temperature(26214) - 25.0).abs() < 0.01);
    }

    #[test]
    fn humidity_conversion_endpoints() {
        assert_eq!(convert_humidity(0), 0.0);
        assert_eq!(convert_humidity(65535), 100.0);
    }
}
