//! Greenhouse sensor drivers over I2C: an SHT4x for temperature/humidity and
//! an ADS1115 reading the light-dependent resistor divider.
//!
//! Register maths and conversions are plain functions so they are tested on
//! any host; the bus access itself needs the `hw` feature.

#![cfg_attr(not(feature = "hw"), allow(dead_code))]

#[cfg(feature = "hw")]
use rppal::i2c::I2c;
#[cfg(feature = "hw")]
use std::thread;
use std::time::Duration;

#[cfg(feature = "hw")]
use crate::config::SensorSettings;
#[cfg(feature = "hw")]
use crate::error::SensorError;
#[cfg(feature = "hw")]
use crate::sensor::{Reading, SensorReader};

// ── ADS1115 ─────────────────────────────────────────────────────────────────

/// Conversion result register (read-only, 16-bit signed).
const REG_CONVERSION: u8 = 0x00;
/// Configuration register (read/write).
const REG_CONFIG: u8 = 0x01;

/// Config register layout (MSB first):
///   [15] OS, [14:12] MUX, [11:9] PGA, [8] MODE, [7:5] DR, [1:0] COMP_QUE.
///
/// OS=1 (start), PGA=001 (±4.096 V), MODE=1 (single-shot), DR=100 (128 SPS),
/// COMP_QUE=11 (comparator off).
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

/// Single-ended MUX values, AIN0..AIN3 vs GND.
const MUX_SHIFT: u8 = 12;
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

/// ~7.8 ms at 128 SPS.
const ADS_CONVERSION_WAIT: Duration = Duration::from_millis(9);

/// Bit 15 of the config register reads 1 once the conversion is done.
const OS_READY_BIT: u16 = 1 << 15;

/// Config register value for a single-ended read on `channel` (0-3).
fn config_for_channel(channel: u8) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[usize::from(channel.min(3))] << MUX_SHIFT)
}

/// 15-bit single-ended conversion to the 12-bit light scale the thresholds
/// are expressed in. Negative values (bus noise) read as dark.
pub fn light_from_raw(raw: i16) -> f32 {
    f32::from(raw.max(0) >> 3)
}

// ── SHT4x ───────────────────────────────────────────────────────────────────

/// Measure T & RH with high precision (no heater).
const SHT4X_MEASURE_HIGH: u8 = 0xFD;
/// Max 8.3 ms for the high-precision measurement.
const SHT4X_MEASURE_WAIT: Duration = Duration::from_millis(10);

/// Sensirion CRC-8: polynomial 0x31, init 0xFF, no reflection.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
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

/// Decode the 6-byte SHT4x frame into (°C, %RH). `None` on a CRC mismatch.
pub fn decode_sht4x(frame: &[u8; 6]) -> Option<(f32, f32)> {
    if crc8(&frame[0..2]) != frame[2] || crc8(&frame[3..5]) != frame[5] {
        return None;
    }
    let t_ticks = f32::from(u16::from_be_bytes([frame[0], frame[1]]));
    let rh_ticks = f32::from(u16::from_be_bytes([frame[3], frame[4]]));
    let temperature = -45.0 + 175.0 * t_ticks / 65535.0;
    let humidity = (-6.0 + 125.0 * rh_ticks / 65535.0).clamp(0.0, 100.0);
    Some((temperature, humidity))
}

// ── Driver ──────────────────────────────────────────────────────────────────

/// Both sensors on one I2C bus, addressed per transaction.
#[cfg(feature = "hw")]
pub struct ClimateSensors {
    i2c: I2c,
    sht4x_address: u16,
    ads1115_address: u16,
    light_channel: u8,
}

#[cfg(feature = "hw")]
impl ClimateSensors {
    pub fn new(settings: &SensorSettings) -> anyhow::Result<Self> {
        anyhow::ensure!(
            settings.light_channel <= 3,
            "ADS1115 channel {} out of range (0-3)",
            settings.light_channel
        );
        let i2c = I2c::with_bus(settings.i2c_bus)?;

        tracing::info!(
            bus = settings.i2c_bus,
            sht4x = format_args!("0x{:02x}", settings.sht4x_address),
            ads1115 = format_args!("0x{:02x}", settings.ads1115_address),
            light_channel = settings.light_channel,
            "climate sensors initialised"
        );

        Ok(Self {
            i2c,
            sht4x_address: settings.sht4x_address,
            ads1115_address: settings.ads1115_address,
            light_channel: settings.light_channel,
        })
    }

    fn read_sht4x(&mut self) -> Result<(f32, f32), SensorError> {
        let fail = |e: rppal::i2c::Error| SensorError::ReadFailed {
            sensor: "sht4x",
            detail: e.to_string(),
        };

        self.i2c.set_slave_address(self.sht4x_address).map_err(fail)?;
        self.i2c.write(&[SHT4X_MEASURE_HIGH]).map_err(fail)?;
        thread::sleep(SHT4X_MEASURE_WAIT);

        let mut frame = [0u8; 6];
        self.i2c.read(&mut frame).map_err(fail)?;
        decode_sht4x(&frame).ok_or(SensorError::Checksum { sensor: "sht4x" })
    }

    fn read_light(&mut self) -> Result<f32, SensorError> {
        let fail = |e: rppal::i2c::Error| SensorError::ReadFailed {
            sensor: "ads1115",
            detail: e.to_string(),
        };

        self.i2c.set_slave_address(self.ads1115_address).map_err(fail)?;
        let config = config_for_channel(self.light_channel);
        self.i2c
            .block_write(REG_CONFIG, &config.to_be_bytes())
            .map_err(fail)?;
        thread::sleep(ADS_CONVERSION_WAIT);

        // One wait is normally enough at 128 SPS.
        for _ in 0..3 {
            let mut buf = [0u8; 2];
            self.i2c.block_read(REG_CONFIG, &mut buf).map_err(fail)?;
            if u16::from_be_bytes(buf) & OS_READY_BIT != 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let mut buf = [0u8; 2];
        self.i2c.block_read(REG_CONVERSION, &mut buf).map_err(fail)?;
        Ok(light_from_raw(i16::from_be_bytes(buf)))
    }
}

#[cfg(feature = "hw")]
impl SensorReader for ClimateSensors {
    fn read(&mut self) -> Result<Reading, SensorError> {
        let (temperature, humidity) = self.read_sht4x()?;
        let light = self.read_light()?;
        Ok(Reading::new(temperature, humidity, light))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
