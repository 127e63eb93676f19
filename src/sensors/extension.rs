// MCP3008 10-bit ADC reading the linear potentiometers in each leg

use crate::error::{PlatformError, Result};
use crate::gpio::io::SpiTransfer;
use crate::gpio::{DeviceHandle, SpiBus};
use crate::sensors::RawSensor;

/// Number of single-ended inputs on the converter
pub const MCP3008_CHANNELS: u8 = 8;

const START_BIT: u8 = 0x01;
const SINGLE_ENDED: u8 = 0x08;
const FULL_SCALE: f64 = 1023.0;

/// Command frame selecting a single-ended input
fn command(channel: u8) -> [u8; 3] {
    [START_BIT, (SINGLE_ENDED | channel) << 4, 0x00]
}

/// 10-bit conversion result from a response frame
fn decode(response: &[u8; 3]) -> u16 {
    (u16::from(response[1] & 0x03) << 8) | u16::from(response[2])
}

/// Extension sensors behind an MCP3008 on the SPI bus.
///
/// Each input is mapped linearly from `0..=1023` onto the potentiometer's
/// stroke `[minimal_extension, maximal_extension]`.
pub struct Mcp3008Extensions<T> {
    spi: SpiBus,
    transfer: T,
    channels: Vec<u8>,
    minimal_extension: f64,
    maximal_extension: f64,
}

impl<T: SpiTransfer> Mcp3008Extensions<T> {
    pub fn new(spi: SpiBus, transfer: T, channels: Vec<u8>, stroke: [f64; 2]) -> Result<Self> {
        spi.ensure_owned()?;
        if channels.is_empty() {
            return Err(PlatformError::Configuration(
                "no extension sensor channels given".to_string(),
            ));
        }
        if let Some(channel) = channels.iter().find(|&&c| c >= MCP3008_CHANNELS) {
            return Err(PlatformError::Configuration(format!(
                "MCP3008 has no input {}",
                channel
            )));
        }
        let [minimal_extension, maximal_extension] = stroke;
        if !(minimal_extension.is_finite()
            && maximal_extension.is_finite()
            && minimal_extension < maximal_extension)
        {
            return Err(PlatformError::Configuration(format!(
                "invalid sensor stroke [{}, {}]",
                minimal_extension, maximal_extension
            )));
        }

        Ok(Self {
            spi,
            transfer,
            channels,
            minimal_extension,
            maximal_extension,
        })
    }

    fn read_channel(&mut self, channel: u8) -> Result<u16> {
        self.spi.ensure_owned()?;
        let mut response = [0u8; 3];
        self.transfer.transfer(&command(channel), &mut response)?;
        Ok(decode(&response))
    }
}

impl<T: SpiTransfer> RawSensor for Mcp3008Extensions<T> {
    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn measure_raw(&mut self) -> Result<Vec<f64>> {
        let span = self.maximal_extension - self.minimal_extension;
        let channels = self.channels.clone();
        channels
            .into_iter()
            .map(|channel| {
                let counts = self.read_channel(channel)?;
                Ok(self.minimal_extension + f64::from(counts) / FULL_SCALE * span)
            })
            .collect()
    }
}
