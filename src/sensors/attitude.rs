// Serial AHRS attitude sensor
//
// The sensor streams text frames over the UART:
// "#YPR=<a>,<b>,<c>\r\n" with the three angles in degrees.
// Angles are reported here as [roll, pitch, yaw] in radians.

use serialport::{self, SerialPort};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use tracing::{debug, info};

use crate::config::{ATTITUDE_BAUDRATE, ATTITUDE_TIMEOUT};
use crate::error::{PlatformError, Result};
use crate::gpio::{DeviceHandle, UartBus};
use crate::sensors::RawSensor;

/// Command restarting the sensor's orientation estimate
const RESET_COMMAND: &[u8] = b"#r";

/// Separator between the frame tag and its values
const VALUE_SEPARATOR: char = '=';

/// Attitude sensor attached to the primary UART
pub struct AttitudeSensors {
    uart: UartBus,
    reader: BufReader<Box<dyn SerialPort>>,
}

impl AttitudeSensors {
    /// Open the sensor on `port_name`
    pub fn open(uart: UartBus, port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(uart, port_name, ATTITUDE_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(uart: UartBus, port_name: &str, baudrate: u32) -> Result<Self> {
        uart.ensure_owned()?;
        let port = serialport::new(port_name, baudrate)
            .timeout(ATTITUDE_TIMEOUT)
            .open()?;

        info!("Attitude sensor connected on {} at {} baud", port_name, baudrate);
        Ok(Self {
            uart,
            reader: BufReader::new(port),
        })
    }

    /// Restart the sensor's orientation estimate
    pub fn reset(&mut self) -> Result<()> {
        self.uart.ensure_owned()?;
        let port = self.reader.get_mut();
        port.write_all(RESET_COMMAND)?;
        port.flush()?;
        debug!("Attitude sensor reset");
        Ok(())
    }

    /// Read the next non-empty line
    fn read_frame(&mut self) -> Result<String> {
        self.uart.ensure_owned()?;
        let mut line = String::new();
        loop {
            line.clear();
            let read = self.reader.read_line(&mut line).map_err(|e| {
                if e.kind() == ErrorKind::TimedOut {
                    PlatformError::Device("timeout waiting for attitude frame".to_string())
                } else {
                    PlatformError::Io(e)
                }
            })?;
            if read == 0 {
                return Err(PlatformError::Device("attitude stream closed".to_string()));
            }
            if !line.trim().is_empty() {
                return Ok(line);
            }
        }
    }
}

impl RawSensor for AttitudeSensors {
    fn channel_count(&self) -> usize {
        3
    }

    fn measure_raw(&mut self) -> Result<Vec<f64>> {
        let frame = self.read_frame()?;
        parse_frame(&frame).map(Vec::from)
    }
}

/// Parse "#YPR=a,b,c" into [roll, pitch, yaw] in radians.
///
/// A frame without a tag is read as bare values.
pub fn parse_frame(frame: &str) -> Result<[f64; 3]> {
    let values = frame
        .split_once(VALUE_SEPARATOR)
        .map_or(frame, |(_, values)| values)
        .trim();

    let angles = values
        .split(',')
        .map(|value| value.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| PlatformError::Device(format!("malformed attitude frame {:?}: {}", frame, e)))?;

    match angles.as_slice() {
        [roll, pitch, yaw] => Ok([roll.to_radians(), pitch.to_radians(), yaw.to_radians()]),
        _ => Err(PlatformError::Device(format!(
            "attitude frame {:?} has {} values, expected 3",
            frame,
            angles.len()
        ))),
    }
}
