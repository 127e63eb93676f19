// HC-SR04 ultrasonic distance sensors
//
// Each sensor hangs off one GPIO line wired to both trigger and echo. A short
// trigger pulse starts a ping; the echo then holds the line high for the
// round trip time of the sound.

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::{PlatformError, Result};
use crate::gpio::io::{DigitalOutput, EchoLine};
use crate::gpio::{DeviceHandle, Pin};
use crate::sensors::RawSensor;

const SETTLE: Duration = Duration::from_micros(2);
const TRIGGER_PULSE: Duration = Duration::from_micros(10);
const TRIGGER_HOLDOFF: Duration = Duration::from_micros(20);

/// Longest wait for an echo to begin
pub const ECHO_START_TIMEOUT: Duration = Duration::from_millis(50);
/// Longest echo listened to, roughly 0.34 m
pub const ECHO_TIMEOUT: Duration = Duration::from_millis(2);

const MICROS_PER_METER: f64 = 5800.0; // datasheet: us / 58 = cm

/// Distance in meters for an echo of the given length
pub fn echo_to_distance(echo: Duration) -> f64 {
    echo.as_secs_f64() * 1e6 / MICROS_PER_METER
}

/// HC-SR04 sensors, one owned line per sensor, pinged in order.
///
/// A missing echo reads as the distance of a full [`ECHO_TIMEOUT`]; wrap the
/// array in a [`SensorArray`](crate::sensors::SensorArray) to clamp it into
/// the measurable range.
pub struct Hcsr04Distances<L> {
    lines: Vec<(Pin, L)>,
}

impl<L: EchoLine> Hcsr04Distances<L> {
    pub fn new(lines: Vec<(Pin, L)>) -> Result<Self> {
        if lines.is_empty() {
            return Err(PlatformError::Configuration(
                "no distance sensor pins given".to_string(),
            ));
        }

        let mut sensors = Self { lines };
        for (pin, line) in &mut sensors.lines {
            pin.ensure_owned()?;
            line.set_low()?;
            thread::sleep(SETTLE);
        }
        Ok(sensors)
    }

    fn ping(&mut self, sensor: usize) -> Result<f64> {
        let (pin, line) = &mut self.lines[sensor];
        pin.ensure_owned()?;

        line.set_high()?;
        thread::sleep(TRIGGER_PULSE);
        line.set_low()?;
        thread::sleep(TRIGGER_HOLDOFF);

        line.wait_for_edge(ECHO_START_TIMEOUT)?;
        let echo = line.wait_for_edge(ECHO_TIMEOUT)?;
        line.set_low()?;

        let distance = echo_to_distance(echo);
        debug!("Distance sensor on pin {}: {:.3} m", pin.number(), distance);
        Ok(distance)
    }
}

impl<L: EchoLine> RawSensor for Hcsr04Distances<L> {
    fn channel_count(&self) -> usize {
        self.lines.len()
    }

    fn measure_raw(&mut self) -> Result<Vec<f64>> {
        (0..self.lines.len()).map(|sensor| self.ping(sensor)).collect()
    }
}
