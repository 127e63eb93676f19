// Continuous-rotation servo drivers
//
// Each channel is driven with a direction and a speed in [0, 1]. The PCA9685
// generates the speed as a PWM duty cycle; the direction is a plain GPIO line.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{PlatformError, Result};
use crate::gpio::io::{DigitalOutput, RegisterBus};
use crate::gpio::{DeviceHandle, I2cBus, Pin};

/// Something that can drive a set of servo channels
pub trait ServoDriver: Send {
    fn channel_count(&self) -> usize;

    /// Drive every channel; `forwards[n]` extends leg `n`, `speeds[n]` is in `[0, 1]`
    fn drive(&mut self, forwards: &[bool], speeds: &[f64]) -> Result<()>;

    /// Zero speed on every channel
    fn stop(&mut self) -> Result<()> {
        let count = self.channel_count();
        self.drive(&vec![true; count], &vec![0.0; count])
    }
}

impl<T: ServoDriver + ?Sized> ServoDriver for Box<T> {
    fn channel_count(&self) -> usize {
        (**self).channel_count()
    }

    fn drive(&mut self, forwards: &[bool], speeds: &[f64]) -> Result<()> {
        (**self).drive(forwards, speeds)
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }
}

/// Reject commands whose shape or values do not fit `channel_count` channels
pub(crate) fn validate_command(channel_count: usize, forwards: &[bool], speeds: &[f64]) -> Result<()> {
    if forwards.len() != channel_count || speeds.len() != channel_count {
        return Err(PlatformError::InvalidArgument(format!(
            "expected {} directions and speeds, got {} and {}",
            channel_count,
            forwards.len(),
            speeds.len()
        )));
    }
    if let Some(speed) = speeds.iter().find(|s| !(0.0..=1.0).contains(*s)) {
        return Err(PlatformError::InvalidArgument(format!(
            "speed {} is outside [0, 1]",
            speed
        )));
    }
    Ok(())
}

/// Default I2C address of the PCA9685
pub const PCA9685_ADDRESS: u16 = 0x40;

/// Number of PWM outputs on the PCA9685
pub const PCA9685_CHANNELS: u8 = 16;

/// PCA9685 register map
const MODE1: u8 = 0x00;
const LED0_ON_L: u8 = 0x06; // 4 registers per channel: ON_L, ON_H, OFF_L, OFF_H
const PRESCALE: u8 = 0xFE;

/// MODE1 bits
const MODE1_SLEEP: u8 = 0x10;
const MODE1_RESTART_AUTO_INCREMENT_ALLCALL: u8 = 0xA1;

const PWM_PRESCALE: u8 = 5;
const OSCILLATOR_SETTLE: Duration = Duration::from_millis(5);
const MAX_DUTY: f64 = 4095.0;

/// Servos driven by a PCA9685 PWM controller plus one direction pin each
pub struct Pca9685Servos<B: RegisterBus, O: DigitalOutput> {
    i2c: I2cBus,
    bus: B,
    directions: Vec<(Pin, O)>,
    channels: Vec<u8>,
    minimal_speed: f64,
    maximal_speed: f64,
}

impl<B: RegisterBus, O: DigitalOutput> Pca9685Servos<B, O> {
    /// Take ownership of the controller and direction pins, then initialise the controller
    pub fn new(i2c: I2cBus, bus: B, directions: Vec<(Pin, O)>, channels: Vec<u8>) -> Result<Self> {
        if channels.is_empty() {
            return Err(PlatformError::Configuration(
                "no servo channels given".to_string(),
            ));
        }
        if directions.len() != channels.len() {
            return Err(PlatformError::Configuration(format!(
                "{} direction pins for {} servo channels",
                directions.len(),
                channels.len()
            )));
        }
        if let Some(channel) = channels.iter().find(|&&c| c >= PCA9685_CHANNELS) {
            return Err(PlatformError::Configuration(format!(
                "PCA9685 has no channel {}",
                channel
            )));
        }

        let mut servos = Self {
            i2c,
            bus,
            directions,
            channels,
            minimal_speed: 0.0,
            maximal_speed: 1.0,
        };
        servos.initialize()?;
        Ok(servos)
    }

    /// Restrict non-zero speeds to `[minimal, maximal]`
    pub fn set_speed_range(&mut self, minimal: f64, maximal: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&minimal) || !(0.0..=1.0).contains(&maximal) || minimal > maximal {
            return Err(PlatformError::InvalidArgument(format!(
                "invalid speed range [{}, {}]",
                minimal, maximal
            )));
        }
        self.minimal_speed = minimal;
        self.maximal_speed = maximal;
        Ok(())
    }

    /// Wake the controller and set the PWM frequency
    fn initialize(&mut self) -> Result<()> {
        self.write_register(MODE1, 0x00)?;
        let old_mode = self.read_register(MODE1)?;
        self.write_register(MODE1, (old_mode & 0x7F) | MODE1_SLEEP)?;
        self.write_register(PRESCALE, PWM_PRESCALE)?;
        self.write_register(MODE1, old_mode)?;
        thread::sleep(OSCILLATOR_SETTLE);
        self.write_register(MODE1, old_mode | MODE1_RESTART_AUTO_INCREMENT_ALLCALL)?;

        info!("PCA9685 initialised for channels {:?}", self.channels);
        Ok(())
    }

    fn duty_cycle(&self, speed: f64) -> u16 {
        if speed == 0.0 {
            return 0;
        }
        let limited = speed.clamp(self.minimal_speed, self.maximal_speed);
        (MAX_DUTY * limited).round() as u16
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<()> {
        self.i2c.ensure_owned()?;
        self.bus.write_register(register, value)
    }

    fn read_register(&mut self, register: u8) -> Result<u8> {
        self.i2c.ensure_owned()?;
        self.bus.read_register(register)
    }
}

impl<B: RegisterBus, O: DigitalOutput> ServoDriver for Pca9685Servos<B, O> {
    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn drive(&mut self, forwards: &[bool], speeds: &[f64]) -> Result<()> {
        validate_command(self.channels.len(), forwards, speeds)?;
        debug!("Driving servos: forwards={:?}, speeds={:?}", forwards, speeds);

        for n in 0..self.channels.len() {
            let (pin, output) = &mut self.directions[n];
            pin.ensure_owned()?;
            // Forward is a low direction line
            output.set_level(!forwards[n])?;

            let duty = self.duty_cycle(speeds[n]);
            let base = LED0_ON_L + 4 * self.channels[n];
            self.write_register(base, 0x00)?;
            self.write_register(base + 1, 0x00)?;
            self.write_register(base + 2, (duty & 0xFF) as u8)?;
            self.write_register(base + 3, (duty >> 8) as u8)?;
        }
        Ok(())
    }
}

impl<B: RegisterBus, O: DigitalOutput> Drop for Pca9685Servos<B, O> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop servos on drop: {}", e);
        }
    }
}
