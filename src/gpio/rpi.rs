// Raspberry Pi bus access through rppal
//
// Each opener requires the matching ownership handle, so a bus or pin can only
// be driven by whoever holds it in the registry.

use std::time::{Duration, Instant};

use rppal::gpio::{Gpio, IoPin, Mode as PinMode, OutputPin};
use rppal::i2c::I2c;
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

use super::io::{DigitalOutput, EchoLine, RegisterBus, SpiTransfer};
use super::{DeviceHandle, I2cBus, Pin, SpiBus};
use crate::error::Result;

impl RegisterBus for I2c {
    fn write_register(&mut self, register: u8, value: u8) -> Result<()> {
        self.smbus_write_byte(register, value)?;
        Ok(())
    }

    fn read_register(&mut self, register: u8) -> Result<u8> {
        Ok(self.smbus_read_byte(register)?)
    }
}

impl SpiTransfer for Spi {
    fn transfer(&mut self, write: &[u8], read: &mut [u8]) -> Result<()> {
        Spi::transfer(self, read, write)?;
        Ok(())
    }
}

impl DigitalOutput for OutputPin {
    fn set_high(&mut self) -> Result<()> {
        OutputPin::set_high(self);
        Ok(())
    }

    fn set_low(&mut self) -> Result<()> {
        OutputPin::set_low(self);
        Ok(())
    }
}

impl DigitalOutput for IoPin {
    fn set_high(&mut self) -> Result<()> {
        self.set_mode(PinMode::Output);
        IoPin::set_high(self);
        Ok(())
    }

    fn set_low(&mut self) -> Result<()> {
        self.set_mode(PinMode::Output);
        IoPin::set_low(self);
        Ok(())
    }
}

impl EchoLine for IoPin {
    fn wait_for_edge(&mut self, timeout: Duration) -> Result<Duration> {
        self.set_mode(PinMode::Input);
        let start = Instant::now();
        let level = self.is_high();
        while self.is_high() == level {
            let waited = start.elapsed();
            if waited >= timeout {
                return Ok(timeout);
            }
            std::hint::spin_loop();
        }
        Ok(start.elapsed())
    }
}

/// Configure an owned pin as an output
pub fn open_output(pin: &Pin) -> Result<OutputPin> {
    pin.ensure_owned()?;
    Ok(Gpio::new()?.get(pin.number())?.into_output())
}

/// Configure an owned pin for trigger/echo use, starting as an output
pub fn open_echo_line(pin: &Pin) -> Result<IoPin> {
    pin.ensure_owned()?;
    Ok(Gpio::new()?.get(pin.number())?.into_io(PinMode::Output))
}

/// Open I2C1 and address the device at `address`
pub fn open_i2c(bus: &I2cBus, address: u16) -> Result<I2c> {
    bus.ensure_owned()?;
    let mut i2c = I2c::new()?;
    i2c.set_slave_address(address)?;
    Ok(i2c)
}

/// Open SPI0 with CE0 in mode 0
pub fn open_spi(bus: &SpiBus, clock_speed: u32) -> Result<Spi> {
    bus.ensure_owned()?;
    Ok(Spi::new(Bus::Spi0, SlaveSelect::Ss0, clock_speed, Mode::Mode0)?)
}
