// Bus-level capabilities used by the device drivers
//
// Drivers talk to hardware only through these traits, so they can run against
// the rppal implementations on a Raspberry Pi or against recording mocks.

use std::time::Duration;

use crate::error::Result;

/// Byte-wide register access on an addressed bus device (SMBus style)
pub trait RegisterBus: Send {
    fn write_register(&mut self, register: u8, value: u8) -> Result<()>;

    fn read_register(&mut self, register: u8) -> Result<u8>;
}

/// Full-duplex SPI transfer; `read` has the same length as `write`
pub trait SpiTransfer: Send {
    fn transfer(&mut self, write: &[u8], read: &mut [u8]) -> Result<()>;
}

/// A single push-pull output line
pub trait DigitalOutput: Send {
    fn set_high(&mut self) -> Result<()>;

    fn set_low(&mut self) -> Result<()>;

    fn set_level(&mut self, high: bool) -> Result<()> {
        if high { self.set_high() } else { self.set_low() }
    }
}

/// A line that is pulsed as an output and then listened to, as on sensors
/// sharing one wire for trigger and echo
pub trait EchoLine: DigitalOutput {
    /// Stop driving the line and wait for its level to change.
    ///
    /// Returns the time waited, which is `timeout` if no edge came.
    fn wait_for_edge(&mut self, timeout: Duration) -> Result<Duration>;
}
