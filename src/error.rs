// Error taxonomy shared by every layer of the platform

use crate::gpio::Resource;

/// Errors raised by the registry, the sensor pipeline, the actuator
/// controller and the kinematics engine.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// Fatal construction-time mismatch (channel counts, non-finite data)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A runtime argument was rejected before any state was changed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{resource} is already allocated")]
    AlreadyAllocated { resource: Resource },

    #[error("Pin {pin} is outside the GPIO inventory")]
    OutOfRange { pin: u8 },

    #[error("Ownership of {resource} has been released")]
    ResourceReleased { resource: Resource },

    /// Forward kinematics found no consistent end-effector position
    #[error("Geometric inconsistency: {0}")]
    GeometricInconsistency(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "rpi")]
    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[cfg(feature = "rpi")]
    #[error("I2C error: {0}")]
    I2c(#[from] rppal::i2c::Error),

    #[cfg(feature = "rpi")]
    #[error("SPI error: {0}")]
    Spi(#[from] rppal::spi::Error),
}

pub type Result<T> = std::result::Result<T, PlatformError>;
