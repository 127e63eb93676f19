// Raspberry Pi assembly of the platform
//
// Wiring: PCA9685 on I2C1 (0x40) with one direction pin per servo, MCP3008 on
// SPI0/CE0 for the leg potentiometers, serial AHRS on the primary UART.
// Obstacle sensing (HC-SR04 sensors, MY9221 bars) is optional and built apart
// from the platform.

use std::sync::Arc;

use rppal::gpio::{IoPin, OutputPin};
use tracing::info;

use crate::actuators::ServoDriver;
use crate::actuators::servo::{PCA9685_ADDRESS, Pca9685Servos};
use crate::config::{MCP3008_CLOCK_HZ, PlatformConfig};
use crate::error::Result;
use crate::gpio::{ResourceRegistry, rpi};
use crate::indicators::My9221Indicators;
use crate::platform::{DynStewartPlatform, StewartPlatform};
use crate::sensors::{RawSensor, SensorArray};
use crate::sensors::attitude::AttitudeSensors;
use crate::sensors::distance::Hcsr04Distances;
use crate::sensors::extension::Mcp3008Extensions;
use crate::sensors::sampler::BackgroundSampler;

/// Allocate every pin and bus from `registry` and build the platform
pub fn build_platform(
    registry: &Arc<ResourceRegistry>,
    config: &PlatformConfig,
) -> Result<DynStewartPlatform> {
    config.validate()?;

    let mut directions = Vec::with_capacity(config.servo_direction_pins.len());
    for &number in &config.servo_direction_pins {
        let pin = registry.allocate_pin(number)?;
        let output = rpi::open_output(&pin)?;
        directions.push((pin, output));
    }
    let i2c = registry.allocate_i2c()?;
    let bus = rpi::open_i2c(&i2c, PCA9685_ADDRESS)?;
    let mut servos = Pca9685Servos::new(i2c, bus, directions, config.servo_channels.to_vec())?;
    servos.set_speed_range(config.minimal_speed, config.maximal_speed)?;

    let spi = registry.allocate_spi()?;
    let transfer = rpi::open_spi(&spi, MCP3008_CLOCK_HZ)?;
    let extensions = Mcp3008Extensions::new(
        spi,
        transfer,
        config.extension_channels.to_vec(),
        config.extension_sensor_range,
    )?;

    let uart = registry.allocate_uart()?;
    let mut attitude = AttitudeSensors::open(uart, &config.attitude_port)?;
    attitude.reset()?;
    let attitude = BackgroundSampler::spawn("attitude", attitude)?;

    info!("Hardware platform assembled");
    StewartPlatform::from_config(
        config,
        Box::new(servos) as Box<dyn ServoDriver>,
        Box::new(extensions) as Box<dyn RawSensor>,
        Box::new(attitude) as Box<dyn RawSensor>,
    )
}

/// Distance sensors on the given pins, clamped to `[minimal, maximal]` meters
pub fn build_distance_sensors(
    registry: &Arc<ResourceRegistry>,
    pins: &[u8],
    minimal: f64,
    maximal: f64,
) -> Result<SensorArray<Hcsr04Distances<IoPin>>> {
    let mut lines = Vec::with_capacity(pins.len());
    for &number in pins {
        let pin = registry.allocate_pin(number)?;
        let line = rpi::open_echo_line(&pin)?;
        lines.push((pin, line));
    }
    SensorArray::new("distance", Hcsr04Distances::new(lines)?, minimal, maximal)
}

/// LED bars sharing `clock_pin`, one per data pin
pub fn build_distance_indicators(
    registry: &Arc<ResourceRegistry>,
    clock_pin: u8,
    data_pins: &[u8],
    [minimal, warning, maximal]: [f64; 3],
) -> Result<My9221Indicators<OutputPin>> {
    let clock = registry.allocate_pin(clock_pin)?;
    let clock_line = rpi::open_output(&clock)?;
    let mut data = Vec::with_capacity(data_pins.len());
    for &number in data_pins {
        let pin = registry.allocate_pin(number)?;
        let line = rpi::open_output(&pin)?;
        data.push((pin, line));
    }
    My9221Indicators::new((clock, clock_line), data, minimal, warning, maximal)
}
