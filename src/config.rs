// Timeouts, topics, GPIO layout and platform configuration
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PlatformError, Result};
use crate::kinematics::LEG_COUNT;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// How long a "set" request may take before it is answered with NACK
pub const POSE_TIMEOUT: Duration = Duration::from_secs(10);

// Zenoh topics
pub const TOPIC_CMD_POSE: &str = "stewart/cmd/pose"; // get / set / exit requests
pub const TOPIC_STATE_POSE: &str = "stewart/state/pose"; // replies
pub const TOPIC_HEALTH: &str = "stewart/state/health"; // health status

// GPIO header (BCM numbering)
pub const FIRST_GPIO_PIN: u8 = 2;
pub const GPIO_PIN_COUNT: usize = 26; // pins 2..=27
pub const I2C_PINS: [u8; 2] = [2, 3]; // SDA, SCL
pub const SPI_PINS: [u8; 5] = [7, 8, 9, 10, 11]; // CE1, CE0, MISO, MOSI, SCLK
pub const UART_PINS: [u8; 2] = [14, 15]; // TXD, RXD

// Actuator control loop
pub const CONTROL_INTERVAL: Duration = Duration::from_millis(10);
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

// Attitude sensor serial link
pub const ATTITUDE_PORT: &str = "/dev/ttyAMA0";
pub const ATTITUDE_BAUDRATE: u32 = 57_600;
pub const ATTITUDE_TIMEOUT: Duration = Duration::from_millis(100);

// Background sampler back-off after a failed read
pub const SAMPLER_RETRY_INTERVAL: Duration = Duration::from_millis(100);

// MCP3008 extension ADC
pub const MCP3008_CLOCK_HZ: u32 = 1_000_000;

/// Base joint positions (meters, base frame)
pub const DEFAULT_BASE_JOINTS: [[f64; 3]; LEG_COUNT] = [
    [0.096593, 0.025882, 0.0],
    [-0.025882, 0.096593, 0.0],
    [-0.070711, 0.070711, 0.0],
    [-0.070711, -0.070711, 0.0],
    [-0.025882, -0.096593, 0.0],
    [0.096593, -0.025882, 0.0],
];

/// End-effector joint positions (meters, end-effector frame)
pub const DEFAULT_END_EFFECTOR_JOINTS: [[f64; 3]; LEG_COUNT] = [
    [0.06364, 0.06364, -0.035],
    [0.023294, 0.086933, -0.035],
    [-0.086933, 0.023294, -0.035],
    [-0.086933, -0.023294, -0.035],
    [0.023294, -0.086933, -0.035],
    [0.06364, -0.06364, -0.035],
];

/// Everything needed to assemble a platform, loadable from JSON.
///
/// Missing fields fall back to the values of [`PlatformConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Raw range of the extension sensors `[min, max]` (meters)
    pub extension_sensor_range: [f64; 2],
    pub samples_per_measurement: usize,
    /// Optional calibration table, one row per node, one column per leg
    pub extension_calibration: Option<Vec<Vec<f64>>>,
    pub minimal_extension: f64,
    pub maximal_extension: f64,
    pub acceptable_extension_deviation: f64,
    /// `[x, y, z, roll, pitch, yaw]`
    pub minimal_pose: [f64; 6],
    pub maximal_pose: [f64; 6],
    pub base_joints: [[f64; 3]; LEG_COUNT],
    pub end_effector_joints: [[f64; 3]; LEG_COUNT],
    /// BCM pins selecting each servo's direction
    pub servo_direction_pins: [u8; LEG_COUNT],
    /// PCA9685 channels driving each servo
    pub servo_channels: [u8; LEG_COUNT],
    pub minimal_speed: f64,
    pub maximal_speed: f64,
    /// MCP3008 inputs wired to each extension sensor
    pub extension_channels: [u8; LEG_COUNT],
    pub attitude_port: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            extension_sensor_range: [0.168, 0.268],
            samples_per_measurement: 3,
            extension_calibration: None,
            minimal_extension: 0.178,
            maximal_extension: 0.248,
            acceptable_extension_deviation: 0.005,
            minimal_pose: [-0.02, -0.02, 0.21, -0.2, -0.2, -0.6],
            maximal_pose: [0.02, 0.02, 0.27, 0.2, 0.2, 0.6],
            base_joints: DEFAULT_BASE_JOINTS,
            end_effector_joints: DEFAULT_END_EFFECTOR_JOINTS,
            servo_direction_pins: [22, 5, 6, 13, 19, 26],
            servo_channels: [0, 1, 2, 3, 4, 5],
            minimal_speed: 0.0,
            maximal_speed: 1.0,
            extension_channels: [0, 1, 2, 3, 4, 5],
            attitude_port: ATTITUDE_PORT.to_string(),
        }
    }
}

impl PlatformConfig {
    /// Read and validate a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: PlatformConfig = serde_json::from_str(&text)?;
        config.validate()?;
        info!("Loaded platform configuration from {}", path.display());
        Ok(config)
    }

    /// Check ranges that the components would otherwise reject one by one
    pub fn validate(&self) -> Result<()> {
        let [sensor_min, sensor_max] = self.extension_sensor_range;
        if !(sensor_min.is_finite() && sensor_max.is_finite() && sensor_min <= sensor_max) {
            return Err(PlatformError::Configuration(format!(
                "invalid extension sensor range [{}, {}]",
                sensor_min, sensor_max
            )));
        }
        if self.samples_per_measurement == 0 {
            return Err(PlatformError::Configuration(
                "samples_per_measurement must be at least 1".to_string(),
            ));
        }
        if !(self.minimal_extension.is_finite()
            && self.maximal_extension.is_finite()
            && self.minimal_extension <= self.maximal_extension)
        {
            return Err(PlatformError::Configuration(format!(
                "invalid extension range [{}, {}]",
                self.minimal_extension, self.maximal_extension
            )));
        }
        if !(self.acceptable_extension_deviation.is_finite()
            && self.acceptable_extension_deviation >= 0.0)
        {
            return Err(PlatformError::Configuration(format!(
                "invalid acceptable extension deviation {}",
                self.acceptable_extension_deviation
            )));
        }
        let poses_valid = self
            .minimal_pose
            .iter()
            .zip(&self.maximal_pose)
            .all(|(min, max)| min.is_finite() && max.is_finite() && min <= max);
        if !poses_valid {
            return Err(PlatformError::Configuration(
                "minimal_pose must not exceed maximal_pose".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.minimal_speed)
            || !(0.0..=1.0).contains(&self.maximal_speed)
            || self.minimal_speed > self.maximal_speed
        {
            return Err(PlatformError::Configuration(format!(
                "invalid servo speed range [{}, {}]",
                self.minimal_speed, self.maximal_speed
            )));
        }
        Ok(())
    }
}
