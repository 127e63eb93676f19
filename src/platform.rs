// The Stewart platform: six legs, an attitude sensor and the kinematics
// linking them to an end-effector pose.

use std::f64::consts::PI;
use std::time::Duration;

use tracing::{debug, info};

use crate::actuators::{LinearActuators, ServoDriver};
use crate::config::PlatformConfig;
use crate::error::{PlatformError, Result};
use crate::kinematics::{LEG_COUNT, PlatformGeometry, Pose};
use crate::sensors::{CalibrationTable, RawSensor, SensorArray};

/// Platform over type-erased devices, as assembled at runtime
pub type DynStewartPlatform =
    StewartPlatform<Box<dyn RawSensor>, Box<dyn ServoDriver>, Box<dyn RawSensor>>;

pub struct StewartPlatform<S, D, A>
where
    S: RawSensor + 'static,
    D: ServoDriver + 'static,
    A: RawSensor,
{
    linear_actuators: LinearActuators<S, D>,
    attitude_sensors: SensorArray<A>,
    geometry: PlatformGeometry,
    minimal_end_effector_pose: Pose,
    maximal_end_effector_pose: Pose,
}

impl<S, D, A> StewartPlatform<S, D, A>
where
    S: RawSensor + 'static,
    D: ServoDriver + 'static,
    A: RawSensor,
{
    /// # Errors
    /// [`PlatformError::Configuration`] unless there are exactly six
    /// actuators and three attitude channels, and the pose bounds are finite
    /// and ordered.
    pub fn new(
        linear_actuators: LinearActuators<S, D>,
        attitude_sensors: SensorArray<A>,
        geometry: PlatformGeometry,
        minimal_end_effector_pose: Pose,
        maximal_end_effector_pose: Pose,
    ) -> Result<Self> {
        if linear_actuators.actuator_count() != LEG_COUNT {
            return Err(PlatformError::Configuration(format!(
                "a Stewart platform needs {} actuators, got {}",
                LEG_COUNT,
                linear_actuators.actuator_count()
            )));
        }
        if attitude_sensors.channel_count() != 3 {
            return Err(PlatformError::Configuration(format!(
                "attitude sensors must report roll, pitch and yaw, got {} channels",
                attitude_sensors.channel_count()
            )));
        }
        let bounds_valid = minimal_end_effector_pose.is_finite()
            && maximal_end_effector_pose.is_finite()
            && minimal_end_effector_pose
                .as_array()
                .iter()
                .zip(maximal_end_effector_pose.as_array())
                .all(|(min, max)| *min <= max);
        if !bounds_valid {
            return Err(PlatformError::Configuration(
                "end-effector pose bounds must be finite and ordered".to_string(),
            ));
        }

        Ok(Self {
            linear_actuators,
            attitude_sensors,
            geometry,
            minimal_end_effector_pose,
            maximal_end_effector_pose,
        })
    }

    /// Assemble a platform from configuration and raw devices
    pub fn from_config(
        config: &PlatformConfig,
        servo_controllers: D,
        extension_device: S,
        attitude_device: A,
    ) -> Result<Self> {
        let [sensor_min, sensor_max] = config.extension_sensor_range;
        let mut extension_sensors =
            SensorArray::new("extension", extension_device, sensor_min, sensor_max)?;
        extension_sensors.set_samples_per_measurement(config.samples_per_measurement)?;
        if let Some(rows) = &config.extension_calibration {
            extension_sensors.set_calibration(CalibrationTable::from_rows(rows)?)?;
        }

        let mut linear_actuators = LinearActuators::new(
            servo_controllers,
            extension_sensors,
            config.minimal_extension,
            config.maximal_extension,
        )?;
        linear_actuators.set_acceptable_extension_deviation(config.acceptable_extension_deviation)?;

        let attitude_sensors = SensorArray::new("attitude", attitude_device, -PI, PI)?;
        let geometry = PlatformGeometry::new(config.base_joints, config.end_effector_joints)?;

        Self::new(
            linear_actuators,
            attitude_sensors,
            geometry,
            Pose::from_array(config.minimal_pose),
            Pose::from_array(config.maximal_pose),
        )
    }

    /// Move towards `pose`, clamped to the pose bounds.
    ///
    /// Returns `Ok(false)` without moving if the clamped pose needs a leg
    /// extension outside the actuator range. Legs are driven with speeds
    /// proportional to their target extension, the longest at full speed.
    ///
    /// # Errors
    /// [`PlatformError::InvalidArgument`] for a non-finite pose.
    pub fn set_end_effector_pose(&mut self, pose: &Pose) -> Result<bool> {
        if !pose.is_finite() {
            return Err(PlatformError::InvalidArgument(format!(
                "pose {:?} is not finite",
                pose
            )));
        }

        let limited = pose.clamp(&self.minimal_end_effector_pose, &self.maximal_end_effector_pose);
        let extensions = self.geometry.leg_extensions(&limited);

        let (minimal, maximal) = (
            self.linear_actuators.minimal_extension(),
            self.linear_actuators.maximal_extension(),
        );
        if extensions.iter().any(|e| *e < minimal || *e > maximal) {
            debug!(
                "Pose {:?} rejected, extensions {:?} outside [{}, {}]",
                limited, extensions, minimal, maximal
            );
            return Ok(false);
        }

        let longest = extensions.iter().copied().fold(f64::MIN, f64::max);
        let speeds: Vec<f64> = extensions.iter().map(|e| e / longest).collect();

        info!("Moving end effector to {:?}", limited);
        self.linear_actuators.set_extensions(&extensions, &speeds)?;
        Ok(true)
    }

    /// Current pose: position from forward kinematics, attitude as measured
    pub fn get_end_effector_pose(&mut self) -> Result<Pose> {
        let attitude = self.attitude_sensors.measure()?;
        let attitude: [f64; 3] = attitude.try_into().map_err(|values: Vec<f64>| {
            PlatformError::Device(format!("expected 3 attitude values, got {}", values.len()))
        })?;

        let extensions = self.linear_actuators.get_extensions()?;
        let extensions: [f64; LEG_COUNT] = extensions.try_into().map_err(|values: Vec<f64>| {
            PlatformError::Device(format!("expected {} extensions, got {}", LEG_COUNT, values.len()))
        })?;

        self.geometry.forward_kinematics(&extensions, attitude)
    }

    pub fn wait_till_end_effector_pose_is_reached(&self, timeout: Duration) -> bool {
        self.linear_actuators.wait_till_extension_is_reached(timeout)
    }

    pub fn is_moving(&self) -> bool {
        self.linear_actuators.is_moving()
    }

    /// Cancel any motion and stop the servos
    pub fn stop(&mut self) -> Result<()> {
        self.linear_actuators.stop()
    }

    pub fn linear_actuators(&self) -> &LinearActuators<S, D> {
        &self.linear_actuators
    }

    pub fn attitude_sensors_mut(&mut self) -> &mut SensorArray<A> {
        &mut self.attitude_sensors
    }

    pub fn geometry(&self) -> &PlatformGeometry {
        &self.geometry
    }

    pub fn minimal_end_effector_pose(&self) -> &Pose {
        &self.minimal_end_effector_pose
    }

    pub fn maximal_end_effector_pose(&self) -> &Pose {
        &self.maximal_end_effector_pose
    }
}
