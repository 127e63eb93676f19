// Simulated platform hardware
//
// Servos integrate their commands into leg extensions: every drive() call
// moves a leg by `speed * travel_per_command`, so runs are deterministic and
// independent of wall-clock time. Sensors read the simulated state back.

use std::sync::{Arc, Mutex};

use tracing::info;

use crate::actuators::ServoDriver;
use crate::actuators::servo::validate_command;
use crate::config::PlatformConfig;
use crate::error::Result;
use crate::lock;
use crate::platform::{DynStewartPlatform, StewartPlatform};
use crate::sensors::RawSensor;

/// Default leg travel per full-speed command (meters)
pub const DEFAULT_TRAVEL_PER_COMMAND: f64 = 0.002;

/// One recorded servo command
#[derive(Debug, Clone, PartialEq)]
pub struct ServoCommand {
    pub forwards: Vec<bool>,
    pub speeds: Vec<f64>,
}

#[derive(Debug)]
struct RigState {
    extensions: Vec<f64>,
    attitude: [f64; 3],
    commands: Vec<ServoCommand>,
}

/// Shared state of a simulated platform, observable from tests
#[derive(Debug, Clone)]
pub struct SimulatedRig {
    state: Arc<Mutex<RigState>>,
    travel_per_command: f64,
}

impl SimulatedRig {
    pub fn new(initial_extensions: Vec<f64>, travel_per_command: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(RigState {
                extensions: initial_extensions,
                attitude: [0.0; 3],
                commands: Vec::new(),
            })),
            travel_per_command,
        }
    }

    /// Rig and platform assembled from `config`, legs starting mid-range
    pub fn platform(config: &PlatformConfig) -> Result<(Self, DynStewartPlatform)> {
        config.validate()?;
        let middle = (config.minimal_extension + config.maximal_extension) / 2.0;
        let rig = Self::new(vec![middle; config.servo_channels.len()], DEFAULT_TRAVEL_PER_COMMAND);
        let platform = StewartPlatform::from_config(
            config,
            Box::new(rig.servo_controllers()) as Box<dyn ServoDriver>,
            Box::new(rig.extension_sensors()) as Box<dyn RawSensor>,
            Box::new(rig.attitude_sensors()) as Box<dyn RawSensor>,
        )?;
        info!("Simulated platform ready, legs at {:.3} m", middle);
        Ok((rig, platform))
    }

    pub fn servo_controllers(&self) -> SimulatedServos {
        SimulatedServos { rig: self.clone() }
    }

    pub fn extension_sensors(&self) -> SimulatedExtensionSensors {
        SimulatedExtensionSensors { rig: self.clone() }
    }

    pub fn attitude_sensors(&self) -> SimulatedAttitudeSensors {
        SimulatedAttitudeSensors { rig: self.clone() }
    }

    pub fn extensions(&self) -> Vec<f64> {
        lock(&self.state).extensions.clone()
    }

    pub fn set_extensions(&self, extensions: Vec<f64>) {
        lock(&self.state).extensions = extensions;
    }

    pub fn attitude(&self) -> [f64; 3] {
        lock(&self.state).attitude
    }

    /// Attitude reported by the simulated sensor, `[roll, pitch, yaw]`
    pub fn set_attitude(&self, attitude: [f64; 3]) {
        lock(&self.state).attitude = attitude;
    }

    pub fn commands(&self) -> Vec<ServoCommand> {
        lock(&self.state).commands.clone()
    }

    pub fn clear_commands(&self) {
        lock(&self.state).commands.clear();
    }

    /// Simulated devices still alive and sharing this rig
    pub fn attached_device_count(&self) -> usize {
        // One reference is held by this handle itself
        Arc::strong_count(&self.state).saturating_sub(1)
    }
}

pub struct SimulatedServos {
    rig: SimulatedRig,
}

impl ServoDriver for SimulatedServos {
    fn channel_count(&self) -> usize {
        lock(&self.rig.state).extensions.len()
    }

    fn drive(&mut self, forwards: &[bool], speeds: &[f64]) -> Result<()> {
        let travel = self.rig.travel_per_command;
        let mut state = lock(&self.rig.state);
        validate_command(state.extensions.len(), forwards, speeds)?;

        for (extension, (forward, speed)) in
            state.extensions.iter_mut().zip(forwards.iter().zip(speeds))
        {
            let step = speed * travel;
            *extension += if *forward { step } else { -step };
        }
        state.commands.push(ServoCommand {
            forwards: forwards.to_vec(),
            speeds: speeds.to_vec(),
        });
        Ok(())
    }
}

pub struct SimulatedExtensionSensors {
    rig: SimulatedRig,
}

impl RawSensor for SimulatedExtensionSensors {
    fn channel_count(&self) -> usize {
        lock(&self.rig.state).extensions.len()
    }

    fn measure_raw(&mut self) -> Result<Vec<f64>> {
        Ok(self.rig.extensions())
    }
}

pub struct SimulatedAttitudeSensors {
    rig: SimulatedRig,
}

impl RawSensor for SimulatedAttitudeSensors {
    fn channel_count(&self) -> usize {
        3
    }

    fn measure_raw(&mut self) -> Result<Vec<f64>> {
        Ok(self.rig.attitude().to_vec())
    }
}
