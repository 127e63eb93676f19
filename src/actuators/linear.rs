// Closed-loop control of the six linear actuators
//
// A background control task drives every leg towards its target extension
// until all legs are within the acceptable deviation. Issuing new targets
// cancels the running task before starting the next one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::actuators::ServoDriver;
use crate::config::{CONTROL_INTERVAL, WAIT_POLL_INTERVAL};
use crate::error::{PlatformError, Result};
use crate::lock;
use crate::sensors::{RawSensor, SensorArray};

/// Default tolerance around each target extension (meters)
pub const DEFAULT_ACCEPTABLE_EXTENSION_DEVIATION: f64 = 0.005;

/// Handle on a running (or finished) control task.
///
/// The handle outlives its worker so a wait after `stop()` still sees how the
/// last motion ended.
struct ControlTask {
    cancel: Arc<AtomicBool>,
    reached: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ControlTask {
    fn cancel_and_join(&mut self) {
        self.cancel.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Actuator control task panicked");
            }
            // A panicking worker never flags itself
            self.finished.store(true, Ordering::Release);
        }
    }
}

/// Linear actuators: servos moving the legs plus sensors measuring them
pub struct LinearActuators<S: RawSensor + 'static, D: ServoDriver + 'static> {
    actuator_count: usize,
    extension_sensors: Arc<Mutex<SensorArray<S>>>,
    servo_controllers: Arc<Mutex<D>>,
    minimal_extension: f64,
    maximal_extension: f64,
    acceptable_extension_deviation: f64,
    task: Option<ControlTask>,
}

impl<S: RawSensor + 'static, D: ServoDriver + 'static> LinearActuators<S, D> {
    /// # Errors
    /// [`PlatformError::Configuration`] if servo and sensor channel counts
    /// differ or the extension range is invalid.
    pub fn new(
        servo_controllers: D,
        extension_sensors: SensorArray<S>,
        minimal_extension: f64,
        maximal_extension: f64,
    ) -> Result<Self> {
        let actuator_count = servo_controllers.channel_count();
        if actuator_count != extension_sensors.channel_count() {
            return Err(PlatformError::Configuration(format!(
                "{} servo channels but {} extension sensors",
                actuator_count,
                extension_sensors.channel_count()
            )));
        }
        if !(minimal_extension.is_finite()
            && maximal_extension.is_finite()
            && minimal_extension <= maximal_extension)
        {
            return Err(PlatformError::Configuration(format!(
                "invalid extension range [{}, {}]",
                minimal_extension, maximal_extension
            )));
        }

        Ok(Self {
            actuator_count,
            extension_sensors: Arc::new(Mutex::new(extension_sensors)),
            servo_controllers: Arc::new(Mutex::new(servo_controllers)),
            minimal_extension,
            maximal_extension,
            acceptable_extension_deviation: DEFAULT_ACCEPTABLE_EXTENSION_DEVIATION,
            task: None,
        })
    }

    /// Start moving every leg towards `extensions`.
    ///
    /// Targets are clamped into the extension range. Any running control task
    /// is cancelled and joined first, so at most one task drives the servos.
    ///
    /// # Errors
    /// [`PlatformError::InvalidArgument`] for wrong lengths, non-finite
    /// targets or speeds outside `[0, 1]`. Nothing is changed in that case.
    pub fn set_extensions(&mut self, extensions: &[f64], maximal_speeds: &[f64]) -> Result<()> {
        if extensions.len() != self.actuator_count || maximal_speeds.len() != self.actuator_count {
            return Err(PlatformError::InvalidArgument(format!(
                "expected {} extensions and speeds, got {} and {}",
                self.actuator_count,
                extensions.len(),
                maximal_speeds.len()
            )));
        }
        if extensions.iter().any(|e| !e.is_finite()) {
            return Err(PlatformError::InvalidArgument(
                "target extensions must be finite".to_string(),
            ));
        }
        if let Some(speed) = maximal_speeds.iter().find(|s| !(0.0..=1.0).contains(*s)) {
            return Err(PlatformError::InvalidArgument(format!(
                "speed {} is outside [0, 1]",
                speed
            )));
        }

        let targets: Vec<f64> = extensions
            .iter()
            .map(|e| e.clamp(self.minimal_extension, self.maximal_extension))
            .collect();

        if let Some(mut task) = self.task.take() {
            if !task.finished.load(Ordering::Acquire) {
                debug!("Superseding running actuator control task");
            }
            task.cancel_and_join();
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let reached = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        let worker = {
            let sensors = Arc::clone(&self.extension_sensors);
            let servos = Arc::clone(&self.servo_controllers);
            let speeds = maximal_speeds.to_vec();
            let tolerance = self.acceptable_extension_deviation;
            let cancel = Arc::clone(&cancel);
            let reached = Arc::clone(&reached);
            let finished = Arc::clone(&finished);

            thread::Builder::new()
                .name("actuator-control".to_string())
                .spawn(move || {
                    let outcome =
                        reach_extensions(&sensors, &servos, &targets, &speeds, tolerance, &cancel);

                    // Servos are stopped on every exit path
                    if let Err(e) = lock(&servos).stop() {
                        error!("Failed to stop servos: {}", e);
                    }

                    match outcome {
                        Ok(true) => {
                            info!("Target extensions reached: {:?}", targets);
                            reached.store(true, Ordering::Release);
                        }
                        Ok(false) => debug!("Actuator control task cancelled"),
                        Err(e) => error!("Actuator control task failed: {}", e),
                    }
                    finished.store(true, Ordering::Release);
                })?
        };

        self.task = Some(ControlTask {
            cancel,
            reached,
            finished,
            worker: Some(worker),
        });
        Ok(())
    }

    /// Block until the current targets are reached or `timeout` elapses.
    ///
    /// Returns `true` if no targets were ever set. Returns `false` early if
    /// the last control task ended without reaching its targets, including
    /// when it was cancelled by `stop()`.
    pub fn wait_till_extension_is_reached(&self, timeout: Duration) -> bool {
        let Some(task) = &self.task else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        loop {
            if task.reached.load(Ordering::Acquire) {
                return true;
            }
            if task.finished.load(Ordering::Acquire) {
                return false;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Calibrated extension of every leg
    pub fn get_extensions(&self) -> Result<Vec<f64>> {
        lock(&self.extension_sensors).measure()
    }

    /// Whether a control task is still driving the servos
    pub fn is_moving(&self) -> bool {
        self.task
            .as_ref()
            .is_some_and(|task| !task.finished.load(Ordering::Acquire))
    }

    /// Cancel any running control task and stop the servos
    pub fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.as_mut() {
            task.cancel_and_join();
        }
        lock(&self.servo_controllers).stop()
    }

    pub fn set_acceptable_extension_deviation(&mut self, deviation: f64) -> Result<()> {
        if !deviation.is_finite() || deviation < 0.0 {
            return Err(PlatformError::InvalidArgument(format!(
                "invalid acceptable extension deviation {}",
                deviation
            )));
        }
        self.acceptable_extension_deviation = deviation;
        Ok(())
    }

    pub fn set_extension_range(&mut self, minimal: f64, maximal: f64) -> Result<()> {
        if !(minimal.is_finite() && maximal.is_finite() && minimal <= maximal) {
            return Err(PlatformError::InvalidArgument(format!(
                "invalid extension range [{}, {}]",
                minimal, maximal
            )));
        }
        self.minimal_extension = minimal;
        self.maximal_extension = maximal;
        Ok(())
    }

    pub fn actuator_count(&self) -> usize {
        self.actuator_count
    }

    pub fn minimal_extension(&self) -> f64 {
        self.minimal_extension
    }

    pub fn maximal_extension(&self) -> f64 {
        self.maximal_extension
    }

    pub fn acceptable_extension_deviation(&self) -> f64 {
        self.acceptable_extension_deviation
    }
}

impl<S: RawSensor + 'static, D: ServoDriver + 'static> Drop for LinearActuators<S, D> {
    fn drop(&mut self) {
        if let Some(task) = self.task.as_mut() {
            task.cancel_and_join();
        }
    }
}

/// Control loop body. Returns `Ok(true)` once every leg is within
/// `tolerance` of its target, `Ok(false)` when cancelled.
fn reach_extensions<S: RawSensor, D: ServoDriver>(
    sensors: &Mutex<SensorArray<S>>,
    servos: &Mutex<D>,
    targets: &[f64],
    speeds: &[f64],
    tolerance: f64,
    cancel: &AtomicBool,
) -> Result<bool> {
    loop {
        if cancel.load(Ordering::Acquire) {
            return Ok(false);
        }

        let current = lock(sensors).measure()?;
        let deviations: Vec<f64> = current.iter().zip(targets).map(|(c, t)| c - t).collect();
        if deviations.iter().all(|d| d.abs() <= tolerance) {
            return Ok(true);
        }

        let forwards: Vec<bool> = deviations.iter().map(|d| *d < 0.0).collect();
        let commanded: Vec<f64> = deviations
            .iter()
            .zip(speeds)
            .map(|(d, s)| if d.abs() > tolerance { *s } else { 0.0 })
            .collect();
        if commanded.iter().all(|s| *s == 0.0) {
            warn!("Legs outside tolerance have zero speed: {:?}", deviations);
        }
        lock(servos).drive(&forwards, &commanded)?;

        thread::sleep(CONTROL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedRig;

    const RANGE: (f64, f64) = (0.1, 0.3);

    fn actuators(
        rig: &SimulatedRig,
    ) -> LinearActuators<crate::sim::SimulatedExtensionSensors, crate::sim::SimulatedServos> {
        let sensors = SensorArray::new("extension", rig.extension_sensors(), 0.0, 0.5).unwrap();
        let mut actuators =
            LinearActuators::new(rig.servo_controllers(), sensors, RANGE.0, RANGE.1).unwrap();
        actuators.set_acceptable_extension_deviation(0.002).unwrap();
        actuators
    }

    #[test]
    fn test_reaches_targets_and_stops() {
        let rig = SimulatedRig::new(vec![0.2; 3], 0.001);
        let mut actuators = actuators(&rig);

        actuators.set_extensions(&[0.21, 0.19, 0.2], &[1.0; 3]).unwrap();
        assert!(actuators.wait_till_extension_is_reached(Duration::from_secs(10)));
        assert!(!actuators.is_moving());

        for (extension, target) in actuators.get_extensions().unwrap().iter().zip([0.21, 0.19, 0.2]) {
            assert!((extension - target).abs() <= 0.002, "{} vs {}", extension, target);
        }
        let commands = rig.commands();
        let last = commands.last().unwrap();
        assert_eq!(last.speeds, vec![0.0; 3]);
    }

    #[test]
    fn test_targets_are_clamped_to_range() {
        let rig = SimulatedRig::new(vec![0.29; 2], 0.002);
        let mut actuators = actuators(&rig);

        actuators.set_extensions(&[1.0, 0.29], &[1.0, 1.0]).unwrap();
        assert!(actuators.wait_till_extension_is_reached(Duration::from_secs(10)));
        // Every command only extended leg 0 towards the upper bound
        assert!(rig.extensions()[0] <= RANGE.1 + 0.002);
        assert!(rig.commands().iter().all(|c| c.forwards[0]));
    }

    #[test]
    fn test_invalid_targets_are_rejected_without_side_effects() {
        let rig = SimulatedRig::new(vec![0.2; 2], 0.001);
        let mut actuators = actuators(&rig);

        assert!(matches!(
            actuators.set_extensions(&[0.2], &[1.0, 1.0]),
            Err(PlatformError::InvalidArgument(_))
        ));
        assert!(matches!(
            actuators.set_extensions(&[0.2, f64::NAN], &[1.0, 1.0]),
            Err(PlatformError::InvalidArgument(_))
        ));
        assert!(matches!(
            actuators.set_extensions(&[0.2, 0.2], &[1.0, 1.5]),
            Err(PlatformError::InvalidArgument(_))
        ));
        assert!(!actuators.is_moving());
        assert!(rig.commands().is_empty());
    }

    #[test]
    fn test_new_targets_supersede_running_task() {
        let rig = SimulatedRig::new(vec![0.2; 2], 0.0001);
        let mut actuators = actuators(&rig);

        actuators.set_extensions(&[0.3, 0.3], &[1.0, 1.0]).unwrap();
        thread::sleep(Duration::from_millis(30));
        actuators.set_extensions(&[0.1, 0.1], &[1.0, 1.0]).unwrap();

        // After the supersede only the new task commands the servos
        rig.clear_commands();
        thread::sleep(Duration::from_millis(50));
        let commands = rig.commands();
        assert!(!commands.is_empty());
        assert!(commands.iter().all(|c| c.forwards.iter().all(|f| !f)));

        actuators.stop().unwrap();
        assert!(!actuators.is_moving());
    }

    #[test]
    fn test_wait_times_out_while_moving() {
        let rig = SimulatedRig::new(vec![0.1; 1], 0.00001);
        let mut actuators = actuators(&rig);

        assert!(actuators.wait_till_extension_is_reached(Duration::from_millis(1)));
        actuators.set_extensions(&[0.3], &[1.0]).unwrap();
        assert!(!actuators.wait_till_extension_is_reached(Duration::from_millis(50)));
        assert!(actuators.is_moving());
    }

    #[test]
    fn test_wait_after_stop_reports_cancelled_motion() {
        let rig = SimulatedRig::new(vec![0.1; 2], 0.00001);
        let mut actuators = actuators(&rig);
        actuators.set_extensions(&[0.3, 0.3], &[1.0, 1.0]).unwrap();
        thread::sleep(Duration::from_millis(20));

        actuators.stop().unwrap();
        assert!(!actuators.is_moving());
        assert!(!actuators.wait_till_extension_is_reached(Duration::from_millis(50)));
        assert!(rig.extensions().iter().all(|e| *e < 0.3 - 0.002));
    }

    #[test]
    fn test_wait_after_reaching_and_stopping_stays_reached() {
        let rig = SimulatedRig::new(vec![0.2; 1], 0.001);
        let mut actuators = actuators(&rig);
        actuators.set_extensions(&[0.205], &[1.0]).unwrap();
        assert!(actuators.wait_till_extension_is_reached(Duration::from_secs(10)));

        actuators.stop().unwrap();
        assert!(actuators.wait_till_extension_is_reached(Duration::from_millis(1)));
    }

    #[test]
    fn test_drop_cancels_task_and_releases_devices() {
        let rig = SimulatedRig::new(vec![0.1; 2], 0.00001);
        let mut actuators = actuators(&rig);
        actuators.set_extensions(&[0.3, 0.3], &[1.0, 1.0]).unwrap();
        thread::sleep(Duration::from_millis(20));

        drop(actuators);
        let commands = rig.commands();
        assert_eq!(commands.last().unwrap().speeds, vec![0.0, 0.0]);
        assert_eq!(rig.attached_device_count(), 0);
    }

    #[test]
    fn test_mismatched_channel_counts_are_rejected() {
        let rig = SimulatedRig::new(vec![0.2; 3], 0.001);
        let other = SimulatedRig::new(vec![0.2; 2], 0.001);
        let sensors = SensorArray::new("extension", other.extension_sensors(), 0.0, 0.5).unwrap();

        assert!(matches!(
            LinearActuators::new(rig.servo_controllers(), sensors, 0.1, 0.3),
            Err(PlatformError::Configuration(_))
        ));
    }
}
