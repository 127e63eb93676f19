// Sensor pipeline: raw readings -> clamp -> median filter -> calibration
//
// Devices only report raw per-channel values through `RawSensor`. The
// `SensorArray` wrapper turns them into calibrated measurements.

pub mod attitude;
pub mod distance;
pub mod extension;
pub mod sampler;

use nalgebra::DMatrix;
use tracing::trace;

use crate::error::{PlatformError, Result};

/// A device producing one raw value per channel
pub trait RawSensor: Send {
    fn channel_count(&self) -> usize;

    /// One reading per channel, in channel order
    fn measure_raw(&mut self) -> Result<Vec<f64>>;
}

impl<T: RawSensor + ?Sized> RawSensor for Box<T> {
    fn channel_count(&self) -> usize {
        (**self).channel_count()
    }

    fn measure_raw(&mut self) -> Result<Vec<f64>> {
        (**self).measure_raw()
    }
}

/// Calibration table: one row per node, one column per channel.
///
/// Row `0` corresponds to the minimal measurable value, the last row to the
/// maximal one; nodes in between are evenly spaced.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTable {
    values: DMatrix<f64>,
}

impl CalibrationTable {
    /// Build from row-major data
    ///
    /// # Errors
    /// [`PlatformError::InvalidArgument`] for an empty table, ragged rows or
    /// non-finite values.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let columns = rows.first().map(Vec::len).unwrap_or(0);
        if rows.is_empty() || columns == 0 {
            return Err(PlatformError::InvalidArgument(
                "calibration table must not be empty".to_string(),
            ));
        }
        if rows.iter().any(|row| row.len() != columns) {
            return Err(PlatformError::InvalidArgument(
                "calibration rows must all have the same length".to_string(),
            ));
        }
        if rows.iter().flatten().any(|v| !v.is_finite()) {
            return Err(PlatformError::InvalidArgument(
                "calibration values must be finite".to_string(),
            ));
        }

        Ok(Self {
            values: DMatrix::from_fn(rows.len(), columns, |r, c| rows[r][c]),
        })
    }

    /// Two-node table mapping the measurable range onto itself
    pub(crate) fn identity(channel_count: usize, minimal: f64, maximal: f64) -> Self {
        Self {
            values: DMatrix::from_fn(2, channel_count, |r, _| if r == 0 { minimal } else { maximal }),
        }
    }

    pub fn rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn channel_count(&self) -> usize {
        self.values.ncols()
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    /// Linear interpolation between nodes at a fractional row index
    fn interpolate(&self, channel: usize, index: f64) -> f64 {
        let last = self.rows() - 1;
        let index = index.clamp(0.0, last as f64);
        let lower = index.floor() as usize;
        let upper = (index.ceil() as usize).min(last);
        let fraction = index - lower as f64;

        if fraction == 0.0 || lower == upper {
            return self.values[(lower, channel)];
        }
        (1.0 - fraction) * self.values[(lower, channel)] + fraction * self.values[(upper, channel)]
    }
}

/// Filtered, calibrated view of a raw sensor device
#[derive(Debug)]
pub struct SensorArray<S> {
    name: String,
    device: S,
    channel_count: usize,
    minimal_measurable_value: f64,
    maximal_measurable_value: f64,
    calibration: CalibrationTable,
    samples_per_measurement: usize,
}

impl<S: RawSensor> SensorArray<S> {
    /// Wrap `device` with an identity calibration and one sample per measurement
    ///
    /// # Errors
    /// [`PlatformError::Configuration`] if the device has no channels or the
    /// measurable range is invalid.
    pub fn new(
        name: impl Into<String>,
        device: S,
        minimal_measurable_value: f64,
        maximal_measurable_value: f64,
    ) -> Result<Self> {
        let name = name.into();
        let channel_count = device.channel_count();
        if channel_count == 0 {
            return Err(PlatformError::Configuration(format!(
                "{} sensors report no channels",
                name
            )));
        }
        check_range(minimal_measurable_value, maximal_measurable_value)
            .map_err(PlatformError::Configuration)?;

        Ok(Self {
            calibration: CalibrationTable::identity(
                channel_count,
                minimal_measurable_value,
                maximal_measurable_value,
            ),
            name,
            device,
            channel_count,
            minimal_measurable_value,
            maximal_measurable_value,
            samples_per_measurement: 1,
        })
    }

    /// Calibrated value per channel.
    ///
    /// Takes `samples_per_measurement` raw readings, clamps each into the
    /// measurable range, keeps the per-channel median and maps it through the
    /// calibration table.
    pub fn measure(&mut self) -> Result<Vec<f64>> {
        let mut samples = vec![Vec::with_capacity(self.samples_per_measurement); self.channel_count];

        for _ in 0..self.samples_per_measurement {
            let raw = self.device.measure_raw()?;
            if raw.len() != self.channel_count {
                return Err(PlatformError::Device(format!(
                    "{} sensors returned {} values, expected {}",
                    self.name,
                    raw.len(),
                    self.channel_count
                )));
            }
            for (channel, value) in raw.into_iter().enumerate() {
                if !value.is_finite() {
                    return Err(PlatformError::Device(format!(
                        "{} sensor {} returned {}",
                        self.name, channel, value
                    )));
                }
                samples[channel].push(
                    value.clamp(self.minimal_measurable_value, self.maximal_measurable_value),
                );
            }
        }

        let measurement: Vec<f64> = samples
            .iter_mut()
            .enumerate()
            .map(|(channel, values)| self.calibrate(channel, median(values)))
            .collect();
        trace!("{} measurement: {:?}", self.name, measurement);
        Ok(measurement)
    }

    fn calibrate(&self, channel: usize, value: f64) -> f64 {
        let span = self.maximal_measurable_value - self.minimal_measurable_value;
        if span <= 0.0 {
            return self.calibration.interpolate(channel, 0.0);
        }
        let index =
            (value - self.minimal_measurable_value) * (self.calibration.rows() - 1) as f64 / span;
        self.calibration.interpolate(channel, index)
    }

    /// Replace the calibration table
    ///
    /// # Errors
    /// [`PlatformError::InvalidArgument`] if the table does not have one
    /// column per channel or holds a non-finite value.
    pub fn set_calibration(&mut self, calibration: CalibrationTable) -> Result<()> {
        if calibration.values.iter().any(|v| !v.is_finite()) {
            return Err(PlatformError::InvalidArgument(format!(
                "{} calibration values must be finite",
                self.name
            )));
        }
        if calibration.channel_count() != self.channel_count {
            return Err(PlatformError::InvalidArgument(format!(
                "calibration has {} columns, {} sensors expect {}",
                calibration.channel_count(),
                self.name,
                self.channel_count
            )));
        }
        self.calibration = calibration;
        Ok(())
    }

    pub fn set_samples_per_measurement(&mut self, samples: usize) -> Result<()> {
        if samples == 0 {
            return Err(PlatformError::InvalidArgument(
                "at least one sample per measurement is required".to_string(),
            ));
        }
        self.samples_per_measurement = samples;
        Ok(())
    }

    /// Change the measurable range; the calibration table is kept
    pub fn set_measurable_range(&mut self, minimal: f64, maximal: f64) -> Result<()> {
        check_range(minimal, maximal).map_err(PlatformError::InvalidArgument)?;
        self.minimal_measurable_value = minimal;
        self.maximal_measurable_value = maximal;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn minimal_measurable_value(&self) -> f64 {
        self.minimal_measurable_value
    }

    pub fn maximal_measurable_value(&self) -> f64 {
        self.maximal_measurable_value
    }

    pub fn calibration(&self) -> &CalibrationTable {
        &self.calibration
    }

    pub fn samples_per_measurement(&self) -> usize {
        self.samples_per_measurement
    }

    pub fn device(&self) -> &S {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut S {
        &mut self.device
    }
}

fn check_range(minimal: f64, maximal: f64) -> std::result::Result<(), String> {
    if !minimal.is_finite() || !maximal.is_finite() {
        return Err(format!("measurable range [{}, {}] is not finite", minimal, maximal));
    }
    if minimal > maximal {
        return Err(format!("measurable range [{}, {}] is inverted", minimal, maximal));
    }
    Ok(())
}

/// Median of a non-empty sample set; mean of the middle pair for even counts
fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let middle = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[middle - 1] + values[middle]) / 2.0
    } else {
        values[middle]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::collections::VecDeque;

    /// Replays scripted readings, one row per call
    struct ScriptedSensor {
        channels: usize,
        readings: VecDeque<Vec<f64>>,
    }

    impl ScriptedSensor {
        fn new(channels: usize, readings: Vec<Vec<f64>>) -> Self {
            Self {
                channels,
                readings: readings.into(),
            }
        }
    }

    impl RawSensor for ScriptedSensor {
        fn channel_count(&self) -> usize {
            self.channels
        }

        fn measure_raw(&mut self) -> Result<Vec<f64>> {
            self.readings
                .pop_front()
                .ok_or_else(|| PlatformError::Device("script exhausted".to_string()))
        }
    }

    #[test]
    fn test_identity_calibration_returns_clamped_reading() {
        let readings = vec![vec![0.1, 0.2, 0.3], vec![-5.0, 0.5, 9.0], vec![0.0, 1.0, 0.25]];
        let mut sensors =
            SensorArray::new("test", ScriptedSensor::new(3, readings), 0.0, 1.0).unwrap();

        for (actual, expected) in sensors.measure().unwrap().into_iter().zip([0.1, 0.2, 0.3]) {
            assert_abs_diff_eq!(actual, expected, epsilon = 1e-12);
        }
        assert_eq!(sensors.measure().unwrap(), vec![0.0, 0.5, 1.0]);
        assert_eq!(sensors.measure().unwrap(), vec![0.0, 1.0, 0.25]);
    }

    #[test]
    fn test_median_filters_outliers() {
        let readings = vec![vec![0.1, 0.4], vec![0.9, 0.2], vec![0.2, 0.3]];
        let mut sensors =
            SensorArray::new("test", ScriptedSensor::new(2, readings), 0.0, 1.0).unwrap();
        sensors.set_samples_per_measurement(3).unwrap();

        let measurement = sensors.measure().unwrap();
        assert_abs_diff_eq!(measurement[0], 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(measurement[1], 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_median_of_even_count_is_mean_of_middle_pair() {
        let mut values = [0.4, 0.1, 0.3, 0.2];
        assert_abs_diff_eq!(median(&mut values), 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_calibration_nodes_are_exact() {
        let readings = vec![vec![0.0], vec![0.5], vec![1.0]];
        let mut sensors =
            SensorArray::new("test", ScriptedSensor::new(1, readings), 0.0, 1.0).unwrap();
        sensors
            .set_calibration(CalibrationTable::from_rows(&[vec![10.0], vec![20.0], vec![40.0]]).unwrap())
            .unwrap();

        assert_eq!(sensors.measure().unwrap(), vec![10.0]);
        assert_eq!(sensors.measure().unwrap(), vec![20.0]);
        assert_eq!(sensors.measure().unwrap(), vec![40.0]);
    }

    #[test]
    fn test_calibration_interpolates_between_nodes() {
        let readings = vec![vec![0.25, 0.75]];
        let mut sensors =
            SensorArray::new("test", ScriptedSensor::new(2, readings), 0.0, 1.0).unwrap();
        let table = CalibrationTable::from_rows(&[vec![0.0, 1.0], vec![2.0, 3.0], vec![4.0, 7.0]]).unwrap();
        sensors.set_calibration(table).unwrap();

        let measurement = sensors.measure().unwrap();
        assert_abs_diff_eq!(measurement[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(measurement[1], 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_degenerate_range_uses_first_row() {
        let readings = vec![vec![3.0]];
        let mut sensors =
            SensorArray::new("test", ScriptedSensor::new(1, readings), 0.5, 0.5).unwrap();
        sensors
            .set_calibration(CalibrationTable::from_rows(&[vec![1.5], vec![2.5]]).unwrap())
            .unwrap();
        assert_eq!(sensors.measure().unwrap(), vec![1.5]);
    }

    #[test]
    fn test_invalid_construction_is_rejected() {
        assert!(matches!(
            SensorArray::new("empty", ScriptedSensor::new(0, vec![]), 0.0, 1.0),
            Err(PlatformError::Configuration(_))
        ));
        assert!(matches!(
            SensorArray::new("inverted", ScriptedSensor::new(1, vec![]), 1.0, 0.0),
            Err(PlatformError::Configuration(_))
        ));
        assert!(matches!(
            SensorArray::new("nan", ScriptedSensor::new(1, vec![]), f64::NAN, 1.0),
            Err(PlatformError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let mut sensors = SensorArray::new("test", ScriptedSensor::new(2, vec![]), 0.0, 1.0).unwrap();

        assert!(matches!(
            sensors.set_samples_per_measurement(0),
            Err(PlatformError::InvalidArgument(_))
        ));
        let three_columns = CalibrationTable::from_rows(&[vec![0.0; 3], vec![1.0; 3]]).unwrap();
        assert!(matches!(
            sensors.set_calibration(three_columns),
            Err(PlatformError::InvalidArgument(_))
        ));
        assert!(matches!(
            CalibrationTable::from_rows(&[vec![0.0, f64::INFINITY]]),
            Err(PlatformError::InvalidArgument(_))
        ));
        assert!(matches!(
            CalibrationTable::from_rows(&[]),
            Err(PlatformError::InvalidArgument(_))
        ));
        assert!(matches!(
            sensors.set_measurable_range(2.0, 1.0),
            Err(PlatformError::InvalidArgument(_))
        ));
        // Rejected settings leave the array untouched
        assert_eq!(sensors.samples_per_measurement(), 1);
        assert_eq!(sensors.calibration().rows(), 2);
        assert_eq!(sensors.minimal_measurable_value(), 0.0);
    }

    #[test]
    fn test_non_finite_calibration_is_rejected() {
        let mut sensors =
            SensorArray::new("test", ScriptedSensor::new(1, vec![vec![0.5]]), 0.0, 1.0).unwrap();

        assert!(matches!(
            sensors.set_calibration(CalibrationTable::identity(1, f64::NAN, 1.0)),
            Err(PlatformError::InvalidArgument(_))
        ));
        assert!(matches!(
            sensors.set_calibration(CalibrationTable::identity(1, 0.0, f64::INFINITY)),
            Err(PlatformError::InvalidArgument(_))
        ));
        // The previous table stays in place
        assert_eq!(sensors.measure().unwrap(), vec![0.5]);
    }

    #[test]
    fn test_wrong_channel_count_from_device_is_an_error() {
        let mut sensors =
            SensorArray::new("test", ScriptedSensor::new(2, vec![vec![0.1]]), 0.0, 1.0).unwrap();
        assert!(matches!(sensors.measure(), Err(PlatformError::Device(_))));
    }
}
