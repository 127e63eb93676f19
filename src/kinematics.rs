// Stewart platform kinematics
// Inverse: end-effector pose -> six leg extensions (closed form).
// Forward: six leg extensions + measured attitude -> end-effector position.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, Result};
use crate::geometry::{MACHINE_PRECISION, circle_sphere_intersections, rotation_matrix};

/// Number of legs on the platform
pub const LEG_COUNT: usize = 6;

/// End-effector pose relative to the base frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64, // meters
    pub y: f64,
    pub z: f64,
    pub roll: f64, // radians
    pub pitch: f64,
    pub yaw: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) -> Self {
        Self {
            x,
            y,
            z,
            roll,
            pitch,
            yaw,
        }
    }

    /// Build from `[x, y, z, roll, pitch, yaw]`
    pub fn from_array(values: [f64; 6]) -> Self {
        let [x, y, z, roll, pitch, yaw] = values;
        Self::new(x, y, z, roll, pitch, yaw)
    }

    /// Returns the pose as `[x, y, z, roll, pitch, yaw]`
    pub fn as_array(&self) -> [f64; 6] {
        [self.x, self.y, self.z, self.roll, self.pitch, self.yaw]
    }

    pub fn translation(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    pub fn is_finite(&self) -> bool {
        self.as_array().iter().all(|v| v.is_finite())
    }

    /// Component-wise clamp into `[minimal, maximal]`
    pub fn clamp(&self, minimal: &Pose, maximal: &Pose) -> Pose {
        let (value, lower, upper) = (self.as_array(), minimal.as_array(), maximal.as_array());
        Pose::from_array(std::array::from_fn(|i| value[i].max(lower[i]).min(upper[i])))
    }

    /// Whether every component of `self` lies within `[minimal, maximal]`
    pub fn is_within(&self, minimal: &Pose, maximal: &Pose) -> bool {
        let (value, lower, upper) = (self.as_array(), minimal.as_array(), maximal.as_array());
        (0..6).all(|i| lower[i] <= value[i] && value[i] <= upper[i])
    }
}

/// Joint layout of the platform.
///
/// Base joints are given in the base frame, end-effector joints in the
/// end-effector frame. Leg `i` connects `base_joints[i]` to
/// `end_effector_joints[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformGeometry {
    base_joints: [Vector3<f64>; LEG_COUNT],
    end_effector_joints: [Vector3<f64>; LEG_COUNT],
}

impl PlatformGeometry {
    pub fn new(
        base_joints: [[f64; 3]; LEG_COUNT],
        end_effector_joints: [[f64; 3]; LEG_COUNT],
    ) -> Result<Self> {
        let all_finite = base_joints
            .iter()
            .chain(end_effector_joints.iter())
            .flatten()
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(PlatformError::Configuration(
                "joint positions must be finite".to_string(),
            ));
        }

        Ok(Self {
            base_joints: base_joints.map(Vector3::from),
            end_effector_joints: end_effector_joints.map(Vector3::from),
        })
    }

    pub fn base_joints(&self) -> &[Vector3<f64>; LEG_COUNT] {
        &self.base_joints
    }

    pub fn end_effector_joints(&self) -> &[Vector3<f64>; LEG_COUNT] {
        &self.end_effector_joints
    }

    /// Leg extensions that realise `pose`
    pub fn leg_extensions(&self, pose: &Pose) -> [f64; LEG_COUNT] {
        let rotation = rotation_matrix(pose.roll, pose.pitch, pose.yaw);
        let translation = pose.translation();

        std::array::from_fn(|i| {
            (self.base_joints[i] - (rotation * self.end_effector_joints[i] + translation)).norm()
        })
    }

    /// End-effector position from the first three leg extensions and a known attitude.
    ///
    /// With the attitude fixed, leg `i` constrains the position to a sphere of
    /// radius `extensions[i]` around `base_joints[i] - R * end_effector_joints[i]`.
    /// Spheres 0 and 1 meet in a circle, which is then cut with sphere 2.
    /// When two candidates remain, the one furthest above the base is chosen.
    ///
    /// # Errors
    /// [`PlatformError::GeometricInconsistency`] if the spheres do not meet or
    /// no candidate lies above the base plane.
    pub fn end_effector_position(
        &self,
        extensions: &[f64; LEG_COUNT],
        attitude: [f64; 3],
    ) -> Result<Vector3<f64>> {
        let [roll, pitch, yaw] = attitude;
        let rotation = rotation_matrix(roll, pitch, yaw);
        let centres: [Vector3<f64>; 3] =
            std::array::from_fn(|i| self.base_joints[i] - rotation * self.end_effector_joints[i]);

        let axis = centres[1] - centres[0];
        let distance = axis.norm();
        if distance < MACHINE_PRECISION {
            return Err(PlatformError::GeometricInconsistency(
                "legs 0 and 1 share their sphere centre".to_string(),
            ));
        }
        let normal = axis / distance;

        let along = (extensions[0].powi(2) - extensions[1].powi(2) + distance.powi(2))
            / (2.0 * distance);
        let radius_squared = extensions[0].powi(2) - along.powi(2);
        if radius_squared < -MACHINE_PRECISION {
            return Err(PlatformError::GeometricInconsistency(format!(
                "extensions {:.4} and {:.4} cannot meet",
                extensions[0], extensions[1]
            )));
        }
        let circle_centre = centres[0] + along * normal;
        let circle_radius = radius_squared.max(0.0).sqrt();

        let candidates = circle_sphere_intersections(
            &circle_centre,
            circle_radius,
            &normal,
            &centres[2],
            extensions[2],
        )
        .map_err(|e| PlatformError::GeometricInconsistency(e.to_string()))?;

        match candidates.as_slice() {
            [] => Err(PlatformError::GeometricInconsistency(
                "leg spheres have no common point".to_string(),
            )),
            [single] => Ok(*single),
            _ => candidates
                .iter()
                .filter(|candidate| candidate.z > 0.0)
                .max_by(|a, b| a.z.total_cmp(&b.z))
                .copied()
                .ok_or_else(|| {
                    PlatformError::GeometricInconsistency(
                        "no candidate position above the base".to_string(),
                    )
                }),
        }
    }

    /// Full pose from leg extensions and a measured attitude
    pub fn forward_kinematics(
        &self,
        extensions: &[f64; LEG_COUNT],
        attitude: [f64; 3],
    ) -> Result<Pose> {
        let position = self.end_effector_position(extensions, attitude)?;
        let [roll, pitch, yaw] = attitude;
        Ok(Pose::new(position.x, position.y, position.z, roll, pitch, yaw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_BASE_JOINTS, DEFAULT_END_EFFECTOR_JOINTS};
    use approx::assert_abs_diff_eq;

    fn default_geometry() -> PlatformGeometry {
        PlatformGeometry::new(DEFAULT_BASE_JOINTS, DEFAULT_END_EFFECTOR_JOINTS).unwrap()
    }

    #[test]
    fn test_level_pose_gives_equal_legs() {
        let geometry = default_geometry();
        let extensions = geometry.leg_extensions(&Pose::new(0.0, 0.0, 0.25, 0.0, 0.0, 0.0));

        for extension in extensions {
            assert_abs_diff_eq!(extension, extensions[0], epsilon = 1e-6);
        }
        assert_abs_diff_eq!(extensions[0], 0.2208, epsilon = 1e-4);
    }

    #[test]
    fn test_height_changes_leg_length() {
        let geometry = default_geometry();
        let low = geometry.leg_extensions(&Pose::new(0.0, 0.0, 0.21, 0.0, 0.0, 0.0));
        let high = geometry.leg_extensions(&Pose::new(0.0, 0.0, 0.27, 0.0, 0.0, 0.0));

        assert_abs_diff_eq!(low[0], 0.182, epsilon = 1e-3);
        assert_abs_diff_eq!(high[0], 0.2403, epsilon = 1e-3);
    }

    #[test]
    fn test_forward_inverts_inverse() {
        let geometry = default_geometry();
        let poses = [
            Pose::new(0.0, 0.0, 0.25, 0.0, 0.0, 0.0),
            Pose::new(0.01, -0.015, 0.23, 0.1, -0.05, 0.3),
            Pose::new(-0.02, -0.02, 0.21, -0.2, -0.2, -0.6),
            Pose::new(0.02, 0.02, 0.27, 0.2, 0.2, 0.6),
        ];

        for pose in poses {
            let extensions = geometry.leg_extensions(&pose);
            let recovered = geometry
                .forward_kinematics(&extensions, [pose.roll, pose.pitch, pose.yaw])
                .unwrap();
            for (expected, actual) in pose.as_array().iter().zip(recovered.as_array()) {
                assert_abs_diff_eq!(*expected, actual, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_unreachable_extensions_are_inconsistent() {
        let geometry = default_geometry();
        let result = geometry.end_effector_position(&[0.2, 0.2, 5.0, 0.2, 0.2, 0.2], [0.0; 3]);
        assert!(matches!(result, Err(PlatformError::GeometricInconsistency(_))));

        let result = geometry.end_effector_position(&[0.01, 0.5, 0.2, 0.2, 0.2, 0.2], [0.0; 3]);
        assert!(matches!(result, Err(PlatformError::GeometricInconsistency(_))));
    }

    #[test]
    fn test_non_finite_joints_are_rejected() {
        let mut base = DEFAULT_BASE_JOINTS;
        base[3][1] = f64::NAN;
        assert!(matches!(
            PlatformGeometry::new(base, DEFAULT_END_EFFECTOR_JOINTS),
            Err(PlatformError::Configuration(_))
        ));
    }

    #[test]
    fn test_pose_clamp_and_bounds() {
        let minimal = Pose::new(-0.02, -0.02, 0.21, -0.2, -0.2, -0.6);
        let maximal = Pose::new(0.02, 0.02, 0.27, 0.2, 0.2, 0.6);

        let clamped = Pose::new(0.5, -0.5, 0.25, 0.0, 1.0, -1.0).clamp(&minimal, &maximal);
        assert_eq!(clamped, Pose::new(0.02, -0.02, 0.25, 0.0, 0.2, -0.6));
        assert!(clamped.is_within(&minimal, &maximal));
        assert!(!Pose::default().is_within(&minimal, &maximal));
    }
}
