// Closed-form geometry used by the forward kinematics
//
// All vectors are in metres, angles in radians.

use nalgebra::{Matrix3, Rotation3, Vector3};

use crate::error::{PlatformError, Result};

/// Tolerance below which lengths and distances are considered equal
pub const MACHINE_PRECISION: f64 = 1e-12;

/// Rotation matrix for roll (about x), pitch (about y) and yaw (about z).
///
/// Composed as `Rz(yaw) * Ry(pitch) * Rx(roll)`.
pub fn rotation_matrix(roll: f64, pitch: f64, yaw: f64) -> Matrix3<f64> {
    Rotation3::from_euler_angles(roll, pitch, yaw).into_inner()
}

/// Intersection points between a circle and a sphere.
///
/// The circle lies in the plane through `circle_centre` with normal
/// `circle_normal`. The sphere is cut by that plane into a second circle, and
/// the two coplanar circles are intersected.
///
/// Returns zero, one (tangency) or two points.
///
/// # Errors
/// [`PlatformError::InvalidArgument`] for non-finite input, negative radii, a
/// zero normal, or when circle and sphere cross section coincide (infinitely
/// many intersections).
pub fn circle_sphere_intersections(
    circle_centre: &Vector3<f64>,
    circle_radius: f64,
    circle_normal: &Vector3<f64>,
    sphere_centre: &Vector3<f64>,
    sphere_radius: f64,
) -> Result<Vec<Vector3<f64>>> {
    let all_finite = circle_centre.iter().all(|v| v.is_finite())
        && circle_normal.iter().all(|v| v.is_finite())
        && sphere_centre.iter().all(|v| v.is_finite())
        && circle_radius.is_finite()
        && sphere_radius.is_finite();
    if !all_finite {
        return Err(PlatformError::InvalidArgument(
            "circle/sphere parameters must be finite".to_string(),
        ));
    }
    if circle_radius < 0.0 || sphere_radius < 0.0 {
        return Err(PlatformError::InvalidArgument(format!(
            "radii must be non-negative, got {} and {}",
            circle_radius, sphere_radius
        )));
    }
    let normal = circle_normal.try_normalize(MACHINE_PRECISION).ok_or_else(|| {
        PlatformError::InvalidArgument("circle normal must not be zero".to_string())
    })?;

    // Signed distance from the sphere centre to the circle's plane
    let plane_distance = normal.dot(&(circle_centre - sphere_centre));
    if plane_distance.abs() > sphere_radius + MACHINE_PRECISION {
        return Ok(Vec::new());
    }

    let inner_centre = sphere_centre + plane_distance * normal;
    let inner_radius = (sphere_radius.powi(2) - plane_distance.powi(2)).max(0.0).sqrt();

    let offset = inner_centre - circle_centre;
    let centre_distance = offset.norm();

    if centre_distance < MACHINE_PRECISION
        && (circle_radius - inner_radius).abs() < MACHINE_PRECISION
    {
        if circle_radius > MACHINE_PRECISION {
            return Err(PlatformError::InvalidArgument(
                "circle and sphere cross section coincide".to_string(),
            ));
        }
        // Both degenerate to the same point
        return Ok(vec![*circle_centre]);
    }

    if centre_distance > circle_radius + inner_radius + MACHINE_PRECISION
        || centre_distance < (circle_radius - inner_radius).abs() - MACHINE_PRECISION
        || centre_distance < MACHINE_PRECISION
    {
        return Ok(Vec::new());
    }

    let x_unit = offset / centre_distance;
    let x = (circle_radius.powi(2) - inner_radius.powi(2) + centre_distance.powi(2))
        / (2.0 * centre_distance);

    if (circle_radius - x.abs()).abs() < MACHINE_PRECISION {
        return Ok(vec![circle_centre + x * x_unit]);
    }

    let y = (circle_radius.powi(2) - x.powi(2)).max(0.0).sqrt();
    let y_unit = x_unit.cross(&normal).normalize();

    Ok(vec![
        circle_centre + x * x_unit + y * y_unit,
        circle_centre + x * x_unit - y * y_unit,
    ])
}
