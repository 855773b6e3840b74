//! Optic position and orientation from the measured optic-to-screen distance.
//!
//! All vectors are expressed in the camera frame.

use sofast_core::{Real, Rot3, Vec3};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpatialError {
    #[error("no point on the ray lies {dist} from the screen origin")]
    NoIntersection { dist: Real },
    #[error("degenerate geometry: {0}")]
    Degenerate(&'static str),
}

/// Point on the camera ray `u_cam` whose distance to the screen origin is `dist`.
///
/// Takes the far root of `|t u - o| = dist`, which is the one in front of the
/// camera when the camera lies inside the sphere around the screen origin.
pub fn t_from_distance(u_cam: &Vec3, dist: Real, v_cam_screen_cam: &Vec3) -> Result<Vec3, SpatialError> {
    let u = u_cam
        .try_normalize(1e-15)
        .ok_or(SpatialError::Degenerate("zero-length pointing vector"))?;
    let b = u.dot(v_cam_screen_cam);
    let disc = b * b - v_cam_screen_cam.norm_squared() + dist * dist;
    if disc < 0.0 {
        return Err(SpatialError::NoIntersection { dist });
    }
    let t = b + disc.sqrt();
    if t <= 0.0 {
        return Err(SpatialError::NoIntersection { dist });
    }
    Ok(u * t)
}

/// Expected optic orientation (`optic -> camera`) at `v_cam_optic_cam`.
///
/// The optic +z axis bisects the directions to the camera and to the screen
/// origin; +x follows the camera x axis projected onto the optic plane.
pub fn r_from_position(v_cam_optic_cam: &Vec3, v_cam_screen_cam: &Vec3) -> Result<Rot3, SpatialError> {
    let to_cam = (-v_cam_optic_cam)
        .try_normalize(1e-15)
        .ok_or(SpatialError::Degenerate("optic at camera origin"))?;
    let to_screen = (v_cam_screen_cam - v_cam_optic_cam)
        .try_normalize(1e-15)
        .ok_or(SpatialError::Degenerate("optic at screen origin"))?;
    let z = (to_cam + to_screen)
        .try_normalize(1e-12)
        .ok_or(SpatialError::Degenerate("camera and screen on opposite sides"))?;

    let reference = if Vec3::x().dot(&z).abs() < 0.99 {
        Vec3::x()
    } else {
        Vec3::y()
    };
    let x = (reference - z * reference.dot(&z)).normalize();
    let y = z.cross(&x);
    Ok(Rot3::from_basis_unchecked(&[x, y, z]))
}

/// Scale the optic position so the measure point sits exactly `dist` from
/// the screen origin.
///
/// `v_meas_pt_optic_cam` is the measure point offset from the optic origin,
/// already rotated into the camera frame. The root closest to the current
/// scale (1) is returned.
pub fn refine_v_distance(
    v_cam_optic_cam: &Vec3,
    dist: Real,
    v_cam_screen_cam: &Vec3,
    v_meas_pt_optic_cam: &Vec3,
) -> Result<Vec3, SpatialError> {
    let v = v_cam_optic_cam;
    let w = v_meas_pt_optic_cam - v_cam_screen_cam;
    let a = v.norm_squared();
    if a < 1e-24 {
        return Err(SpatialError::Degenerate("optic at camera origin"));
    }
    let b = 2.0 * v.dot(&w);
    let c = w.norm_squared() - dist * dist;
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return Err(SpatialError::NoIntersection { dist });
    }
    let sq = disc.sqrt();
    let roots = [(-b + sq) / (2.0 * a), (-b - sq) / (2.0 * a)];
    let scale = roots
        .into_iter()
        .filter(|s| *s > 0.0)
        .min_by(|a, b| (a - 1.0).abs().total_cmp(&(b - 1.0).abs()))
        .ok_or(SpatialError::NoIntersection { dist })?;
    log::debug!("refine_v_distance: scale {scale:.6}");
    Ok(v * scale)
}
