//! SE(3) parameter conversions.
//!
//! Poses are packed as `[qx, qy, qz, qw, tx, ty, tz]`, the layout expected by
//! tiny-solver's `SE3Manifold`.

use anyhow::{ensure, Result};
use nalgebra::{convert, DVector, DVectorView, Quaternion, RealField, UnitQuaternion, Vector3};
use sofast_core::Iso3;

pub const SE3_DIM: usize = 7;

pub fn iso3_to_se3_dvec(pose: &Iso3) -> DVector<f64> {
    let q = pose.rotation.into_inner();
    let t = pose.translation.vector;
    nalgebra::dvector![q.i, q.j, q.k, q.w, t.x, t.y, t.z]
}

pub fn se3_dvec_to_iso3(v: DVectorView<'_, f64>) -> Result<Iso3> {
    ensure!(
        v.len() == SE3_DIM,
        "expected se3 vector of length {}, got {}",
        SE3_DIM,
        v.len()
    );
    let (rot, trans) = se3_parts(v);
    Ok(Iso3::from_parts(trans.into(), rot))
}

/// Rotation and translation of a packed pose, generic for autodiff.
pub fn se3_parts<T: RealField>(v: DVectorView<'_, T>) -> (UnitQuaternion<T>, Vector3<T>) {
    debug_assert!(v.len() == SE3_DIM, "pose must have 7 params");
    let quat = Quaternion::new(v[3].clone(), v[0].clone(), v[1].clone(), v[2].clone());
    let rot = UnitQuaternion::from_quaternion(quat);
    let t = Vector3::new(v[4].clone(), v[5].clone(), v[6].clone());
    (rot, t)
}

/// Map a point from the pose's target frame back into its source frame
/// (`R^T (p - t)`).
pub fn se3_inverse_transform<T: RealField>(
    rot: &UnitQuaternion<T>,
    t: &Vector3<T>,
    p: &Vector3<T>,
) -> Vector3<T> {
    rot.inverse_transform_vector(&(p - t))
}

pub fn vec3_const<T: RealField>(v: [f64; 3]) -> Vector3<T> {
    Vector3::new(
        convert::<f64, T>(v[0]),
        convert::<f64, T>(v[1]),
        convert::<f64, T>(v[2]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Translation3, UnitQuaternion};

    #[test]
    fn packing_roundtrip() {
        let pose = Iso3::from_parts(
            Translation3::new(1.0, -2.0, 3.0),
            UnitQuaternion::from_euler_angles(0.1, 0.2, -0.3),
        );
        let v = iso3_to_se3_dvec(&pose);
        let back = se3_dvec_to_iso3(v.as_view()).unwrap();
        assert!((back.translation.vector - pose.translation.vector).norm() < 1e-12);
        assert!(back.rotation.angle_to(&pose.rotation) < 1e-12);
    }

    #[test]
    fn inverse_transform_matches_isometry() {
        let pose = Iso3::from_parts(
            Translation3::new(0.5, 0.0, 10.0),
            UnitQuaternion::from_euler_angles(0.0, 0.4, 0.1),
        );
        let v = iso3_to_se3_dvec(&pose);
        let (rot, t) = se3_parts(v.as_view());
        let p = Vector3::new(1.0, 2.0, 3.0);
        let expected = pose.inverse_transform_point(&p.into()).coords;
        assert!((se3_inverse_transform(&rot, &t, &p) - expected).norm() < 1e-12);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let v = DVector::<f64>::zeros(6);
        assert!(se3_dvec_to_iso3(v.as_view()).is_err());
    }
}
