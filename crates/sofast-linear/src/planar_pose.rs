//! Closed-form pose of a flat outline seen by a calibrated camera.
//!
//! Corners are given in normalized image coordinates (`K = I`), so the
//! plane-induced homography is directly `[r1 r2 t]` up to scale.

use nalgebra::{Rotation3, SMatrix, Translation3, UnitQuaternion};
use sofast_core::{from_homogeneous, to_homogeneous, Iso3, Mat3, Pt2, Real, Vec3};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanarPoseError {
    #[error("need at least 4 point correspondences, got {0}")]
    NotEnoughPoints(usize),
    #[error("point sets differ in length: {0} vs {1}")]
    LengthMismatch(usize, usize),
    #[error("points are coincident or collinear")]
    Degenerate,
}

/// Similarity that moves a point set to zero mean and unit RMS radius.
fn conditioner(points: &[Pt2]) -> Result<Mat3, PlanarPoseError> {
    let n = points.len() as Real;
    let mean = points.iter().map(|p| p.coords).sum::<nalgebra::Vector2<Real>>() / n;
    let rms = (points.iter().map(|p| (p.coords - mean).norm_squared()).sum::<Real>() / n).sqrt();
    if rms <= Real::EPSILON {
        return Err(PlanarPoseError::Degenerate);
    }
    let s = 1.0 / rms;
    Ok(Mat3::new(s, 0.0, -s * mean.x, 0.0, s, -s * mean.y, 0.0, 0.0, 1.0))
}

/// Homography `H` with `dst ~ H src`, normalized so `H[(2, 2)] = 1` when possible.
///
/// Direct linear transform on conditioned points; the null vector is taken
/// as the eigenvector of `AᵀA` with the smallest eigenvalue.
pub fn homography_dlt(src: &[Pt2], dst: &[Pt2]) -> Result<Mat3, PlanarPoseError> {
    if src.len() != dst.len() {
        return Err(PlanarPoseError::LengthMismatch(src.len(), dst.len()));
    }
    if src.len() < 4 {
        return Err(PlanarPoseError::NotEnoughPoints(src.len()));
    }
    let c_src = conditioner(src)?;
    let c_dst = conditioner(dst)?;

    let mut ata = SMatrix::<Real, 9, 9>::zeros();
    for (s, d) in src.iter().zip(dst) {
        let x = c_src * to_homogeneous(s);
        let u = from_homogeneous(&(c_dst * to_homogeneous(d)));
        let rows = [
            [x.x, x.y, 1.0, 0.0, 0.0, 0.0, -u.x * x.x, -u.x * x.y, -u.x],
            [0.0, 0.0, 0.0, x.x, x.y, 1.0, -u.y * x.x, -u.y * x.y, -u.y],
        ];
        for r in rows {
            let row = SMatrix::<Real, 1, 9>::from_row_slice(&r);
            ata += row.transpose() * row;
        }
    }

    let eig = ata.symmetric_eigen();
    let (min_idx, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .ok_or(PlanarPoseError::Degenerate)?;
    let h = eig.eigenvectors.column(min_idx);
    let h_cond = Mat3::from_fn(|r, c| h[3 * r + c]);

    let c_dst_inv = c_dst.try_inverse().ok_or(PlanarPoseError::Degenerate)?;
    let mut hmtx = c_dst_inv * h_cond * c_src;
    if hmtx[(2, 2)].abs() > Real::EPSILON {
        hmtx /= hmtx[(2, 2)];
    }
    Ok(hmtx)
}

/// Split a normalized-coordinate homography of the plane `z = 0` into a pose.
///
/// The overall sign is picked so the outline lies in front of the camera.
pub fn pose_from_homography(hmtx: &Mat3) -> Result<Iso3, PlanarPoseError> {
    let h1: Vec3 = hmtx.column(0).into_owned();
    let h2: Vec3 = hmtx.column(1).into_owned();
    let h3: Vec3 = hmtx.column(2).into_owned();
    let norm = (h1.norm() * h2.norm()).sqrt();
    if norm <= Real::EPSILON {
        return Err(PlanarPoseError::Degenerate);
    }
    let scale = h3.z.signum() / norm;

    let (r1, r2) = (h1 * scale, h2 * scale);
    let approx = Mat3::from_columns(&[r1, r2, r1.cross(&r2)]);
    // Gram-Schmidt seed, then pull to the closest rotation.
    let e1 = r1.normalize();
    let e2 = (r2 - e1 * e1.dot(&r2)).normalize();
    let seed = Rotation3::from_matrix_unchecked(Mat3::from_columns(&[e1, e2, e1.cross(&e2)]));
    let rot = Rotation3::from_matrix_eps(&approx, 1e-12, 100, seed);
    Ok(Iso3::from_parts(
        Translation3::from(h3 * scale),
        UnitQuaternion::from_rotation_matrix(&rot),
    ))
}

/// Pose of a planar outline from its `(x, y)` corners and their normalized
/// image coordinates.
pub fn planar_pose(object_xy: &[Pt2], normalized: &[Pt2]) -> Result<Iso3, PlanarPoseError> {
    pose_from_homography(&homography_dlt(object_xy, normalized)?)
}
