//! Optic pose refinement from image corners.
//!
//! Minimizes the reprojection error of the known optic corners (optic frame)
//! against their refined image locations, given as undistorted normalized
//! coordinates. The pose maps optic coordinates into the camera frame.

use anyhow::{anyhow, ensure, Result};
use nalgebra::DVector;
use sofast_core::{Iso3, Pt2, Pt3, Real};
use std::collections::HashMap;
use std::sync::Arc;
use tiny_solver::manifold::se3::SE3Manifold;
use tiny_solver::problem::Problem;

use crate::factors::CornerFactor;
use crate::params::{iso3_to_se3_dvec, se3_dvec_to_iso3};
use crate::solver::{solve, SolverOptions};

#[derive(Debug, Clone)]
pub struct PoseRefineResult {
    /// Optic → camera transform.
    pub pose: Iso3,
    /// RMS corner reprojection error in pixels.
    pub rms_px: Real,
}

/// RMS reprojection error in pixels of `pose` over the corner set.
pub fn corner_rms_px(pose: &Iso3, obj: &[Pt3], obs_normalized: &[Pt2], focal: Real) -> Real {
    if obj.is_empty() {
        return 0.0;
    }
    let v = iso3_to_se3_dvec(pose);
    let sum: Real = obj
        .iter()
        .zip(obs_normalized)
        .map(|(pw, uv)| {
            CornerFactor::new(*pw, *uv, focal)
                .residual(v.as_view())
                .norm_squared()
        })
        .sum();
    (sum / obj.len() as Real).sqrt()
}

/// Refine `init` so the projected corners match `obs_normalized`.
///
/// `focal` scales normalized residuals to pixels.
pub fn refine_pose_from_corners(
    obj: &[Pt3],
    obs_normalized: &[Pt2],
    init: Iso3,
    focal: Real,
    opts: &SolverOptions,
) -> Result<PoseRefineResult> {
    ensure!(
        obj.len() == obs_normalized.len(),
        "corner count mismatch: {} object vs {} image",
        obj.len(),
        obs_normalized.len()
    );
    ensure!(obj.len() >= 3, "need at least 3 corners, got {}", obj.len());
    ensure!(focal > 0.0 && focal.is_finite(), "invalid focal scale {focal}");

    let mut problem = Problem::new();
    for (pw, uv) in obj.iter().zip(obs_normalized) {
        let factor = CornerFactor::new(*pw, *uv, focal);
        problem.add_residual_block(2, &["pose"], Box::new(factor), None);
    }
    problem.set_variable_manifold("pose", Arc::new(SE3Manifold));

    let mut initial: HashMap<String, DVector<f64>> = HashMap::new();
    initial.insert("pose".to_string(), iso3_to_se3_dvec(&init));

    let solution = solve(&problem, &initial, opts)?;
    if !solution.converged {
        log::warn!("corner pose refinement hit its iteration cap ({})", opts.max_iters);
    }
    let pose_vec = solution
        .params
        .get("pose")
        .ok_or_else(|| anyhow!("missing pose in solution"))?;
    let pose = se3_dvec_to_iso3(pose_vec.as_view())?;
    let rms_px = corner_rms_px(&pose, obj, obs_normalized, focal);
    log::debug!(
        "corner pose refine: rms {:.4} px -> {:.4} px",
        corner_rms_px(&init, obj, obs_normalized, focal),
        rms_px
    );

    Ok(PoseRefineResult { pose, rms_px })
}
