//! Surface slope solver.
//!
//! Given, for every active camera pixel on one facet, the pointing ray and the
//! screen point it sees, recover the mirror surface that reflects each ray
//! onto its screen point.
//!
//! The solve runs in two stages:
//! 1. a coarse fixed-point loop in the facet frame that alternates ray/surface
//!    intersection with a linear least-squares fit of tilt and shape
//!    coefficients to the per-pixel bisector slopes, holding the surface on
//!    the measure point;
//! 2. a joint Levenberg-Marquardt refinement of the SE(3) alignment and the
//!    shape coefficients over the law-of-reflection residuals.
//!
//! All inputs are in the facet frame. Outputs are expressed in the aligned
//! surface frame, whose pose in the facet frame is `trans_alignment`.

use anyhow::{anyhow, bail, ensure, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use sofast_core::{
    iso_from_rt, normal_to_slope, rotation_between, Iso3, Pt3, Real, SurfaceModel, SurfaceShape,
    Vec2, Vec3, RAY_INTERSECTION_ITERS,
};
use std::collections::HashMap;
use std::sync::Arc;
use tiny_solver::loss_functions::{HuberLoss, Loss};
use tiny_solver::manifold::se3::SE3Manifold;
use tiny_solver::problem::Problem;

use crate::factors::{
    reflection_residual_generic, AlignPriorFactor, MeasureDistanceFactor, ReflectionFactor,
};
use crate::params::{iso3_to_se3_dvec, se3_dvec_to_iso3};
use crate::robust::Huber;
use crate::solver::{solve, SolverOptions};

/// Options for [`SlopeSolver`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlopeSolverOptions {
    /// Iteration cap of the coarse fixed-point loop.
    pub coarse_max_iters: usize,
    /// Convergence threshold on piston and coefficient updates.
    pub coarse_tolerance: Real,
    /// Run the joint alignment/shape refinement after the coarse stage.
    pub joint_refine: bool,
    pub fine: SolverOptions,
    /// Weight of the measure-point distance residual.
    pub distance_weight: Real,
    /// Weight of the prior holding the alignment at its coarse estimate.
    pub alignment_prior_weight: Real,
}

impl Default for SlopeSolverOptions {
    fn default() -> Self {
        Self {
            coarse_max_iters: 20,
            coarse_tolerance: 1e-9,
            joint_refine: true,
            fine: SolverOptions::default(),
            distance_weight: 1.0,
            alignment_prior_weight: 1e-4,
        }
    }
}

/// Per-facet correspondences, all in the facet frame.
#[derive(Debug, Clone)]
pub struct SlopeSolverInput {
    pub surface: SurfaceModel,
    /// Camera position.
    pub v_optic_cam_optic: Vec3,
    /// Unit pointing direction of every active pixel.
    pub u_active_pixel_pointing_optic: Vec<Vec3>,
    /// Screen point seen by every active pixel.
    pub v_screen_points_facet: Vec<Pt3>,
    /// Screen origin.
    pub v_optic_screen_optic: Vec3,
    /// Alignment point; only its xy location is used.
    pub v_align_point_optic: Vec3,
    /// Unit pointing direction of the measure-point pixel.
    pub u_measure_pixel_pointing_optic: Vec3,
    /// Distance from the measure point to the screen origin.
    pub dist_optic_screen: Real,
}

impl SlopeSolverInput {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.u_active_pixel_pointing_optic.len() == self.v_screen_points_facet.len(),
            "pixel rays ({}) and screen points ({}) differ in length",
            self.u_active_pixel_pointing_optic.len(),
            self.v_screen_points_facet.len()
        );
        ensure!(
            !self.u_active_pixel_pointing_optic.is_empty(),
            "no pixel correspondences"
        );
        ensure!(
            self.dist_optic_screen.is_finite() && self.dist_optic_screen > 0.0,
            "invalid optic-screen distance {}",
            self.dist_optic_screen
        );
        ensure!(
            self.u_measure_pixel_pointing_optic.norm() > 0.0,
            "measure pixel direction is zero"
        );
        for (name, v) in [
            ("camera position", &self.v_optic_cam_optic),
            ("screen origin", &self.v_optic_screen_optic),
            ("alignment point", &self.v_align_point_optic),
            ("measure pixel direction", &self.u_measure_pixel_pointing_optic),
        ] {
            ensure!(v.iter().all(|c| c.is_finite()), "{name} is not finite: {v:?}");
        }
        let rays = &self.u_active_pixel_pointing_optic;
        let usable = |u: &Vec3| u.iter().all(|c| c.is_finite()) && u.norm() > 0.0;
        if let Some(i) = rays.iter().position(|u| !usable(u)) {
            bail!("pixel ray {i} is zero or not finite: {:?}", rays[i]);
        }
        let screens = &self.v_screen_points_facet;
        if let Some(i) = screens.iter().position(|p| !p.coords.iter().all(|c| c.is_finite())) {
            bail!("screen point {i} is not finite: {:?}", screens[i]);
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.u_active_pixel_pointing_optic.len()
    }
}

/// Solved surface of one facet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlopeSolverData {
    pub surface: SurfaceModel,
    /// Aligned surface frame → facet frame.
    pub trans_alignment: Iso3,
    /// Surface hit of every active pixel, aligned frame.
    pub v_surf_points_facet: Vec<Pt3>,
    /// Measured `(dz/dx, dz/dy)` at every surface point, aligned frame.
    pub slopes_facet_xy: Vec<Vec2>,
    pub coarse_iterations: usize,
    pub coarse_converged: bool,
    pub fine_converged: bool,
    /// RMS angular miss of the reflected rays (radians).
    pub rms_residual: Real,
}

/// Tilted height field in the facet frame used by the coarse stage.
#[derive(Debug, Clone)]
struct CoarseSurface {
    z0: Real,
    tilt: Vec2,
    coeffs: Vec<Real>,
}

impl CoarseSurface {
    fn height(&self, shape: &SurfaceShape, a: &Vec2, x: Real, y: Real) -> Real {
        let (dx, dy) = (x - a.x, y - a.y);
        self.z0 + self.tilt.x * dx + self.tilt.y * dy + shape.height_generic(&self.coeffs, dx, dy)
    }

    fn gradient(&self, shape: &SurfaceShape, a: &Vec2, x: Real, y: Real) -> Vec2 {
        self.tilt + shape.gradient_generic(&self.coeffs, x - a.x, y - a.y)
    }

    fn intersect(&self, shape: &SurfaceShape, a: &Vec2, origin: &Vec3, dir: &Vec3) -> Option<Vec3> {
        let denom = self.tilt.x * dir.x + self.tilt.y * dir.y - dir.z;
        if denom.abs() < 1e-15 {
            return None;
        }
        let mut t = (origin.z
            - self.z0
            - self.tilt.x * (origin.x - a.x)
            - self.tilt.y * (origin.y - a.y))
            / denom;
        if shape.num_coeffs() > 0 {
            for _ in 0..RAY_INTERSECTION_ITERS {
                let p = origin + dir * t;
                let f = p.z - self.height(shape, a, p.x, p.y);
                let g = self.gradient(shape, a, p.x, p.y);
                let df = dir.z - (g.x * dir.x + g.y * dir.y);
                t -= f / df;
            }
        }
        let p = origin + dir * t;
        (t > 0.0 && p.iter().all(|v| v.is_finite())).then_some(p)
    }
}

/// Normal bisecting the reversed incoming ray and the outgoing direction.
fn bisector_normal(incoming: &Vec3, outgoing: &Vec3) -> Option<Vec3> {
    (outgoing - incoming).try_normalize(1e-15)
}

/// Weighted linear least squares via SVD.
fn weighted_lstsq(a: &DMatrix<Real>, b: &DVector<Real>, w: &[Real]) -> Result<DVector<Real>> {
    let mut aw = a.clone();
    let mut bw = b.clone();
    for (r, &wr) in w.iter().enumerate() {
        let s = wr.sqrt();
        aw.row_mut(r).scale_mut(s);
        bw[r] *= s;
    }
    aw.svd(true, true)
        .solve(&bw, 1e-14)
        .map_err(|e| anyhow!("slope least squares failed: {e}"))
}

/// Two-stage surface slope solver for one facet.
#[derive(Debug, Clone)]
pub struct SlopeSolver {
    input: SlopeSolverInput,
    opts: SlopeSolverOptions,
}

impl SlopeSolver {
    pub fn new(input: SlopeSolverInput, opts: SlopeSolverOptions) -> Result<Self> {
        input.validate()?;
        Ok(Self { input, opts })
    }

    pub fn input(&self) -> &SlopeSolverInput {
        &self.input
    }

    fn shape(&self) -> &SurfaceShape {
        &self.input.surface.shape
    }

    fn align_xy(&self) -> Vec2 {
        self.input.v_align_point_optic.xy()
    }

    fn stride(&self) -> usize {
        self.input.surface.downsample.max(1)
    }

    /// Point on the measure ray at `dist_optic_screen` from the screen origin
    /// (far root).
    pub fn measure_point(&self) -> Result<Vec3> {
        let c = self.input.v_optic_cam_optic;
        let u = self.input.u_measure_pixel_pointing_optic.normalize();
        let oc = c - self.input.v_optic_screen_optic;
        let b = u.dot(&oc);
        let disc = b * b - (oc.norm_squared() - self.input.dist_optic_screen.powi(2));
        ensure!(
            disc >= 0.0,
            "measure ray never reaches distance {} from the screen",
            self.input.dist_optic_screen
        );
        let t = -b + disc.sqrt();
        ensure!(t > 0.0, "measure point lies behind the camera");
        Ok(c + u * t)
    }

    /// Run both stages.
    pub fn solve(&self) -> Result<SlopeSolverData> {
        let (coarse, iterations, converged) = self.solve_coarse()?;
        if !converged {
            log::warn!(
                "coarse slope solve did not converge in {} iterations",
                iterations
            );
        }
        let coarse_align = self.coarse_alignment(&coarse);
        let mut align = coarse_align;
        let mut coeffs = coarse.coeffs.clone();
        let mut fine_converged = false;

        if self.opts.joint_refine {
            match self.solve_fine(&coarse_align, &coarse.coeffs) {
                Ok((a, c, converged)) => {
                    align = a;
                    coeffs = c;
                    fine_converged = converged;
                    if !converged {
                        log::warn!(
                            "joint slope refinement did not converge in {} iterations",
                            self.opts.fine.max_iters
                        );
                    }
                }
                Err(e) => log::warn!("joint slope refinement failed, keeping coarse solution: {e}"),
            }
        }

        let data = self.evaluate(align, &coeffs, iterations, converged, fine_converged)?;
        log::info!(
            "slope solve: {} pixels, {} coarse iterations, rms residual {:.3e} rad",
            self.input.len(),
            iterations,
            data.rms_residual
        );
        Ok(data)
    }

    fn solve_coarse(&self) -> Result<(CoarseSurface, usize, bool)> {
        let shape = self.shape();
        let k = shape.num_coeffs();
        let a = self.align_xy();
        let m = self.measure_point()?;
        let cam = self.input.v_optic_cam_optic;

        let mut surf = CoarseSurface {
            z0: 0.0,
            tilt: Vec2::zeros(),
            coeffs: shape.coeffs(),
        };
        surf.z0 = m.z - shape.height_generic(&surf.coeffs, m.x - a.x, m.y - a.y);

        let mut iterations = 0;
        let mut converged = false;
        for iter in 0..self.opts.coarse_max_iters {
            iterations = iter + 1;
            let mut rows: Vec<(Vec<Real>, Real)> = Vec::new();
            for i in (0..self.input.len()).step_by(self.stride()) {
                let u = self.input.u_active_pixel_pointing_optic[i];
                let Some(p) = surf.intersect(shape, &a, &cam, &u) else {
                    continue;
                };
                let v = (self.input.v_screen_points_facet[i].coords - p).normalize();
                let Some(slope) = bisector_normal(&u, &v).as_ref().and_then(normal_to_slope) else {
                    continue;
                };
                let basis = shape.slope_basis(p.x - a.x, p.y - a.y);
                let mut rx = vec![1.0, 0.0];
                let mut ry = vec![0.0, 1.0];
                rx.extend(basis.iter().map(|b| b.0));
                ry.extend(basis.iter().map(|b| b.1));
                rows.push((rx, slope.x));
                rows.push((ry, slope.y));
            }
            ensure!(
                rows.len() >= 2 + k,
                "not enough usable pixels for the slope fit ({} rows, {} unknowns)",
                rows.len(),
                2 + k
            );

            let amat = DMatrix::from_fn(rows.len(), 2 + k, |r, c| rows[r].0[c]);
            let bvec = DVector::from_iterator(rows.len(), rows.iter().map(|r| r.1));
            let mut weights = vec![1.0; rows.len()];
            let mut x = weighted_lstsq(&amat, &bvec, &weights)?;
            if self.input.surface.robust_least_squares {
                let res = &amat * &x - &bvec;
                if let Some(huber) = Huber::from_residuals(res.as_slice()) {
                    for (w, r) in weights.iter_mut().zip(res.iter()) {
                        *w = huber.weight(*r);
                    }
                    x = weighted_lstsq(&amat, &bvec, &weights)?;
                }
            }

            let next = {
                let mut s = CoarseSurface {
                    z0: 0.0,
                    tilt: Vec2::new(x[0], x[1]),
                    coeffs: x.iter().skip(2).copied().collect(),
                };
                s.z0 = m.z
                    - s.tilt.x * (m.x - a.x)
                    - s.tilt.y * (m.y - a.y)
                    - shape.height_generic(&s.coeffs, m.x - a.x, m.y - a.y);
                s
            };

            let delta = surf
                .coeffs
                .iter()
                .zip(&next.coeffs)
                .map(|(p, q)| (p - q).abs())
                .chain([
                    (surf.tilt.x - next.tilt.x).abs(),
                    (surf.tilt.y - next.tilt.y).abs(),
                    (surf.z0 - next.z0).abs(),
                ])
                .fold(0.0, |m: Real, d| if d.is_nan() || d > m { d } else { m });
            log::debug!(
                "coarse iter {}: tilt=({:.3e}, {:.3e}) z0={:.6} delta={:.3e}",
                iterations,
                next.tilt.x,
                next.tilt.y,
                next.z0,
                delta
            );
            ensure!(
                delta.is_finite(),
                "coarse slope fit diverged at iteration {iterations}"
            );
            surf = next;
            if delta < self.opts.coarse_tolerance {
                converged = true;
                break;
            }
        }
        Ok((surf, iterations, converged))
    }

    /// Alignment placing the aligned frame on the coarse surface above the
    /// alignment point, z along the local normal.
    fn coarse_alignment(&self, surf: &CoarseSurface) -> Iso3 {
        let a = self.align_xy();
        let normal = Vec3::new(-surf.tilt.x, -surf.tilt.y, 1.0);
        let rot = rotation_between(&Vec3::z(), &normal);
        iso_from_rt(&rot, &Vec3::new(a.x, a.y, surf.z0))
    }

    /// Huber scale from the coarse reflection misses, when robust fitting is on.
    fn huber_scale(&self, align: &Iso3, coeffs: &[Real]) -> Option<Real> {
        if !self.input.surface.robust_least_squares {
            return None;
        }
        let v = iso3_to_se3_dvec(align);
        let miss: Vec<Real> = (0..self.input.len())
            .step_by(self.stride())
            .map(|i| self.reflection_residual(&v, coeffs, i).norm())
            .collect();
        Huber::from_residuals(&miss).map(|h| h.delta)
    }

    fn reflection_residual(&self, align: &DVector<Real>, coeffs: &[Real], i: usize) -> Vec3 {
        let c = self.input.v_optic_cam_optic;
        let u = self.input.u_active_pixel_pointing_optic[i];
        let s = self.input.v_screen_points_facet[i];
        reflection_residual_generic(
            align.as_view(),
            coeffs,
            self.shape(),
            [c.x, c.y, c.z],
            [u.x, u.y, u.z],
            [s.x, s.y, s.z],
        )
    }

    /// Joint refinement; the flag tells whether the optimizer converged.
    fn solve_fine(&self, init: &Iso3, coeffs: &[Real]) -> Result<(Iso3, Vec<Real>, bool)> {
        let shape = self.shape();
        let k = shape.num_coeffs();
        let blocks: Vec<&str> = if k > 0 {
            vec!["align", "surface"]
        } else {
            vec!["align"]
        };
        let cam = self.input.v_optic_cam_optic;
        let cam = [cam.x, cam.y, cam.z];

        let huber = self.huber_scale(init, coeffs);
        let mut problem = Problem::new();
        for i in (0..self.input.len()).step_by(self.stride()) {
            let u = self.input.u_active_pixel_pointing_optic[i];
            let s = self.input.v_screen_points_facet[i];
            let factor = ReflectionFactor {
                cam,
                ray: [u.x, u.y, u.z],
                screen: [s.x, s.y, s.z],
                shape: shape.clone(),
                w: 1.0,
            };
            let loss: Option<Box<dyn Loss + Send>> = match huber {
                Some(delta) => Some(Box::new(HuberLoss::new(delta))),
                None => None,
            };
            problem.add_residual_block(3, &blocks, Box::new(factor), loss);
        }

        let um = self.input.u_measure_pixel_pointing_optic.normalize();
        let so = self.input.v_optic_screen_optic;
        problem.add_residual_block(
            1,
            &blocks,
            Box::new(MeasureDistanceFactor {
                cam,
                ray: [um.x, um.y, um.z],
                screen_origin: [so.x, so.y, so.z],
                dist: self.input.dist_optic_screen,
                shape: shape.clone(),
                w: self.opts.distance_weight,
            }),
            None,
        );

        let init_vec = iso3_to_se3_dvec(init);
        let mut reference = [0.0; 7];
        reference.copy_from_slice(init_vec.as_slice());
        problem.add_residual_block(
            6,
            &["align"],
            Box::new(AlignPriorFactor {
                reference,
                w: self.opts.alignment_prior_weight,
            }),
            None,
        );
        problem.set_variable_manifold("align", Arc::new(SE3Manifold));

        let mut initial: HashMap<String, DVector<f64>> = HashMap::new();
        initial.insert("align".to_string(), init_vec);
        if k > 0 {
            initial.insert("surface".to_string(), DVector::from_column_slice(coeffs));
        }

        let solution = solve(&problem, &initial, &self.opts.fine)?;
        let align = se3_dvec_to_iso3(
            solution
                .params
                .get("align")
                .ok_or_else(|| anyhow!("missing alignment in solution"))?
                .as_view(),
        )?;
        let coeffs: Vec<Real> = if k > 0 {
            solution
                .params
                .get("surface")
                .ok_or_else(|| anyhow!("missing surface coefficients in solution"))?
                .iter()
                .copied()
                .collect()
        } else {
            Vec::new()
        };
        ensure!(
            coeffs.iter().all(|c| c.is_finite()),
            "non-finite surface coefficients"
        );
        Ok((align, coeffs, solution.converged))
    }

    /// Surface points, measured slopes and residual for the final model.
    fn evaluate(
        &self,
        align: Iso3,
        coeffs: &[Real],
        coarse_iterations: usize,
        coarse_converged: bool,
        fine_converged: bool,
    ) -> Result<SlopeSolverData> {
        let shape = self.shape();
        let inv = align.inverse();
        let origin = (inv * Pt3::from(self.input.v_optic_cam_optic)).coords;
        let align_vec = iso3_to_se3_dvec(&align);

        let mut points = Vec::with_capacity(self.input.len());
        let mut slopes = Vec::with_capacity(self.input.len());
        let mut sum_sq = 0.0;
        for i in 0..self.input.len() {
            let dir = inv.rotation * self.input.u_active_pixel_pointing_optic[i];
            let screen = inv * self.input.v_screen_points_facet[i];
            let (_, p) = shape.intersect_ray(coeffs, &origin, &dir);
            let out = (screen.coords - p).normalize();
            let slope = bisector_normal(&dir, &out)
                .as_ref()
                .and_then(normal_to_slope)
                .ok_or_else(|| anyhow!("pixel {i} reflects parallel to the surface"))?;
            points.push(Pt3::from(p));
            slopes.push(slope);
            sum_sq += self.reflection_residual(&align_vec, coeffs, i).norm_squared();
        }

        Ok(SlopeSolverData {
            surface: self.input.surface.with_coeffs(coeffs),
            trans_alignment: align,
            v_surf_points_facet: points,
            slopes_facet_xy: slopes,
            coarse_iterations,
            coarse_converged,
            fine_converged,
            rms_residual: (sum_sq / self.input.len() as Real).sqrt(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flat mirror at z = `piston`, camera and screen above it.
    fn flat_input(piston: Real) -> SlopeSolverInput {
        let cam = Vec3::new(0.0, 0.0, 1000.0);
        let screen_origin = Vec3::new(0.0, 200.0, 1000.0);
        let mut rays = Vec::new();
        let mut screens = Vec::new();
        for ix in -4..=4 {
            for iy in -4..=4 {
                let hit = Vec3::new(20.0 * ix as Real, 20.0 * iy as Real, piston);
                let u = (hit - cam).normalize();
                let r = Vec3::new(u.x, u.y, -u.z);
                let lambda = (1000.0 - hit.z) / r.z;
                rays.push(u);
                screens.push(Pt3::from(hit + r * lambda));
            }
        }
        let m = Vec3::new(0.0, 0.0, piston);
        SlopeSolverInput {
            surface: SurfaceModel::plano(false, 1),
            v_optic_cam_optic: cam,
            u_active_pixel_pointing_optic: rays,
            v_screen_points_facet: screens,
            v_optic_screen_optic: screen_origin,
            v_align_point_optic: Vec3::zeros(),
            u_measure_pixel_pointing_optic: (m - cam).normalize(),
            dist_optic_screen: (m - screen_origin).norm(),
        }
    }

    #[test]
    fn measure_point_is_far_root() {
        let solver = SlopeSolver::new(flat_input(0.0), SlopeSolverOptions::default()).unwrap();
        let m = solver.measure_point().unwrap();
        assert!(m.norm() < 1e-9, "m={m}");
    }

    #[test]
    fn flat_mirror_coarse_only() {
        let opts = SlopeSolverOptions {
            joint_refine: false,
            ..SlopeSolverOptions::default()
        };
        let data = SlopeSolver::new(flat_input(1.5), opts).unwrap().solve().unwrap();
        assert!(data.coarse_converged);
        assert!(!data.fine_converged);
        assert!((data.trans_alignment.translation.vector.z - 1.5).abs() < 1e-9);
        assert!(data.slopes_facet_xy.iter().all(|s| s.norm() < 1e-9));
        assert!(data.rms_residual < 1e-9);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let mut input = flat_input(0.0);
        input.v_screen_points_facet.pop();
        assert!(SlopeSolver::new(input, SlopeSolverOptions::default()).is_err());
    }

    #[test]
    fn non_finite_correspondences_are_rejected() {
        let mut input = flat_input(0.0);
        input.v_screen_points_facet[5].x = Real::NAN;
        let err = SlopeSolver::new(input, SlopeSolverOptions::default()).unwrap_err();
        assert!(err.to_string().contains("screen point 5"), "{err}");

        let mut input = flat_input(0.0);
        input.u_active_pixel_pointing_optic[3] = Vec3::new(0.0, Real::INFINITY, -1.0);
        let err = SlopeSolver::new(input, SlopeSolverOptions::default()).unwrap_err();
        assert!(err.to_string().contains("pixel ray 3"), "{err}");

        let mut input = flat_input(0.0);
        input.v_optic_cam_optic.z = Real::NAN;
        assert!(SlopeSolver::new(input, SlopeSolverOptions::default()).is_err());
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: SlopeSolverOptions = serde_json::from_str(r#"{"joint_refine": false}"#).unwrap();
        assert!(!opts.joint_refine);
        assert_eq!(opts.coarse_max_iters, 20);
    }
}
