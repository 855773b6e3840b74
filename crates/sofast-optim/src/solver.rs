//! Levenberg-Marquardt settings shared by every problem in this crate.

use anyhow::{anyhow, ensure, Result};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tiny_solver::linear::sparse::LinearSolverType;
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::problem::Problem;
use tiny_solver::LevenbergMarquardtOptimizer;

/// Named parameter blocks, as tiny-solver takes and returns them.
pub type ParamBlocks = HashMap<String, DVector<f64>>;

/// Factorization used for the normal equations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearSolver {
    #[default]
    Cholesky,
    Qr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub max_iters: usize,
    pub linear_solver: LinearSolver,
    /// Stop once the cost drops by less than this between iterations.
    pub abs_tolerance: f64,
    /// Same as `abs_tolerance`, relative to the current cost.
    pub rel_tolerance: f64,
    /// Stop once the cost itself is below this.
    pub cost_tolerance: f64,
    /// Let tiny-solver print its per-iteration table.
    pub verbose: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            linear_solver: LinearSolver::Cholesky,
            abs_tolerance: 1e-12,
            rel_tolerance: 1e-10,
            cost_tolerance: 1e-16,
            verbose: false,
        }
    }
}

impl From<&SolverOptions> for OptimizerOptions {
    fn from(o: &SolverOptions) -> Self {
        OptimizerOptions {
            max_iteration: o.max_iters,
            verbosity_level: usize::from(o.verbose),
            linear_solver_type: match o.linear_solver {
                LinearSolver::Cholesky => LinearSolverType::SparseCholesky,
                LinearSolver::Qr => LinearSolverType::SparseQR,
            },
            min_abs_error_decrease_threshold: o.abs_tolerance,
            min_rel_error_decrease_threshold: o.rel_tolerance,
            min_error_threshold: o.cost_tolerance,
            ..OptimizerOptions::default()
        }
    }
}

/// Extra iterations used to check that a returned solution has settled.
const SETTLE_ITERS: usize = 2;

/// Refined blocks and whether the optimizer actually met a stopping tolerance.
#[derive(Debug, Clone)]
pub struct Solution {
    pub params: ParamBlocks,
    /// `false` when `max_iters` ran out while the cost was still dropping.
    pub converged: bool,
    /// `|r|^2` at `params`, loss functions applied.
    pub cost: f64,
}

/// Run Levenberg-Marquardt from `initial` and return the refined blocks.
///
/// tiny-solver hands back its last iterate whether or not a tolerance was
/// met, so convergence is judged here: the cost must already be below
/// `cost_tolerance`, or a short continuation from the returned point must
/// not lower it by more than `abs_tolerance` / `rel_tolerance`. The
/// continuation is only a check; the returned blocks respect `max_iters`.
pub fn solve(problem: &Problem, initial: &ParamBlocks, opts: &SolverOptions) -> Result<Solution> {
    let lm = LevenbergMarquardtOptimizer::default();
    let params = lm
        .optimize(problem, initial, Some(opts.into()))
        .ok_or_else(|| anyhow!("levenberg-marquardt did not return a solution"))?;
    let cost = squared_residual(problem, &params);
    ensure!(cost.is_finite(), "levenberg-marquardt produced a non-finite cost");
    if log::log_enabled!(log::Level::Trace) {
        log::trace!("lm cost {:.3e} -> {:.3e}", squared_residual(problem, initial), cost);
    }

    let converged = cost < opts.cost_tolerance || {
        let settle = OptimizerOptions {
            max_iteration: SETTLE_ITERS,
            verbosity_level: 0,
            ..OptimizerOptions::from(opts)
        };
        match lm.optimize(problem, &params, Some(settle)) {
            Some(next) => {
                let drop = cost - squared_residual(problem, &next);
                drop < opts.abs_tolerance || drop / cost < opts.rel_tolerance
            }
            None => false,
        }
    };
    if !converged {
        log::debug!(
            "levenberg-marquardt stopped after {} iterations with cost {:.3e} still dropping",
            opts.max_iters,
            cost
        );
    }
    Ok(Solution {
        params,
        converged,
        cost,
    })
}

/// `|r|^2` of a problem at the given blocks, loss functions applied; the same
/// cost tiny-solver applies its tolerances to.
pub fn squared_residual(problem: &Problem, params: &ParamBlocks) -> f64 {
    let blocks = problem.initialize_parameter_blocks(params);
    let residuals = problem.compute_residuals(&blocks, true);
    residuals.as_ref().squared_norm_l2()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_fill_missing_fields() {
        let o: SolverOptions = serde_json::from_str(r#"{"max_iters": 7, "linear_solver": "qr"}"#).unwrap();
        assert_eq!(o.max_iters, 7);
        assert_eq!(o.linear_solver, LinearSolver::Qr);
        assert_eq!(o.abs_tolerance, 1e-12);

        let lm = OptimizerOptions::from(&o);
        assert_eq!(lm.max_iteration, 7);
        assert_eq!(lm.verbosity_level, 0);
    }

    /// Residual `x - target`, one scalar block.
    struct Offset(f64);

    impl<T: nalgebra::RealField> tiny_solver::factors::Factor<T> for Offset {
        fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
            DVector::from_element(1, params[0][0].clone() - nalgebra::convert::<f64, T>(self.0))
        }
    }

    /// Residual `exp(x) - 1`: Gauss-Newton steps shrink the cost geometrically
    /// from far out, so a single iteration leaves it still dropping.
    struct Exponential;

    impl<T: nalgebra::RealField> tiny_solver::factors::Factor<T> for Exponential {
        fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
            DVector::from_element(1, params[0][0].clone().exp() - T::one())
        }
    }

    fn single(name: &str, v: &[f64]) -> ParamBlocks {
        HashMap::from([(name.to_string(), DVector::from_column_slice(v))])
    }

    #[test]
    fn solved_problem_reports_convergence() {
        let mut problem = Problem::new();
        problem.add_residual_block(1, &["x"], Box::new(Offset(3.0)), None);
        let sol = solve(&problem, &single("x", &[0.0]), &SolverOptions::default()).unwrap();
        assert!(sol.converged);
        assert!((sol.params["x"][0] - 3.0).abs() < 1e-6);
        assert!(sol.cost < 1e-10);
    }

    #[test]
    fn iteration_cap_is_not_reported_as_convergence() {
        let mut problem = Problem::new();
        problem.add_residual_block(1, &["x"], Box::new(Exponential), None);
        let initial = single("x", &[3.0]);
        let capped = SolverOptions {
            max_iters: 1,
            ..SolverOptions::default()
        };
        let sol = solve(&problem, &initial, &capped).unwrap();
        assert!(!sol.converged, "cost {}", sol.cost);

        let full = solve(&problem, &initial, &SolverOptions::default()).unwrap();
        assert!(full.converged);
        assert!(full.cost < sol.cost);
        assert!(full.params["x"][0].abs() < 1e-6);
    }
}
