//! Non-linear optimisation for fixed-pattern deflectometry.
//!
//! Problems are expressed as tiny-solver graphs built from generic
//! residual functions (`T: RealField`), so the same code evaluates plain
//! `f64` residuals and the dual numbers tiny-solver uses for Jacobians.
//!
//! - [`problems::facet_pose`]: refine an optic pose from its image corners,
//! - [`problems::slope_solver`]: fit a surface and alignment so the law of
//!   reflection maps every camera pixel ray onto its known screen point.

pub mod factors;
pub mod params;
pub mod problems;
pub mod robust;
pub mod solver;

pub use problems::facet_pose::{corner_rms_px, refine_pose_from_corners, PoseRefineResult};
pub use problems::slope_solver::{SlopeSolver, SlopeSolverData, SlopeSolverInput, SlopeSolverOptions};
pub use solver::{LinearSolver, SolverOptions};
