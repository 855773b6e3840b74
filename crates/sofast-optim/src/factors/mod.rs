//! Residual factors.
//!
//! Factors keep their measurement data in `f64` and evaluate residuals for any
//! `T: RealField`, so tiny-solver can differentiate them with dual numbers and
//! reporting code can call the same maths with plain `f64`.

pub mod corner;
pub mod reflection;

pub use corner::*;
pub use reflection::*;
