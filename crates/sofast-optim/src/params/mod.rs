//! Parameter block packing for tiny-solver.

pub mod pose_se3;

pub use pose_se3::*;
