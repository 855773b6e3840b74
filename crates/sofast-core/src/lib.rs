//! Core math and geometry primitives for `sofast-rs`.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Pt3`, ...) and rotation helpers,
//! - the calibrated camera model used to turn image pixels into pointing rays,
//! - read-only optic descriptions: facet outlines, ensemble layouts, the
//!   fixed dot pattern and the camera/screen orientation,
//! - parametric mirror surface models,
//! - synthetic scene builders for tests.

/// Linear algebra type aliases and helpers.
pub mod math;
mod camera;
mod dot_pattern;
mod optic;
mod orientation;
mod region;
mod surface;

/// Synthetic deflectometry scenes with exact ground truth.
pub mod synthetic;

pub use camera::*;
pub use dot_pattern::*;
pub use math::*;
pub use optic::*;
pub use orientation::*;
pub use region::*;
pub use surface::*;
