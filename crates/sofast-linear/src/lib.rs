//! Closed-form estimators used to initialise optic poses.
//!
//! - [`planar_pose`]: pose of a flat facet outline from its imaged corners,
//! - [`t_from_distance`], [`r_from_position`], [`refine_v_distance`]:
//!   optic position/orientation guesses from the measured optic-to-screen
//!   distance.

mod planar_pose;
mod spatial;

pub use planar_pose::*;
pub use spatial::*;
