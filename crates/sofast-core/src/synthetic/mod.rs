//! Deterministic synthetic deflectometry scenes.
//!
//! The helpers here place a camera, a dot screen and one or more mirror
//! facets with exactly known poses, then either
//! - mirror screen dots through flat facets to get their image pixels
//!   (used to render synthetic captures), or
//! - trace pixel rays off an arbitrary [`crate::SurfaceShape`] back onto the
//!   screen (used to build slope-solver correspondences).
//!
//! # Example
//!
//! ```no_run
//! use sofast_core::synthetic::SyntheticScene;
//!
//! let scene = SyntheticScene::facing_camera().unwrap();
//! let facets = scene.single_facet_layout(200.0);
//! let dots = scene.visible_dots(&facets, 15.0);
//! assert!(!dots.is_empty());
//! ```

mod scene;

pub use scene::*;
