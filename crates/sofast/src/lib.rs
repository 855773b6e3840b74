//! High-level entry crate for `sofast-rs`.
//!
//! Fixed-pattern deflectometry measures the surface slopes of mirror facets
//! from a single camera image of a dot screen reflected in the optic. This
//! crate re-exports the workspace:
//!
//! - [`core`]: math types, camera models, optic and screen definitions,
//! - [`image`]: blob detection, grid indexing, optic masks,
//! - [`linear`]: closed-form pose and position estimates,
//! - [`optim`]: corner pose refinement and the slope solver,
//! - [`pipeline`]: the [`ProcessSofastFixed`] orchestrator and its records.
//!
//! # Example
//!
//! ```no_run
//! use sofast::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let (orientation, camera, dots): (SpatialOrientation, CameraParams, DotLocationsFixedPattern) = unimplemented!();
//! # let image: ::image::GrayImage = unimplemented!();
//! let mut process = ProcessSofastFixed::new(orientation, camera, dots)?;
//! let measurement = MeasurementSofastFixed::new(image, Vec3::zeros(), 1019.8);
//! process.process_single_facet_optic(
//!     &measurement,
//!     &DefinitionFacet::rectangular(200.0, 200.0),
//!     &SurfaceModel::parabolic((2000.0, 2000.0), true, 1),
//!     &[Pt2::new(320.0, 240.0)],
//!     &[(0, 5)],
//! )?;
//! let optic = process.get_optic(Interpolation::Bilinear)?;
//! # Ok(())
//! # }
//! ```

/// Math types, camera models and read-only optic descriptions.
pub mod core {
    pub use sofast_core::*;
}

/// Image-side stages: blobs, grid indexing, masks and perimeters.
pub mod image {
    pub use sofast_image::*;
}

/// Closed-form estimators.
pub mod linear {
    pub use sofast_linear::*;
}

/// Non-linear refinement built on tiny-solver.
pub mod optim {
    pub use sofast_optim::*;
}

/// Orchestration, calculation records and export.
pub mod pipeline {
    pub use sofast_pipeline::*;
}

/// Deterministic synthetic scenes for tests and demos.
pub mod synthetic {
    pub use sofast_core::synthetic::*;
    pub use sofast_image::synthetic::*;
}

pub use sofast_core::{
    CameraParams, DefinitionEnsemble, DefinitionFacet, DotLocationsFixedPattern, Iso3, Pt2, Pt3,
    Real, SpatialOrientation, SurfaceModel, SurfaceShape, Vec2, Vec3,
};
pub use sofast_optim::{SlopeSolverData, SlopeSolverOptions};
pub use sofast_pipeline::{
    Interpolation, MeasurementSofastFixed, OpticGeometry, ParamsSofastFixed, PointingReference,
    ProcessError, ProcessSofastFixed, SofastFixedResult,
};

/// Convenient re-exports for common use cases.
pub mod prelude {
    pub use crate::{
        CameraParams, DefinitionEnsemble, DefinitionFacet, DotLocationsFixedPattern, Iso3, Pt2,
        Pt3, Real, SpatialOrientation, SurfaceModel, Vec2, Vec3,
    };
    pub use crate::{
        Interpolation, MeasurementSofastFixed, OpticGeometry, ParamsSofastFixed,
        PointingReference, ProcessError, ProcessSofastFixed, SofastFixedResult,
    };
}
