//! Fixed-pattern deflectometry processing.
//!
//! [`ProcessSofastFixed`] runs the full chain on one capture:
//!
//! 1. optic mask from the capture,
//! 2. optic pose from the mask perimeter ([`geometry`]),
//! 3. dot detection and grid indexing,
//! 4. per-facet slope solve,
//! 5. for ensembles, facet alignment on a pointing reference ([`ensemble`]).
//!
//! Results are kept as plain serde records ([`records`]) and can be written
//! to a hierarchical JSON file ([`export`]).
//!
//! ```no_run
//! use sofast_core::synthetic::SyntheticScene;
//! use sofast_core::{Pt2, SurfaceModel, Vec3};
//! use sofast_pipeline::{MeasurementSofastFixed, ProcessSofastFixed};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let scene = SyntheticScene::facing_camera()?;
//! let image = image::GrayImage::new(640, 480);
//! let measurement = MeasurementSofastFixed::new(image, Vec3::zeros(), 1019.8);
//!
//! let mut process = ProcessSofastFixed::new(scene.orientation, scene.camera, scene.dots)?;
//! let facet = sofast_core::DefinitionFacet::rectangular(200.0, 200.0);
//! let result = process.process_single_facet_optic(
//!     &measurement,
//!     &facet,
//!     &SurfaceModel::plano(false, 1),
//!     &[Pt2::new(320.0, 240.0)],
//!     &[(0, 5)],
//! )?;
//! println!("rms residual: {}", result.slope_data[0].rms_residual);
//! process.save_to_json("sofast.json", "")?;
//! # Ok(())
//! # }
//! ```

pub mod ensemble;
mod error;
pub mod export;
pub mod geometry;
mod measurement;
pub mod optic;
mod params;
pub mod process;
pub mod records;

pub use ensemble::{calculate_facet_pointing, EnsembleError, PointingReference};
pub use error::{GeometryError, ProcessError};
pub use export::Records;
pub use measurement::{MeasurementInfo, MeasurementSofastFixed};
pub use optic::{Interpolation, MirrorPoint, OpticGeometry};
pub use params::{GeometryParams, ParamsSofastFixed};
pub use process::{OpticType, ProcessSofastFixed, SofastFixedResult};
