use sofast_core::{CameraError, DotPatternError, OpticDefinitionError, Real};
use sofast_image::{BlobIndexError, MaskError, PerimeterError};
use sofast_linear::SpatialError;
use thiserror::Error;

use crate::ensemble::EnsembleError;

/// Failures while establishing the optic pose and the facet correspondences.
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("optic mask is empty")]
    EmptyMask,
    #[error("spatial orientation contains non-finite values")]
    NonFiniteOrientation,
    #[error("facet {facet} corner {corner} does not project into the camera")]
    ProjectionFailed { facet: usize, corner: usize },
    #[error("facet {0}: no indexed dots inside the facet region")]
    NoCorrespondences(usize),
    #[error("facet {facet}: dot ({ix}, {iy}) has no finite screen location")]
    UnmeasuredDot { facet: usize, ix: i32, iy: i32 },
    #[error("facet {facet}: pixel ({x}, {y}) does not back-project to a finite ray")]
    NonFiniteRay { facet: usize, x: Real, y: Real },
    #[error("facet {facet} missing from ensemble definition with {num_facets} facets")]
    MissingFacet { facet: usize, num_facets: usize },
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Spatial(#[from] SpatialError),
    #[error(transparent)]
    Perimeter(#[from] PerimeterError),
    #[error(transparent)]
    DotPattern(#[from] DotPatternError),
    #[error(transparent)]
    OpticDefinition(#[from] OpticDefinitionError),
    #[error(transparent)]
    PoseRefine(#[from] anyhow::Error),
}

/// Top-level error of [`crate::ProcessSofastFixed`].
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("invalid input: {0}")]
    InputValidation(String),
    #[error("optic geometry: {0}")]
    Geometry(#[from] GeometryError),
    #[error("blob indexing: {0}")]
    BlobIndex(#[from] BlobIndexError),
    #[error("mask: {0}")]
    Mask(#[from] MaskError),
    #[error("ensemble alignment: {0}")]
    Ensemble(#[from] EnsembleError),
    #[error(transparent)]
    Solver(#[from] anyhow::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ProcessError {
    pub(crate) fn input(msg: impl Into<String>) -> Self {
        ProcessError::InputValidation(msg.into())
    }
}
