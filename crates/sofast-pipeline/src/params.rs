//! Processing parameters.

use serde::{Deserialize, Serialize};
use sofast_image::{BlobDetectorConfig, BlobIndexConfig, MaskConfig, PerimeterRefineConfig};
use sofast_optim::{SlopeSolverOptions, SolverOptions};
use std::path::Path;

use crate::ProcessError;

/// Optic geometry parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryParams {
    /// Snapping of expected facet corners onto the mask perimeter.
    pub perimeter: PerimeterRefineConfig,
    /// Levenberg-Marquardt options for the corner pose refinement.
    pub pose_solver: SolverOptions,
}

impl Default for GeometryParams {
    fn default() -> Self {
        Self {
            perimeter: PerimeterRefineConfig::default(),
            pose_solver: SolverOptions {
                max_iters: 50,
                ..SolverOptions::default()
            },
        }
    }
}

/// Every tunable of a fixed-pattern run.
///
/// Missing JSON fields fall back to their defaults:
///
/// ```
/// use sofast_pipeline::ParamsSofastFixed;
///
/// let p: ParamsSofastFixed = serde_json::from_str(r#"{"mask": {"hist_thresh": 0.4}}"#).unwrap();
/// assert_eq!(p.mask.hist_thresh, 0.4);
/// assert_eq!(p.mask.filt_width, 9);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamsSofastFixed {
    pub mask: MaskConfig,
    pub blob_detector: BlobDetectorConfig,
    pub blob_index: BlobIndexConfig,
    pub geometry: GeometryParams,
    pub slope_solver: SlopeSolverOptions,
}

impl ParamsSofastFixed {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ProcessError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<(), ProcessError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
