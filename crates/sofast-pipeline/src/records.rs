//! Calculation records produced once per processing run.
//!
//! Field names follow the frame convention `v_<from>_<to>_<frame>` for vectors
//! and `<a>_to_<b>` for rigid transforms.

use serde::{Deserialize, Serialize};
use sofast_core::{Iso3, Polygon, Pt2, Pt3, Real, Vec2, Vec3};

/// Optic pose estimates in the camera frame, one per refinement stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationDataGeometryGeneral {
    /// Point on the mask-centroid ray at the measured screen distance.
    pub v_cam_optic_centroid_cam_exp: Vec3,
    /// Pose from the centroid ray and the camera/screen bisector.
    pub optic_to_cam_exp: Iso3,
    /// Pose after the corner fit.
    pub optic_to_cam_refine_1: Iso3,
    /// Pose after the measure-point distance correction.
    pub optic_to_cam_refine_2: Iso3,
}

impl CalculationDataGeometryGeneral {
    /// Final optic (or ensemble) pose.
    pub fn optic_to_cam(&self) -> Iso3 {
        self.optic_to_cam_refine_2
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationImageProcessingGeneral {
    pub v_mask_centroid_image: Pt2,
    pub mask_active_pixels: usize,
    pub num_blobs_detected: usize,
    pub num_blobs_indexed: usize,
}

/// Facet placement and slope-solver anchor data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationDataGeometryFacet {
    pub facet_to_cam: Iso3,
    /// Unit direction from the camera to the measure point, facet frame.
    pub u_cam_measure_point_facet: Vec3,
    pub measure_point_screen_distance: Real,
    pub v_align_point_facet: Vec3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationImageProcessingFacet {
    pub loop_facet_image_exp: Polygon,
    pub loop_facet_image_refine: Polygon,
    /// Indexed dots used for this facet.
    pub pts_image: Vec<Pt2>,
    pub pts_index_xy: Vec<(i32, i32)>,
}

/// Consistency checks of the geometry solve.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalculationError {
    /// `|measure point to screen| - dist_optic_screen` after refine 1.
    pub error_dist_optic_screen_1: Real,
    /// Same after refine 2.
    pub error_dist_optic_screen_2: Real,
    /// RMS corner reprojection error (pixels) of the closed-form pose.
    pub error_reprojection_1: Real,
    /// After the corner fit.
    pub error_reprojection_2: Real,
    /// After the distance correction.
    pub error_reprojection_3: Real,
}

/// One facet expressed in the ensemble frame after pointing alignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationFacetEnsemble {
    /// Aligned surface frame → ensemble frame.
    pub trans_facet_ensemble: Iso3,
    pub slopes_ensemble_xy: Vec<Vec2>,
    pub v_surf_points_ensemble: Vec<Pt3>,
    pub v_facet_pointing_ensemble: Vec3,
}
