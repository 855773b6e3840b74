//! Fixed-pattern deflectometry orchestrator.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use sofast_core::{
    CameraModel, CameraParams, DefinitionEnsemble, DefinitionFacet, DotLocationsFixedPattern, Pt2,
    SpatialOrientation, SurfaceModel,
};
use sofast_image::{calc_mask_raw, detect_blobs, keep_largest_mask_area, BlobIndex, Mask};
use sofast_optim::{SlopeSolver, SlopeSolverData};

use crate::ensemble::{calculate_facet_pointing, EnsembleError, PointingReference};
use crate::export::{facet_key, Records};
use crate::geometry::{
    process_multi_facet_geometry, process_single_facet_geometry, FacetCorrespondences,
    GeometryContext, GeometrySolution,
};
use crate::measurement::{MeasurementInfo, MeasurementSofastFixed};
use crate::optic::{Interpolation, MirrorPoint, OpticGeometry};
use crate::records::{
    CalculationDataGeometryFacet, CalculationDataGeometryGeneral, CalculationError,
    CalculationFacetEnsemble, CalculationImageProcessingFacet, CalculationImageProcessingGeneral,
};
use crate::{ParamsSofastFixed, ProcessError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpticType {
    Single,
    Multi,
}

/// Everything one `process_*` call produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SofastFixedResult {
    pub optic_type: OpticType,
    pub facet_defs: Vec<DefinitionFacet>,
    pub surfaces: Vec<SurfaceModel>,
    pub ensemble_def: Option<DefinitionEnsemble>,
    pub measurement: MeasurementInfo,
    pub geometry_general: CalculationDataGeometryGeneral,
    pub image_processing_general: CalculationImageProcessingGeneral,
    pub geometry_facet: Vec<CalculationDataGeometryFacet>,
    pub image_processing_facet: Vec<CalculationImageProcessingFacet>,
    pub error: CalculationError,
    pub slope_data: Vec<SlopeSolverData>,
    pub ensemble: Option<Vec<CalculationFacetEnsemble>>,
    pub pointing_reference: Option<PointingReference>,
}

impl SofastFixedResult {
    pub fn num_facets(&self) -> usize {
        self.slope_data.len()
    }
}

/// Processes fixed-pattern captures of single facets and facet ensembles.
///
/// The processor keeps only the result of the latest call; it is cleared
/// before any work starts, so a failed call leaves no result behind.
#[derive(Debug)]
pub struct ProcessSofastFixed {
    orientation: SpatialOrientation,
    camera_params: CameraParams,
    camera: CameraModel,
    dots: DotLocationsFixedPattern,
    pub params: ParamsSofastFixed,
    last: Option<SofastFixedResult>,
}

impl ProcessSofastFixed {
    pub fn new(
        orientation: SpatialOrientation,
        camera_params: CameraParams,
        dots: DotLocationsFixedPattern,
    ) -> Result<Self, ProcessError> {
        if !orientation.is_finite() {
            return Err(ProcessError::input("spatial orientation is not finite"));
        }
        dots.validate()
            .map_err(|e| ProcessError::input(format!("dot locations: {e}")))?;
        let camera = camera_params
            .build()
            .map_err(|e| ProcessError::input(format!("camera: {e}")))?;
        Ok(Self {
            orientation,
            camera_params,
            camera,
            dots,
            params: ParamsSofastFixed::default(),
            last: None,
        })
    }

    pub fn orientation(&self) -> &SpatialOrientation {
        &self.orientation
    }

    pub fn dot_locations(&self) -> &DotLocationsFixedPattern {
        &self.dots
    }

    /// Latest processing result.
    pub fn result(&self) -> Option<&SofastFixedResult> {
        self.last.as_ref()
    }

    /// Detect dots and index them outward from every known seed.
    pub fn find_blobs(
        &self,
        image: &GrayImage,
        pts_known: &[Pt2],
        xys_known: &[(i32, i32)],
    ) -> Result<BlobIndex, ProcessError> {
        if pts_known.len() != xys_known.len() {
            return Err(ProcessError::input(format!(
                "{} known points but {} known indices",
                pts_known.len(),
                xys_known.len()
            )));
        }
        let blobs = detect_blobs(image, &self.params.blob_detector);
        log::info!("detected {} blobs", blobs.len());
        let mut index = BlobIndex::new(
            &blobs,
            self.dots.dot_extent(),
            self.params.blob_index.clone(),
        )?;
        for (pt, &(ix, iy)) in pts_known.iter().zip(xys_known) {
            index.run(*pt, ix, iy)?;
        }
        log::info!("indexed {} of {} blobs", index.num_indexed(), index.num_points());
        Ok(index)
    }

    fn optic_mask(&self, image: &GrayImage, multi_facet: bool) -> Result<Mask, ProcessError> {
        let mut cfg = self.params.mask.clone();
        if multi_facet && cfg.keep_largest_area {
            log::warn!("keep_largest_area is not supported for multi-facet optics; disabling it");
            cfg.keep_largest_area = false;
        }
        let dark = GrayImage::new(image.width(), image.height());
        let mask = calc_mask_raw(&dark, image, &cfg)?;
        if mask.is_blank() {
            log::warn!("optic mask is empty");
        }
        Ok(if cfg.keep_largest_area {
            keep_largest_mask_area(&mask)
        } else {
            mask
        })
    }

    fn geometry_context(&self) -> GeometryContext<'_> {
        GeometryContext {
            camera: &self.camera,
            focal_px: self.camera_params.mean_focal(),
            orientation: &self.orientation,
            params: &self.params.geometry,
        }
    }

    /// Split indexed blobs per facet and solve each facet's slopes.
    fn solve_facets(
        &self,
        geometry: &mut GeometrySolution,
        index: &BlobIndex,
        surfaces: &[SurfaceModel],
    ) -> Result<Vec<SlopeSolverData>, ProcessError> {
        let mut out = Vec::with_capacity(surfaces.len());
        for (i, surface) in surfaces.iter().enumerate() {
            let image_facet = &mut geometry.image_facets[i];
            let (pts, idx) = index.get_data_in_region(&image_facet.loop_facet_image_refine);
            let corr = FacetCorrespondences::build(
                i,
                &geometry.facets[i],
                &self.camera,
                &self.orientation,
                &self.dots,
                &pts,
                &idx,
            )?;
            image_facet.pts_image = pts;
            image_facet.pts_index_xy = idx;

            let n = corr.len();
            let solver = SlopeSolver::new(
                corr.into_solver_input(surface.clone()),
                self.params.slope_solver.clone(),
            )?;
            let data = solver.solve()?;
            log::debug!(
                "facet {i}: {n} points, rms residual {:.3e} rad",
                data.rms_residual
            );
            out.push(data);
        }
        Ok(out)
    }

    fn validate_seeds(pts_known: &[Pt2], xys_known: &[(i32, i32)], expected: usize) -> Result<(), ProcessError> {
        if pts_known.len() != expected || xys_known.len() != expected {
            return Err(ProcessError::input(format!(
                "expected {expected} known point(s) and index(es), got {} and {}",
                pts_known.len(),
                xys_known.len()
            )));
        }
        Ok(())
    }

    pub fn process_single_facet_optic(
        &mut self,
        measurement: &MeasurementSofastFixed,
        facet_def: &DefinitionFacet,
        surface: &SurfaceModel,
        pts_known: &[Pt2],
        xys_known: &[(i32, i32)],
    ) -> Result<&SofastFixedResult, ProcessError> {
        self.last = None;
        measurement.validate()?;
        Self::validate_seeds(pts_known, xys_known, 1)?;

        let mask = self.optic_mask(&measurement.image, false)?;
        let mut geometry = process_single_facet_geometry(
            &self.geometry_context(),
            facet_def,
            &mask,
            &measurement.v_measure_point_facet,
            measurement.dist_optic_screen,
        )?;

        let index = self.find_blobs(&measurement.image, pts_known, xys_known)?;
        geometry.image_general.num_blobs_detected = index.num_points();
        geometry.image_general.num_blobs_indexed = index.num_indexed();
        let slope_data = self.solve_facets(&mut geometry, &index, std::slice::from_ref(surface))?;

        let result = SofastFixedResult {
            optic_type: OpticType::Single,
            facet_defs: vec![facet_def.clone()],
            surfaces: vec![surface.clone()],
            ensemble_def: None,
            measurement: measurement.info(),
            geometry_general: geometry.general,
            image_processing_general: geometry.image_general,
            geometry_facet: geometry.facets,
            image_processing_facet: geometry.image_facets,
            error: geometry.error,
            slope_data,
            ensemble: None,
            pointing_reference: None,
        };
        Ok(&*self.last.insert(result))
    }

    /// Multi-facet processing with the average pointing as reference.
    pub fn process_multi_facet_optic(
        &mut self,
        measurement: &MeasurementSofastFixed,
        facet_defs: &[DefinitionFacet],
        surfaces: &[SurfaceModel],
        ensemble_def: &DefinitionEnsemble,
        pts_known: &[Pt2],
        xys_known: &[(i32, i32)],
    ) -> Result<&SofastFixedResult, ProcessError> {
        self.process_multi_facet_optic_with_reference(
            measurement,
            facet_defs,
            surfaces,
            ensemble_def,
            pts_known,
            xys_known,
            PointingReference::Average,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn process_multi_facet_optic_with_reference(
        &mut self,
        measurement: &MeasurementSofastFixed,
        facet_defs: &[DefinitionFacet],
        surfaces: &[SurfaceModel],
        ensemble_def: &DefinitionEnsemble,
        pts_known: &[Pt2],
        xys_known: &[(i32, i32)],
        reference: PointingReference,
    ) -> Result<&SofastFixedResult, ProcessError> {
        self.last = None;
        measurement.validate()?;
        let n = facet_defs.len();
        if n == 0 {
            return Err(ProcessError::input("no facet definitions given"));
        }
        if surfaces.len() != n || ensemble_def.num_facets() != n {
            return Err(ProcessError::input(format!(
                "{n} facet definitions, {} surfaces, {} ensemble facets",
                surfaces.len(),
                ensemble_def.num_facets()
            )));
        }
        Self::validate_seeds(pts_known, xys_known, n)?;
        if let PointingReference::Facet(index) = reference {
            if index >= n {
                return Err(EnsembleError::FacetIndexOutOfRange {
                    index,
                    num_facets: n,
                }
                .into());
            }
        }

        let mask = self.optic_mask(&measurement.image, true)?;
        let mut geometry = process_multi_facet_geometry(
            &self.geometry_context(),
            facet_defs,
            ensemble_def,
            &mask,
            &measurement.v_measure_point_facet,
            measurement.dist_optic_screen,
        )?;

        let index = self.find_blobs(&measurement.image, pts_known, xys_known)?;
        geometry.image_general.num_blobs_detected = index.num_points();
        geometry.image_general.num_blobs_indexed = index.num_indexed();
        let slope_data = self.solve_facets(&mut geometry, &index, surfaces)?;
        let ensemble = calculate_facet_pointing(&slope_data, ensemble_def, reference)?;

        let result = SofastFixedResult {
            optic_type: OpticType::Multi,
            facet_defs: facet_defs.to_vec(),
            surfaces: surfaces.to_vec(),
            ensemble_def: Some(ensemble_def.clone()),
            measurement: measurement.info(),
            geometry_general: geometry.general,
            image_processing_general: geometry.image_general,
            geometry_facet: geometry.facets,
            image_processing_facet: geometry.image_facets,
            error: geometry.error,
            slope_data,
            ensemble: Some(ensemble),
            pointing_reference: Some(reference),
        };
        Ok(&*self.last.insert(result))
    }

    /// Redo the ensemble alignment of the latest multi-facet result.
    pub fn recalculate_facet_pointing(
        &mut self,
        reference: PointingReference,
    ) -> Result<&[CalculationFacetEnsemble], ProcessError> {
        let result = self.last.as_mut().ok_or(EnsembleError::SlopesNotSolved)?;
        let ensemble_def = result
            .ensemble_def
            .as_ref()
            .ok_or_else(|| ProcessError::input("latest result is not a multi-facet optic"))?;
        let ensemble = calculate_facet_pointing(&result.slope_data, ensemble_def, reference)?;
        result.pointing_reference = Some(reference);
        Ok(result.ensemble.insert(ensemble).as_slice())
    }

    /// Measured optic of the latest result; `interpolation` sets how each
    /// facet answers [`MirrorPoint::normal_at`].
    pub fn get_optic(&self, interpolation: Interpolation) -> Result<OpticGeometry, ProcessError> {
        let result = self
            .last
            .as_ref()
            .ok_or_else(|| ProcessError::input("no measurement has been processed"))?;
        let mirror = |i: usize| {
            let data = &result.slope_data[i];
            MirrorPoint::from_slopes(
                data.v_surf_points_facet.clone(),
                &data.slopes_facet_xy,
                result.facet_defs[i].outline_xy(),
            )
            .with_interpolation(interpolation)
        };
        Ok(match (&result.optic_type, &result.ensemble) {
            (OpticType::Multi, Some(ensemble)) => OpticGeometry::Ensemble {
                facets: (0..result.num_facets()).map(mirror).collect(),
                transforms: ensemble.iter().map(|e| e.trans_facet_ensemble).collect(),
            },
            _ => OpticGeometry::Facet(mirror(0)),
        })
    }

    /// Calculation records of the latest result under `prefix`.
    pub fn to_records(&self, prefix: &str) -> Result<Records, ProcessError> {
        let result = self
            .last
            .as_ref()
            .ok_or_else(|| ProcessError::input("no measurement has been processed"))?;
        let input = format!("{prefix}DataSofastInput");
        let calc = format!("{prefix}DataSofastCalculation");

        let mut r = Records::new();
        r.insert(format!("{input}/params"), &self.params)?;
        r.insert(format!("{input}/measurement"), &result.measurement)?;
        r.insert(format!("{input}/camera"), &self.camera_params)?;
        r.insert(format!("{input}/orientation"), &self.orientation)?;
        for (i, (facet, surface)) in result.facet_defs.iter().zip(&result.surfaces).enumerate() {
            let base = format!("{input}/optic_definition/{}", facet_key(i));
            r.insert(format!("{base}/surface"), surface)?;
            r.insert(format!("{base}/facet_definition"), facet)?;
        }
        if let Some(ensemble_def) = &result.ensemble_def {
            r.insert(format!("{input}/optic_definition/ensemble"), ensemble_def)?;
        }

        r.insert(format!("{calc}/general/error"), &result.error)?;
        r.insert(format!("{calc}/general/geometry"), &result.geometry_general)?;
        r.insert(
            format!("{calc}/general/image_processing"),
            &result.image_processing_general,
        )?;
        for i in 0..result.num_facets() {
            let base = format!("{calc}/facet/{}", facet_key(i));
            r.insert(format!("{base}/slope_solver"), &result.slope_data[i])?;
            r.insert(format!("{base}/geometry"), &result.geometry_facet[i])?;
            r.insert(format!("{base}/image_processing"), &result.image_processing_facet[i])?;
        }
        if let Some(ensemble) = &result.ensemble {
            for (i, e) in ensemble.iter().enumerate() {
                r.insert(format!("{calc}/ensemble/{}", facet_key(i)), e)?;
            }
            r.insert(format!("{calc}/ensemble/pointing_reference"), &result.pointing_reference)?;
        }
        Ok(r)
    }

    /// Write [`Self::to_records`] to `path`, merging with an existing file.
    pub fn save_to_json(&self, path: impl AsRef<std::path::Path>, prefix: &str) -> Result<(), ProcessError> {
        self.to_records(prefix)?.save(path)
    }
}
