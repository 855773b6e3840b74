//! Optic geometry: where the optic sits relative to camera and screen.
//!
//! The pose is found in stages:
//! 1. expected pose: the mask centroid ray is walked out to the measured
//!    screen distance and the optic normal is set to bisect the directions
//!    to camera and screen,
//! 2. the expected facet outlines are projected and snapped onto the mask
//!    perimeter,
//! 3. refine 1: closed-form planar pose from the snapped corners, then a
//!    Levenberg-Marquardt corner reprojection fit,
//! 4. refine 2: the optic is slid along its position ray so the measure point
//!    is exactly `dist_optic_screen` from the screen origin.
//!
//! Multi-facet optics run the same stages on the whole ensemble, with each
//! facet's corners placed by the ensemble definition.

use sofast_core::{
    iso_from_rt, CameraModel, DefinitionEnsemble, DefinitionFacet, DotLocationsFixedPattern, Iso3,
    Polygon, Pt2, Pt3, Real, SpatialOrientation, SurfaceModel, Vec3,
};
use sofast_image::perimeter::{boundary_points, refine_polygon_corners};
use sofast_image::Mask;
use sofast_linear::{planar_pose, r_from_position, refine_v_distance, t_from_distance};
use sofast_optim::{corner_rms_px, refine_pose_from_corners, SlopeSolverInput};

use crate::records::{
    CalculationDataGeometryFacet, CalculationDataGeometryGeneral, CalculationError,
    CalculationImageProcessingFacet, CalculationImageProcessingGeneral,
};
use crate::{GeometryError, GeometryParams};

/// Fixed calibration shared by every geometry stage.
#[derive(Clone, Copy)]
pub struct GeometryContext<'a> {
    pub camera: &'a CameraModel,
    /// Focal length in pixels, scales normalized corner residuals.
    pub focal_px: Real,
    pub orientation: &'a SpatialOrientation,
    pub params: &'a GeometryParams,
}

/// Output of one geometry solve.
#[derive(Debug, Clone)]
pub struct GeometrySolution {
    pub general: CalculationDataGeometryGeneral,
    pub image_general: CalculationImageProcessingGeneral,
    pub facets: Vec<CalculationDataGeometryFacet>,
    pub image_facets: Vec<CalculationImageProcessingFacet>,
    pub error: CalculationError,
}

struct PoseStages {
    refine_1: Iso3,
    refine_2: Iso3,
    error: CalculationError,
}

impl GeometryContext<'_> {
    fn pixel_dir(&self, p: &Pt2) -> Vec3 {
        self.camera.backproject_pixel(&p.coords).dir
    }

    fn normalized(&self, p: &Pt2) -> Pt2 {
        let d = self.pixel_dir(p);
        Pt2::new(d.x / d.z, d.y / d.z)
    }

    fn project_loop(&self, to_cam: &Iso3, corners: &[Pt3], facet: usize) -> Result<Polygon, GeometryError> {
        let vertices = corners
            .iter()
            .enumerate()
            .map(|(corner, c)| {
                self.camera
                    .project_point(&(to_cam * c))
                    .map(|v| Pt2::new(v.x, v.y))
                    .ok_or(GeometryError::ProjectionFailed { facet, corner })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Polygon::new(vertices))
    }

    /// Pose guess placing `v_centroid_optic` on the mask-centroid ray.
    fn expected_pose(
        &self,
        mask: &Mask,
        dist: Real,
        v_centroid_optic: &Vec3,
    ) -> Result<(Pt2, Vec3, Iso3), GeometryError> {
        if !self.orientation.is_finite() {
            return Err(GeometryError::NonFiniteOrientation);
        }
        let centroid = mask.centroid().ok_or(GeometryError::EmptyMask)?;
        let screen = self.orientation.v_cam_screen_cam;
        let v_cam_centroid = t_from_distance(&self.pixel_dir(&centroid), dist, &screen)?;
        let rot = r_from_position(&v_cam_centroid, &screen)?;
        let pose = iso_from_rt(&rot, &(v_cam_centroid - rot * v_centroid_optic));
        log::debug!("expected optic position {:?}", pose.translation.vector);
        Ok((centroid, v_cam_centroid, pose))
    }

    fn fit_pose(
        &self,
        obj: &[Pt3],
        corners_px: &[Pt2],
        pose_exp: Iso3,
        v_measure_point: &Vec3,
        dist: Real,
    ) -> Result<PoseStages, GeometryError> {
        let obs: Vec<Pt2> = corners_px.iter().map(|p| self.normalized(p)).collect();
        let scale = obj
            .iter()
            .flat_map(|p| p.iter().map(|v| v.abs()))
            .fold(1.0, Real::max);
        let planar = obj.iter().all(|p| p.z.abs() <= 1e-9 * scale);

        let pose_0 = if planar {
            let xy: Vec<Pt2> = obj.iter().map(|p| Pt2::new(p.x, p.y)).collect();
            match planar_pose(&xy, &obs) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("closed-form corner pose failed ({e}); starting from expected pose");
                    pose_exp
                }
            }
        } else {
            pose_exp
        };

        let refined =
            refine_pose_from_corners(obj, &obs, pose_0, self.focal_px, &self.params.pose_solver)?;
        let refine_1 = refined.pose;

        let screen = self.orientation.v_cam_screen_cam;
        let t2 = refine_v_distance(
            &refine_1.translation.vector,
            dist,
            &screen,
            &(refine_1.rotation * v_measure_point),
        )?;
        let refine_2 = Iso3::from_parts(t2.into(), refine_1.rotation);

        let dist_error =
            |pose: &Iso3| ((pose * Pt3::from(*v_measure_point)).coords - screen).norm() - dist;
        let error = CalculationError {
            error_dist_optic_screen_1: dist_error(&refine_1),
            error_dist_optic_screen_2: dist_error(&refine_2),
            error_reprojection_1: corner_rms_px(&pose_0, obj, &obs, self.focal_px),
            error_reprojection_2: refined.rms_px,
            error_reprojection_3: corner_rms_px(&refine_2, obj, &obs, self.focal_px),
        };
        Ok(PoseStages {
            refine_1,
            refine_2,
            error,
        })
    }

    fn facet_record(
        &self,
        facet_to_cam: Iso3,
        v_measure_point_facet: &Vec3,
        dist: Real,
        v_align_point_facet: Vec3,
    ) -> CalculationDataGeometryFacet {
        let cam = self.orientation.with_optic(facet_to_cam).camera_position_optic();
        CalculationDataGeometryFacet {
            facet_to_cam,
            u_cam_measure_point_facet: (v_measure_point_facet - cam.coords).normalize(),
            measure_point_screen_distance: dist,
            v_align_point_facet,
        }
    }
}

fn image_general(mask: &Mask, centroid: Pt2) -> CalculationImageProcessingGeneral {
    CalculationImageProcessingGeneral {
        v_mask_centroid_image: centroid,
        mask_active_pixels: mask.count_active(),
        num_blobs_detected: 0,
        num_blobs_indexed: 0,
    }
}

fn image_facet(loop_exp: Polygon, loop_refine: Polygon) -> CalculationImageProcessingFacet {
    CalculationImageProcessingFacet {
        loop_facet_image_exp: loop_exp,
        loop_facet_image_refine: loop_refine,
        pts_image: Vec::new(),
        pts_index_xy: Vec::new(),
    }
}

/// Pose of a single facet from its mask.
///
/// `v_measure_point_facet` is in the facet frame and `dist` is its measured
/// distance to the screen origin.
pub fn process_single_facet_geometry(
    ctx: &GeometryContext<'_>,
    facet: &DefinitionFacet,
    mask: &Mask,
    v_measure_point_facet: &Vec3,
    dist: Real,
) -> Result<GeometrySolution, GeometryError> {
    facet.validate()?;
    let (centroid, v_cam_centroid, pose_exp) =
        ctx.expected_pose(mask, dist, &facet.v_facet_centroid.coords)?;

    let loop_exp = ctx.project_loop(&pose_exp, &facet.v_facet_corners, 0)?;
    let boundary = boundary_points(mask);
    let loop_refine = refine_polygon_corners(&boundary, &loop_exp, &ctx.params.perimeter)?;

    let stages = ctx.fit_pose(
        &facet.v_facet_corners,
        &loop_refine.vertices,
        pose_exp,
        v_measure_point_facet,
        dist,
    )?;
    log::info!(
        "single facet pose: corner rms {:.3} px, distance error {:.3e}",
        stages.error.error_reprojection_3,
        stages.error.error_dist_optic_screen_2
    );

    let facet_rec = ctx.facet_record(
        stages.refine_2,
        v_measure_point_facet,
        dist,
        facet.v_facet_centroid.coords,
    );
    Ok(GeometrySolution {
        general: CalculationDataGeometryGeneral {
            v_cam_optic_centroid_cam_exp: v_cam_centroid,
            optic_to_cam_exp: pose_exp,
            optic_to_cam_refine_1: stages.refine_1,
            optic_to_cam_refine_2: stages.refine_2,
        },
        image_general: image_general(mask, centroid),
        facets: vec![facet_rec],
        image_facets: vec![image_facet(loop_exp, loop_refine)],
        error: stages.error,
    })
}

/// Pose of a facet ensemble from its mask.
///
/// `v_measure_point_ensemble` is in the ensemble frame. Every facet is
/// anchored at its centroid, with the centroid's distance to the screen as
/// its measure distance.
pub fn process_multi_facet_geometry(
    ctx: &GeometryContext<'_>,
    facets: &[DefinitionFacet],
    ensemble: &DefinitionEnsemble,
    mask: &Mask,
    v_measure_point_ensemble: &Vec3,
    dist: Real,
) -> Result<GeometrySolution, GeometryError> {
    ensemble.validate()?;
    let placements = (0..facets.len())
        .map(|i| {
            ensemble
                .facet_to_ensemble(i)
                .ok_or(GeometryError::MissingFacet {
                    facet: i,
                    num_facets: ensemble.num_facets(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    for facet in facets {
        facet.validate()?;
    }

    let (centroid, v_cam_centroid, pose_exp) =
        ctx.expected_pose(mask, dist, &ensemble.v_centroid_ensemble)?;
    let boundary = boundary_points(mask);

    let mut obj = Vec::new();
    let mut corners_px = Vec::new();
    let mut image_facets = Vec::with_capacity(facets.len());
    for (i, (facet, placement)) in facets.iter().zip(&placements).enumerate() {
        let corners_ens: Vec<Pt3> = facet.v_facet_corners.iter().map(|c| placement * c).collect();
        let loop_exp = ctx.project_loop(&pose_exp, &corners_ens, i)?;
        let loop_refine = refine_polygon_corners(&boundary, &loop_exp, &ctx.params.perimeter)?;
        obj.extend(corners_ens);
        corners_px.extend(loop_refine.vertices.iter().copied());
        image_facets.push(image_facet(loop_exp, loop_refine));
    }

    let stages = ctx.fit_pose(&obj, &corners_px, pose_exp, v_measure_point_ensemble, dist)?;
    log::info!(
        "ensemble pose ({} facets): corner rms {:.3} px, distance error {:.3e}",
        facets.len(),
        stages.error.error_reprojection_3,
        stages.error.error_dist_optic_screen_2
    );

    let screen = ctx.orientation.v_cam_screen_cam;
    let facet_recs = facets
        .iter()
        .zip(&placements)
        .map(|(facet, placement)| {
            let facet_to_cam = stages.refine_2 * placement;
            let centroid = facet.v_facet_centroid;
            let d = ((facet_to_cam * centroid).coords - screen).norm();
            ctx.facet_record(facet_to_cam, &centroid.coords, d, centroid.coords)
        })
        .collect();

    Ok(GeometrySolution {
        general: CalculationDataGeometryGeneral {
            v_cam_optic_centroid_cam_exp: v_cam_centroid,
            optic_to_cam_exp: pose_exp,
            optic_to_cam_refine_1: stages.refine_1,
            optic_to_cam_refine_2: stages.refine_2,
        },
        image_general: image_general(mask, centroid),
        facets: facet_recs,
        image_facets,
        error: stages.error,
    })
}

/// Camera rays and screen points of one facet's indexed dots, facet frame.
#[derive(Debug, Clone)]
pub struct FacetCorrespondences {
    pub v_optic_cam_optic: Vec3,
    pub u_active_pixel_pointing_optic: Vec<Vec3>,
    pub v_screen_points_facet: Vec<Pt3>,
    pub v_optic_screen_optic: Vec3,
    pub v_align_point_optic: Vec3,
    pub u_measure_pixel_pointing_optic: Vec3,
    pub dist_optic_screen: Real,
}

impl FacetCorrespondences {
    pub fn build(
        facet_idx: usize,
        geometry: &CalculationDataGeometryFacet,
        camera: &CameraModel,
        orientation: &SpatialOrientation,
        dots: &DotLocationsFixedPattern,
        pts_image: &[Pt2],
        pts_index_xy: &[(i32, i32)],
    ) -> Result<Self, GeometryError> {
        if pts_image.is_empty() {
            return Err(GeometryError::NoCorrespondences(facet_idx));
        }
        let frames = orientation.with_optic(geometry.facet_to_cam);
        let screen_to_facet = frames.screen_to_optic();

        let screen_points = dots.xy_indices_to_screen_coordinates(pts_index_xy)?;
        if let Some((&(ix, iy), _)) = pts_index_xy
            .iter()
            .zip(&screen_points)
            .find(|(_, p)| !p.coords.iter().all(|c| c.is_finite()))
        {
            return Err(GeometryError::UnmeasuredDot {
                facet: facet_idx,
                ix,
                iy,
            });
        }
        let v_screen_points_facet = screen_points
            .into_iter()
            .map(|p| screen_to_facet * p)
            .collect();

        let mut u_active_pixel_pointing_optic = Vec::with_capacity(pts_image.len());
        for p in pts_image {
            let u = frames.cam_dir_to_optic(&camera.backproject_pixel(&p.coords).dir);
            if !u.iter().all(|c| c.is_finite()) {
                return Err(GeometryError::NonFiniteRay {
                    facet: facet_idx,
                    x: p.x,
                    y: p.y,
                });
            }
            u_active_pixel_pointing_optic.push(u);
        }

        Ok(Self {
            v_optic_cam_optic: frames.camera_position_optic().coords,
            u_active_pixel_pointing_optic,
            v_screen_points_facet,
            v_optic_screen_optic: frames.screen_origin_optic().coords,
            v_align_point_optic: geometry.v_align_point_facet,
            u_measure_pixel_pointing_optic: geometry.u_cam_measure_point_facet,
            dist_optic_screen: geometry.measure_point_screen_distance,
        })
    }

    pub fn len(&self) -> usize {
        self.u_active_pixel_pointing_optic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.u_active_pixel_pointing_optic.is_empty()
    }

    pub fn into_solver_input(self, surface: SurfaceModel) -> SlopeSolverInput {
        SlopeSolverInput {
            surface,
            v_optic_cam_optic: self.v_optic_cam_optic,
            u_active_pixel_pointing_optic: self.u_active_pixel_pointing_optic,
            v_screen_points_facet: self.v_screen_points_facet,
            v_optic_screen_optic: self.v_optic_screen_optic,
            v_align_point_optic: self.v_align_point_optic,
            u_measure_pixel_pointing_optic: self.u_measure_pixel_pointing_optic,
            dist_optic_screen: self.dist_optic_screen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sofast_core::synthetic::SyntheticScene;

    fn polygon_mask(outlines: &[Polygon]) -> Mask {
        let mut mask = Mask::new(640, 480);
        for y in 0..480 {
            for x in 0..640 {
                let p = Pt2::new(x as Real, y as Real);
                if outlines.iter().any(|o| o.contains(&p)) {
                    mask.set(x, y, true);
                }
            }
        }
        mask
    }

    #[test]
    fn single_facet_pose_matches_scene() {
        let scene = SyntheticScene::facing_camera().unwrap();
        let facets = scene.single_facet_layout(200.0);
        let outline = scene.facet_pixel_outline(&facets[0]).unwrap();
        let mask = polygon_mask(&[outline]);
        let params = GeometryParams::default();
        let ctx = GeometryContext {
            camera: &scene.model,
            focal_px: scene.camera.mean_focal(),
            orientation: &scene.orientation,
            params: &params,
        };
        let dist = scene.distance_to_screen(&Pt3::origin());

        let sol = process_single_facet_geometry(
            &ctx,
            &facets[0].definition,
            &mask,
            &Vec3::zeros(),
            dist,
        )
        .unwrap();

        let pose = sol.general.optic_to_cam();
        assert!(
            (pose.translation.vector - scene.optic_to_cam.translation.vector).norm() < 2.0,
            "t={}",
            pose.translation.vector
        );
        assert!(pose.rotation.angle_to(&scene.optic_to_cam.rotation) < 5e-3);
        assert!(sol.error.error_dist_optic_screen_2.abs() < 1e-9);
        assert!(sol.error.error_reprojection_2 < 1.0);
        assert_eq!(sol.facets.len(), 1);
        assert!((sol.facets[0].measure_point_screen_distance - dist).abs() < 1e-12);
    }

    #[test]
    fn empty_mask_is_rejected() {
        let scene = SyntheticScene::facing_camera().unwrap();
        let params = GeometryParams::default();
        let ctx = GeometryContext {
            camera: &scene.model,
            focal_px: scene.camera.mean_focal(),
            orientation: &scene.orientation,
            params: &params,
        };
        let res = process_single_facet_geometry(
            &ctx,
            &DefinitionFacet::rectangular(200.0, 200.0),
            &Mask::new(640, 480),
            &Vec3::zeros(),
            1000.0,
        );
        assert!(matches!(res, Err(GeometryError::EmptyMask)));
    }

    #[test]
    fn correspondences_need_points() {
        let scene = SyntheticScene::facing_camera().unwrap();
        let geom = CalculationDataGeometryFacet {
            facet_to_cam: scene.optic_to_cam,
            u_cam_measure_point_facet: -Vec3::z(),
            measure_point_screen_distance: 1000.0,
            v_align_point_facet: Vec3::zeros(),
        };
        let res = FacetCorrespondences::build(
            3,
            &geom,
            &scene.model,
            &scene.orientation,
            &scene.dots,
            &[],
            &[],
        );
        assert!(matches!(res, Err(GeometryError::NoCorrespondences(3))));
    }

    #[test]
    fn correspondences_are_in_facet_frame() {
        let scene = SyntheticScene::facing_camera().unwrap();
        let geom = CalculationDataGeometryFacet {
            facet_to_cam: scene.optic_to_cam,
            u_cam_measure_point_facet: -Vec3::z(),
            measure_point_screen_distance: scene.distance_to_screen(&Pt3::origin()),
            v_align_point_facet: Vec3::zeros(),
        };
        let corr = FacetCorrespondences::build(
            0,
            &geom,
            &scene.model,
            &scene.orientation,
            &scene.dots,
            &[Pt2::new(320.0, 240.0)],
            &[(0, 5)],
        )
        .unwrap();
        assert!((corr.v_optic_cam_optic - Vec3::new(0.0, 0.0, 1000.0)).norm() < 1e-9);
        assert!((corr.u_active_pixel_pointing_optic[0] + Vec3::z()).norm() < 1e-12);
        // Dot (0, 5) reflects at the facet origin: its screen point mirrors the camera ray.
        let s = corr.v_screen_points_facet[0];
        assert!(s.x.abs() < 1e-9 && s.z > 0.0);
    }

    #[test]
    fn unmeasured_dot_is_an_input_error() {
        let scene = SyntheticScene::facing_camera().unwrap();
        let geom = CalculationDataGeometryFacet {
            facet_to_cam: scene.optic_to_cam,
            u_cam_measure_point_facet: -Vec3::z(),
            measure_point_screen_distance: scene.distance_to_screen(&Pt3::origin()),
            v_align_point_facet: Vec3::zeros(),
        };
        let mut dots = scene.dots.clone();
        let ((x0, _), (y0, _)) = dots.dot_extent();
        let nx = dots.x_dot_index.len();
        let slot = (5 - y0) as usize * nx + (1 - x0) as usize;
        dots.xyz_dot_loc[slot] = [Real::NAN; 3];

        let res = FacetCorrespondences::build(
            2,
            &geom,
            &scene.model,
            &scene.orientation,
            &dots,
            &[Pt2::new(320.0, 240.0), Pt2::new(340.0, 240.0)],
            &[(0, 5), (1, 5)],
        );
        assert!(matches!(
            res,
            Err(GeometryError::UnmeasuredDot { facet: 2, ix: 1, iy: 5 })
        ));
    }
}
