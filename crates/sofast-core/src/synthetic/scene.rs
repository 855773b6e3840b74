use nalgebra::Vector2;

use crate::{
    iso_from_rt, CameraError, CameraModel, CameraParams, DefinitionEnsemble, DefinitionFacet,
    DotLocationsFixedPattern, Iso3, Polygon, Pt2, Pt3, Real, Rot3, SpatialOrientation,
    SurfaceShape, Vec3,
};

/// Image width of the synthetic camera.
pub const SYNTH_WIDTH: u32 = 640;
/// Image height of the synthetic camera.
pub const SYNTH_HEIGHT: u32 = 480;

/// One facet of a synthetic optic: placement in the optic frame plus outline.
#[derive(Clone, Debug)]
pub struct SyntheticFacet {
    pub facet_to_optic: Iso3,
    pub definition: DefinitionFacet,
}

/// A screen dot visible through one facet.
#[derive(Clone, Copy, Debug)]
pub struct VisibleDot {
    pub pixel: Pt2,
    pub index: (i32, i32),
    pub facet: usize,
}

/// Result of tracing one camera pixel off a mirror surface onto the screen plane.
#[derive(Clone, Copy, Debug)]
pub struct TracedPixel {
    /// Unit camera ray in the optic frame.
    pub ray_optic: Vec3,
    pub surface_point_optic: Pt3,
    pub screen_point_screen: Pt3,
}

/// Camera + screen + optic with exact ground truth.
#[derive(Clone, Debug)]
pub struct SyntheticScene {
    pub camera: CameraParams,
    pub model: CameraModel,
    pub orientation: SpatialOrientation,
    pub dots: DotLocationsFixedPattern,
    /// Ground-truth optic pose.
    pub optic_to_cam: Iso3,
}

impl SyntheticScene {
    /// Optic 1000 units in front of the camera, facing it, with the screen
    /// origin 200 units below the camera.
    ///
    /// Dot `(ix, iy)` seen in a flat facet at the optic origin images at
    /// pixel `(320 + 20 ix, 140 + 20 iy)`.
    pub fn facing_camera() -> Result<Self, CameraError> {
        let mut camera = CameraParams::pinhole(1000.0, 1000.0, 320.0, 240.0);
        camera.image_size = Some([SYNTH_WIDTH, SYNTH_HEIGHT]);
        let model = camera.build()?;
        let orientation = SpatialOrientation::new(Rot3::identity(), Vec3::new(0.0, -200.0, 0.0));
        let dots = DotLocationsFixedPattern::planar_grid(-15..=15, -5..=15, 40.0, 40.0);
        let optic_to_cam = iso_from_rt(
            &Rot3::from_euler_angles(std::f64::consts::PI, 0.0, 0.0),
            &Vec3::new(0.0, 0.0, 1000.0),
        );
        Ok(Self {
            camera,
            model,
            orientation,
            dots,
            optic_to_cam,
        })
    }

    /// Distance from an optic-frame point to the screen origin.
    pub fn distance_to_screen(&self, p_optic: &Pt3) -> Real {
        let p_cam = self.optic_to_cam * p_optic;
        (p_cam.coords - self.orientation.v_cam_screen_cam).norm()
    }

    /// Square facet of side `size` placed at the optic origin.
    pub fn single_facet_layout(&self, size: Real) -> Vec<SyntheticFacet> {
        vec![SyntheticFacet {
            facet_to_optic: Iso3::identity(),
            definition: DefinitionFacet::rectangular(size, size),
        }]
    }

    /// Square facets of side `size` at the given ensemble-frame positions.
    pub fn ensemble_layout(&self, size: Real, locations: &[Vec3]) -> (Vec<SyntheticFacet>, DefinitionEnsemble) {
        let facets = locations
            .iter()
            .map(|loc| SyntheticFacet {
                facet_to_optic: iso_from_rt(&Rot3::identity(), loc),
                definition: DefinitionFacet::rectangular(size, size),
            })
            .collect();
        let ensemble = DefinitionEnsemble {
            r_facet_ensemble: vec![Rot3::identity(); locations.len()],
            v_facet_locations: locations.to_vec(),
            v_centroid_ensemble: Vec3::zeros(),
        };
        (facets, ensemble)
    }

    /// Facet outline projected into the image.
    pub fn facet_pixel_outline(&self, facet: &SyntheticFacet) -> Option<Polygon> {
        let to_cam = self.optic_to_cam * facet.facet_to_optic;
        let vertices = facet
            .definition
            .v_facet_corners
            .iter()
            .map(|c| {
                self.model
                    .project_point(&(to_cam * c))
                    .map(|v| Pt2::new(v.x, v.y))
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Polygon::new(vertices))
    }

    /// Pixel of screen dot `s_screen` reflected in a flat facet, together with
    /// the facet-frame hit point.
    pub fn flat_reflection_pixel(&self, facet: &SyntheticFacet, s_screen: &Pt3) -> Option<(Pt2, Pt3)> {
        let facet_to_cam = self.optic_to_cam * facet.facet_to_optic;
        let s_cam = self.orientation.screen_to_cam() * s_screen;
        let s_facet = facet_to_cam.inverse() * s_cam;
        let mirrored = Pt3::new(s_facet.x, s_facet.y, -s_facet.z);
        let cam_facet = facet_to_cam.inverse() * Pt3::origin();
        let dz = mirrored.z - cam_facet.z;
        if dz.abs() < 1e-12 {
            return None;
        }
        let lambda = -cam_facet.z / dz;
        let hit = cam_facet + (mirrored - cam_facet) * lambda;
        let px = self.model.project_point(&(facet_to_cam * mirrored))?;
        Some((Pt2::new(px.x, px.y), hit))
    }

    /// Dots whose reflection lands inside a facet with at least `margin`
    /// (facet units) to every edge.
    pub fn visible_dots(&self, facets: &[SyntheticFacet], margin: Real) -> Vec<VisibleDot> {
        let ((x0, x1), (y0, y1)) = self.dots.dot_extent();
        let mut out = Vec::new();
        for (fi, facet) in facets.iter().enumerate() {
            let Some((lo, hi)) = facet.definition.outline_xy().bounds() else {
                continue;
            };
            for iy in y0..=y1 {
                for ix in x0..=x1 {
                    let Ok(s) = self.dots.screen_point(ix, iy) else {
                        continue;
                    };
                    let Some((pixel, hit)) = self.flat_reflection_pixel(facet, &s) else {
                        continue;
                    };
                    let inside = hit.x >= lo.x + margin
                        && hit.x <= hi.x - margin
                        && hit.y >= lo.y + margin
                        && hit.y <= hi.y - margin;
                    let in_image = pixel.x >= 0.0
                        && pixel.y >= 0.0
                        && pixel.x < SYNTH_WIDTH as Real
                        && pixel.y < SYNTH_HEIGHT as Real;
                    if inside && in_image {
                        out.push(VisibleDot {
                            pixel,
                            index: (ix, iy),
                            facet: fi,
                        });
                    }
                }
            }
        }
        out
    }

    /// Trace `pixel` off `shape` (expressed in a frame placed at
    /// `surface_to_optic`) and intersect the reflected ray with the screen plane.
    pub fn trace_pixel(
        &self,
        shape: &SurfaceShape,
        surface_to_optic: &Iso3,
        pixel: &Pt2,
    ) -> Option<TracedPixel> {
        let ray_cam = self.model.backproject_pixel(&Vector2::new(pixel.x, pixel.y)).dir;
        let surface_to_cam = self.optic_to_cam * surface_to_optic;
        let cam_to_surface = surface_to_cam.inverse();
        let o_s = (cam_to_surface * Pt3::origin()).coords;
        let d_s = cam_to_surface.rotation * ray_cam;
        let (t, p_s) = shape.intersect_ray(&shape.coeffs(), &o_s, &d_s);
        if !(t > 0.0) {
            return None;
        }
        let g = shape.gradient(p_s.x, p_s.y);
        let n = Vec3::new(-g.x, -g.y, 1.0).normalize();
        let r_s = d_s - n * (2.0 * d_s.dot(&n));

        let surface_to_screen = self.orientation.screen_to_cam().inverse() * surface_to_cam;
        let p_scr = surface_to_screen * Pt3::from(p_s);
        let r_scr = surface_to_screen.rotation * r_s;
        if r_scr.z.abs() < 1e-12 {
            return None;
        }
        let lambda = -p_scr.z / r_scr.z;
        if lambda <= 0.0 {
            return None;
        }
        let optic_from_cam = self.optic_to_cam.inverse();
        Some(TracedPixel {
            ray_optic: optic_from_cam.rotation * ray_cam,
            surface_point_optic: surface_to_optic * Pt3::from(p_s),
            screen_point_screen: p_scr + r_scr * lambda,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_mirror_images_on_integer_pixels() {
        let scene = SyntheticScene::facing_camera().unwrap();
        let facets = scene.single_facet_layout(200.0);
        let s = scene.dots.screen_point(2, 3).unwrap();
        let (px, hit) = scene.flat_reflection_pixel(&facets[0], &s).unwrap();
        assert!((px - Pt2::new(360.0, 200.0)).norm() < 1e-9, "px={px}");
        assert!(hit.z.abs() < 1e-9);
    }

    #[test]
    fn visible_dots_single_facet() {
        let scene = SyntheticScene::facing_camera().unwrap();
        let facets = scene.single_facet_layout(200.0);
        let dots = scene.visible_dots(&facets, 15.0);
        assert_eq!(dots.len(), 81);
        assert!(dots.iter().all(|d| (1..=9).contains(&d.index.1)));
    }

    #[test]
    fn traced_flat_pixel_matches_mirror_image() {
        let scene = SyntheticScene::facing_camera().unwrap();
        let traced = scene
            .trace_pixel(&SurfaceShape::Plano, &Iso3::identity(), &Pt2::new(360.0, 200.0))
            .unwrap();
        let expected = scene.dots.screen_point(2, 3).unwrap();
        assert!((traced.screen_point_screen - expected).norm() < 1e-6);
    }
}
