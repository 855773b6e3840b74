//! Measured optic representations handed back to callers.

use nalgebra::{Matrix4, RowVector4, Vector4};
use serde::{Deserialize, Serialize};
use sofast_core::{normal_to_slope, slope_to_normal, Iso3, Polygon, Pt2, Pt3, Real, Vec2, Vec3};

/// How [`MirrorPoint::normal_at`] evaluates the surface between samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Normal of the closest sample.
    #[default]
    Nearest,
    /// Slopes from `a + b dx + c dy + d dx dy` through the four closest
    /// samples; exact bilinear interpolation on a regular sample grid.
    Bilinear,
}

const BILINEAR_SAMPLES: usize = 4;

/// Sampled mirror surface: points with unit normals, in the solved surface frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorPoint {
    pub points: Vec<Pt3>,
    pub normals: Vec<Vec3>,
    /// Facet outline in the surface xy plane.
    pub region: Polygon,
    #[serde(default)]
    pub interpolation: Interpolation,
}

impl MirrorPoint {
    pub fn from_slopes(points: Vec<Pt3>, slopes: &[Vec2], region: Polygon) -> Self {
        let normals = slopes
            .iter()
            .map(|s| slope_to_normal(s.x, s.y).normalize())
            .collect();
        Self {
            points,
            normals,
            region,
            interpolation: Interpolation::default(),
        }
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Unit normal at `xy`, if `xy` lies inside the region.
    pub fn normal_at(&self, xy: &Pt2) -> Option<Vec3> {
        if !self.region.contains(xy) {
            return None;
        }
        match self.interpolation {
            Interpolation::Nearest => self.nearest_normal(xy),
            Interpolation::Bilinear => self
                .bilinear_normal(xy)
                .or_else(|| self.nearest_normal(xy)),
        }
    }

    fn nearest_normal(&self, xy: &Pt2) -> Option<Vec3> {
        self.points
            .iter()
            .zip(&self.normals)
            .min_by(|(a, _), (b, _)| {
                let da = (a.x - xy.x).powi(2) + (a.y - xy.y).powi(2);
                let db = (b.x - xy.x).powi(2) + (b.y - xy.y).powi(2);
                da.total_cmp(&db)
            })
            .map(|(_, n)| *n)
    }

    fn bilinear_normal(&self, xy: &Pt2) -> Option<Vec3> {
        if self.points.len() < BILINEAR_SAMPLES {
            return None;
        }
        let mut near: Vec<(Real, usize)> = self
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| ((p.x - xy.x).powi(2) + (p.y - xy.y).powi(2), i))
            .collect();
        near.select_nth_unstable_by(BILINEAR_SAMPLES - 1, |a, b| a.0.total_cmp(&b.0));

        // centred on xy, so the constant term is the value at xy
        let mut design = Matrix4::<Real>::zeros();
        let mut sx = Vector4::<Real>::zeros();
        let mut sy = Vector4::<Real>::zeros();
        for (r, &(_, i)) in near[..BILINEAR_SAMPLES].iter().enumerate() {
            let (dx, dy) = (self.points[i].x - xy.x, self.points[i].y - xy.y);
            design.set_row(r, &RowVector4::new(1.0, dx, dy, dx * dy));
            let s = normal_to_slope(&self.normals[i])?;
            sx[r] = s.x;
            sy[r] = s.y;
        }
        let svd = design.svd(true, true);
        let cx = svd.solve(&sx, 1e-12).ok()?;
        let cy = svd.solve(&sy, 1e-12).ok()?;
        Some(slope_to_normal(cx[0], cy[0]).normalize())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpticGeometry {
    Facet(MirrorPoint),
    /// Facets with their surface → ensemble transforms.
    Ensemble {
        facets: Vec<MirrorPoint>,
        transforms: Vec<Iso3>,
    },
}

impl OpticGeometry {
    pub fn num_facets(&self) -> usize {
        match self {
            Self::Facet(_) => 1,
            Self::Ensemble { facets, .. } => facets.len(),
        }
    }

    /// All sample points in the optic frame (facet or ensemble).
    pub fn points_optic(&self) -> Vec<Pt3> {
        match self {
            Self::Facet(m) => m.points.clone(),
            Self::Ensemble { facets, transforms } => facets
                .iter()
                .zip(transforms)
                .flat_map(|(m, t)| m.points.iter().map(move |p| t * p))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Polygon {
        Polygon::new(vec![
            Pt2::new(-1.0, -1.0),
            Pt2::new(1.0, -1.0),
            Pt2::new(1.0, 1.0),
            Pt2::new(-1.0, 1.0),
        ])
    }

    #[test]
    fn nearest_normal_inside_region() {
        let m = MirrorPoint::from_slopes(
            vec![Pt3::new(-0.5, 0.0, 0.0), Pt3::new(0.5, 0.0, 0.0)],
            &[Vec2::new(0.1, 0.0), Vec2::new(-0.1, 0.0)],
            square(),
        );
        let n = m.normal_at(&Pt2::new(0.4, 0.2)).unwrap();
        assert!((n.norm() - 1.0).abs() < 1e-12);
        assert!(n.x > 0.0);
        assert!(m.normal_at(&Pt2::new(3.0, 0.0)).is_none());
    }

    #[test]
    fn bilinear_blends_grid_corners() {
        // slope x grows linearly along x, slope y along y
        let mut points = Vec::new();
        let mut slopes = Vec::new();
        for j in 0..3 {
            for i in 0..3 {
                let (x, y) = (i as Real - 1.0, j as Real - 1.0);
                points.push(Pt3::new(x, y, 0.0));
                slopes.push(Vec2::new(0.01 * x, -0.02 * y));
            }
        }
        let region = Polygon::new(vec![
            Pt2::new(-1.5, -1.5),
            Pt2::new(1.5, -1.5),
            Pt2::new(1.5, 1.5),
            Pt2::new(-1.5, 1.5),
        ]);
        let m = MirrorPoint::from_slopes(points, &slopes, region);
        let q = Pt2::new(0.3, -0.6);

        let nearest = m.normal_at(&q).unwrap();
        assert!((nearest - slope_to_normal(0.0, 0.02).normalize()).norm() < 1e-12);

        let m = m.with_interpolation(Interpolation::Bilinear);
        let n = m.normal_at(&q).unwrap();
        let expected = slope_to_normal(0.003, 0.012).normalize();
        assert!((n - expected).norm() < 1e-9, "n={n} expected={expected}");
        assert!(m.normal_at(&Pt2::new(2.0, 0.0)).is_none());
    }

    #[test]
    fn interpolation_json_names() {
        let m: Interpolation = serde_json::from_str(r#""bilinear""#).unwrap();
        assert_eq!(m, Interpolation::Bilinear);
        let legacy = r#"{"points": [], "normals": [], "region": {"vertices": []}}"#;
        let mp: MirrorPoint = serde_json::from_str(legacy).unwrap();
        assert_eq!(mp.interpolation, Interpolation::Nearest);
    }

    #[test]
    fn ensemble_points_are_transformed() {
        let m = MirrorPoint::from_slopes(vec![Pt3::origin()], &[Vec2::zeros()], square());
        let optic = OpticGeometry::Ensemble {
            facets: vec![m.clone(), m],
            transforms: vec![
                Iso3::translation(-2.0, 0.0, 0.0),
                Iso3::translation(2.0, 0.0, 0.0),
            ],
        };
        assert_eq!(optic.num_facets(), 2);
        let pts = optic.points_optic();
        assert_eq!(pts, vec![Pt3::new(-2.0, 0.0, 0.0), Pt3::new(2.0, 0.0, 0.0)]);
    }
}
