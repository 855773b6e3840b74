use nalgebra::{RealField, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::Real;

/// Newton steps used by [`SurfaceShape::intersect_ray`].
pub const RAY_INTERSECTION_ITERS: usize = 8;

/// Shape term of a facet height field `z = h(x, y)` in the aligned facet frame.
///
/// The shape has zero height and zero slope at the frame origin; tilt and
/// piston live in the alignment transform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SurfaceShape {
    /// Flat mirror, no shape coefficients.
    Plano,
    /// `z = a x² + b y²`.
    Parabolic { a: Real, b: Real },
}

impl SurfaceShape {
    pub fn num_coeffs(&self) -> usize {
        match self {
            SurfaceShape::Plano => 0,
            SurfaceShape::Parabolic { .. } => 2,
        }
    }

    pub fn coeffs(&self) -> Vec<Real> {
        match self {
            SurfaceShape::Plano => Vec::new(),
            SurfaceShape::Parabolic { a, b } => vec![*a, *b],
        }
    }

    /// Same shape family with new coefficients. Missing entries keep the current value.
    pub fn with_coeffs(&self, c: &[Real]) -> Self {
        match self {
            SurfaceShape::Plano => SurfaceShape::Plano,
            SurfaceShape::Parabolic { a, b } => SurfaceShape::Parabolic {
                a: c.first().copied().unwrap_or(*a),
                b: c.get(1).copied().unwrap_or(*b),
            },
        }
    }

    /// Per-coefficient height basis `φ_k(x, y)`.
    pub fn height_basis(&self, x: Real, y: Real) -> Vec<Real> {
        match self {
            SurfaceShape::Plano => Vec::new(),
            SurfaceShape::Parabolic { .. } => vec![x * x, y * y],
        }
    }

    /// Per-coefficient slope basis `(∂φ_k/∂x, ∂φ_k/∂y)`.
    pub fn slope_basis(&self, x: Real, y: Real) -> Vec<(Real, Real)> {
        match self {
            SurfaceShape::Plano => Vec::new(),
            SurfaceShape::Parabolic { .. } => vec![(2.0 * x, 0.0), (0.0, 2.0 * y)],
        }
    }

    pub fn height(&self, x: Real, y: Real) -> Real {
        self.height_generic(&self.coeffs(), x, y)
    }

    pub fn gradient(&self, x: Real, y: Real) -> Vector2<Real> {
        self.gradient_generic(&self.coeffs(), x, y)
    }

    /// Height evaluated with externally supplied coefficients (autodiff friendly).
    pub fn height_generic<T: RealField>(&self, c: &[T], x: T, y: T) -> T {
        match self {
            SurfaceShape::Plano => T::zero(),
            SurfaceShape::Parabolic { .. } => {
                c[0].clone() * x.clone() * x + c[1].clone() * y.clone() * y
            }
        }
    }

    pub fn gradient_generic<T: RealField>(&self, c: &[T], x: T, y: T) -> Vector2<T> {
        match self {
            SurfaceShape::Plano => Vector2::zeros(),
            SurfaceShape::Parabolic { .. } => {
                let two = T::one() + T::one();
                Vector2::new(two.clone() * c[0].clone() * x, two * c[1].clone() * y)
            }
        }
    }

    /// Intersect the ray `origin + t * dir` with the height field.
    ///
    /// Starts from the `z = 0` plane and runs a fixed number of Newton steps so
    /// the result stays differentiable. Returns `(t, point)`.
    pub fn intersect_ray<T: RealField>(
        &self,
        c: &[T],
        origin: &Vector3<T>,
        dir: &Vector3<T>,
    ) -> (T, Vector3<T>) {
        let mut t = -origin.z.clone() / dir.z.clone();
        if self.num_coeffs() > 0 {
            for _ in 0..RAY_INTERSECTION_ITERS {
                let p = origin + dir * t.clone();
                let h = self.height_generic(c, p.x.clone(), p.y.clone());
                let g = self.gradient_generic(c, p.x.clone(), p.y.clone());
                let f = p.z.clone() - h;
                let df = dir.z.clone() - (g.x.clone() * dir.x.clone() + g.y.clone() * dir.y.clone());
                t -= f / df;
            }
        }
        let p = origin + dir * t.clone();
        (t, p)
    }
}

fn default_downsample() -> usize {
    1
}

/// Surface model handed to the slope solver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurfaceModel {
    pub shape: SurfaceShape,
    /// Down-weight outlier slopes with a Huber kernel.
    #[serde(default)]
    pub robust_least_squares: bool,
    /// Use every n-th pixel in the least-squares fits.
    #[serde(default = "default_downsample")]
    pub downsample: usize,
}

impl SurfaceModel {
    pub fn plano(robust_least_squares: bool, downsample: usize) -> Self {
        Self {
            shape: SurfaceShape::Plano,
            robust_least_squares,
            downsample: downsample.max(1),
        }
    }

    /// Parabolic surface seeded from focal lengths along x and y.
    ///
    /// A focal length of `f` gives `a = 1 / (4 f)`; infinite focal lengths map to 0.
    pub fn parabolic(
        focal_lengths_xy: (Real, Real),
        robust_least_squares: bool,
        downsample: usize,
    ) -> Self {
        let coef = |f: Real| if f.is_finite() && f != 0.0 { 0.25 / f } else { 0.0 };
        Self {
            shape: SurfaceShape::Parabolic {
                a: coef(focal_lengths_xy.0),
                b: coef(focal_lengths_xy.1),
            },
            robust_least_squares,
            downsample: downsample.max(1),
        }
    }

    /// Focal lengths `(fx, fy)` of a parabolic shape; zero curvature maps to infinity.
    pub fn focal_lengths(&self) -> Option<(Real, Real)> {
        match self.shape {
            SurfaceShape::Plano => None,
            SurfaceShape::Parabolic { a, b } => {
                let f = |c: Real| if c == 0.0 { Real::INFINITY } else { 0.25 / c };
                Some((f(a), f(b)))
            }
        }
    }

    pub fn with_coeffs(&self, c: &[Real]) -> Self {
        Self {
            shape: self.shape.with_coeffs(c),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn focal_length_roundtrip() {
        let s = SurfaceModel::parabolic((100.0, 200.0), false, 1);
        let (fx, fy) = s.focal_lengths().unwrap();
        assert!((fx - 100.0).abs() < 1e-9);
        assert!((fy - 200.0).abs() < 1e-9);
    }

    #[test]
    fn ray_hits_paraboloid() {
        let shape = SurfaceShape::Parabolic { a: 0.01, b: 0.02 };
        let c = shape.coeffs();
        let o = Vector3::new(3.0, -2.0, 50.0);
        let d = Vector3::new(0.05, 0.1, -1.0).normalize();
        let (_, p) = shape.intersect_ray(&c, &o, &d);
        assert!((p.z - shape.height(p.x, p.y)).abs() < 1e-10, "p={p}");
    }

    #[test]
    fn plano_has_no_coefficients() {
        let s = SurfaceModel::plano(true, 0);
        assert_eq!(s.shape.num_coeffs(), 0);
        assert_eq!(s.downsample, 1);
        assert!(s.focal_lengths().is_none());
        let shape = s.shape.clone();
        let (t, p) = shape.intersect_ray::<f64>(&[], &Vector3::new(0.0, 0.0, 10.0), &-Vector3::z());
        assert!((t - 10.0).abs() < 1e-12);
        assert!(p.norm() < 1e-12);
    }

    #[test]
    fn serde_shape_is_tagged() {
        let s = SurfaceModel::parabolic((50.0, 50.0), false, 2);
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"type\":\"parabolic\""), "{json}");
        let back: SurfaceModel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
