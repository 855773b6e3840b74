use nalgebra::{convert, DVector, DVectorView, RealField, Vector2, Vector3};
use sofast_core::{Pt2, Pt3, Real};
use tiny_solver::factors::Factor;

use crate::params::se3_parts;

/// Keeps the perspective division finite for corners on the camera plane.
const MIN_DEPTH: f64 = 1.0e-9;

/// Pixel-scaled reprojection of one optic-frame facet corner.
///
/// `observed` is the undistorted corner in normalized image coordinates;
/// `focal` turns the normalized miss into pixels.
#[derive(Debug, Clone)]
pub struct CornerFactor {
    corner: Pt3,
    observed: Pt2,
    focal: Real,
}

impl CornerFactor {
    pub fn new(corner: Pt3, observed: Pt2, focal: Real) -> Self {
        Self {
            corner,
            observed,
            focal,
        }
    }

    pub fn residual<T: RealField>(&self, pose: DVectorView<'_, T>) -> Vector2<T> {
        let (rot, t) = se3_parts(pose);
        let corner = Vector3::<T>::new(
            convert(self.corner.x),
            convert(self.corner.y),
            convert(self.corner.z),
        );
        let pc = rot.transform_vector(&corner) + t;
        let depth = pc.z.clone() + convert::<f64, T>(MIN_DEPTH);
        let projected = Vector2::new(pc.x.clone() / depth.clone(), pc.y.clone() / depth);
        let observed = Vector2::<T>::new(convert(self.observed.x), convert(self.observed.y));
        (projected - observed) * convert::<f64, T>(self.focal)
    }
}

impl<T: RealField> Factor<T> for CornerFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let r = self.residual(params[0].as_view());
        DVector::from_column_slice(r.as_slice())
    }
}
