//! Law-of-reflection factors for the joint surface/alignment solve.
//!
//! Parameter blocks:
//! - `align`: SE(3) pose taking the aligned surface frame into the facet frame,
//! - `surface`: shape coefficients of a [`SurfaceShape`] (absent for plano).
//!
//! Measurement data (camera position, pixel rays, screen points) is given in
//! the facet frame and mapped into the aligned frame inside the residual.

use nalgebra::{convert, DVector, DVectorView, RealField, UnitQuaternion, Vector3};
use sofast_core::SurfaceShape;
use tiny_solver::factors::Factor;

use crate::params::{se3_inverse_transform, se3_parts, vec3_const};

fn shape_coeffs<T: RealField>(params: &[DVector<T>], shape: &SurfaceShape) -> Vec<T> {
    if shape.num_coeffs() == 0 {
        return Vec::new();
    }
    debug_assert!(params.len() > 1, "expected [align, surface] parameter blocks");
    params[1].iter().cloned().collect()
}

/// Unit normal of the height field at `(x, y)` in the aligned frame.
fn surface_normal<T: RealField>(shape: &SurfaceShape, c: &[T], x: T, y: T) -> Vector3<T> {
    let g = shape.gradient_generic(c, x, y);
    Vector3::new(-g.x.clone(), -g.y.clone(), T::one()).normalize()
}

/// Mirror `d` about the unit normal `n`.
pub fn reflect<T: RealField>(d: &Vector3<T>, n: &Vector3<T>) -> Vector3<T> {
    let two = T::one() + T::one();
    d - n * (two * d.dot(n))
}

/// Angular miss between the reflected pixel ray and the known screen point.
///
/// Returns `û × r̂` where `û` points from the surface hit to the screen point
/// and `r̂` is the reflected ray, both in the aligned frame.
pub fn reflection_residual_generic<T: RealField>(
    align: DVectorView<'_, T>,
    coeffs: &[T],
    shape: &SurfaceShape,
    cam_f: [f64; 3],
    ray_f: [f64; 3],
    screen_f: [f64; 3],
) -> Vector3<T> {
    let (rot, t) = se3_parts(align);
    let origin = se3_inverse_transform(&rot, &t, &vec3_const(cam_f));
    let dir = rot.inverse_transform_vector(&vec3_const(ray_f));
    let screen = se3_inverse_transform(&rot, &t, &vec3_const(screen_f));

    let (_, p) = shape.intersect_ray(coeffs, &origin, &dir);
    let n = surface_normal(shape, coeffs, p.x.clone(), p.y.clone());
    let r = reflect(&dir, &n);
    let to_screen = (screen - p).normalize();
    to_screen.cross(&r)
}

/// Surface point hit by a ray given in the facet frame, returned in the facet frame.
pub fn facet_hit_generic<T: RealField>(
    rot: &UnitQuaternion<T>,
    t: &Vector3<T>,
    coeffs: &[T],
    shape: &SurfaceShape,
    origin_f: [f64; 3],
    dir_f: [f64; 3],
) -> Vector3<T> {
    let origin = se3_inverse_transform(rot, t, &vec3_const(origin_f));
    let dir = rot.inverse_transform_vector(&vec3_const(dir_f));
    let (_, p) = shape.intersect_ray(coeffs, &origin, &dir);
    rot.transform_vector(&p) + t
}

#[derive(Debug, Clone)]
pub struct ReflectionFactor {
    pub cam: [f64; 3],
    pub ray: [f64; 3],
    pub screen: [f64; 3],
    pub shape: SurfaceShape,
    pub w: f64,
}

impl<T: RealField> Factor<T> for ReflectionFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let c = shape_coeffs(params, &self.shape);
        let r = reflection_residual_generic(
            params[0].as_view(),
            &c,
            &self.shape,
            self.cam,
            self.ray,
            self.screen,
        );
        let sw = convert::<f64, T>(self.w.sqrt());
        DVector::from_row_slice(&[r.x.clone() * sw.clone(), r.y.clone() * sw.clone(), r.z.clone() * sw])
    }
}

/// Pins the measure point: the surface hit of the measure ray must lie
/// `dist` away from the screen origin.
#[derive(Debug, Clone)]
pub struct MeasureDistanceFactor {
    pub cam: [f64; 3],
    pub ray: [f64; 3],
    pub screen_origin: [f64; 3],
    pub dist: f64,
    pub shape: SurfaceShape,
    pub w: f64,
}

impl<T: RealField> Factor<T> for MeasureDistanceFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let c = shape_coeffs(params, &self.shape);
        let (rot, t) = se3_parts(params[0].as_view());
        let hit = facet_hit_generic(&rot, &t, &c, &self.shape, self.cam, self.ray);
        let d = (hit - vec3_const::<T>(self.screen_origin)).norm();
        let r = (d - convert::<f64, T>(self.dist)) * convert::<f64, T>(self.w.sqrt());
        DVector::from_row_slice(&[r])
    }
}

/// Weak prior tying `align` to its coarse estimate.
///
/// Rotation about the surface normal and in-plane translation are not
/// observable for flat mirrors; the prior keeps them at the initial value.
#[derive(Debug, Clone)]
pub struct AlignPriorFactor {
    /// Reference pose as `[qx, qy, qz, qw, tx, ty, tz]`.
    pub reference: [f64; 7],
    pub w: f64,
}

impl<T: RealField> Factor<T> for AlignPriorFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let (rot, t) = se3_parts(params[0].as_view());
        let q0 = UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(
            convert::<f64, T>(self.reference[3]),
            convert::<f64, T>(self.reference[0]),
            convert::<f64, T>(self.reference[1]),
            convert::<f64, T>(self.reference[2]),
        ));
        let t0 = vec3_const::<T>([self.reference[4], self.reference[5], self.reference[6]]);
        let dq = q0.inverse() * rot;
        let two = T::one() + T::one();
        let sw = convert::<f64, T>(self.w.sqrt());
        let dt = (t - t0) * sw.clone();
        let imag = dq.into_inner().imag() * (two * sw);
        DVector::from_row_slice(&[
            imag.x.clone(),
            imag.y.clone(),
            imag.z.clone(),
            dt.x.clone(),
            dt.y.clone(),
            dt.z.clone(),
        ])
    }
}
