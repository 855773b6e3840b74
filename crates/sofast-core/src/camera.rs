//! Calibrated camera: pixel ↔ pointing ray.
//!
//! `pixel = K · distort(x / z, y / z)`. Deflectometry mostly runs this
//! backwards: every indexed dot pixel becomes a unit ray through
//! [`CameraModel::backproject_pixel`].

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Pt3, Real};

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera parameter {0} is not finite")]
    NonFinite(&'static str),
    #[error("focal length must be positive, got fx={fx}, fy={fy}")]
    InvalidFocal { fx: Real, fy: Real },
}

/// Pinhole intrinsics with optional skew.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: Real,
    pub fy: Real,
    pub cx: Real,
    pub cy: Real,
    #[serde(default)]
    pub skew: Real,
}

impl Intrinsics {
    fn to_pixel(&self, n: &Vector2<Real>) -> Vector2<Real> {
        Vector2::new(self.fx * n.x + self.skew * n.y + self.cx, self.fy * n.y + self.cy)
    }

    fn to_normalized(&self, px: &Vector2<Real>) -> Vector2<Real> {
        let y = (px.y - self.cy) / self.fy;
        Vector2::new((px.x - self.cx - self.skew * y) / self.fx, y)
    }
}

/// Lens distortion in normalized image coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Distortion {
    #[default]
    None,
    /// Radial `k1, k2, k3` and tangential `p1, p2`; `iters` fixed-point steps
    /// invert it.
    BrownConrady5 {
        k1: Real,
        k2: Real,
        k3: Real,
        p1: Real,
        p2: Real,
        #[serde(default = "default_undistort_iters")]
        iters: u32,
    },
}

fn default_undistort_iters() -> u32 {
    8
}

impl Distortion {
    /// From OpenCV-ordered coefficients `[k1, k2, p1, p2, k3]`.
    pub fn from_opencv(c: [Real; 5]) -> Self {
        Self::BrownConrady5 {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
            iters: default_undistort_iters(),
        }
    }

    fn coefficients(&self) -> Vec<(&'static str, Real)> {
        match *self {
            Self::None => Vec::new(),
            Self::BrownConrady5 { k1, k2, k3, p1, p2, .. } => {
                vec![("k1", k1), ("k2", k2), ("k3", k3), ("p1", p1), ("p2", p2)]
            }
        }
    }

    pub fn distort(&self, n: &Vector2<Real>) -> Vector2<Real> {
        match *self {
            Self::None => *n,
            Self::BrownConrady5 { k1, k2, k3, p1, p2, .. } => {
                let (x, y) = (n.x, n.y);
                let r2 = x * x + y * y;
                let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));
                Vector2::new(
                    x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
                    y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
                )
            }
        }
    }

    pub fn undistort(&self, n_dist: &Vector2<Real>) -> Vector2<Real> {
        let iters = match *self {
            Self::None => return *n_dist,
            Self::BrownConrady5 { iters, .. } => iters.max(1),
        };
        let mut n = *n_dist;
        for _ in 0..iters {
            n -= self.distort(&n) - n_dist;
        }
        n
    }
}

/// Serializable camera calibration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraParams {
    pub intrinsics: Intrinsics,
    #[serde(default)]
    pub distortion: Distortion,
    /// `[width, height]` in pixels, if known.
    #[serde(default)]
    pub image_size: Option<[u32; 2]>,
}

impl CameraParams {
    /// Pinhole camera without distortion.
    pub fn pinhole(fx: Real, fy: Real, cx: Real, cy: Real) -> Self {
        Self {
            intrinsics: Intrinsics {
                fx,
                fy,
                cx,
                cy,
                skew: 0.0,
            },
            distortion: Distortion::None,
            image_size: None,
        }
    }

    pub fn validate(&self) -> Result<(), CameraError> {
        let k = &self.intrinsics;
        let named = [("fx", k.fx), ("fy", k.fy), ("cx", k.cx), ("cy", k.cy), ("skew", k.skew)];
        for (name, v) in named.into_iter().chain(self.distortion.coefficients()) {
            if !v.is_finite() {
                return Err(CameraError::NonFinite(name));
            }
        }
        if k.fx <= 0.0 || k.fy <= 0.0 {
            return Err(CameraError::InvalidFocal { fx: k.fx, fy: k.fy });
        }
        Ok(())
    }

    /// Mean focal length in pixels, used to express normalized residuals in pixels.
    pub fn mean_focal(&self) -> Real {
        0.5 * (self.intrinsics.fx + self.intrinsics.fy)
    }

    pub fn build(&self) -> Result<CameraModel, CameraError> {
        self.validate()?;
        Ok(CameraModel {
            k: self.intrinsics,
            dist: self.distortion,
        })
    }
}

/// Unit pointing direction of a pixel, camera frame.
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub dir: Vector3<Real>,
}

/// Validated runtime camera.
#[derive(Clone, Debug)]
pub struct CameraModel {
    k: Intrinsics,
    dist: Distortion,
}

impl CameraModel {
    /// Pixel of a camera-frame point; `None` at or behind the camera plane.
    pub fn project_point(&self, p_c: &Pt3) -> Option<Vector2<Real>> {
        if p_c.z <= 0.0 {
            return None;
        }
        let n = Vector2::new(p_c.x / p_c.z, p_c.y / p_c.z);
        Some(self.k.to_pixel(&self.dist.distort(&n)))
    }

    pub fn backproject_pixel(&self, px: &Vector2<Real>) -> Ray {
        let n = self.dist.undistort(&self.k.to_normalized(px));
        Ray {
            dir: Vector3::new(n.x, n.y, 1.0).normalize(),
        }
    }
}
