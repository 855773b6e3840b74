use serde::{Deserialize, Serialize};

use crate::{iso_from_rt, Iso3, Pt3, Rot3, Vec3};

/// Fixed camera/screen relationship.
///
/// `r_cam_screen` rotates camera-frame vectors into the screen frame and
/// `v_cam_screen_cam` points from the camera origin to the screen origin,
/// expressed in the camera frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpatialOrientation {
    pub r_cam_screen: Rot3,
    pub v_cam_screen_cam: Vec3,
}

impl SpatialOrientation {
    pub fn new(r_cam_screen: Rot3, v_cam_screen_cam: Vec3) -> Self {
        Self {
            r_cam_screen,
            v_cam_screen_cam,
        }
    }

    /// Transform mapping screen coordinates into camera coordinates.
    pub fn screen_to_cam(&self) -> Iso3 {
        iso_from_rt(&self.r_cam_screen.inverse(), &self.v_cam_screen_cam)
    }

    pub fn is_finite(&self) -> bool {
        self.r_cam_screen.matrix().iter().all(|v| v.is_finite())
            && self.v_cam_screen_cam.iter().all(|v| v.is_finite())
    }

    /// Attach a solved optic pose (`optic -> camera`).
    pub fn with_optic(&self, optic_to_cam: Iso3) -> OpticOrientation {
        OpticOrientation {
            optic_to_cam,
            screen_to_cam: self.screen_to_cam(),
        }
    }
}

/// Camera, screen and optic frames once the optic pose is known.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct OpticOrientation {
    pub optic_to_cam: Iso3,
    pub screen_to_cam: Iso3,
}

impl OpticOrientation {
    pub fn cam_to_optic(&self) -> Iso3 {
        self.optic_to_cam.inverse()
    }

    pub fn screen_to_optic(&self) -> Iso3 {
        self.cam_to_optic() * self.screen_to_cam
    }

    /// Camera origin expressed in the optic frame.
    pub fn camera_position_optic(&self) -> Pt3 {
        self.cam_to_optic() * Pt3::origin()
    }

    /// Screen origin expressed in the optic frame.
    pub fn screen_origin_optic(&self) -> Pt3 {
        self.screen_to_optic() * Pt3::origin()
    }

    /// Rotate a camera-frame direction into the optic frame.
    pub fn cam_dir_to_optic(&self, dir: &Vec3) -> Vec3 {
        self.optic_to_cam.rotation.inverse_transform_vector(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_origin_maps_through_optic() {
        let orient = SpatialOrientation::new(
            Rot3::from_euler_angles(0.1, 0.0, 0.0),
            Vec3::new(0.0, 50.0, 10.0),
        );
        let optic_to_cam = iso_from_rt(
            &Rot3::from_euler_angles(std::f64::consts::PI, 0.0, 0.0),
            &Vec3::new(0.0, 0.0, 1000.0),
        );
        let o = orient.with_optic(optic_to_cam);
        let s_optic = o.screen_origin_optic();
        let s_cam = optic_to_cam * s_optic;
        assert!((s_cam.coords - orient.v_cam_screen_cam).norm() < 1e-9);
        let c = o.camera_position_optic();
        assert!((optic_to_cam * c).coords.norm() < 1e-9);
    }
}
