use image::GrayImage;
use serde::{Deserialize, Serialize};
use sofast_core::{Real, Vec3};

use crate::ProcessError;

/// One fixed-pattern capture of an optic.
#[derive(Debug, Clone)]
pub struct MeasurementSofastFixed {
    pub image: GrayImage,
    /// Measure point in the facet frame (single facet) or ensemble frame.
    pub v_measure_point_facet: Vec3,
    /// Distance from the measure point to the screen origin.
    pub dist_optic_screen: Real,
    pub name: String,
    pub date: String,
}

impl MeasurementSofastFixed {
    pub fn new(image: GrayImage, v_measure_point_facet: Vec3, dist_optic_screen: Real) -> Self {
        Self {
            image,
            v_measure_point_facet,
            dist_optic_screen,
            name: String::new(),
            date: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = date.into();
        self
    }

    pub fn validate(&self) -> Result<(), ProcessError> {
        if self.image.width() == 0 || self.image.height() == 0 {
            return Err(ProcessError::input("measurement image is empty"));
        }
        if !(self.dist_optic_screen.is_finite() && self.dist_optic_screen > 0.0) {
            return Err(ProcessError::input(format!(
                "dist_optic_screen must be positive and finite, got {}",
                self.dist_optic_screen
            )));
        }
        if !self.v_measure_point_facet.iter().all(|v| v.is_finite()) {
            return Err(ProcessError::input("measure point is not finite"));
        }
        Ok(())
    }

    /// Everything but the pixels, for calculation records.
    pub fn info(&self) -> MeasurementInfo {
        MeasurementInfo {
            v_measure_point_facet: self.v_measure_point_facet,
            dist_optic_screen: self.dist_optic_screen,
            name: self.name.clone(),
            date: self.date.clone(),
            image_size: [self.image.width(), self.image.height()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementInfo {
    pub v_measure_point_facet: Vec3,
    pub dist_optic_screen: Real,
    pub name: String,
    pub date: String,
    pub image_size: [u32; 2],
}
