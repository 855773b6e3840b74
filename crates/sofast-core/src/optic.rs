use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{iso_from_rt, Iso3, Polygon, Pt2, Pt3, Real, Rot3, Vec3};

#[derive(Debug, Error)]
pub enum OpticDefinitionError {
    #[error("facet outline needs at least 3 corners, got {0}")]
    TooFewCorners(usize),
    #[error("ensemble has {rotations} rotations but {locations} locations")]
    EnsembleLengthMismatch { rotations: usize, locations: usize },
    #[error("ensemble has no facets")]
    EmptyEnsemble,
}

/// Outline and centroid of one mirror facet in its own frame.
///
/// The facet frame has +z along the nominal outward normal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DefinitionFacet {
    /// Closed outline, ordered around the perimeter.
    pub v_facet_corners: Vec<Pt3>,
    pub v_facet_centroid: Pt3,
}

impl DefinitionFacet {
    pub fn new(v_facet_corners: Vec<Pt3>, v_facet_centroid: Pt3) -> Result<Self, OpticDefinitionError> {
        let out = Self {
            v_facet_corners,
            v_facet_centroid,
        };
        out.validate()?;
        Ok(out)
    }

    /// Rectangular facet centred on the origin.
    pub fn rectangular(width: Real, height: Real) -> Self {
        let (hw, hh) = (0.5 * width, 0.5 * height);
        Self {
            v_facet_corners: vec![
                Pt3::new(-hw, -hh, 0.0),
                Pt3::new(hw, -hh, 0.0),
                Pt3::new(hw, hh, 0.0),
                Pt3::new(-hw, hh, 0.0),
            ],
            v_facet_centroid: Pt3::origin(),
        }
    }

    pub fn validate(&self) -> Result<(), OpticDefinitionError> {
        if self.v_facet_corners.len() < 3 {
            return Err(OpticDefinitionError::TooFewCorners(
                self.v_facet_corners.len(),
            ));
        }
        Ok(())
    }

    /// Facet outline projected onto the facet xy plane.
    pub fn outline_xy(&self) -> Polygon {
        Polygon::new(
            self.v_facet_corners
                .iter()
                .map(|p| Pt2::new(p.x, p.y))
                .collect(),
        )
    }
}

/// Placement of every facet inside an ensemble frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DefinitionEnsemble {
    /// Rotation taking facet-frame vectors into the ensemble frame.
    pub r_facet_ensemble: Vec<Rot3>,
    /// Facet origins expressed in the ensemble frame.
    pub v_facet_locations: Vec<Vec3>,
    pub v_centroid_ensemble: Vec3,
}

impl DefinitionEnsemble {
    pub fn new(
        r_facet_ensemble: Vec<Rot3>,
        v_facet_locations: Vec<Vec3>,
        v_centroid_ensemble: Vec3,
    ) -> Result<Self, OpticDefinitionError> {
        let out = Self {
            r_facet_ensemble,
            v_facet_locations,
            v_centroid_ensemble,
        };
        out.validate()?;
        Ok(out)
    }

    pub fn validate(&self) -> Result<(), OpticDefinitionError> {
        if self.r_facet_ensemble.len() != self.v_facet_locations.len() {
            return Err(OpticDefinitionError::EnsembleLengthMismatch {
                rotations: self.r_facet_ensemble.len(),
                locations: self.v_facet_locations.len(),
            });
        }
        if self.r_facet_ensemble.is_empty() {
            return Err(OpticDefinitionError::EmptyEnsemble);
        }
        Ok(())
    }

    pub fn num_facets(&self) -> usize {
        self.v_facet_locations.len()
    }

    /// Transform mapping facet `idx` coordinates to ensemble coordinates.
    pub fn facet_to_ensemble(&self, idx: usize) -> Option<Iso3> {
        let r = self.r_facet_ensemble.get(idx)?;
        let t = self.v_facet_locations.get(idx)?;
        Some(iso_from_rt(r, t))
    }
}
