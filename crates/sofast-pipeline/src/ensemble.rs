//! Facet alignment inside an ensemble.
//!
//! Every facet's solved surface frame is placed in the ensemble frame through
//! its definition placement, then the whole set is rotated so the chosen
//! pointing reference lands on +z.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sofast_core::{
    iso_from_rt, normal_to_slope, rotation_between, slope_to_normal, DefinitionEnsemble, Iso3, Vec3,
};
use sofast_optim::SlopeSolverData;
use thiserror::Error;

use crate::records::CalculationFacetEnsemble;

#[derive(Debug, Error)]
pub enum EnsembleError {
    #[error("unrecognized pointing reference {0:?}, expected \"average\" or a facet index")]
    InvalidReference(String),
    #[error("reference facet {index} out of range for {num_facets} facets")]
    FacetIndexOutOfRange { index: usize, num_facets: usize },
    #[error("no slope solutions available")]
    SlopesNotSolved,
    #[error("{solved} slope solutions for an ensemble of {num_facets} facets")]
    FacetCountMismatch { solved: usize, num_facets: usize },
    #[error("facet {0} slope normal lies in the ensemble xy plane")]
    DegenerateSlope(usize),
}

/// Which pointing direction is mapped onto the ensemble +z axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointingReference {
    /// Normalized mean of all facet pointings.
    #[default]
    Average,
    Facet(usize),
}

impl FromStr for PointingReference {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("average") {
            return Ok(Self::Average);
        }
        s.parse::<usize>()
            .map(Self::Facet)
            .map_err(|_| EnsembleError::InvalidReference(s.to_string()))
    }
}

impl fmt::Display for PointingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Average => f.write_str("average"),
            Self::Facet(i) => write!(f, "{i}"),
        }
    }
}

/// Place solved facets in the ensemble frame and level them on `reference`.
pub fn calculate_facet_pointing(
    slopes: &[SlopeSolverData],
    ensemble: &DefinitionEnsemble,
    reference: PointingReference,
) -> Result<Vec<CalculationFacetEnsemble>, EnsembleError> {
    if slopes.is_empty() {
        return Err(EnsembleError::SlopesNotSolved);
    }
    let num_facets = ensemble.num_facets();
    if slopes.len() != num_facets {
        return Err(EnsembleError::FacetCountMismatch {
            solved: slopes.len(),
            num_facets,
        });
    }

    let placed = slopes
        .iter()
        .enumerate()
        .map(|(i, data)| {
            ensemble
                .facet_to_ensemble(i)
                .map(|p| p * data.trans_alignment)
                .ok_or(EnsembleError::FacetIndexOutOfRange {
                    index: i,
                    num_facets,
                })
        })
        .collect::<Result<Vec<Iso3>, _>>()?;
    let pointings: Vec<Vec3> = placed.iter().map(|t| t.rotation * Vec3::z()).collect();

    let v_ref = match reference {
        PointingReference::Average => {
            let sum: Vec3 = pointings.iter().sum();
            sum.try_normalize(1e-12)
                .ok_or(EnsembleError::InvalidReference("average".into()))?
        }
        PointingReference::Facet(index) => *pointings
            .get(index)
            .ok_or(EnsembleError::FacetIndexOutOfRange { index, num_facets })?,
    };
    let correction = iso_from_rt(&rotation_between(&v_ref, &Vec3::z()), &Vec3::zeros());
    log::debug!(
        "ensemble pointing reference {reference}: {:?}, correction {:.3e} rad",
        v_ref,
        correction.rotation.angle()
    );

    slopes
        .iter()
        .zip(placed)
        .enumerate()
        .map(|(i, (data, placement))| {
            let trans = correction * placement;
            let slopes_ensemble_xy = data
                .slopes_facet_xy
                .iter()
                .map(|s| {
                    normal_to_slope(&(trans.rotation * slope_to_normal(s.x, s.y)))
                        .ok_or(EnsembleError::DegenerateSlope(i))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(CalculationFacetEnsemble {
                trans_facet_ensemble: trans,
                slopes_ensemble_xy,
                v_surf_points_ensemble: data.v_surf_points_facet.iter().map(|p| trans * p).collect(),
                v_facet_pointing_ensemble: trans.rotation * Vec3::z(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sofast_core::{Pt3, Rot3, SurfaceModel, Vec2};

    fn tilted(angle_y: f64) -> SlopeSolverData {
        SlopeSolverData {
            surface: SurfaceModel::plano(false, 1),
            trans_alignment: iso_from_rt(&Rot3::from_euler_angles(0.0, angle_y, 0.0), &Vec3::zeros()),
            v_surf_points_facet: vec![Pt3::new(1.0, 0.0, 0.0), Pt3::new(0.0, 1.0, 0.0)],
            slopes_facet_xy: vec![Vec2::zeros(); 2],
            coarse_iterations: 1,
            coarse_converged: true,
            fine_converged: true,
            rms_residual: 0.0,
        }
    }

    fn pair() -> DefinitionEnsemble {
        DefinitionEnsemble::new(
            vec![Rot3::identity(); 2],
            vec![Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0)],
            Vec3::zeros(),
        )
        .unwrap()
    }

    fn tilt_about_y(p: &Vec3) -> f64 {
        p.x.atan2(p.z)
    }

    #[test]
    fn parse_reference() {
        assert_eq!("average".parse::<PointingReference>().unwrap(), PointingReference::Average);
        assert_eq!(" 2".parse::<PointingReference>().unwrap(), PointingReference::Facet(2));
        assert!(matches!(
            "centre".parse::<PointingReference>(),
            Err(EnsembleError::InvalidReference(_))
        ));
        assert!("-1".parse::<PointingReference>().is_err());
    }

    #[test]
    fn average_reference_is_symmetric() {
        let out = calculate_facet_pointing(&[tilted(0.03), tilted(-0.01)], &pair(), PointingReference::Average)
            .unwrap();
        let a = tilt_about_y(&out[0].v_facet_pointing_ensemble);
        let b = tilt_about_y(&out[1].v_facet_pointing_ensemble);
        assert!((a - 0.02).abs() < 1e-12, "a={a}");
        assert!((b + 0.02).abs() < 1e-12, "b={b}");
        // Flat facet slopes follow the facet tilt.
        assert!((out[0].slopes_ensemble_xy[0].x + 0.02_f64.tan()).abs() < 1e-12);
        assert!(out[0].slopes_ensemble_xy[0].y.abs() < 1e-12);
    }

    #[test]
    fn facet_reference_levels_that_facet() {
        let out = calculate_facet_pointing(&[tilted(0.03), tilted(-0.01)], &pair(), PointingReference::Facet(1))
            .unwrap();
        assert!((out[1].v_facet_pointing_ensemble - Vec3::z()).norm() < 1e-12);
        assert!((tilt_about_y(&out[0].v_facet_pointing_ensemble) - 0.04).abs() < 1e-12);
        // Facet 1 sits at x = +1 tilted by -0.01, then the whole set is levelled by +0.01.
        assert!((out[1].v_surf_points_ensemble[0] - Pt3::new(2.0, 0.0, -0.01)).norm() < 1e-3);
    }

    #[test]
    fn errors() {
        let ens = pair();
        assert!(matches!(
            calculate_facet_pointing(&[], &ens, PointingReference::Average),
            Err(EnsembleError::SlopesNotSolved)
        ));
        assert!(matches!(
            calculate_facet_pointing(&[tilted(0.0)], &ens, PointingReference::Average),
            Err(EnsembleError::FacetCountMismatch { solved: 1, num_facets: 2 })
        ));
        assert!(matches!(
            calculate_facet_pointing(&[tilted(0.0), tilted(0.0)], &ens, PointingReference::Facet(2)),
            Err(EnsembleError::FacetIndexOutOfRange { index: 2, num_facets: 2 })
        ));
    }
}
