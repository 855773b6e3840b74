//! Mask boundary extraction and polygon corner refinement.
//!
//! Expected facet corners (projected from a pose guess) are snapped onto the
//! mask by fitting one total-least-squares line per expected edge to the
//! boundary points near it, then intersecting consecutive lines.

use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};
use sofast_core::{Polygon, Pt2, Real, Vec2};
use thiserror::Error;

use crate::Mask;

#[derive(Debug, Error)]
pub enum PerimeterError {
    #[error("expected polygon needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),
    #[error("edge {edge}: only {found} boundary points near the expected edge (need {needed})")]
    TooFewEdgePoints {
        edge: usize,
        found: usize,
        needed: usize,
    },
    #[error("edges {0} and {1} are parallel")]
    ParallelEdges(usize, usize),
}

/// Corner refinement parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PerimeterRefineConfig {
    /// Boundary points farther than this (pixels) from an expected edge are ignored.
    pub perpendicular_search_dist: Real,
    /// Fraction of each edge length ignored at both ends.
    pub end_exclusion_fraction: Real,
    pub min_points_per_edge: usize,
}

impl Default for PerimeterRefineConfig {
    fn default() -> Self {
        Self {
            perpendicular_search_dist: 10.0,
            end_exclusion_fraction: 0.1,
            min_points_per_edge: 5,
        }
    }
}

/// Sub-pixel boundary samples: midpoints between each active pixel and its
/// inactive (or out-of-image) 4-neighbours.
pub fn boundary_points(mask: &Mask) -> Vec<Pt2> {
    let (w, h) = (mask.width() as isize, mask.height() as isize);
    let active = |x: isize, y: isize| x >= 0 && y >= 0 && x < w && y < h && mask.get(x as usize, y as usize);
    let mut out = Vec::new();
    for y in 0..h {
        for x in 0..w {
            if !active(x, y) {
                continue;
            }
            for (dx, dy) in [(1isize, 0isize), (-1, 0), (0, 1), (0, -1)] {
                if !active(x + dx, y + dy) {
                    out.push(Pt2::new(
                        x as Real + 0.5 * dx as Real,
                        y as Real + 0.5 * dy as Real,
                    ));
                }
            }
        }
    }
    out
}

/// Line through `point` with unit direction `dir`.
#[derive(Clone, Copy, Debug)]
pub struct Line2 {
    pub point: Pt2,
    pub dir: Vec2,
}

impl Line2 {
    pub fn intersect(&self, other: &Line2) -> Option<Pt2> {
        let cross = self.dir.x * other.dir.y - self.dir.y * other.dir.x;
        if cross.abs() < 1e-9 {
            return None;
        }
        let d = other.point - self.point;
        let t = (d.x * other.dir.y - d.y * other.dir.x) / cross;
        Some(self.point + self.dir * t)
    }
}

/// Total-least-squares line through a point set.
pub fn fit_line_tls(points: &[Pt2]) -> Option<Line2> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as Real;
    let c = points.iter().fold(Vec2::zeros(), |acc, p| acc + p.coords) / n;
    let mut cov = Matrix2::zeros();
    for p in points {
        let d = p.coords - c;
        cov += d * d.transpose();
    }
    let eig = cov.symmetric_eigen();
    let i = if eig.eigenvalues[0] >= eig.eigenvalues[1] { 0 } else { 1 };
    let dir = eig.eigenvectors.column(i).into_owned();
    Some(Line2 {
        point: Pt2::from(c),
        dir: dir.try_normalize(1e-12)?,
    })
}

/// Snap the vertices of `expected` onto the boundary samples.
pub fn refine_polygon_corners(
    boundary: &[Pt2],
    expected: &Polygon,
    cfg: &PerimeterRefineConfig,
) -> Result<Polygon, PerimeterError> {
    let n = expected.len();
    if n < 3 {
        return Err(PerimeterError::TooFewVertices(n));
    }
    let mut lines = Vec::with_capacity(n);
    for edge in 0..n {
        let a = expected.vertices[edge];
        let b = expected.vertices[(edge + 1) % n];
        let len = (b - a).norm();
        let u = (b - a) / len.max(1e-12);
        let normal = Vec2::new(-u.y, u.x);
        let lo = cfg.end_exclusion_fraction * len;
        let hi = (1.0 - cfg.end_exclusion_fraction) * len;
        let near: Vec<Pt2> = boundary
            .iter()
            .filter(|p| {
                let v = *p - a;
                let along = v.dot(&u);
                along >= lo && along <= hi && v.dot(&normal).abs() <= cfg.perpendicular_search_dist
            })
            .copied()
            .collect();
        let needed = cfg.min_points_per_edge.max(2);
        if near.len() < needed {
            return Err(PerimeterError::TooFewEdgePoints {
                edge,
                found: near.len(),
                needed,
            });
        }
        let line = fit_line_tls(&near).ok_or(PerimeterError::TooFewEdgePoints {
            edge,
            found: near.len(),
            needed,
        })?;
        lines.push(line);
    }

    let mut corners = Vec::with_capacity(n);
    for i in 0..n {
        let prev = (i + n - 1) % n;
        let c = lines[prev]
            .intersect(&lines[i])
            .ok_or(PerimeterError::ParallelEdges(prev, i))?;
        corners.push(c);
    }
    Ok(Polygon::new(corners))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect_mask(x0: usize, y0: usize, x1: usize, y1: usize) -> Mask {
        let mut m = Mask::new(100, 80);
        for y in y0..=y1 {
            for x in x0..=x1 {
                m.set(x, y, true);
            }
        }
        m
    }

    #[test]
    fn boundary_of_single_pixel() {
        let m = rect_mask(5, 5, 5, 5);
        let b = boundary_points(&m);
        assert_eq!(b.len(), 4);
    }

    #[test]
    fn corners_snap_to_mask_edges() {
        let m = rect_mask(20, 10, 69, 59);
        let boundary = boundary_points(&m);
        let expected = Polygon::new(vec![
            Pt2::new(22.0, 12.0),
            Pt2::new(67.0, 8.0),
            Pt2::new(71.0, 61.0),
            Pt2::new(18.0, 57.0),
        ]);
        let refined =
            refine_polygon_corners(&boundary, &expected, &PerimeterRefineConfig::default()).unwrap();
        let truth = [
            Pt2::new(19.5, 9.5),
            Pt2::new(69.5, 9.5),
            Pt2::new(69.5, 59.5),
            Pt2::new(19.5, 59.5),
        ];
        for (c, t) in refined.vertices.iter().zip(truth) {
            assert!((c - t).norm() < 1e-9, "corner {c} vs {t}");
        }
    }

    #[test]
    fn missing_edge_errors() {
        let m = Mask::new(50, 50);
        let expected = Polygon::new(vec![
            Pt2::new(10.0, 10.0),
            Pt2::new(40.0, 10.0),
            Pt2::new(40.0, 40.0),
        ]);
        let err = refine_polygon_corners(
            &boundary_points(&m),
            &expected,
            &PerimeterRefineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PerimeterError::TooFewEdgePoints { edge: 0, .. }));
    }
}
