use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Pt3, Real};

#[derive(Debug, Error)]
pub enum DotPatternError {
    #[error("dot index ({ix}, {iy}) outside pattern range x={x_range:?}, y={y_range:?}")]
    IndexOutOfRange {
        ix: i32,
        iy: i32,
        x_range: (i32, i32),
        y_range: (i32, i32),
    },
    #[error("dot table has {got} entries, expected {nx} x {ny}")]
    ShapeMismatch { got: usize, nx: usize, ny: usize },
    #[error("dot index axis must be a contiguous increasing range")]
    NonContiguousIndex,
}

/// Screen-frame locations of the fixed dot pattern.
///
/// Dot `(x_dot_index[i], y_dot_index[j])` lives at `xyz_dot_loc[j * nx + i]`.
/// Unmeasured dots may be stored as NaN.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DotLocationsFixedPattern {
    pub x_dot_index: Vec<i32>,
    pub y_dot_index: Vec<i32>,
    pub xyz_dot_loc: Vec<[Real; 3]>,
}

impl DotLocationsFixedPattern {
    pub fn new(
        x_dot_index: Vec<i32>,
        y_dot_index: Vec<i32>,
        xyz_dot_loc: Vec<[Real; 3]>,
    ) -> Result<Self, DotPatternError> {
        let out = Self {
            x_dot_index,
            y_dot_index,
            xyz_dot_loc,
        };
        out.validate()?;
        Ok(out)
    }

    /// Regular planar grid in the screen xy plane: dot `(ix, iy)` at
    /// `(ix * pitch_x, iy * pitch_y, 0)`.
    pub fn planar_grid(
        x_range: std::ops::RangeInclusive<i32>,
        y_range: std::ops::RangeInclusive<i32>,
        pitch_x: Real,
        pitch_y: Real,
    ) -> Self {
        let x_dot_index: Vec<i32> = x_range.collect();
        let y_dot_index: Vec<i32> = y_range.collect();
        let mut xyz_dot_loc = Vec::with_capacity(x_dot_index.len() * y_dot_index.len());
        for &iy in &y_dot_index {
            for &ix in &x_dot_index {
                xyz_dot_loc.push([ix as Real * pitch_x, iy as Real * pitch_y, 0.0]);
            }
        }
        Self {
            x_dot_index,
            y_dot_index,
            xyz_dot_loc,
        }
    }

    pub fn validate(&self) -> Result<(), DotPatternError> {
        let nx = self.x_dot_index.len();
        let ny = self.y_dot_index.len();
        if self.xyz_dot_loc.len() != nx * ny {
            return Err(DotPatternError::ShapeMismatch {
                got: self.xyz_dot_loc.len(),
                nx,
                ny,
            });
        }
        let contiguous = |v: &[i32]| v.windows(2).all(|w| w[1] == w[0] + 1);
        if !contiguous(&self.x_dot_index) || !contiguous(&self.y_dot_index) {
            return Err(DotPatternError::NonContiguousIndex);
        }
        Ok(())
    }

    /// Inclusive `(min, max)` index ranges along x and y.
    pub fn dot_extent(&self) -> ((i32, i32), (i32, i32)) {
        let range = |v: &[i32]| match (v.first(), v.last()) {
            (Some(a), Some(b)) => (*a, *b),
            _ => (0, -1),
        };
        (range(&self.x_dot_index), range(&self.y_dot_index))
    }

    pub fn screen_point(&self, ix: i32, iy: i32) -> Result<Pt3, DotPatternError> {
        let (x_range, y_range) = self.dot_extent();
        if ix < x_range.0 || ix > x_range.1 || iy < y_range.0 || iy > y_range.1 {
            return Err(DotPatternError::IndexOutOfRange {
                ix,
                iy,
                x_range,
                y_range,
            });
        }
        let i = (ix - x_range.0) as usize;
        let j = (iy - y_range.0) as usize;
        let p = self.xyz_dot_loc[j * self.x_dot_index.len() + i];
        Ok(Pt3::new(p[0], p[1], p[2]))
    }

    /// Screen-frame coordinates for a list of `(ix, iy)` indices.
    pub fn xy_indices_to_screen_coordinates(
        &self,
        indices: &[(i32, i32)],
    ) -> Result<Vec<Pt3>, DotPatternError> {
        indices
            .iter()
            .map(|&(ix, iy)| self.screen_point(ix, iy))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planar_grid_lookup() {
        let dots = DotLocationsFixedPattern::planar_grid(-3..=3, -2..=2, 10.0, 12.0);
        dots.validate().unwrap();
        assert_eq!(dots.dot_extent(), ((-3, 3), (-2, 2)));
        let p = dots.screen_point(2, -1).unwrap();
        assert_eq!(p, Pt3::new(20.0, -12.0, 0.0));
    }

    #[test]
    fn out_of_range_index_errors() {
        let dots = DotLocationsFixedPattern::planar_grid(0..=3, 0..=3, 1.0, 1.0);
        let err = dots
            .xy_indices_to_screen_coordinates(&[(1, 1), (4, 0)])
            .unwrap_err();
        assert!(matches!(err, DotPatternError::IndexOutOfRange { ix: 4, .. }));
    }

    #[test]
    fn shape_mismatch_is_detected() {
        let err = DotLocationsFixedPattern::new(vec![0, 1], vec![0], vec![[0.0; 3]]).unwrap_err();
        assert!(matches!(err, DotPatternError::ShapeMismatch { .. }));
    }
}
