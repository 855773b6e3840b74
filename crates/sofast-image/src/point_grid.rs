//! Uniform grid buckets over image points.
//!
//! Points are hashed into square cells; a radius query visits only the cells
//! the query disk overlaps. Callers still apply their own exact distance test
//! to what comes back.

use std::collections::HashMap;

use sofast_core::{Pt2, Real};

type Cell = (i64, i64);

#[derive(Clone, Debug)]
pub(crate) struct PointGrid {
    inv_cell: Real,
    buckets: HashMap<Cell, Vec<usize>>,
}

impl PointGrid {
    /// Empty grid; a non-positive or non-finite `cell_size` falls back to 1 px.
    pub(crate) fn new(cell_size: Real) -> Self {
        let cell = if cell_size.is_finite() && cell_size > 0.0 {
            cell_size
        } else {
            1.0
        };
        Self {
            inv_cell: 1.0 / cell,
            buckets: HashMap::new(),
        }
    }

    pub(crate) fn from_points(points: impl IntoIterator<Item = Pt2>, cell_size: Real) -> Self {
        let mut grid = Self::new(cell_size);
        for (id, p) in points.into_iter().enumerate() {
            grid.insert(id, &p);
        }
        grid
    }

    fn cell(&self, p: &Pt2) -> Cell {
        (
            (p.x * self.inv_cell).floor() as i64,
            (p.y * self.inv_cell).floor() as i64,
        )
    }

    pub(crate) fn insert(&mut self, id: usize, p: &Pt2) {
        let c = self.cell(p);
        self.buckets.entry(c).or_default().push(id);
    }

    /// Move `id` from the cell of `from` to the cell of `to`.
    pub(crate) fn relocate(&mut self, id: usize, from: &Pt2, to: &Pt2) {
        let (a, b) = (self.cell(from), self.cell(to));
        if a == b {
            return;
        }
        if let Some(bucket) = self.buckets.get_mut(&a) {
            if let Some(pos) = bucket.iter().position(|&i| i == id) {
                bucket.swap_remove(pos);
            }
        }
        self.buckets.entry(b).or_default().push(id);
    }

    /// Ids whose cell overlaps the disk of `radius` around `p`. A superset of
    /// the ids within `radius`; order is unspecified.
    pub(crate) fn near(&self, p: &Pt2, radius: Real) -> impl Iterator<Item = usize> + '_ {
        let (cx, cy) = self.cell(p);
        let r = (radius.max(0.0) * self.inv_cell).ceil() as i64;
        (cx - r..=cx + r)
            .flat_map(move |x| (cy - r..=cy + r).map(move |y| (x, y)))
            .filter_map(|c| self.buckets.get(&c))
            .flatten()
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radius_query_matches_linear_scan() {
        let pts: Vec<Pt2> = (0..400)
            .map(|i| Pt2::new((i * 37 % 211) as Real * 1.3, (i * 53 % 197) as Real * 0.9))
            .collect();
        let grid = PointGrid::from_points(pts.iter().copied(), 8.0);
        for q in [Pt2::new(40.0, 60.0), Pt2::new(-3.0, 0.5), Pt2::new(250.0, 170.0)] {
            for radius in [0.5, 8.0, 23.0] {
                let mut got: Vec<usize> = grid
                    .near(&q, radius)
                    .filter(|&i| (pts[i] - q).norm() <= radius)
                    .collect();
                got.sort_unstable();
                let expected: Vec<usize> = (0..pts.len())
                    .filter(|&i| (pts[i] - q).norm() <= radius)
                    .collect();
                assert_eq!(got, expected, "q={q} r={radius}");
            }
        }
    }

    #[test]
    fn relocated_point_is_found_at_new_position() {
        let mut grid = PointGrid::new(5.0);
        let a = Pt2::new(1.0, 1.0);
        let b = Pt2::new(42.0, -17.0);
        grid.insert(3, &a);
        grid.relocate(3, &a, &b);
        assert_eq!(grid.near(&a, 1.0).count(), 0);
        assert_eq!(grid.near(&b, 1.0).collect::<Vec<_>>(), vec![3]);
    }
}
