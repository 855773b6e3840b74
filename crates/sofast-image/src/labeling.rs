//! 8-connected component labeling on binary grids.

use sofast_core::{Pt2, Real};

/// Moments of one connected component.
#[derive(Clone, Copy, Debug, Default)]
pub struct ComponentStats {
    pub area: usize,
    sum_x: Real,
    sum_y: Real,
    sum_xx: Real,
    sum_yy: Real,
    sum_xy: Real,
}

impl ComponentStats {
    fn push(&mut self, x: usize, y: usize) {
        let (x, y) = (x as Real, y as Real);
        self.area += 1;
        self.sum_x += x;
        self.sum_y += y;
        self.sum_xx += x * x;
        self.sum_yy += y * y;
        self.sum_xy += x * y;
    }

    pub fn centroid(&self) -> Pt2 {
        let n = self.area.max(1) as Real;
        Pt2::new(self.sum_x / n, self.sum_y / n)
    }

    /// Ratio of major to minor axis (square roots of the second-moment
    /// eigenvalues). Returns infinity for degenerate line-like components.
    pub fn elongation(&self) -> Real {
        let n = self.area.max(1) as Real;
        let c = self.centroid();
        let mxx = self.sum_xx / n - c.x * c.x;
        let myy = self.sum_yy / n - c.y * c.y;
        let mxy = self.sum_xy / n - c.x * c.y;
        let tr = mxx + myy;
        let det = mxx * myy - mxy * mxy;
        let disc = (0.25 * tr * tr - det).max(0.0).sqrt();
        let l1 = 0.5 * tr + disc;
        let l2 = 0.5 * tr - disc;
        if l2 <= 1e-12 {
            return if l1 <= 1e-12 { 1.0 } else { Real::INFINITY };
        }
        (l1 / l2).sqrt()
    }
}

/// Labels (`0` = background, `k` = component `k - 1`) and per-component stats.
#[derive(Clone, Debug)]
pub struct Components {
    pub width: usize,
    pub height: usize,
    pub labels: Vec<u32>,
    pub stats: Vec<ComponentStats>,
}

impl Components {
    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Index of the component with the most pixels.
    pub fn largest(&self) -> Option<usize> {
        self.stats
            .iter()
            .enumerate()
            .max_by_key(|(_, s)| s.area)
            .map(|(i, _)| i)
    }
}

/// Label 8-connected foreground regions of a row-major `width x height` grid.
pub fn label_components(active: &[bool], width: usize, height: usize) -> Components {
    debug_assert_eq!(active.len(), width * height);
    let mut labels = vec![0u32; active.len()];
    let mut stats = Vec::new();
    let mut stack = Vec::new();

    for start in 0..active.len() {
        if !active[start] || labels[start] != 0 {
            continue;
        }
        let label = stats.len() as u32 + 1;
        let mut s = ComponentStats::default();
        labels[start] = label;
        stack.push(start);
        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % width, idx / width);
            s.push(x, y);
            let x0 = x.saturating_sub(1);
            let y0 = y.saturating_sub(1);
            let x1 = (x + 1).min(width - 1);
            let y1 = (y + 1).min(height - 1);
            for ny in y0..=y1 {
                for nx in x0..=x1 {
                    let n = ny * width + nx;
                    if active[n] && labels[n] == 0 {
                        labels[n] = label;
                        stack.push(n);
                    }
                }
            }
        }
        stats.push(s);
    }

    Components {
        width,
        height,
        labels,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagonal_pixels_join() {
        #[rustfmt::skip]
        let grid = [
            true,  false, false, false,
            false, true,  false, true,
            false, false, false, true,
        ];
        let comps = label_components(&grid, 4, 3);
        assert_eq!(comps.len(), 2);
        assert_eq!(comps.stats[0].area, 2);
        assert_eq!(comps.stats[1].area, 2);
        let c = comps.stats[1].centroid();
        assert!((c.x - 3.0).abs() < 1e-12 && (c.y - 1.5).abs() < 1e-12);
    }

    #[test]
    fn square_is_not_elongated() {
        let grid = vec![true; 25];
        let comps = label_components(&grid, 5, 5);
        assert_eq!(comps.largest(), Some(0));
        assert!((comps.stats[0].elongation() - 1.0).abs() < 1e-9);
    }
}
