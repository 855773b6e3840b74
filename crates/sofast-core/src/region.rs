use serde::{Deserialize, Serialize};

use crate::{Pt2, Real};

/// Closed polygon. The last vertex connects back to the first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub vertices: Vec<Pt2>,
}

impl Polygon {
    pub fn new(vertices: Vec<Pt2>) -> Self {
        Self { vertices }
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Even-odd point-in-polygon test. Points on an edge may land on either side.
    pub fn contains(&self, p: &Pt2) -> bool {
        let n = self.vertices.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let a = &self.vertices[i];
            let b = &self.vertices[j];
            if (a.y > p.y) != (b.y > p.y) {
                let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
                if p.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// Signed shoelace area (positive for counter-clockwise in a y-up frame).
    pub fn signed_area(&self) -> Real {
        let n = self.vertices.len();
        if n < 3 {
            return 0.0;
        }
        let mut acc = 0.0;
        for i in 0..n {
            let a = &self.vertices[i];
            let b = &self.vertices[(i + 1) % n];
            acc += a.x * b.y - b.x * a.y;
        }
        0.5 * acc
    }

    /// Axis-aligned bounds `(min, max)`.
    pub fn bounds(&self) -> Option<(Pt2, Pt2)> {
        let first = self.vertices.first()?;
        let mut lo = *first;
        let mut hi = *first;
        for v in &self.vertices[1..] {
            lo.x = lo.x.min(v.x);
            lo.y = lo.y.min(v.y);
            hi.x = hi.x.max(v.x);
            hi.y = hi.y.max(v.y);
        }
        Some((lo, hi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Polygon {
        Polygon::new(vec![
            Pt2::new(0.0, 0.0),
            Pt2::new(10.0, 0.0),
            Pt2::new(10.0, 10.0),
            Pt2::new(0.0, 10.0),
        ])
    }

    #[test]
    fn contains_inside_and_outside() {
        let poly = square();
        assert!(poly.contains(&Pt2::new(5.0, 5.0)));
        assert!(!poly.contains(&Pt2::new(-1.0, 5.0)));
        assert!(!poly.contains(&Pt2::new(5.0, 11.0)));
    }

    #[test]
    fn area_and_bounds() {
        let poly = square();
        assert!((poly.signed_area() - 100.0).abs() < 1e-12);
        let (lo, hi) = poly.bounds().unwrap();
        assert_eq!(lo, Pt2::new(0.0, 0.0));
        assert_eq!(hi, Pt2::new(10.0, 10.0));
    }
}
