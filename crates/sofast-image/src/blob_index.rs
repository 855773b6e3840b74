//! Grid indexing of detected dots.
//!
//! Indices are assigned by growing outward from a seed dot with a known index.
//! Each seed opens a new region (one region per facet); points are stored in
//! an arena and regions are grown breadth-first with an explicit worklist.
//!
//! For every indexed point the four grid neighbours are searched in turn.
//! The expected step to a neighbour is predicted, in order of preference, from
//! - the step from the opposite neighbour (straight-line continuation),
//! - the same step observed on an adjacent row or column,
//! - the running mean step of the region along that axis.
//!
//! A candidate must lie within `search_thresh` pixels of the predicted
//! position and inside the cone `|perp| < along / search_perp_axis_ratio`.
//! Before any step is known (first moves from the seed) only the cone test is
//! applied, along the configured axis hints. Ties break on distance and then
//! on `(x, y)`, so results do not depend on the order of the input points.
//!
//! Growth stops at the dot pattern's index extent: a blob past the pattern
//! edge is never given an index the pattern cannot resolve.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use sofast_core::{Polygon, Pt2, Real, Vec2};
use thiserror::Error;

use crate::point_grid::PointGrid;

#[derive(Debug, Error)]
pub enum BlobIndexError {
    #[error("no points to index")]
    NoPoints,
    #[error("point at ({x:.2}, {y:.2}) already belongs to region {owner}, cannot add it to region {region}")]
    RegionOverlap {
        x: Real,
        y: Real,
        owner: usize,
        region: usize,
    },
    #[error("axis hint must be a non-zero vector")]
    InvalidAxisHint,
    #[error("seed index ({ix}, {iy}) outside pattern extent x={x_range:?}, y={y_range:?}")]
    SeedOutsideExtent {
        ix: i32,
        iy: i32,
        x_range: (i32, i32),
        y_range: (i32, i32),
    },
}

/// Inclusive `(min, max)` dot index ranges along x and y.
pub type IndexExtent = ((i32, i32), (i32, i32));

/// Index search parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobIndexConfig {
    /// Maximum distance in pixels between a predicted and an accepted position.
    pub search_thresh: Real,
    /// Minimum ratio of along-axis to perpendicular offset.
    pub search_perp_axis_ratio: Real,
    /// Image direction of increasing x index.
    pub x_axis_hint: [Real; 2],
    /// Image direction of increasing y index.
    pub y_axis_hint: [Real; 2],
}

impl Default for BlobIndexConfig {
    fn default() -> Self {
        Self {
            search_thresh: 8.0,
            search_perp_axis_ratio: 3.0,
            x_axis_hint: [1.0, 0.0],
            y_axis_hint: [0.0, 1.0],
        }
    }
}

#[derive(Clone, Debug)]
struct BlobRecord {
    pt: Pt2,
    index: Option<(i32, i32)>,
    region: Option<usize>,
}

#[derive(Clone, Debug, Default)]
struct RegionInfo {
    seed: usize,
    // Accumulated steps along +x and +y index.
    step_sum: [Vec2; 2],
    step_count: [usize; 2],
}

impl RegionInfo {
    fn mean_step(&self, axis: usize) -> Option<Vec2> {
        (self.step_count[axis] > 0).then(|| self.step_sum[axis] / self.step_count[axis] as Real)
    }
}

const DIRECTIONS: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

// Cone searches from a seed accept at most this multiple of the seed's
// nearest-neighbour distance.
const SEED_CONE_REACH: Real = 1.5;

/// Arena of detected points with per-region grid indices.
#[derive(Clone, Debug)]
pub struct BlobIndex {
    cfg: BlobIndexConfig,
    extent: IndexExtent,
    points: Vec<BlobRecord>,
    buckets: PointGrid,
    lookup: HashMap<(usize, i32, i32), usize>,
    regions: Vec<RegionInfo>,
}

impl BlobIndex {
    /// Index `points`, assigning only indices inside `extent` (as returned by
    /// `DotLocationsFixedPattern::dot_extent`).
    pub fn new(
        points: &[Pt2],
        extent: IndexExtent,
        cfg: BlobIndexConfig,
    ) -> Result<Self, BlobIndexError> {
        let hint_ok = |h: [Real; 2]| (h[0] * h[0] + h[1] * h[1]).sqrt() > 1e-12;
        if !hint_ok(cfg.x_axis_hint) || !hint_ok(cfg.y_axis_hint) {
            return Err(BlobIndexError::InvalidAxisHint);
        }
        Ok(Self {
            buckets: PointGrid::from_points(points.iter().copied(), cfg.search_thresh),
            cfg,
            extent,
            points: points
                .iter()
                .map(|&pt| BlobRecord {
                    pt,
                    index: None,
                    region: None,
                })
                .collect(),
            lookup: HashMap::new(),
            regions: Vec::new(),
        })
    }

    pub fn config(&self) -> &BlobIndexConfig {
        &self.cfg
    }

    pub fn extent(&self) -> IndexExtent {
        self.extent
    }

    fn in_extent(&self, (ix, iy): (i32, i32)) -> bool {
        let ((x0, x1), (y0, y1)) = self.extent;
        (x0..=x1).contains(&ix) && (y0..=y1).contains(&iy)
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    pub fn num_indexed(&self) -> usize {
        self.lookup.len()
    }

    /// Grow a new region from the detected point nearest `pt_known`, which
    /// is assigned index `(x_known, y_known)`. Returns the region label.
    pub fn run(&mut self, pt_known: Pt2, x_known: i32, y_known: i32) -> Result<usize, BlobIndexError> {
        if !self.in_extent((x_known, y_known)) {
            let (x_range, y_range) = self.extent;
            return Err(BlobIndexError::SeedOutsideExtent {
                ix: x_known,
                iy: y_known,
                x_range,
                y_range,
            });
        }
        let seed = self.nearest_point(&pt_known).ok_or(BlobIndexError::NoPoints)?;
        let region = self.regions.len();
        if let Some(owner) = self.points[seed].region {
            let p = self.points[seed].pt;
            return Err(BlobIndexError::RegionOverlap {
                x: p.x,
                y: p.y,
                owner,
                region,
            });
        }
        log::debug!(
            "blob index region {region}: seed ({:.1}, {:.1}) -> ({x_known}, {y_known}), {:.2} px from known point",
            self.points[seed].pt.x,
            self.points[seed].pt.y,
            (self.points[seed].pt - pt_known).norm()
        );

        self.regions.push(RegionInfo {
            seed,
            ..RegionInfo::default()
        });
        self.assign(seed, region, (x_known, y_known));

        let seed_reach = self
            .nearest_other(seed)
            .map(|d| d * SEED_CONE_REACH)
            .unwrap_or(0.0);

        let mut queue = VecDeque::from([seed]);
        while let Some(id) = queue.pop_front() {
            let Some(idx) = self.points[id].index else {
                continue;
            };
            for &(di, dj) in &DIRECTIONS {
                let target = (idx.0 + di, idx.1 + dj);
                if !self.in_extent(target)
                    || self.lookup.contains_key(&(region, target.0, target.1))
                {
                    continue;
                }
                let found = match self.predict_step(region, idx, (di, dj)) {
                    Some(step) => self.search_predicted(id, &step),
                    None => self.search_cone(id, (di, dj), seed_reach),
                };
                let Some(cand) = found else {
                    continue;
                };
                match self.points[cand].region {
                    Some(owner) if owner != region => {
                        let p = self.points[cand].pt;
                        return Err(BlobIndexError::RegionOverlap {
                            x: p.x,
                            y: p.y,
                            owner,
                            region,
                        });
                    }
                    // Already indexed here under a different index: keep the first.
                    Some(_) => continue,
                    None => {}
                }
                self.assign(cand, region, target);
                let step = self.points[cand].pt - self.points[id].pt;
                let axis = if di != 0 { 0 } else { 1 };
                let sign = (di + dj) as Real;
                let info = &mut self.regions[region];
                info.step_sum[axis] += step * sign;
                info.step_count[axis] += 1;
                queue.push_back(cand);
            }
        }

        let n = self.lookup.keys().filter(|k| k.0 == region).count();
        log::info!("blob index region {region}: {n} points indexed");
        Ok(region)
    }

    /// All indexed points and their indices, ordered by region then row.
    pub fn get_data(&self) -> (Vec<Pt2>, Vec<(i32, i32)>) {
        self.collect(|_| true)
    }

    /// Indexed points lying inside `region` (image coordinates).
    pub fn get_data_in_region(&self, region: &Polygon) -> (Vec<Pt2>, Vec<(i32, i32)>) {
        self.collect(|r| region.contains(&r.pt))
    }

    /// Indexed points grown from seed `label`.
    pub fn get_data_for_label(&self, label: usize) -> (Vec<Pt2>, Vec<(i32, i32)>) {
        self.collect(|r| r.region == Some(label))
    }

    /// Seed position of region `label`.
    pub fn seed_point(&self, label: usize) -> Option<Pt2> {
        self.regions.get(label).map(|r| self.points[r.seed].pt)
    }

    fn collect(&self, keep: impl Fn(&BlobRecord) -> bool) -> (Vec<Pt2>, Vec<(i32, i32)>) {
        let mut keys: Vec<&(usize, i32, i32)> = self.lookup.keys().collect();
        keys.sort_by_key(|k| (k.0, k.2, k.1));
        let mut pts = Vec::with_capacity(keys.len());
        let mut idx = Vec::with_capacity(keys.len());
        for k in keys {
            let rec = &self.points[self.lookup[k]];
            if keep(rec) {
                pts.push(rec.pt);
                idx.push((k.1, k.2));
            }
        }
        (pts, idx)
    }

    fn assign(&mut self, id: usize, region: usize, index: (i32, i32)) {
        self.points[id].index = Some(index);
        self.points[id].region = Some(region);
        self.lookup.insert((region, index.0, index.1), id);
    }

    fn get(&self, region: usize, index: (i32, i32)) -> Option<Pt2> {
        self.lookup
            .get(&(region, index.0, index.1))
            .map(|&id| self.points[id].pt)
    }

    fn predict_step(&self, region: usize, idx: (i32, i32), d: (i32, i32)) -> Option<Vec2> {
        let here = self.get(region, idx)?;
        if let Some(prev) = self.get(region, (idx.0 - d.0, idx.1 - d.1)) {
            return Some(here - prev);
        }
        // perpendicular offsets: rows for x moves, columns for y moves
        let perp = (d.1, d.0);
        for s in [1, -1] {
            let a = (idx.0 + s * perp.0, idx.1 + s * perp.1);
            let b = (a.0 + d.0, a.1 + d.1);
            if let (Some(pa), Some(pb)) = (self.get(region, a), self.get(region, b)) {
                return Some(pb - pa);
            }
        }
        let axis = if d.0 != 0 { 0 } else { 1 };
        let sign = (d.0 + d.1) as Real;
        self.regions[region].mean_step(axis).map(|m| m * sign)
    }

    fn search_predicted(&self, from: usize, step: &Vec2) -> Option<usize> {
        let origin = self.points[from].pt;
        let target = origin + *step;
        let dir = step.try_normalize(1e-12)?;
        self.best_candidate(from, &target, self.cfg.search_thresh, |p| {
            let v = p - origin;
            let along = v.dot(&dir);
            let perp = (v.x * dir.y - v.y * dir.x).abs();
            let dist = (p - target).norm();
            (along > 0.0
                && perp * self.cfg.search_perp_axis_ratio < along
                && dist <= self.cfg.search_thresh)
                .then_some(dist)
        })
    }

    fn search_cone(&self, from: usize, d: (i32, i32), reach: Real) -> Option<usize> {
        let hint = if d.0 != 0 {
            self.cfg.x_axis_hint
        } else {
            self.cfg.y_axis_hint
        };
        let sign = (d.0 + d.1) as Real;
        let dir = Vec2::new(hint[0], hint[1]).normalize() * sign;
        let origin = self.points[from].pt;
        self.best_candidate(from, &origin, reach, |p| {
            let v = p - origin;
            let along = v.dot(&dir);
            let perp = (v.x * dir.y - v.y * dir.x).abs();
            let dist = v.norm();
            (along > 0.0 && perp * self.cfg.search_perp_axis_ratio < along && dist <= reach)
                .then_some(dist)
        })
    }

    // Lowest score among the points within `radius` of `center`; ties break
    // on (x, y) and then on input order.
    fn best_candidate(
        &self,
        skip: usize,
        center: &Pt2,
        radius: Real,
        score: impl Fn(&Pt2) -> Option<Real>,
    ) -> Option<usize> {
        let mut best: Option<(Real, usize)> = None;
        for id in self.buckets.near(center, radius) {
            if id == skip {
                continue;
            }
            let rec = &self.points[id];
            let Some(s) = score(&rec.pt) else {
                continue;
            };
            let better = match best {
                None => true,
                Some((bs, bid)) => {
                    let bp = self.points[bid].pt;
                    s.total_cmp(&bs)
                        .then(rec.pt.x.total_cmp(&bp.x))
                        .then(rec.pt.y.total_cmp(&bp.y))
                        .then(id.cmp(&bid))
                        .is_lt()
                }
            };
            if better {
                best = Some((s, id));
            }
        }
        best.map(|(_, id)| id)
    }

    fn nearest_point(&self, p: &Pt2) -> Option<usize> {
        self.points
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (a.pt - p)
                    .norm()
                    .total_cmp(&(b.pt - p).norm())
                    .then(a.pt.x.total_cmp(&b.pt.x))
                    .then(a.pt.y.total_cmp(&b.pt.y))
            })
            .map(|(i, _)| i)
    }

    fn nearest_other(&self, id: usize) -> Option<Real> {
        let p = self.points[id].pt;
        self.points
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != id)
            .map(|(_, r)| (r.pt - p).norm())
            .min_by(|a, b| a.total_cmp(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIDE: IndexExtent = ((-100, 100), (-100, 100));

    fn grid(nx: i32, ny: i32, pitch: Real, origin: Pt2) -> Vec<(Pt2, (i32, i32))> {
        let mut out = Vec::new();
        for j in 0..ny {
            for i in 0..nx {
                out.push((
                    Pt2::new(origin.x + i as Real * pitch, origin.y + j as Real * pitch),
                    (i, j),
                ));
            }
        }
        out
    }

    #[test]
    fn indexes_full_grid() {
        let g = grid(6, 5, 20.0, Pt2::new(100.0, 80.0));
        let pts: Vec<Pt2> = g.iter().map(|(p, _)| *p).collect();
        let mut bi = BlobIndex::new(&pts, WIDE, BlobIndexConfig::default()).unwrap();
        bi.run(Pt2::new(141.0, 119.0), 2, 2).unwrap();
        let (p, idx) = bi.get_data();
        assert_eq!(p.len(), 30);
        for (pt, (ix, iy)) in p.iter().zip(idx) {
            let ex = Pt2::new(100.0 + 20.0 * ix as Real, 80.0 + 20.0 * iy as Real);
            assert!((pt - ex).norm() < 1e-12, "pt={pt} idx=({ix},{iy})");
        }
    }

    #[test]
    fn follows_perspective_distortion() {
        // pitch grows along x, rows drift slightly in y
        let mut pts = Vec::new();
        let mut x = 50.0;
        for i in 0..10 {
            let pitch = 15.0 + i as Real;
            for j in 0..4 {
                pts.push(Pt2::new(x, 40.0 + 18.0 * j as Real + 0.3 * i as Real));
            }
            x += pitch;
        }
        let mut bi = BlobIndex::new(&pts, WIDE, BlobIndexConfig::default()).unwrap();
        bi.run(pts[0], 0, 0).unwrap();
        assert_eq!(bi.num_indexed(), 40);
    }

    #[test]
    fn empty_point_set_errors() {
        let mut bi = BlobIndex::new(&[], WIDE, BlobIndexConfig::default()).unwrap();
        assert!(matches!(
            bi.run(Pt2::new(0.0, 0.0), 0, 0),
            Err(BlobIndexError::NoPoints)
        ));
    }

    #[test]
    fn overlapping_seed_errors() {
        let g = grid(4, 4, 20.0, Pt2::new(0.0, 0.0));
        let pts: Vec<Pt2> = g.iter().map(|(p, _)| *p).collect();
        let mut bi = BlobIndex::new(&pts, WIDE, BlobIndexConfig::default()).unwrap();
        bi.run(Pt2::new(0.0, 0.0), 0, 0).unwrap();
        let err = bi.run(Pt2::new(60.0, 60.0), 10, 10).unwrap_err();
        assert!(matches!(err, BlobIndexError::RegionOverlap { owner: 0, .. }));
    }

    #[test]
    fn separated_regions_keep_own_indices() {
        let mut pts: Vec<Pt2> = grid(4, 3, 20.0, Pt2::new(0.0, 0.0))
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        pts.extend(
            grid(4, 3, 20.0, Pt2::new(140.0, 0.0))
                .into_iter()
                .map(|(p, _)| p),
        );
        let mut bi = BlobIndex::new(&pts, WIDE, BlobIndexConfig::default()).unwrap();
        let a = bi.run(Pt2::new(0.0, 0.0), 0, 0).unwrap();
        let b = bi.run(Pt2::new(140.0, 0.0), 0, 0).unwrap();
        assert_eq!(bi.get_data_for_label(a).0.len(), 12);
        assert_eq!(bi.get_data_for_label(b).0.len(), 12);
        // same index values may repeat across regions
        assert_eq!(bi.num_indexed(), 24);
        let region = Polygon::new(vec![
            Pt2::new(130.0, -10.0),
            Pt2::new(210.0, -10.0),
            Pt2::new(210.0, 50.0),
            Pt2::new(130.0, 50.0),
        ]);
        let (p, _) = bi.get_data_in_region(&region);
        assert_eq!(p.len(), 12);
    }

    #[test]
    fn growth_stops_at_pattern_extent() {
        // a 6 x 5 blob grid seen through a pattern that only has columns 0..=4
        let g = grid(6, 5, 20.0, Pt2::new(100.0, 80.0));
        let pts: Vec<Pt2> = g.iter().map(|(p, _)| *p).collect();
        let mut bi = BlobIndex::new(&pts, ((0, 4), (0, 4)), BlobIndexConfig::default()).unwrap();
        bi.run(Pt2::new(100.0, 80.0), 0, 0).unwrap();
        let (p, idx) = bi.get_data();
        assert_eq!(p.len(), 25);
        assert!(idx.iter().all(|&(ix, iy)| (0..=4).contains(&ix) && (0..=4).contains(&iy)));
        assert!(p.iter().all(|pt| pt.x < 190.0));
    }

    #[test]
    fn seed_outside_extent_errors() {
        let g = grid(3, 3, 20.0, Pt2::new(0.0, 0.0));
        let pts: Vec<Pt2> = g.iter().map(|(p, _)| *p).collect();
        let mut bi = BlobIndex::new(&pts, ((0, 2), (0, 2)), BlobIndexConfig::default()).unwrap();
        assert!(matches!(
            bi.run(Pt2::new(0.0, 0.0), 3, 0),
            Err(BlobIndexError::SeedOutsideExtent { ix: 3, iy: 0, .. })
        ));
    }

    #[test]
    fn large_field_matches_small_field_indices() {
        // 60 x 40 dots: every dot reached and indexed like its neighbours
        let g = grid(60, 40, 12.0, Pt2::new(10.0, 10.0));
        let pts: Vec<Pt2> = g.iter().map(|(p, _)| *p).collect();
        let mut bi = BlobIndex::new(&pts, ((0, 59), (0, 39)), BlobIndexConfig::default()).unwrap();
        bi.run(Pt2::new(10.0, 10.0), 0, 0).unwrap();
        let (p, idx) = bi.get_data();
        assert_eq!(p.len(), 2400);
        for (pt, (ix, iy)) in p.iter().zip(idx) {
            let ex = Pt2::new(10.0 + 12.0 * ix as Real, 10.0 + 12.0 * iy as Real);
            assert!((pt - ex).norm() < 1e-12);
        }
    }
}
