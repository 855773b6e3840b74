//! Multi-threshold blob detector for screen dots seen in the optic.
//!
//! The frame is binarized at a ladder of thresholds; connected components that
//! pass the area/shape filters at a threshold become candidates, candidates
//! from different thresholds closer than `min_dist_between_blobs` are merged,
//! and groups that appear at least `min_repeatability` times are reported at
//! their mean centroid.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use sofast_core::{Pt2, Real};

use crate::labeling::label_components;
use crate::point_grid::PointGrid;

/// Blob detector parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobDetectorConfig {
    pub min_threshold: u8,
    pub max_threshold: u8,
    pub threshold_step: u8,
    /// Minimum number of thresholds at which a blob must be seen.
    pub min_repeatability: usize,
    pub min_dist_between_blobs: Real,
    pub filter_by_area: bool,
    /// Area bounds in pixels (inclusive).
    pub min_area: usize,
    pub max_area: usize,
    /// Detect dark dots on a bright background.
    pub dark_blobs: bool,
    /// Reject components whose major/minor axis ratio exceeds this value.
    pub max_elongation: Option<Real>,
}

impl Default for BlobDetectorConfig {
    fn default() -> Self {
        Self {
            min_threshold: 50,
            max_threshold: 220,
            threshold_step: 10,
            min_repeatability: 2,
            min_dist_between_blobs: 2.0,
            filter_by_area: true,
            min_area: 3,
            max_area: 30,
            dark_blobs: true,
            max_elongation: None,
        }
    }
}

struct BlobGroup {
    sum: Pt2,
    count: usize,
}

impl BlobGroup {
    fn center(&self) -> Pt2 {
        Pt2::from(self.sum.coords / self.count as Real)
    }
}

/// Detect blob centres. An empty result is valid.
pub fn detect_blobs(image: &GrayImage, cfg: &BlobDetectorConfig) -> Vec<Pt2> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let step = cfg.threshold_step.max(1) as u16;
    let pixels = image.as_raw();

    let mut groups: Vec<BlobGroup> = Vec::new();
    let mut buckets = PointGrid::new(cfg.min_dist_between_blobs);
    let mut active = vec![false; w * h];
    let mut t = cfg.min_threshold as u16;
    while t < cfg.max_threshold as u16 {
        for (a, &p) in active.iter_mut().zip(pixels.iter()) {
            *a = if cfg.dark_blobs {
                (p as u16) < t
            } else {
                (p as u16) > t
            };
        }
        let comps = label_components(&active, w, h);
        for s in &comps.stats {
            if cfg.filter_by_area && (s.area < cfg.min_area || s.area > cfg.max_area) {
                continue;
            }
            if let Some(max_e) = cfg.max_elongation {
                if s.elongation() > max_e {
                    continue;
                }
            }
            let c = s.centroid();
            // earliest group within reach, as a linear scan would pick
            let hit = buckets
                .near(&c, cfg.min_dist_between_blobs)
                .filter(|&i| (groups[i].center() - c).norm() < cfg.min_dist_between_blobs)
                .min();
            match hit {
                Some(i) => {
                    let before = groups[i].center();
                    groups[i].sum += c.coords;
                    groups[i].count += 1;
                    buckets.relocate(i, &before, &groups[i].center());
                }
                None => {
                    buckets.insert(groups.len(), &c);
                    groups.push(BlobGroup { sum: c, count: 1 });
                }
            }
        }
        t += step;
    }

    let mut out: Vec<Pt2> = groups
        .iter()
        .filter(|g| g.count >= cfg.min_repeatability.max(1))
        .map(BlobGroup::center)
        .collect();
    out.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    log::debug!("detect_blobs: {} blobs from {} candidate groups", out.len(), groups.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{draw_disk, fill_polygon};
    use sofast_core::Polygon;

    fn dots_image(centers: &[(u32, u32)]) -> GrayImage {
        let mut img = GrayImage::from_pixel(120, 80, image::Luma([20]));
        fill_polygon(
            &mut img,
            &Polygon::new(vec![
                Pt2::new(5.0, 5.0),
                Pt2::new(115.0, 5.0),
                Pt2::new(115.0, 75.0),
                Pt2::new(5.0, 75.0),
            ]),
            255,
        );
        for &(x, y) in centers {
            draw_disk(&mut img, &Pt2::new(x as Real, y as Real), 3.0, 30);
        }
        img
    }

    fn cfg() -> BlobDetectorConfig {
        BlobDetectorConfig {
            min_area: 10,
            max_area: 60,
            ..BlobDetectorConfig::default()
        }
    }

    #[test]
    fn finds_dot_centres() {
        let centers = [(20, 20), (40, 20), (60, 40), (90, 60)];
        let img = dots_image(&centers);
        let blobs = detect_blobs(&img, &cfg());
        assert_eq!(blobs.len(), centers.len(), "blobs={blobs:?}");
        for &(x, y) in &centers {
            let p = Pt2::new(x as Real, y as Real);
            let best = blobs
                .iter()
                .map(|b| (b - p).norm())
                .fold(Real::INFINITY, Real::min);
            assert!(best < 1e-9, "no blob near {p}: best={best}");
        }
    }

    #[test]
    fn dense_dot_field_merges_per_dot() {
        let centers: Vec<(u32, u32)> = (0..7)
            .flat_map(|i| (0..5).map(move |j| (15 + 15 * i, 15 + 12 * j)))
            .collect();
        let blobs = detect_blobs(&dots_image(&centers), &cfg());
        assert_eq!(blobs.len(), centers.len());
        for (b, &(x, y)) in blobs.iter().zip(&centers) {
            assert!((b - Pt2::new(x as Real, y as Real)).norm() < 1e-9, "blob {b}");
        }
    }

    #[test]
    fn blank_image_gives_no_blobs() {
        let img = dots_image(&[]);
        assert!(detect_blobs(&img, &cfg()).is_empty());
    }

    #[test]
    fn bright_blob_mode() {
        let mut img = GrayImage::from_pixel(60, 60, image::Luma([10]));
        draw_disk(&mut img, &Pt2::new(30.0, 30.0), 3.0, 240);
        let cfg = BlobDetectorConfig {
            dark_blobs: false,
            ..cfg()
        };
        let blobs = detect_blobs(&img, &cfg);
        assert_eq!(blobs.len(), 1);
        assert!((blobs[0] - Pt2::new(30.0, 30.0)).norm() < 1e-9);
    }
}
