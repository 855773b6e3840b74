//! Optic/background segmentation from a dark/light image pair.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use sofast_core::{Pt2, Real};
use thiserror::Error;

use crate::labeling::label_components;

#[derive(Debug, Error)]
pub enum MaskError {
    #[error("dark image is {dark:?} but light image is {light:?}")]
    SizeMismatch { dark: (u32, u32), light: (u32, u32) },
    #[error("image is empty")]
    EmptyImage,
    #[error("invalid mask config: {0}")]
    InvalidConfig(String),
}

/// Mask calculation parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    /// Fraction of the way from the background peak to the optic peak at
    /// which the delta image is thresholded.
    pub hist_thresh: Real,
    /// Odd box filter width used for the majority filter.
    pub filt_width: usize,
    /// Minimum number of active 8-neighbours an active pixel must keep.
    pub filt_thresh: usize,
    /// Masks with a smaller active fraction are cleared entirely.
    pub thresh_active_pixels: Real,
    /// Keep only the largest connected region (single-facet optics only).
    pub keep_largest_area: bool,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            hist_thresh: 0.5,
            filt_width: 9,
            filt_thresh: 4,
            thresh_active_pixels: 0.05,
            keep_largest_area: false,
        }
    }
}

/// Row-major boolean mask, `true` = optic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    width: usize,
    height: usize,
    data: Vec<bool>,
}

impl Mask {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![false; width * height],
        }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<bool>) -> Option<Self> {
        (data.len() == width * height).then_some(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.data
    }

    pub fn get(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.data[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, v: bool) {
        if x < self.width && y < self.height {
            self.data[y * self.width + x] = v;
        }
    }

    pub fn count_active(&self) -> usize {
        self.data.iter().filter(|v| **v).count()
    }

    pub fn active_fraction(&self) -> Real {
        if self.data.is_empty() {
            return 0.0;
        }
        self.count_active() as Real / self.data.len() as Real
    }

    /// `true` when no pixel is active.
    pub fn is_blank(&self) -> bool {
        !self.data.iter().any(|v| *v)
    }

    pub fn is_full(&self) -> bool {
        self.data.iter().all(|v| *v)
    }

    /// Mean active pixel position.
    pub fn centroid(&self) -> Option<Pt2> {
        let mut sx = 0.0;
        let mut sy = 0.0;
        let mut n = 0usize;
        for (i, _) in self.data.iter().enumerate().filter(|(_, v)| **v) {
            sx += (i % self.width) as Real;
            sy += (i / self.width) as Real;
            n += 1;
        }
        (n > 0).then(|| Pt2::new(sx / n as Real, sy / n as Real))
    }

    /// Mask pixel at a continuous image position (nearest pixel).
    pub fn contains_point(&self, p: &Pt2) -> bool {
        let x = p.x.round();
        let y = p.y.round();
        x >= 0.0 && y >= 0.0 && self.get(x as usize, y as usize)
    }

    /// Convert to an 8-bit image (optic = 255).
    pub fn to_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width as u32, self.height as u32, |x, y| {
            image::Luma([if self.get(x as usize, y as usize) { 255 } else { 0 }])
        })
    }
}

/// Threshold the light-minus-dark image and clean it up.
///
/// Identical images produce an all-background mask; a uniformly bright light
/// image over a dark image produces an all-foreground mask.
pub fn calc_mask_raw(
    dark: &GrayImage,
    light: &GrayImage,
    cfg: &MaskConfig,
) -> Result<Mask, MaskError> {
    if dark.dimensions() != light.dimensions() {
        return Err(MaskError::SizeMismatch {
            dark: dark.dimensions(),
            light: light.dimensions(),
        });
    }
    let (w, h) = (light.width() as usize, light.height() as usize);
    if w == 0 || h == 0 {
        return Err(MaskError::EmptyImage);
    }
    if cfg.filt_width == 0 || cfg.filt_width % 2 == 0 {
        return Err(MaskError::InvalidConfig(format!(
            "filt_width must be odd and positive, got {}",
            cfg.filt_width
        )));
    }
    if !(0.0..=1.0).contains(&cfg.hist_thresh) {
        return Err(MaskError::InvalidConfig(format!(
            "hist_thresh must be in [0, 1], got {}",
            cfg.hist_thresh
        )));
    }

    let delta: Vec<u8> = light
        .as_raw()
        .iter()
        .zip(dark.as_raw())
        .map(|(&l, &d)| l.saturating_sub(d))
        .collect();

    let thresh = histogram_threshold(&delta, cfg.hist_thresh);
    let raw: Vec<bool> = delta.iter().map(|&v| v as Real > thresh).collect();

    let majority = box_majority(&raw, w, h, cfg.filt_width);
    let cleaned = neighbour_filter(&majority, w, h, cfg.filt_thresh);

    let mut mask = Mask {
        width: w,
        height: h,
        data: cleaned,
    };
    let frac = mask.active_fraction();
    if frac < cfg.thresh_active_pixels {
        log::warn!(
            "mask active fraction {:.4} below {:.4}; clearing mask",
            frac,
            cfg.thresh_active_pixels
        );
        mask.data.iter_mut().for_each(|v| *v = false);
    }
    log::debug!(
        "calc_mask_raw: threshold {:.1}, active fraction {:.4}",
        thresh,
        mask.active_fraction()
    );
    Ok(mask)
}

/// Keep only the largest 8-connected active region.
pub fn keep_largest_mask_area(mask: &Mask) -> Mask {
    let comps = label_components(&mask.data, mask.width, mask.height);
    let Some(largest) = comps.largest() else {
        return mask.clone();
    };
    let keep = largest as u32 + 1;
    Mask {
        width: mask.width,
        height: mask.height,
        data: comps.labels.iter().map(|&l| l == keep).collect(),
    }
}

fn histogram_threshold(delta: &[u8], hist_thresh: Real) -> Real {
    let mut hist = [0usize; 256];
    for &v in delta {
        hist[v as usize] += 1;
    }
    let peak = |range: std::ops::Range<usize>, fallback: usize| {
        range
            .filter(|&i| hist[i] > 0)
            .max_by(|&a, &b| hist[a].cmp(&hist[b]).then(b.cmp(&a)))
            .unwrap_or(fallback)
    };
    let bg = peak(0..128, 0) as Real;
    let fg = peak(128..256, 255) as Real;
    bg + hist_thresh * (fg - bg)
}

fn clamp_idx(i: isize, n: usize) -> usize {
    i.clamp(0, n as isize - 1) as usize
}

// Border pixels replicate their nearest in-image neighbour.
fn box_majority(src: &[bool], w: usize, h: usize, width: usize) -> Vec<bool> {
    let r = (width / 2) as isize;
    let mut rows = vec![0u32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0u32;
            for dx in -r..=r {
                acc += src[y * w + clamp_idx(x as isize + dx, w)] as u32;
            }
            rows[y * w + x] = acc;
        }
    }
    let total = (width * width) as u32;
    let mut out = vec![false; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0u32;
            for dy in -r..=r {
                acc += rows[clamp_idx(y as isize + dy, h) * w + x];
            }
            out[y * w + x] = 2 * acc > total;
        }
    }
    out
}

fn neighbour_filter(src: &[bool], w: usize, h: usize, min_neighbours: usize) -> Vec<bool> {
    let mut out = src.to_vec();
    for y in 0..h {
        for x in 0..w {
            if !src[y * w + x] {
                continue;
            }
            let mut n = 0usize;
            for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = clamp_idx(x as isize + dx, w);
                    let ny = clamp_idx(y as isize + dy, h);
                    n += src[ny * w + nx] as usize;
                }
            }
            if n < min_neighbours {
                out[y * w + x] = false;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{draw_disk, fill_polygon};
    use image::Luma;
    use sofast_core::Polygon;

    fn rect(x0: Real, y0: Real, x1: Real, y1: Real) -> Polygon {
        Polygon::new(vec![
            Pt2::new(x0, y0),
            Pt2::new(x1, y0),
            Pt2::new(x1, y1),
            Pt2::new(x0, y1),
        ])
    }

    #[test]
    fn identical_images_give_background() {
        let img = GrayImage::from_pixel(64, 48, Luma([120]));
        let mask = calc_mask_raw(&img, &img, &MaskConfig::default()).unwrap();
        assert!(mask.is_blank());
    }

    #[test]
    fn bright_over_dark_gives_foreground() {
        let dark = GrayImage::from_pixel(64, 48, Luma([0]));
        let light = GrayImage::from_pixel(64, 48, Luma([255]));
        let mask = calc_mask_raw(&dark, &light, &MaskConfig::default()).unwrap();
        assert!(mask.is_full());
    }

    #[test]
    fn dot_holes_are_filled() {
        let dark = GrayImage::from_pixel(100, 100, Luma([0]));
        let mut light = GrayImage::from_pixel(100, 100, Luma([20]));
        fill_polygon(&mut light, &rect(20.0, 20.0, 80.0, 80.0), 255);
        draw_disk(&mut light, &Pt2::new(50.0, 50.0), 3.0, 30);
        let mask = calc_mask_raw(&dark, &light, &MaskConfig::default()).unwrap();
        assert!(mask.get(50, 50));
        assert!(!mask.get(10, 10));
        let c = mask.centroid().unwrap();
        assert!((c.x - 50.0).abs() < 1.0 && (c.y - 50.0).abs() < 1.0, "c={c}");
    }

    #[test]
    fn small_masks_are_cleared() {
        let dark = GrayImage::from_pixel(100, 100, Luma([0]));
        let mut light = GrayImage::from_pixel(100, 100, Luma([20]));
        fill_polygon(&mut light, &rect(40.0, 40.0, 50.0, 50.0), 255);
        let cfg = MaskConfig {
            thresh_active_pixels: 0.05,
            ..MaskConfig::default()
        };
        assert!(calc_mask_raw(&dark, &light, &cfg).unwrap().is_blank());
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let a = GrayImage::new(10, 10);
        let b = GrayImage::new(10, 11);
        assert!(matches!(
            calc_mask_raw(&a, &b, &MaskConfig::default()),
            Err(MaskError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn largest_area_is_kept() {
        let mut m = Mask::new(20, 10);
        for y in 1..4 {
            for x in 1..4 {
                m.set(x, y, true);
            }
        }
        for y in 2..9 {
            for x in 10..18 {
                m.set(x, y, true);
            }
        }
        let kept = keep_largest_mask_area(&m);
        assert!(!kept.get(2, 2));
        assert!(kept.get(12, 5));
        assert_eq!(kept.count_active(), 56);
    }
}
