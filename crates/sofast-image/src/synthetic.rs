//! Minimal rasterizers for synthetic captures.

use image::{GrayImage, Luma};
use sofast_core::{Polygon, Pt2, Real};

/// Grey levels of a rendered capture.
#[derive(Clone, Copy, Debug)]
pub struct RenderLevels {
    pub background: u8,
    pub optic: u8,
    pub dot: u8,
    pub dot_radius: Real,
}

impl Default for RenderLevels {
    fn default() -> Self {
        Self {
            background: 20,
            optic: 255,
            dot: 30,
            dot_radius: 3.0,
        }
    }
}

/// Set every pixel whose centre lies inside `poly`.
pub fn fill_polygon(img: &mut GrayImage, poly: &Polygon, value: u8) {
    let Some((lo, hi)) = poly.bounds() else {
        return;
    };
    let x0 = lo.x.floor().max(0.0) as u32;
    let y0 = lo.y.floor().max(0.0) as u32;
    let x1 = (hi.x.ceil() as i64).clamp(0, img.width() as i64 - 1) as u32;
    let y1 = (hi.y.ceil() as i64).clamp(0, img.height() as i64 - 1) as u32;
    for y in y0..=y1 {
        for x in x0..=x1 {
            if poly.contains(&Pt2::new(x as Real, y as Real)) {
                img.put_pixel(x, y, Luma([value]));
            }
        }
    }
}

/// Set every pixel within `radius` of `center`.
pub fn draw_disk(img: &mut GrayImage, center: &Pt2, radius: Real, value: u8) {
    let r2 = radius * radius;
    let x0 = (center.x - radius).floor().max(0.0) as u32;
    let y0 = (center.y - radius).floor().max(0.0) as u32;
    let x1 = ((center.x + radius).ceil() as i64).clamp(0, img.width() as i64 - 1) as u32;
    let y1 = ((center.y + radius).ceil() as i64).clamp(0, img.height() as i64 - 1) as u32;
    for y in y0..=y1 {
        for x in x0..=x1 {
            let dx = x as Real - center.x;
            let dy = y as Real - center.y;
            if dx * dx + dy * dy <= r2 {
                img.put_pixel(x, y, Luma([value]));
            }
        }
    }
}

/// Background, bright optic regions and dark dots.
pub fn render_capture(
    width: u32,
    height: u32,
    optic_outlines: &[Polygon],
    dots: &[Pt2],
    levels: &RenderLevels,
) -> GrayImage {
    let mut img = GrayImage::from_pixel(width, height, Luma([levels.background]));
    for outline in optic_outlines {
        fill_polygon(&mut img, outline, levels.optic);
    }
    for d in dots {
        draw_disk(&mut img, d, levels.dot_radius, levels.dot);
    }
    img
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_has_expected_area() {
        let mut img = GrayImage::new(20, 20);
        draw_disk(&mut img, &Pt2::new(10.0, 10.0), 3.0, 200);
        let n = img.pixels().filter(|p| p.0[0] == 200).count();
        assert_eq!(n, 29);
    }

    #[test]
    fn polygon_off_image_is_clipped() {
        let mut img = GrayImage::new(10, 10);
        let poly = Polygon::new(vec![
            Pt2::new(-5.0, -5.0),
            Pt2::new(4.5, -5.0),
            Pt2::new(4.5, 4.5),
            Pt2::new(-5.0, 4.5),
        ]);
        fill_polygon(&mut img, &poly, 1);
        let n = img.pixels().filter(|p| p.0[0] == 1).count();
        assert_eq!(n, 25);
    }
}
