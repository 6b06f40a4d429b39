// THEORY:
// Binary masks are `GrayImage`s holding only 0 and 255. The helpers below are the
// glue between the raster world and the contour world: tracing external contours,
// rasterizing a contour back into a mask, Otsu binarization, pixel-wise set
// operations, and the 8-neighbour counts the skeleton topology relies on.

use image::{GrayImage, Luma, RgbImage, imageops};
use imageproc::contours::{BorderType, find_contours};
use imageproc::contrast::otsu_level;
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;

use super::geometry::{BoundingBox, Contour, polygon_area};

pub const ON: u8 = 255;

/// Outer borders with no enclosing contour, as ordered point lists.
pub fn external_contours(mask: &GrayImage) -> Vec<Contour> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| c.points)
        .collect()
}

pub fn largest_contour(contours: &[Contour]) -> Option<&Contour> {
    contours
        .iter()
        .max_by(|a, b| polygon_area(a).total_cmp(&polygon_area(b)))
}

pub fn count_nonzero(mask: &GrayImage) -> usize {
    mask.pixels().filter(|p| p.0[0] > 0).count()
}

/// Binarizes at Otsu's level, raised to `floor` when given.
pub fn otsu_binarize(gray: &GrayImage, floor: Option<u8>) -> GrayImage {
    let mut level = otsu_level(gray);
    if let Some(floor) = floor {
        level = level.max(floor);
    }
    threshold_above(gray, level)
}

/// 255 where the pixel is strictly above `level`.
pub fn threshold_above(gray: &GrayImage, level: u8) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([if gray.get_pixel(x, y).0[0] > level { ON } else { 0 }])
    })
}

/// Rasterizes `contour`, shifted by `-origin`, into a `width` x `height` mask.
pub fn fill_contour(width: u32, height: u32, contour: &[Point<i32>], origin: (i32, i32)) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    let mut polygon: Vec<Point<i32>> = contour
        .iter()
        .map(|p| Point::new(p.x - origin.0, p.y - origin.1))
        .collect();
    polygon.dedup();
    while polygon.len() > 1 && polygon.first() == polygon.last() {
        polygon.pop();
    }
    if polygon.len() >= 3 {
        draw_polygon_mut(&mut mask, &polygon, Luma([ON]));
    }
    for p in &polygon {
        if p.x >= 0 && p.y >= 0 && (p.x as u32) < width && (p.y as u32) < height {
            mask.put_pixel(p.x as u32, p.y as u32, Luma([ON]));
        }
    }
    mask
}

pub fn intersect(a: &GrayImage, b: &GrayImage) -> GrayImage {
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        let both = a.get_pixel(x, y).0[0] > 0 && b.get_pixel(x, y).0[0] > 0;
        Luma([if both { ON } else { 0 }])
    })
}

/// Pixels of `a` that are not in `b`.
pub fn subtract(a: &GrayImage, b: &GrayImage) -> GrayImage {
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        let only_a = a.get_pixel(x, y).0[0] > 0 && b.get_pixel(x, y).0[0] == 0;
        Luma([if only_a { ON } else { 0 }])
    })
}

pub fn union_into(target: &mut GrayImage, source: &GrayImage) {
    for (t, s) in target.pixels_mut().zip(source.pixels()) {
        if s.0[0] > 0 {
            t.0[0] = ON;
        }
    }
}

pub fn invert(mask: &GrayImage) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        Luma([if mask.get_pixel(x, y).0[0] > 0 { 0 } else { ON }])
    })
}

/// Number of set pixels among the 8 neighbours of (x, y).
pub fn neighbor_count(mask: &GrayImage, x: u32, y: u32) -> u8 {
    let (w, h) = (mask.width() as i64, mask.height() as i64);
    let mut count = 0;
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let (nx, ny) = (x as i64 + dx, y as i64 + dy);
            if nx >= 0 && ny >= 0 && nx < w && ny < h && mask.get_pixel(nx as u32, ny as u32).0[0] > 0 {
                count += 1;
            }
        }
    }
    count
}

/// Copy of the region of `frame` under `bbox`. The box must already be clipped.
pub fn crop(frame: &RgbImage, bbox: &BoundingBox) -> RgbImage {
    imageops::crop_imm(frame, bbox.x as u32, bbox.y as u32, bbox.width, bbox.height).to_image()
}

/// `image` with every pixel outside `mask` set to black.
pub fn apply_mask(image: &RgbImage, mask: &GrayImage) -> RgbImage {
    let mut out = image.clone();
    for (pixel, m) in out.pixels_mut().zip(mask.pixels()) {
        if m.0[0] == 0 {
            pixel.0 = [0, 0, 0];
        }
    }
    out
}
