// THEORY:
// The `MorphologyAnalyzer` describes the shape of one plant instance from its binary
// mask. It works in two layers:
//
// 1.  **Shape Descriptors**: the largest external contour is the primary shape.
//     From it come area, perimeter, rotated rectangle, centroid, hull, and the
//     dimensionless ratios (solidity, extent, eccentricity, circularity,
//     compactness, shape index) that let a sprout be told apart from a plant
//     without knowing the camera scale.
// 2.  **Skeleton Topology**: the mask is thinned to a one-pixel backbone (erode
//     with a cross, keep what the opening of the eroded image loses, repeat), then
//     short spurs are pruned. Branch points, tips and the external traces of the
//     skeleton give the path lengths and segment angles.
//
// The analyzer never mutates its input and is a pure function of the mask.

use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{erode, open};
use imageproc::point::Point;
use serde::Serialize;
use std::f64::consts::PI;

use crate::core_modules::geometry::{BoundingBox, Contour, Ellipse, Moments, RotatedRect, hull, path_length, perimeter, polygon_area};
use crate::core_modules::mask::{count_nonzero, external_contours, largest_contour, neighbor_count, subtract, union_into};

/// Safety cap on thinning passes.
pub const MAX_THINNING_ITERATIONS: usize = 100;
pub const PRUNING_ROUNDS: usize = 2;
/// Skeleton traces of this many points or fewer are not segments.
const MIN_SEGMENT_POINTS: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MorphologyMetrics {
    pub area: f64,
    pub perimeter: f64,
    pub bounding_box: BoundingBox,
    pub min_area_rect: RotatedRect,
    /// Centroid in mask coordinates.
    pub centroid: Option<(f64, f64)>,
    pub convex_hull_area: f64,
    pub convex_hull_perimeter: f64,
    pub convex_hull_vertices: usize,
    pub solidity: f64,
    pub aspect_ratio: f64,
    pub extent: f64,
    pub eccentricity: f64,
    pub circularity: f64,
    pub compactness: f64,
    pub shape_index: f64,

    pub branch_points: usize,
    pub tip_points: usize,
    pub total_path_length: f64,
    pub longest_path: f64,
    pub segment_lengths: Vec<f64>,
    /// Degrees, start to end of each segment.
    pub segment_angles: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct MorphologyAnalyzer;

impl MorphologyAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Measures the largest shape in `mask`. `crop` is the matching color region;
    /// shape analysis only reads the mask, but the two must share dimensions.
    pub fn analyze(&self, mask: &GrayImage, crop: &RgbImage) -> MorphologyMetrics {
        let mut metrics = MorphologyMetrics::default();
        if mask.dimensions() != crop.dimensions() {
            return metrics;
        }
        let contours = external_contours(mask);
        let Some(primary) = largest_contour(&contours) else {
            return metrics;
        };

        shape_descriptors(primary, &mut metrics);

        let skeleton = skeletonize(mask);
        let (branches, tips) = topology(&skeleton);
        metrics.branch_points = branches;
        metrics.tip_points = tips;

        for segment in external_contours(&skeleton) {
            if segment.len() <= MIN_SEGMENT_POINTS {
                continue;
            }
            let length = path_length(&segment);
            metrics.segment_lengths.push(length);
            metrics.total_path_length += length;
            metrics.longest_path = metrics.longest_path.max(length);
            if let (Some(start), Some(end)) = (segment.first(), segment.last()) {
                let angle = ((end.y - start.y) as f64).atan2((end.x - start.x) as f64).to_degrees();
                metrics.segment_angles.push(angle);
            }
        }

        metrics
    }

    /// Long side of the rotated rectangle, or 0 below five contour points.
    pub fn leaf_length(&self, contour: &[Point<i32>]) -> f64 {
        leaf_rect(contour).map_or(0.0, |r| r.long_side())
    }

    /// Short side of the rotated rectangle, or 0 below five contour points.
    pub fn leaf_width(&self, contour: &[Point<i32>]) -> f64 {
        leaf_rect(contour).map_or(0.0, |r| r.short_side())
    }

    /// Rotated rectangle angle, or 0 below five contour points.
    pub fn leaf_angle(&self, contour: &[Point<i32>]) -> f64 {
        leaf_rect(contour).map_or(0.0, |r| r.angle)
    }
}

fn leaf_rect(contour: &[Point<i32>]) -> Option<RotatedRect> {
    (contour.len() >= 5).then(|| RotatedRect::of_points(contour))
}

fn shape_descriptors(contour: &Contour, metrics: &mut MorphologyMetrics) {
    let area = polygon_area(contour);
    let length = perimeter(contour);
    let bbox = BoundingBox::of_points(contour);
    let hull_points = hull(contour);
    let hull_area = polygon_area(&hull_points);

    metrics.area = area;
    metrics.perimeter = length;
    metrics.bounding_box = bbox;
    metrics.min_area_rect = RotatedRect::of_points(contour);
    metrics.centroid = Moments::of_polygon(contour).centroid();
    metrics.convex_hull_area = hull_area;
    metrics.convex_hull_perimeter = perimeter(&hull_points);
    metrics.convex_hull_vertices = hull_points.len();

    if hull_area > 0.0 {
        metrics.solidity = area / hull_area;
    }
    if bbox.height > 0 {
        metrics.aspect_ratio = bbox.width as f64 / bbox.height as f64;
    }
    if bbox.area() > 0 {
        metrics.extent = area / bbox.area() as f64;
    }
    metrics.eccentricity = Ellipse::fit(contour).map_or(0.0, |e| e.eccentricity());
    if length > 0.0 {
        metrics.circularity = 4.0 * PI * area / (length * length);
        metrics.compactness = (4.0 * area / PI).sqrt() / (length / PI);
    }
    if area > 0.0 {
        metrics.shape_index = length / area.sqrt();
    }
}

/// Thins `mask` to a one-pixel skeleton and prunes short spurs.
pub fn skeletonize(mask: &GrayImage) -> GrayImage {
    let mut skeleton = GrayImage::new(mask.width(), mask.height());
    let mut current = mask.clone();

    for _ in 0..MAX_THINNING_ITERATIONS {
        let eroded = erode(&current, Norm::L1, 1);
        let opened = open(&eroded, Norm::L1, 1);
        union_into(&mut skeleton, &subtract(&eroded, &opened));
        current = eroded;
        if count_nonzero(&current) == 0 {
            break;
        }
    }

    for _ in 0..PRUNING_ROUNDS {
        prune_spurs(&mut skeleton);
    }
    skeleton
}

/// Clears skeleton pixels with at most one neighbour.
fn prune_spurs(skeleton: &mut GrayImage) {
    let (width, height) = skeleton.dimensions();
    let mut spurs = Vec::new();
    for y in 0..height {
        for x in 0..width {
            if skeleton.get_pixel(x, y).0[0] > 0 && neighbor_count(skeleton, x, y) <= 1 {
                spurs.push((x, y));
            }
        }
    }
    for (x, y) in spurs {
        skeleton.put_pixel(x, y, Luma([0]));
    }
}

/// (branch points, tip points) of a skeleton. Pixels on the image edge count too.
fn topology(skeleton: &GrayImage) -> (usize, usize) {
    let (width, height) = skeleton.dimensions();
    let (mut branches, mut tips) = (0, 0);
    for y in 0..height {
        for x in 0..width {
            if skeleton.get_pixel(x, y).0[0] == 0 {
                continue;
            }
            match neighbor_count(skeleton, x, y) {
                1 => tips += 1,
                n if n >= 3 => branches += 1,
                _ => {}
            }
        }
    }
    (branches, tips)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disc_mask(size: u32, radius: f64) -> GrayImage {
        let c = size as f64 / 2.0;
        GrayImage::from_fn(size, size, |x, y| {
            Luma([if (x as f64 - c).hypot(y as f64 - c) <= radius { 255 } else { 0 }])
        })
    }

    fn bar_mask(width: u32, height: u32, x0: u32, x1: u32, y0: u32, y1: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            Luma([if (x0..=x1).contains(&x) && (y0..=y1).contains(&y) { 255 } else { 0 }])
        })
    }

    #[test]
    fn disc_is_round_and_solid() {
        let mask = disc_mask(120, 40.0);
        let crop = RgbImage::new(120, 120);
        let metrics = MorphologyAnalyzer::new().analyze(&mask, &crop);
        assert!((metrics.circularity - 1.0).abs() < 0.05, "circularity {}", metrics.circularity);
        assert!((metrics.solidity - 1.0).abs() < 0.05, "solidity {}", metrics.solidity);
        assert!(metrics.eccentricity < 0.1);
        assert!((metrics.aspect_ratio - 1.0).abs() < 0.05);
        let (cx, cy) = metrics.centroid.expect("disc has a centroid");
        assert!((cx - 60.0).abs() < 1.0 && (cy - 60.0).abs() < 1.0);
    }

    #[test]
    fn bar_is_elongated() {
        let mask = bar_mask(100, 40, 10, 89, 15, 24);
        let metrics = MorphologyAnalyzer::new().analyze(&mask, &RgbImage::new(100, 40));
        assert!(metrics.eccentricity > 0.9);
        assert!(metrics.aspect_ratio > 7.0);
        assert!(metrics.extent > 0.8);
    }

    #[test]
    fn empty_mask_gives_default_metrics() {
        let metrics = MorphologyAnalyzer::new().analyze(&GrayImage::new(30, 30), &RgbImage::new(30, 30));
        assert_eq!(metrics, MorphologyMetrics::default());
    }

    #[test]
    fn mismatched_crop_gives_default_metrics() {
        let metrics = MorphologyAnalyzer::new().analyze(&disc_mask(40, 10.0), &RgbImage::new(10, 10));
        assert_eq!(metrics, MorphologyMetrics::default());
    }

    #[test]
    fn skeleton_stays_inside_the_mask() {
        let mask = bar_mask(100, 40, 10, 89, 12, 27);
        let skeleton = skeletonize(&mask);
        assert!(count_nonzero(&skeleton) > 0);
        for (x, y, p) in skeleton.enumerate_pixels() {
            if p.0[0] > 0 {
                assert!(mask.get_pixel(x, y).0[0] > 0);
            }
        }
        assert!(count_nonzero(&skeleton) < count_nonzero(&mask) / 4);
    }

    #[test]
    fn pruning_removes_isolated_pixels() {
        let mut skeleton = GrayImage::new(10, 10);
        skeleton.put_pixel(5, 5, Luma([255]));
        prune_spurs(&mut skeleton);
        assert_eq!(count_nonzero(&skeleton), 0);
    }

    #[test]
    fn pruning_reaches_the_image_edge() {
        let mut skeleton = GrayImage::new(10, 3);
        for x in 0..6 {
            skeleton.put_pixel(x, 0, Luma([255]));
        }
        prune_spurs(&mut skeleton);
        assert_eq!(skeleton.get_pixel(0, 0).0[0], 0);
        assert_eq!(skeleton.get_pixel(5, 0).0[0], 0);
        assert_eq!(count_nonzero(&skeleton), 4);
    }

    #[test]
    fn topology_counts_tips_on_the_edge() {
        // A stem running down the left edge, corner to corner.
        let mut skeleton = GrayImage::new(8, 8);
        for y in 0..8 {
            skeleton.put_pixel(0, y, Luma([255]));
        }
        let (branches, tips) = topology(&skeleton);
        assert_eq!(tips, 2);
        assert_eq!(branches, 0);
        assert_eq!(topology(&GrayImage::new(2, 1)), (0, 0));
    }

    #[test]
    fn topology_counts_tips_and_branches() {
        // A plus sign: one centre with four arms.
        let mut skeleton = GrayImage::new(11, 11);
        for i in 2..=8 {
            skeleton.put_pixel(i, 5, Luma([255]));
            skeleton.put_pixel(5, i, Luma([255]));
        }
        let (branches, tips) = topology(&skeleton);
        assert_eq!(tips, 4);
        assert!(branches >= 1);
    }

    #[test]
    fn leaf_measures_need_five_points() {
        let analyzer = MorphologyAnalyzer::new();
        let few = vec![Point::new(0, 0), Point::new(10, 0), Point::new(10, 4)];
        assert_eq!(analyzer.leaf_length(&few), 0.0);
        let leaf = vec![
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(20, 0),
            Point::new(20, 4),
            Point::new(0, 4),
        ];
        assert!((analyzer.leaf_length(&leaf) - 20.0).abs() < 1e-6);
        assert!((analyzer.leaf_width(&leaf) - 4.0).abs() < 1e-6);
    }
}
