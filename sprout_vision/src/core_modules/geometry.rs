// THEORY:
// Contours are ordered integer point lists describing a closed polygon. This module
// holds the polygon measurements every other stage shares: bounding boxes, the
// shoelace area, arc length, convex hull, rotated rectangle, and the first and
// second order polygon moments from which centroids and the moment-equivalent
// ellipse (orientation, axes, eccentricity) follow. Everything here is a pure
// function of the point list.

use imageproc::geometry::{approximate_polygon_dp, arc_length, convex_hull, min_area_rect};
use imageproc::point::Point;
use imageproc::rect::Rect;
use serde::Serialize;

pub type Contour = Vec<Point<i32>>;

/// Axis-aligned, inclusive pixel bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn of_points(points: &[Point<i32>]) -> Self {
        let Some(first) = points.first() else {
            return BoundingBox::default();
        };
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        BoundingBox {
            x: min_x,
            y: min_y,
            width: (max_x - min_x + 1) as u32,
            height: (max_y - min_y + 1) as u32,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// The part of this box inside a `width` x `height` frame, if any.
    pub fn clip_to(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let x0 = self.x.max(0) as i64;
        let y0 = self.y.max(0) as i64;
        let x1 = (self.x as i64 + self.width as i64).min(width as i64);
        let y1 = (self.y as i64 + self.height as i64).min(height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(BoundingBox { x: x0 as i32, y: y0 as i32, width: (x1 - x0) as u32, height: (y1 - y0) as u32 })
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = (self.x + self.width as i32).max(other.x + other.width as i32);
        let y1 = (self.y + self.height as i32).max(other.y + other.height as i32);
        BoundingBox { x: x0, y: y0, width: (x1 - x0) as u32, height: (y1 - y0) as u32 }
    }

    pub fn to_rect(&self) -> Option<Rect> {
        (!self.is_empty()).then(|| Rect::at(self.x, self.y).of_size(self.width, self.height))
    }
}

/// Shoelace area of the closed polygon.
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        twice_area += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    (twice_area as f64 / 2.0).abs()
}

/// Perimeter of the closed contour.
///
/// Raw 8-connected traces overstate the length of curved boundaries by the
/// staircase between pixel centres, so the trace is first reduced with a
/// one-pixel Douglas-Peucker tolerance.
pub fn perimeter(points: &[Point<i32>]) -> f64 {
    match points.len() {
        0 | 1 => 0.0,
        2 => arc_length(points, true),
        _ => {
            let simplified = approximate_polygon_dp(points, 1.0, true);
            if simplified.len() >= 3 {
                arc_length(&simplified, true)
            } else {
                arc_length(points, true)
            }
        }
    }
}

/// Length of the open polyline, summing consecutive point distances.
pub fn path_length(points: &[Point<i32>]) -> f64 {
    points
        .windows(2)
        .map(|w| {
            let dx = (w[1].x - w[0].x) as f64;
            let dy = (w[1].y - w[0].y) as f64;
            dx.hypot(dy)
        })
        .sum()
}

pub fn hull(points: &[Point<i32>]) -> Contour {
    if points.len() < 3 {
        return points.to_vec();
    }
    convex_hull(points)
}

/// Minimum-area rotated rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RotatedRect {
    pub center: (f64, f64),
    pub width: f64,
    pub height: f64,
    /// Angle of the `width` side against the x axis, degrees.
    pub angle: f64,
}

impl RotatedRect {
    pub fn of_points(points: &[Point<i32>]) -> Self {
        let hull_points = hull(points);
        if hull_points.len() < 3 {
            let bbox = BoundingBox::of_points(points);
            if bbox.is_empty() {
                return RotatedRect::default();
            }
            return RotatedRect {
                center: (
                    bbox.x as f64 + (bbox.width as f64 - 1.0) / 2.0,
                    bbox.y as f64 + (bbox.height as f64 - 1.0) / 2.0,
                ),
                width: (bbox.width - 1) as f64,
                height: (bbox.height - 1) as f64,
                angle: 0.0,
            };
        }
        let corners = min_area_rect(&hull_points);
        let [a, b, c, _] = corners.map(|p| (p.x as f64, p.y as f64));
        let width = (b.0 - a.0).hypot(b.1 - a.1);
        let height = (c.0 - b.0).hypot(c.1 - b.1);
        let center = ((a.0 + c.0) / 2.0, (a.1 + c.1) / 2.0);
        let angle = (b.1 - a.1).atan2(b.0 - a.0).to_degrees();
        RotatedRect { center, width, height, angle }
    }

    pub fn long_side(&self) -> f64 {
        self.width.max(self.height)
    }

    pub fn short_side(&self) -> f64 {
        self.width.min(self.height)
    }

    pub fn is_degenerate(&self) -> bool {
        self.width <= f64::EPSILON || self.height <= f64::EPSILON
    }
}

/// Area moments of a closed polygon, computed with Green's theorem.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
    pub mu20: f64,
    pub mu11: f64,
    pub mu02: f64,
}

impl Moments {
    pub fn of_polygon(points: &[Point<i32>]) -> Self {
        if points.len() < 3 {
            return Moments::default();
        }
        let (mut a00, mut a10, mut a01, mut a20, mut a11, mut a02) = (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        for (i, p) in points.iter().enumerate() {
            let q = points[(i + 1) % points.len()];
            let (x0, y0, x1, y1) = (p.x as f64, p.y as f64, q.x as f64, q.y as f64);
            let cross = x0 * y1 - x1 * y0;
            a00 += cross;
            a10 += cross * (x0 + x1);
            a01 += cross * (y0 + y1);
            a20 += cross * (x0 * x0 + x0 * x1 + x1 * x1);
            a11 += cross * (x0 * y1 + 2.0 * x0 * y0 + 2.0 * x1 * y1 + x1 * y0);
            a02 += cross * (y0 * y0 + y0 * y1 + y1 * y1);
        }
        let sign = if a00 < 0.0 { -1.0 } else { 1.0 };
        let m00 = sign * a00 / 2.0;
        if m00 <= f64::EPSILON {
            return Moments::default();
        }
        let m10 = sign * a10 / 6.0;
        let m01 = sign * a01 / 6.0;
        let m20 = sign * a20 / 12.0;
        let m11 = sign * a11 / 24.0;
        let m02 = sign * a02 / 12.0;
        let cx = m10 / m00;
        let cy = m01 / m00;
        Moments {
            m00,
            m10,
            m01,
            mu20: m20 - cx * m10,
            mu11: m11 - cx * m01,
            mu02: m02 - cy * m01,
        }
    }

    pub fn centroid(&self) -> Option<(f64, f64)> {
        (self.m00 > f64::EPSILON).then(|| (self.m10 / self.m00, self.m01 / self.m00))
    }

    /// The ellipse with the same second moments as the polygon.
    pub fn equivalent_ellipse(&self) -> Option<Ellipse> {
        let (cx, cy) = self.centroid()?;
        let a = self.mu20 / self.m00;
        let b = self.mu11 / self.m00;
        let c = self.mu02 / self.m00;
        let spread = (((a - c) / 2.0).powi(2) + b * b).sqrt();
        let major_var = (a + c) / 2.0 + spread;
        let minor_var = ((a + c) / 2.0 - spread).max(0.0);
        if major_var <= f64::EPSILON {
            return None;
        }
        Some(Ellipse {
            center: (cx, cy),
            major_axis: 4.0 * major_var.sqrt(),
            minor_axis: 4.0 * minor_var.sqrt(),
            angle: 0.5 * (2.0 * b).atan2(a - c).to_degrees(),
        })
    }
}

/// A fitted ellipse; axes are full lengths.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Ellipse {
    pub center: (f64, f64),
    pub major_axis: f64,
    pub minor_axis: f64,
    pub angle: f64,
}

impl Ellipse {
    /// Fits the moment-equivalent ellipse. Needs at least five points.
    pub fn fit(points: &[Point<i32>]) -> Option<Ellipse> {
        if points.len() < 5 {
            return None;
        }
        Moments::of_polygon(points).equivalent_ellipse()
    }

    /// 0 for a circle, approaching 1 as the shape elongates.
    pub fn eccentricity(&self) -> f64 {
        if self.major_axis <= f64::EPSILON {
            return 0.0;
        }
        let ratio = self.minor_axis / self.major_axis;
        (1.0 - ratio * ratio).max(0.0).sqrt()
    }

    pub fn aspect_ratio(&self) -> Option<f64> {
        (self.minor_axis > f64::EPSILON).then(|| self.major_axis / self.minor_axis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: i32, y: i32, side: i32) -> Contour {
        vec![
            Point::new(x, y),
            Point::new(x + side, y),
            Point::new(x + side, y + side),
            Point::new(x, y + side),
        ]
    }

    #[test]
    fn shoelace_area_ignores_orientation() {
        let mut points = square(0, 0, 10);
        assert_eq!(polygon_area(&points), 100.0);
        points.reverse();
        assert_eq!(polygon_area(&points), 100.0);
    }

    #[test]
    fn bounding_box_is_inclusive() {
        let bbox = BoundingBox::of_points(&square(2, 3, 10));
        assert_eq!(bbox, BoundingBox { x: 2, y: 3, width: 11, height: 11 });
    }

    #[test]
    fn clip_and_union() {
        let bbox = BoundingBox { x: -5, y: 10, width: 20, height: 20 };
        assert_eq!(bbox.clip_to(12, 25), Some(BoundingBox { x: 0, y: 10, width: 12, height: 15 }));
        assert_eq!(bbox.clip_to(10, 5), None);

        let other = BoundingBox { x: 20, y: 0, width: 5, height: 5 };
        assert_eq!(bbox.union(&other), BoundingBox { x: -5, y: 0, width: 30, height: 30 });
    }

    #[test]
    fn square_moments_center_and_round_ellipse() {
        let moments = Moments::of_polygon(&square(0, 0, 10));
        let (cx, cy) = moments.centroid().expect("square has a centroid");
        assert!((cx - 5.0).abs() < 1e-9 && (cy - 5.0).abs() < 1e-9);
        assert!((moments.mu20 - moments.mu02).abs() < 1e-6);
        assert!(moments.mu11.abs() < 1e-6);
        let ellipse = moments.equivalent_ellipse().expect("ellipse");
        assert!(ellipse.eccentricity() < 1e-6);
    }

    #[test]
    fn elongated_rectangle_is_eccentric() {
        let rect = vec![Point::new(0, 0), Point::new(40, 0), Point::new(40, 10), Point::new(0, 10), Point::new(0, 5)];
        let ellipse = Ellipse::fit(&rect).expect("five points fit an ellipse");
        assert!(ellipse.eccentricity() > 0.9);
        assert!((ellipse.aspect_ratio().expect("non-degenerate") - 4.0).abs() < 1e-6);
    }

    #[test]
    fn too_few_points_have_no_ellipse() {
        assert!(Ellipse::fit(&square(0, 0, 4)).is_none());
    }

    #[test]
    fn path_length_sums_segments() {
        let path = vec![Point::new(0, 0), Point::new(3, 4), Point::new(3, 10)];
        assert!((path_length(&path) - 11.0).abs() < 1e-9);
    }

    #[test]
    fn rotated_rect_of_axis_aligned_box() {
        let rect = RotatedRect::of_points(&square(0, 0, 10));
        assert!((rect.long_side() - 10.0).abs() < 1e-9);
        assert!((rect.short_side() - 10.0).abs() < 1e-9);
        assert!(!rect.is_degenerate());
    }
}
