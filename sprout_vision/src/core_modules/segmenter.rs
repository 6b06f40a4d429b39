// THEORY:
// The `FrameSegmenter` turns a raw frame into candidate plant contours.
//
// 1.  **Vegetation Mask**: pixels inside the green HSV band, cleaned with an
//     opening (speckle) and a closing (small gaps between leaf fragments).
// 2.  **Instance Separation**: the cleaned mask goes through the watershed so that
//     touching plants come out as separate instances.
// 3.  **Fallback**: a scene with no green at all (odd lighting, white balance gone
//     wrong) is binarized from grayscale with Otsu instead, floored at the configured
//     threshold, and its external contours are used directly.
// 4.  **Noise Floor**: anything with an area of `MIN_INSTANCE_AREA` or less is dropped.

use image::{GrayImage, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{close, open};
use tracing::debug;

use crate::config::ProcessingConfig;
use crate::core_modules::geometry::{BoundingBox, Contour, polygon_area};
use crate::core_modules::mask::{external_contours, otsu_binarize};
use crate::core_modules::pixel::pixel::{HsvRange, grayscale};
use crate::core_modules::watershed::watershed;

pub const VEGETATION_BAND: HsvRange = HsvRange::new((25, 40, 40), (85, 255, 255));
/// Contours at or below this many square pixels are noise.
pub const MIN_INSTANCE_AREA: f64 = 50.0;
/// Sigma of the 5x5 Gaussian used before the Otsu fallback.
const FALLBACK_BLUR_SIGMA: f32 = 1.1;

/// One detected region of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceContour {
    pub points: Contour,
    pub bbox: BoundingBox,
    pub area: f64,
}

impl InstanceContour {
    pub fn new(points: Contour) -> Self {
        let bbox = BoundingBox::of_points(&points);
        let area = polygon_area(&points);
        Self { points, bbox, area }
    }
}

#[derive(Debug, Clone)]
pub struct FrameSegmenter {
    threshold: u8,
}

impl FrameSegmenter {
    pub fn new(config: &ProcessingConfig) -> Self {
        Self { threshold: config.threshold.min(255) as u8 }
    }

    pub fn segment(&self, frame: &RgbImage) -> Vec<InstanceContour> {
        if frame.width() == 0 || frame.height() == 0 {
            return Vec::new();
        }

        let mask = vegetation_mask(frame);
        let mut instances = self.instances_from_mask(&mask);

        if instances.is_empty() {
            debug!("no vegetation instances, falling back to grayscale Otsu");
            let blurred = gaussian_blur_f32(&grayscale(frame), FALLBACK_BLUR_SIGMA);
            let binary = otsu_binarize(&blurred, Some(self.threshold));
            instances = keep_above_noise_floor(external_contours(&binary));
        }

        debug!(count = instances.len(), "segmented frame");
        instances
    }

    /// Watershed instances of an already-binarized vegetation mask.
    pub fn instances_from_mask(&self, mask: &GrayImage) -> Vec<InstanceContour> {
        keep_above_noise_floor(watershed::find_instances(mask))
    }
}

/// Cleaned vegetation mask of `frame`: 3x3 opening, then 5x5 closing.
pub fn vegetation_mask(frame: &RgbImage) -> GrayImage {
    let raw = VEGETATION_BAND.mask(frame);
    let opened = open(&raw, Norm::L1, 1);
    close(&opened, Norm::L1, 2)
}

fn keep_above_noise_floor(contours: Vec<Contour>) -> Vec<InstanceContour> {
    contours
        .into_iter()
        .map(InstanceContour::new)
        .filter(|c| c.area > MIN_INSTANCE_AREA)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn segmenter() -> FrameSegmenter {
        FrameSegmenter::new(&ProcessingConfig::default())
    }

    fn frame_with_discs(centers: &[(f64, f64)], radius: f64, color: Rgb<u8>) -> RgbImage {
        RgbImage::from_fn(200, 120, |x, y| {
            let inside = centers.iter().any(|(cx, cy)| (x as f64 - cx).hypot(y as f64 - cy) <= radius);
            if inside { color } else { Rgb([0, 0, 0]) }
        })
    }

    #[test]
    fn empty_frame_yields_nothing() {
        assert!(segmenter().segment(&RgbImage::new(0, 0)).is_empty());
    }

    #[test]
    fn green_discs_become_instances() {
        let frame = frame_with_discs(&[(40.0, 60.0), (150.0, 60.0)], 20.0, Rgb([40, 180, 40]));
        let instances = segmenter().segment(&frame);
        assert_eq!(instances.len(), 2);
        assert!(instances.iter().all(|i| i.area > MIN_INSTANCE_AREA));
    }

    #[test]
    fn sprout_next_to_a_mature_plant_is_not_dropped() {
        let frame = RgbImage::from_fn(360, 200, |x, y| {
            let big = (x as f64 - 100.0).hypot(y as f64 - 100.0) <= 60.0;
            let small = (x as f64 - 280.0).hypot(y as f64 - 100.0) <= 18.0;
            if big || small { Rgb([40, 180, 40]) } else { Rgb([0, 0, 0]) }
        });
        let mut instances = segmenter().segment(&frame);
        assert_eq!(instances.len(), 2);
        instances.sort_by(|a, b| a.area.total_cmp(&b.area));
        assert!(instances[0].area > 800.0 && instances[0].area < 1100.0);
        assert!(instances[0].bbox.x > 250);
    }

    #[test]
    fn speckle_is_removed_by_the_noise_floor() {
        let frame = frame_with_discs(&[(40.0, 60.0)], 3.0, Rgb([40, 180, 40]));
        assert!(segmenter().segment(&frame).is_empty());
    }

    #[test]
    fn bright_non_green_object_uses_the_grayscale_fallback() {
        let frame = frame_with_discs(&[(100.0, 60.0)], 25.0, Rgb([230, 230, 230]));
        let instances = segmenter().segment(&frame);
        assert_eq!(instances.len(), 1);
        let bbox = instances[0].bbox;
        assert!((bbox.x - 75).abs() <= 3 && (bbox.width as i32 - 51).abs() <= 6);
    }
}
