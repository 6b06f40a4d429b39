// THEORY:
// The `InstanceClassifier` labels each instance SPROUT or PLANT with a cascade of
// increasingly expensive checks. The first rule that fires wins:
//
//   a. small area                                  -> SPROUT
//   b. known scale and short (in cm)                -> SPROUT
//   c. compact, solid, round blob of moderate area  -> SPROUT
//   d. almost no skeleton junctions in the root zone -> SPROUT
//   e. otherwise                                    -> PLANT
//
// Cheap geometric checks run before the skeleton so the worst-case cost is only paid
// for the ambiguous instances. The growth stage follows from the type and the leaf
// count; plants are always VEGETATIVE.

use image::RgbImage;
use serde::Serialize;
use tracing::trace;

use crate::config::ProcessingConfig;
use crate::core_modules::geometry::{BoundingBox, Ellipse, hull, polygon_area};
use crate::core_modules::mask::{apply_mask, crop, external_contours, fill_contour, largest_contour, neighbor_count, otsu_binarize};
use crate::core_modules::morphology::skeletonize;
use crate::core_modules::pixel::pixel::{HsvRange, grayscale};
use crate::core_modules::segmenter::{InstanceContour, VEGETATION_BAND};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};

pub const SPROUT_MAX_AREA: f64 = 2500.0;
pub const SPROUT_MAX_HEIGHT_CM: f64 = 5.0;
pub const COMPACT_MIN_SOLIDITY: f64 = 0.75;
pub const COMPACT_MAX_ASPECT: f64 = 3.0;
pub const COMPACT_MAX_AREA: f64 = 4000.0;
pub const ROOT_ZONE_MAX_JUNCTIONS: usize = 3;
pub const ROOT_ZONE_MAX_AREA: f64 = 3500.0;
/// Distance of the root-zone centre above the crop's bottom edge.
const ROOT_ZONE_OFFSET: u32 = 5;

const SPROUT_LEAF_BAND: HsvRange = HsvRange::new((20, 30, 30), (90, 255, 255));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlantType {
    Sprout,
    Plant,
}

impl PlantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlantType::Sprout => "SPROUT",
            PlantType::Plant => "PLANT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrowthStage {
    Cotyledon,
    FirstLeaves,
    EarlyVegetative,
    Vegetative,
}

impl GrowthStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrowthStage::Cotyledon => "COTYLEDON",
            GrowthStage::FirstLeaves => "FIRST_LEAVES",
            GrowthStage::EarlyVegetative => "EARLY_VEGETATIVE",
            GrowthStage::Vegetative => "VEGETATIVE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstanceClassifier {
    scale_px_per_cm: f64,
}

impl InstanceClassifier {
    pub fn new(config: &ProcessingConfig) -> Self {
        Self { scale_px_per_cm: config.scale_px_per_cm }
    }

    pub fn classify(&self, frame: &RgbImage, instance: &InstanceContour) -> PlantType {
        let region = instance
            .bbox
            .clip_to(frame.width(), frame.height())
            .map(|bbox| crop(frame, &bbox));
        self.classify_region(region.as_ref(), &instance.bbox, instance.area)
    }

    /// Runs the cascade on an already-cut crop. `crop` may be absent when the
    /// instance lies outside the frame; only the geometric rules apply then.
    pub fn classify_region(&self, crop: Option<&RgbImage>, bbox: &BoundingBox, area: f64) -> PlantType {
        if area < SPROUT_MAX_AREA {
            trace!(area, "sprout by area");
            return PlantType::Sprout;
        }

        if self.scale_px_per_cm > 0.0 && (bbox.height as f64 / self.scale_px_per_cm) < SPROUT_MAX_HEIGHT_CM {
            trace!(height = bbox.height, "sprout by height");
            return PlantType::Sprout;
        }

        let Some(crop) = crop else {
            return PlantType::Plant;
        };
        // Vegetation is brighter than the soil around it, so the plant is the
        // foreground of a non-inverted binarization.
        let binary = otsu_binarize(&grayscale(crop), None);
        let Some(shape) = largest_contour(&external_contours(&binary)).cloned() else {
            trace!("no foreground in crop");
            return PlantType::Plant;
        };

        let hull_area = polygon_area(&hull(&shape));
        let solidity = if hull_area > 0.0 { polygon_area(&shape) / hull_area } else { 0.0 };
        let aspect = Ellipse::fit(&shape).and_then(|e| e.aspect_ratio()).unwrap_or(f64::INFINITY);
        if solidity > COMPACT_MIN_SOLIDITY && aspect < COMPACT_MAX_ASPECT && area < COMPACT_MAX_AREA {
            trace!(solidity, aspect, "sprout by compact shape");
            return PlantType::Sprout;
        }

        let junctions = root_zone_junctions(&skeletonize(&binary), bbox);
        if junctions <= ROOT_ZONE_MAX_JUNCTIONS && area < ROOT_ZONE_MAX_AREA {
            trace!(junctions, "sprout by root zone");
            return PlantType::Sprout;
        }

        PlantType::Plant
    }

    pub fn growth_stage(&self, plant_type: PlantType, leaf_count: usize) -> GrowthStage {
        match plant_type {
            PlantType::Plant => GrowthStage::Vegetative,
            PlantType::Sprout => match leaf_count {
                0..=2 => GrowthStage::Cotyledon,
                3..=4 => GrowthStage::FirstLeaves,
                _ => GrowthStage::EarlyVegetative,
            },
        }
    }

    /// Counts leaf-like blobs inside the instance outline.
    ///
    /// Sprouts are re-thresholded with a wider green band and smaller area limits.
    pub fn count_leaves(&self, frame: &RgbImage, instance: &InstanceContour, plant_type: PlantType) -> usize {
        let Some(bbox) = instance.bbox.clip_to(frame.width(), frame.height()) else {
            return 0;
        };
        let region = crop(frame, &bbox);
        let outline = fill_contour(bbox.width, bbox.height, &instance.points, (bbox.x, bbox.y));
        let masked = apply_mask(&region, &outline);

        let (band, min_area, max_area) = match plant_type {
            PlantType::Sprout => (SPROUT_LEAF_BAND, 10.0, 1000.0),
            PlantType::Plant => (VEGETATION_BAND, 20.0, 5000.0),
        };
        let leaves = close(&open(&band.mask(&masked), Norm::L1, 1), Norm::L1, 1);

        external_contours(&leaves)
            .iter()
            .filter(|leaf| {
                let area = polygon_area(leaf);
                let leaf_box = BoundingBox::of_points(leaf);
                let aspect = leaf_box.width as f64 / leaf_box.height.max(1) as f64;
                area > min_area && area < max_area && aspect > 0.2 && aspect < 5.0
            })
            .count()
    }
}

/// Skeleton pixels with two or more neighbours inside the window around the
/// bottom-middle of the crop.
fn root_zone_junctions(skeleton: &image::GrayImage, bbox: &BoundingBox) -> usize {
    let (width, height) = skeleton.dimensions();
    if width == 0 || height == 0 {
        return 0;
    }
    let radius = (bbox.width.min(bbox.height) / 4) as i64;
    let center_x = (width / 2) as i64;
    let center_y = height.saturating_sub(ROOT_ZONE_OFFSET) as i64;

    let mut junctions = 0;
    for y in (center_y - radius).max(0)..(center_y + radius).min(height as i64) {
        for x in (center_x - radius).max(0)..(center_x + radius).min(width as i64) {
            let (x, y) = (x as u32, y as u32);
            if skeleton.get_pixel(x, y).0[0] > 0 && neighbor_count(skeleton, x, y) >= 2 {
                junctions += 1;
            }
        }
    }
    junctions
}
