// THEORY:
// A `PlantInstance` is everything the engine knows about one plant in one frame.
// It is built from a contour and its classification by `InstanceProcessor`, which
// cuts the region out of the frame, derives the instance mask (Otsu foreground of
// the crop, restricted to the instance outline so neighbours sharing the box do not
// leak in), and runs the morphology and color/health analyzers over it.
//
// Processing one instance must never take the frame down with it: the whole
// computation runs behind `catch_unwind`, and a failure yields an instance that
// keeps its identity (type, box, contour, area) with every measurement zeroed.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use image::RgbImage;
use serde::Serialize;
use tracing::warn;

use crate::config::ProcessingConfig;
use crate::core_modules::classifier::{GrowthStage, InstanceClassifier, PlantType};
use crate::core_modules::color_health::{ColorHealthAnalyzer, ColorStats};
use crate::core_modules::geometry::{BoundingBox, Contour, Moments, perimeter};
use crate::core_modules::mask::{crop, fill_contour, intersect, otsu_binarize};
use crate::core_modules::morphology::MorphologyAnalyzer;
use crate::core_modules::pixel::pixel::grayscale;
use crate::core_modules::segmenter::InstanceContour;
use crate::error::VisionError;
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};

#[derive(Debug, Clone, Serialize)]
pub struct PlantInstance {
    pub id: usize,
    pub plant_type: PlantType,
    pub stage: GrowthStage,
    pub bbox: BoundingBox,
    #[serde(skip)]
    pub contour: Contour,

    pub area_pixels: f64,
    /// Physical sizes are 0 while the scale is unknown.
    pub area_cm2: f64,
    pub height_cm: f64,
    pub width_cm: f64,
    pub perimeter_cm: f64,

    pub color: ColorStats,

    pub solidity: f64,
    pub eccentricity: f64,
    pub circularity: f64,
    pub compactness: f64,
    pub aspect_ratio: f64,
    pub extent: f64,
    pub convexity: f64,
    pub orientation: f64,
    /// Frame coordinates.
    pub centroid: (f64, f64),

    pub branch_count: usize,
    pub tip_count: usize,
    pub path_length_cm: f64,
    pub longest_path_cm: f64,
    pub stem_length_cm: f64,

    pub ndvi: f64,
    pub exg: f64,
    /// Crop coordinates.
    pub brown_spots: Vec<(f64, f64)>,
    /// Crop coordinates.
    pub yellow_areas: Vec<(f64, f64)>,
    pub leaf_count: usize,
    /// Rotated-rectangle sides and angle of the outline, pixels and degrees.
    pub leaf_length_px: f64,
    pub leaf_width_px: f64,
    pub leaf_angle: f64,
    pub health_score: f64,

    #[serde(skip)]
    pub crop: RgbImage,
}

impl PlantInstance {
    /// An instance with its identity set and every measurement zeroed.
    pub fn unmeasured(id: usize, contour: &InstanceContour, plant_type: PlantType) -> Self {
        let stage = match plant_type {
            PlantType::Sprout => GrowthStage::Cotyledon,
            PlantType::Plant => GrowthStage::Vegetative,
        };
        PlantInstance {
            id,
            plant_type,
            stage,
            bbox: contour.bbox,
            contour: contour.points.clone(),
            area_pixels: contour.area,
            area_cm2: 0.0,
            height_cm: 0.0,
            width_cm: 0.0,
            perimeter_cm: 0.0,
            color: ColorStats::default(),
            solidity: 0.0,
            eccentricity: 0.0,
            circularity: 0.0,
            compactness: 0.0,
            aspect_ratio: 0.0,
            extent: 0.0,
            convexity: 0.0,
            orientation: 0.0,
            centroid: (0.0, 0.0),
            branch_count: 0,
            tip_count: 0,
            path_length_cm: 0.0,
            longest_path_cm: 0.0,
            stem_length_cm: 0.0,
            ndvi: 0.0,
            exg: 0.0,
            brown_spots: Vec::new(),
            yellow_areas: Vec::new(),
            leaf_count: 0,
            leaf_length_px: 0.0,
            leaf_width_px: 0.0,
            leaf_angle: 0.0,
            health_score: 0.0,
            crop: RgbImage::new(0, 0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstanceProcessor {
    scale_px_per_cm: f64,
    classifier: InstanceClassifier,
    morphology: MorphologyAnalyzer,
    color: ColorHealthAnalyzer,
}

impl InstanceProcessor {
    pub fn new(config: &ProcessingConfig) -> Self {
        Self {
            scale_px_per_cm: config.scale_px_per_cm,
            classifier: InstanceClassifier::new(config),
            morphology: MorphologyAnalyzer::new(),
            color: ColorHealthAnalyzer::new(),
        }
    }

    /// Measures one instance; a failure inside degrades only this instance.
    pub fn process(&self, frame: &RgbImage, id: usize, contour: &InstanceContour, plant_type: PlantType) -> PlantInstance {
        isolated(id, contour, plant_type, || self.measure(frame, id, contour, plant_type))
    }

    fn measure(&self, frame: &RgbImage, id: usize, contour: &InstanceContour, plant_type: PlantType) -> PlantInstance {
        let mut instance = PlantInstance::unmeasured(id, contour, plant_type);
        let scale = self.scale_px_per_cm;
        if scale > 0.0 {
            instance.area_cm2 = contour.area / (scale * scale);
            instance.height_cm = contour.bbox.height as f64 / scale;
            instance.width_cm = contour.bbox.width as f64 / scale;
        }

        let outline_perimeter = perimeter(&contour.points);
        instance.leaf_length_px = self.morphology.leaf_length(&contour.points);
        instance.leaf_width_px = self.morphology.leaf_width(&contour.points);
        instance.leaf_angle = self.morphology.leaf_angle(&contour.points);
        let moments_centroid = Moments::of_polygon(&contour.points).centroid();

        let Some(roi) = contour.bbox.clip_to(frame.width(), frame.height()) else {
            instance.centroid = moments_centroid.unwrap_or_default();
            return instance;
        };
        let region = crop(frame, &roi);
        let outline = fill_contour(roi.width, roi.height, &contour.points, (roi.x, roi.y));

        let foreground = otsu_binarize(&grayscale(&region), None);
        let cleaned = close(&open(&foreground, Norm::L1, 1), Norm::L1, 2);
        let mask = intersect(&cleaned, &outline);

        instance.color = self.color.color_stats(&region, &outline);

        let shape = self.morphology.analyze(&mask, &region);
        instance.solidity = shape.solidity;
        instance.eccentricity = shape.eccentricity;
        instance.circularity = shape.circularity;
        instance.compactness = shape.compactness;
        instance.aspect_ratio = shape.aspect_ratio;
        instance.extent = shape.extent;
        instance.branch_count = shape.branch_points;
        instance.tip_count = shape.tip_points;
        if shape.convex_hull_perimeter > 0.0 {
            instance.convexity = shape.perimeter / shape.convex_hull_perimeter;
        }
        if !shape.min_area_rect.is_degenerate() {
            instance.orientation = shape.min_area_rect.angle;
        }
        instance.centroid = match shape.centroid {
            Some((x, y)) => (x + roi.x as f64, y + roi.y as f64),
            None => moments_centroid.unwrap_or_default(),
        };
        if scale > 0.0 {
            instance.perimeter_cm = outline_perimeter / scale;
            instance.path_length_cm = shape.total_path_length / scale;
            instance.longest_path_cm = shape.longest_path / scale;
            if plant_type == PlantType::Plant {
                instance.stem_length_cm = instance.longest_path_cm;
            }
        }

        instance.ndvi = self.color.ndvi(&region, &mask);
        instance.exg = self.color.exg(&region, &mask);
        let markers = self.color.disease_markers(&region, &mask);
        instance.health_score = self.color.health_score(&instance.color, plant_type, &markers);
        instance.brown_spots = markers.brown_spots;
        instance.yellow_areas = markers.yellow_areas;

        instance.leaf_count = self.classifier.count_leaves(frame, contour, plant_type);
        instance.stage = self.classifier.growth_stage(plant_type, instance.leaf_count);
        instance.crop = region;
        instance
    }
}

/// Runs `measure`, turning a panic inside it into an unmeasured instance.
pub(crate) fn isolated<F>(id: usize, contour: &InstanceContour, plant_type: PlantType, measure: F) -> PlantInstance
where
    F: FnOnce() -> PlantInstance,
{
    match catch_unwind(AssertUnwindSafe(measure)) {
        Ok(instance) => instance,
        Err(payload) => {
            let error = VisionError::Processing(panic_message(payload.as_ref()));
            warn!(id, error = %error, "instance processing failed, keeping zeroed metrics");
            PlantInstance::unmeasured(id, contour, plant_type)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
