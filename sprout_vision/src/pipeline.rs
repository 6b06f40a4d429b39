// THEORY:
// The `pipeline` module is the top-level API of the plant vision engine. It wires
// the core modules into one synchronous tick:
//
//   frame -> FrameSegmenter -> InstanceClassifier -> InstanceProcessor (per instance)
//         -> aggregate -> ChangeDetector -> PlantAnalysisResult
//
// Each stage finishes before the next starts, and the change detector runs last, so
// the baseline a tick is judged against is always the state left by earlier ticks.
// An empty frame never reaches the change detector: it carries no aggregate, so it
// can neither create nor be judged against a baseline.
// The annotated frame is drawn into a buffer taken from a small pool; handing the
// result back through `recycle` returns the buffer so a pipeline running at a fixed
// cadence stops allocating a fresh frame every tick.

use std::collections::VecDeque;
use std::time::Instant;

use chrono::{DateTime, Utc};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use tracing::{debug, warn};

use crate::config::VisionConfig;
use crate::core_modules::classifier::{InstanceClassifier, PlantType};
use crate::core_modules::instance::{InstanceProcessor, PlantInstance};
use crate::core_modules::segmenter::FrameSegmenter;
use crate::error::VisionError;

// Re-export key data structures for the public API.
pub use crate::core_modules::change_detector::{ChangeDetectionMetrics, ChangeDetector, ChangeThresholds};
pub use crate::core_modules::classifier::GrowthStage;

const FRAME_POOL_SIZE: usize = 4;
const SPROUT_COLOR: Rgb<u8> = Rgb([0, 255, 100]);
const PLANT_COLOR: Rgb<u8> = Rgb([0, 200, 0]);

/// Everything one tick produced.
#[derive(Debug, Clone)]
pub struct PlantAnalysisResult {
    pub frame_number: u64,
    pub timestamp: DateTime<Utc>,
    pub instances: Vec<PlantInstance>,
    pub total_instance_count: usize,
    pub sprout_count: usize,
    pub plant_count: usize,
    pub total_area_pixels: f64,
    pub total_area_cm2: f64,
    /// 0 when there are no instances.
    pub average_health: f64,
    pub processing_time_ms: f64,
    pub scale_px_per_cm: f64,
    pub annotated_frame: RgbImage,
    /// Present when the tick went through the change detector.
    pub change: Option<ChangeDetectionMetrics>,
}

impl PlantAnalysisResult {
    pub fn empty(scale_px_per_cm: f64) -> Self {
        PlantAnalysisResult {
            frame_number: 0,
            timestamp: Utc::now(),
            instances: Vec::new(),
            total_instance_count: 0,
            sprout_count: 0,
            plant_count: 0,
            total_area_pixels: 0.0,
            total_area_cm2: 0.0,
            average_health: 0.0,
            processing_time_ms: 0.0,
            scale_px_per_cm,
            annotated_frame: RgbImage::new(0, 0),
            change: None,
        }
    }

    pub fn significant_change(&self) -> bool {
        self.change.as_ref().is_some_and(|c| c.significant_change)
    }
}

/// The main, top-level struct for the vision engine.
pub struct PlantPipeline {
    segmenter: FrameSegmenter,
    classifier: InstanceClassifier,
    processor: InstanceProcessor,
    change_detector: ChangeDetector,
    scale_px_per_cm: f64,
    max_processing_time_ms: u64,
    frame_pool: VecDeque<RgbImage>,
    frame_counter: u64,
}

impl PlantPipeline {
    pub fn new(config: &VisionConfig) -> Self {
        let processing = &config.processing;
        Self {
            segmenter: FrameSegmenter::new(processing),
            classifier: InstanceClassifier::new(processing),
            processor: InstanceProcessor::new(processing),
            change_detector: ChangeDetector::default(),
            scale_px_per_cm: processing.scale_px_per_cm,
            max_processing_time_ms: processing.max_processing_time_ms,
            frame_pool: VecDeque::with_capacity(FRAME_POOL_SIZE),
            frame_counter: 0,
        }
    }

    /// Runs one full tick, change detection included. `change` stays `None` for
    /// an empty frame.
    pub fn analyze(&mut self, frame: &RgbImage) -> PlantAnalysisResult {
        let mut result = self.analyze_plants(frame);
        if check_frame(frame).is_ok() {
            result.change = Some(self.change_detector.analyze_frame(&result.instances));
        }
        result
    }

    /// Segments, classifies and measures `frame` without touching the baseline.
    pub fn analyze_plants(&mut self, frame: &RgbImage) -> PlantAnalysisResult {
        let started = Instant::now();
        self.frame_counter += 1;

        let mut result = PlantAnalysisResult::empty(self.scale_px_per_cm);
        result.frame_number = self.frame_counter;
        if let Err(e) = check_frame(frame) {
            warn!(frame = self.frame_counter, error = %e, "nothing to analyze");
            return result;
        }

        // Stage 1: Segmentation
        let contours = self.segmenter.segment(frame);

        // Stage 2: Classification and per-instance measurement
        for (id, contour) in contours.iter().enumerate() {
            let plant_type = self.classifier.classify(frame, contour);
            result.instances.push(self.processor.process(frame, id, contour, plant_type));
        }

        // Stage 3: Aggregation
        result.total_instance_count = result.instances.len();
        for instance in &result.instances {
            match instance.plant_type {
                PlantType::Sprout => result.sprout_count += 1,
                PlantType::Plant => result.plant_count += 1,
            }
            result.total_area_pixels += instance.area_pixels;
            result.total_area_cm2 += instance.area_cm2;
        }
        if !result.instances.is_empty() {
            let health: f64 = result.instances.iter().map(|i| i.health_score).sum();
            result.average_health = health / result.instances.len() as f64;
        }

        // Stage 4: Annotation
        result.annotated_frame = self.annotate(frame, &result.instances);

        let elapsed = started.elapsed();
        result.processing_time_ms = elapsed.as_secs_f64() * 1000.0;
        if elapsed.as_millis() > self.max_processing_time_ms as u128 {
            warn!(
                frame = self.frame_counter,
                elapsed_ms = result.processing_time_ms,
                budget_ms = self.max_processing_time_ms,
                "frame processing exceeded its time budget"
            );
        }
        debug!(
            frame = self.frame_counter,
            instances = result.total_instance_count,
            sprouts = result.sprout_count,
            plants = result.plant_count,
            "frame analyzed"
        );
        result
    }

    /// Returns the result's frame buffer to the pool.
    pub fn recycle(&mut self, result: PlantAnalysisResult) {
        let buffer = result.annotated_frame;
        if buffer.width() > 0 && buffer.height() > 0 && self.frame_pool.len() < FRAME_POOL_SIZE {
            self.frame_pool.push_back(buffer);
        }
    }

    pub fn pooled_frames(&self) -> usize {
        self.frame_pool.len()
    }

    pub fn change_detector(&self) -> &ChangeDetector {
        &self.change_detector
    }

    pub fn change_detector_mut(&mut self) -> &mut ChangeDetector {
        &mut self.change_detector
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_counter
    }

    fn frame_buffer(&mut self, frame: &RgbImage) -> RgbImage {
        let reusable = self
            .frame_pool
            .iter()
            .position(|buffer| buffer.dimensions() == frame.dimensions());
        match reusable.and_then(|index| self.frame_pool.remove(index)) {
            Some(mut buffer) => {
                buffer.copy_from_slice(frame.as_raw());
                buffer
            }
            None => frame.clone(),
        }
    }

    fn annotate(&mut self, frame: &RgbImage, instances: &[PlantInstance]) -> RgbImage {
        let mut canvas = self.frame_buffer(frame);
        for instance in instances {
            let color = match instance.plant_type {
                PlantType::Sprout => SPROUT_COLOR,
                PlantType::Plant => PLANT_COLOR,
            };
            let points = &instance.contour;
            for (i, p) in points.iter().enumerate() {
                let q = points[(i + 1) % points.len()];
                draw_line_segment_mut(&mut canvas, (p.x as f32, p.y as f32), (q.x as f32, q.y as f32), color);
            }
            if let Some(rect) = instance.bbox.to_rect() {
                draw_hollow_rect_mut(&mut canvas, rect, color);
            }
        }
        canvas
    }
}

fn check_frame(frame: &RgbImage) -> Result<(), VisionError> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(VisionError::InvalidFrame);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn green_disc_frame(radius: f64) -> RgbImage {
        RgbImage::from_fn(160, 120, |x, y| {
            if (x as f64 - 80.0).hypot(y as f64 - 60.0) <= radius { Rgb([40, 180, 40]) } else { Rgb([0, 0, 0]) }
        })
    }

    #[test]
    fn empty_frame_gives_empty_result() {
        let mut pipeline = PlantPipeline::new(&VisionConfig::default());
        let result = pipeline.analyze(&RgbImage::new(0, 0));
        assert_eq!(result.total_instance_count, 0);
        assert_eq!(result.average_health, 0.0);
        assert_eq!(pipeline.frame_count(), 1);
        assert!(result.change.is_none());
        assert!(!pipeline.change_detector().has_baseline());
    }

    #[test]
    fn empty_frame_does_not_become_the_baseline() {
        let mut pipeline = PlantPipeline::new(&VisionConfig::default());
        let frame = green_disc_frame(25.0);
        pipeline.analyze(&RgbImage::new(0, 0));

        let first = pipeline.analyze(&frame);
        assert!(!first.significant_change());
        assert_eq!(pipeline.change_detector().baseline().map(|b| b.instance_count), Some(1));

        let second = pipeline.analyze(&frame);
        assert!(!second.significant_change());
        assert_eq!(second.change.as_ref().map(|c| c.changes.plant_count_change), Some(0));
    }

    #[test]
    fn counts_and_annotates_a_single_plant() {
        let mut pipeline = PlantPipeline::new(&VisionConfig::default());
        let result = pipeline.analyze(&green_disc_frame(25.0));
        assert_eq!(result.total_instance_count, 1);
        assert_eq!(result.sprout_count + result.plant_count, 1);
        assert!(result.total_area_pixels > 0.0);
        assert_eq!(result.annotated_frame.dimensions(), (160, 120));
        let instance = &result.instances[0];
        let corner = result.annotated_frame.get_pixel(instance.bbox.x as u32, instance.bbox.y as u32);
        assert!(*corner == SPROUT_COLOR || *corner == PLANT_COLOR);
        assert!(!result.significant_change());
        assert!(pipeline.change_detector().has_baseline());
    }

    #[test]
    fn recycled_buffers_are_reused() {
        let mut pipeline = PlantPipeline::new(&VisionConfig::default());
        let frame = green_disc_frame(25.0);
        let first = pipeline.analyze(&frame);
        pipeline.recycle(first);
        assert_eq!(pipeline.pooled_frames(), 1);

        let second = pipeline.analyze(&frame);
        assert_eq!(pipeline.pooled_frames(), 0);
        assert_eq!(second.annotated_frame.dimensions(), frame.dimensions());
        pipeline.recycle(second);
        assert_eq!(pipeline.pooled_frames(), 1);
    }

    #[test]
    fn pool_never_exceeds_its_capacity() {
        let mut pipeline = PlantPipeline::new(&VisionConfig::default());
        for _ in 0..(FRAME_POOL_SIZE + 3) {
            let mut result = PlantAnalysisResult::empty(0.0);
            result.annotated_frame = RgbImage::new(8, 8);
            pipeline.recycle(result);
        }
        assert_eq!(pipeline.pooled_frames(), FRAME_POOL_SIZE);
    }
}
