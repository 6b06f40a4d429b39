// THEORY:
// Color is the engine's only window into plant vigour. Three families of signal
// are computed over the pixels of one instance:
//
// - Vegetation indices on [0,1] channels. The NDVI proxy uses green as the
//   near-infrared stand-in, since the cameras are plain RGB sensors; ExG is the
//   classic excess-green index.
// - Disease markers: brown spots and yellowed areas, found as connected blobs
//   inside fixed HSV bands, each with a minimum area and a recorded centroid.
// - A health score built from the green bias of the mean color, dampened for
//   sprouts, minus a fixed penalty per disease marker.
//
// All constants are fixed empirical values; nothing here adapts over time.

use image::{GrayImage, RgbImage};
use serde::Serialize;

use crate::core_modules::classifier::PlantType;
use crate::core_modules::geometry::{Moments, polygon_area};
use crate::core_modules::mask::{external_contours, intersect};
use crate::core_modules::pixel::pixel::{HsvRange, normalized};

pub const BROWN_SPOT_BAND: HsvRange = HsvRange::new((5, 50, 20), (15, 255, 200));
pub const YELLOW_AREA_BAND: HsvRange = HsvRange::new((15, 50, 50), (35, 255, 255));
pub const BROWN_SPOT_MIN_AREA: f64 = 10.0;
pub const YELLOW_AREA_MIN_AREA: f64 = 50.0;
pub const BROWN_SPOT_PENALTY: f64 = 5.0;
pub const YELLOW_AREA_PENALTY: f64 = 3.0;
const INDEX_EPSILON: f64 = 1e-10;

/// Per-channel mean and standard deviation, RGB order.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ColorStats {
    pub mean: [f64; 3],
    pub std_dev: [f64; 3],
}

impl ColorStats {
    /// Green minus the average of red and blue.
    pub fn green_bias(&self) -> f64 {
        self.mean[1] - (self.mean[0] + self.mean[2]) / 2.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiseaseMarkers {
    pub brown_spots: Vec<(f64, f64)>,
    pub yellow_areas: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, Default)]
pub struct ColorHealthAnalyzer;

impl ColorHealthAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Mean and deviation over the masked pixels; over the whole crop if the
    /// mask selects nothing.
    pub fn color_stats(&self, crop: &RgbImage, mask: &GrayImage) -> ColorStats {
        let selected: Vec<[f64; 3]> = masked_pixels(crop, mask)
            .map(|[r, g, b]| [r as f64, g as f64, b as f64])
            .collect();
        let samples = if selected.is_empty() {
            crop.pixels().map(|p| [p.0[0] as f64, p.0[1] as f64, p.0[2] as f64]).collect()
        } else {
            selected
        };
        if samples.is_empty() {
            return ColorStats::default();
        }

        let n = samples.len() as f64;
        let mut mean = [0.0; 3];
        for s in &samples {
            for c in 0..3 {
                mean[c] += s[c] / n;
            }
        }
        let mut variance = [0.0; 3];
        for s in &samples {
            for c in 0..3 {
                variance[c] += (s[c] - mean[c]).powi(2) / n;
            }
        }
        ColorStats { mean, std_dev: variance.map(f64::sqrt) }
    }

    /// Mean of (G - R) / (G + R), green standing in for near-infrared.
    pub fn ndvi(&self, crop: &RgbImage, mask: &GrayImage) -> f64 {
        mean_of(crop, mask, |[r, g, _]| (g - r) / (g + r + INDEX_EPSILON))
    }

    /// Mean excess-green index, 2G - R - B.
    pub fn exg(&self, crop: &RgbImage, mask: &GrayImage) -> f64 {
        mean_of(crop, mask, |[r, g, b]| 2.0 * g - r - b)
    }

    pub fn disease_markers(&self, crop: &RgbImage, mask: &GrayImage) -> DiseaseMarkers {
        DiseaseMarkers {
            brown_spots: marker_centroids(crop, mask, &BROWN_SPOT_BAND, BROWN_SPOT_MIN_AREA),
            yellow_areas: marker_centroids(crop, mask, &YELLOW_AREA_BAND, YELLOW_AREA_MIN_AREA),
        }
    }

    /// Health in [0, 100] from the mean color and the disease markers.
    pub fn health_score(&self, stats: &ColorStats, plant_type: PlantType, markers: &DiseaseMarkers) -> f64 {
        let mut score = 60.0 + stats.green_bias() / 2.0;
        if plant_type == PlantType::Sprout {
            score = score * 0.9 + 10.0;
        }
        score = score.clamp(0.0, 100.0);
        score -= BROWN_SPOT_PENALTY * markers.brown_spots.len() as f64;
        score -= YELLOW_AREA_PENALTY * markers.yellow_areas.len() as f64;
        score.max(0.0)
    }
}

fn masked_pixels<'a>(crop: &'a RgbImage, mask: &'a GrayImage) -> impl Iterator<Item = [u8; 3]> + 'a {
    crop.pixels()
        .zip(mask.pixels())
        .filter(|(_, m)| m.0[0] > 0)
        .map(|(p, _)| p.0)
}

fn mean_of<F>(crop: &RgbImage, mask: &GrayImage, index: F) -> f64
where
    F: Fn([f64; 3]) -> f64,
{
    let (sum, count) = crop
        .pixels()
        .zip(mask.pixels())
        .filter(|(_, m)| m.0[0] > 0)
        .fold((0.0, 0usize), |(sum, count), (p, _)| (sum + index(normalized(*p)), count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn marker_centroids(crop: &RgbImage, mask: &GrayImage, band: &HsvRange, min_area: f64) -> Vec<(f64, f64)> {
    let markers = intersect(&band.mask(crop), mask);
    external_contours(&markers)
        .iter()
        .filter(|c| polygon_area(c) > min_area)
        .filter_map(|c| Moments::of_polygon(c).centroid())
        .collect()
}
