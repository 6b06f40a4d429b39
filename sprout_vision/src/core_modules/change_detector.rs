// THEORY:
// The `ChangeDetector` answers one question per frame: does the scene differ
// meaningfully from "normal"? "Normal" is a single rolling baseline aggregate.
//
// It is a two-state machine:
//   UNINITIALIZED --first analyze_frame / update_baseline--> BASELINED
//   BASELINED     --reset-->                                 UNINITIALIZED
//
// The first analyzed frame always becomes the baseline and reports no change. After
// that, each frame is compared against the stored aggregate: relative area change,
// instance count change, per-channel HSV mean change, and the change of a composite
// morphology score. Every delta is exposed along with the verdict and the thresholds
// it was judged against. The baseline itself only moves when the host calls
// `update_baseline` (or resets).
//
// The HSV mean color is averaged per instance after conversion, so hues near the
// red wrap-around are not distorted by averaging RGB first.

use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::core_modules::instance::PlantInstance;
use crate::core_modules::pixel::pixel::Hsv;
use crate::error::VisionError;

/// Limits above which a delta counts as significant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChangeThresholds {
    /// Relative change of the summed area (0.10 = 10 %).
    #[serde(rename = "area_threshold")]
    pub area: f64,
    /// Minimum absolute change in instance count.
    #[serde(rename = "count_threshold")]
    pub count: u32,
    #[serde(rename = "color_h_threshold")]
    pub hue: f64,
    #[serde(rename = "color_s_threshold")]
    pub saturation: f64,
    #[serde(rename = "color_v_threshold")]
    pub value: f64,
    #[serde(rename = "morphology_threshold")]
    pub morphology: f64,
}

impl Default for ChangeThresholds {
    fn default() -> Self {
        Self { area: 0.10, count: 1, hue: 8.0, saturation: 12.0, value: 15.0, morphology: 0.08 }
    }
}

/// The reference aggregate of a "normal" scene.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BaselineData {
    pub instance_count: usize,
    pub total_area: f64,
    /// Mean H, S, V of the instances.
    pub mean_hsv: [f64; 3],
    pub mean_solidity: f64,
    pub mean_circularity: f64,
    pub mean_eccentricity: f64,
    pub morphology_score: f64,
}

impl BaselineData {
    pub fn from_instances(instances: &[PlantInstance]) -> Self {
        if instances.is_empty() {
            return BaselineData::default();
        }
        let n = instances.len() as f64;
        let mut data = BaselineData { instance_count: instances.len(), ..Default::default() };
        for instance in instances {
            data.total_area += instance.area_pixels;
            let hsv = Hsv::from_mean(instance.color.mean);
            data.mean_hsv[0] += hsv.h as f64 / n;
            data.mean_hsv[1] += hsv.s as f64 / n;
            data.mean_hsv[2] += hsv.v as f64 / n;
            data.mean_solidity += instance.solidity / n;
            data.mean_circularity += instance.circularity / n;
            data.mean_eccentricity += instance.eccentricity / n;
        }
        data.morphology_score = morphology_score(instances);
        data
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ChangeSummary {
    pub total_area_change: f64,
    pub plant_count_change: u32,
    pub avg_color_change_h: f64,
    pub avg_color_change_s: f64,
    pub avg_color_change_v: f64,
    pub morphology_change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeDetectionMetrics {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub significant_change: bool,
    pub changes: ChangeSummary,
    pub thresholds: ChangeThresholds,
}

impl ChangeDetectionMetrics {
    /// Names of the deltas that crossed their threshold.
    pub fn reasons(&self) -> Vec<&'static str> {
        let (c, t) = (&self.changes, &self.thresholds);
        let mut reasons = Vec::new();
        if c.total_area_change > t.area {
            reasons.push("area");
        }
        if c.plant_count_change >= t.count {
            reasons.push("count");
        }
        if c.avg_color_change_h > t.hue {
            reasons.push("hue");
        }
        if c.avg_color_change_s > t.saturation {
            reasons.push("saturation");
        }
        if c.avg_color_change_v > t.value {
            reasons.push("value");
        }
        if c.morphology_change > t.morphology {
            reasons.push("morphology");
        }
        reasons
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BaselineState {
    Uninitialized,
    Baselined(BaselineData),
}

#[derive(Debug, Clone)]
pub struct ChangeDetector {
    state: BaselineState,
    thresholds: ChangeThresholds,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(ChangeThresholds::default())
    }
}

impl ChangeDetector {
    pub fn new(thresholds: ChangeThresholds) -> Self {
        Self { state: BaselineState::Uninitialized, thresholds }
    }

    pub fn analyze_frame(&mut self, instances: &[PlantInstance]) -> ChangeDetectionMetrics {
        let mut metrics = ChangeDetectionMetrics {
            timestamp: Utc::now().timestamp_millis(),
            significant_change: false,
            changes: ChangeSummary::default(),
            thresholds: self.thresholds,
        };

        let Some(baseline) = self.baseline().cloned() else {
            self.update_baseline(instances);
            return metrics;
        };

        let current = BaselineData::from_instances(instances);
        let changes = &mut metrics.changes;
        if baseline.total_area > 0.0 {
            changes.total_area_change = (current.total_area - baseline.total_area).abs() / baseline.total_area;
        }
        changes.plant_count_change = current.instance_count.abs_diff(baseline.instance_count) as u32;
        changes.avg_color_change_h = (current.mean_hsv[0] - baseline.mean_hsv[0]).abs();
        changes.avg_color_change_s = (current.mean_hsv[1] - baseline.mean_hsv[1]).abs();
        changes.avg_color_change_v = (current.mean_hsv[2] - baseline.mean_hsv[2]).abs();
        changes.morphology_change = (current.morphology_score - baseline.morphology_score).abs();

        metrics.significant_change = !metrics.reasons().is_empty();
        if metrics.significant_change {
            debug!(reasons = ?metrics.reasons(), "significant scene change");
        }
        metrics
    }

    /// Replaces the baseline with the aggregate of `instances`.
    pub fn update_baseline(&mut self, instances: &[PlantInstance]) {
        let baseline = BaselineData::from_instances(instances);
        info!(instances = baseline.instance_count, total_area = baseline.total_area, "baseline updated");
        self.state = BaselineState::Baselined(baseline);
    }

    pub fn reset(&mut self) {
        self.state = BaselineState::Uninitialized;
    }

    pub fn has_baseline(&self) -> bool {
        matches!(self.state, BaselineState::Baselined(_))
    }

    pub fn baseline(&self) -> Option<&BaselineData> {
        match &self.state {
            BaselineState::Baselined(baseline) => Some(baseline),
            BaselineState::Uninitialized => None,
        }
    }

    pub fn state(&self) -> &BaselineState {
        &self.state
    }

    pub fn thresholds(&self) -> &ChangeThresholds {
        &self.thresholds
    }

    /// Writes `metrics` as the JSON change signal at `path`.
    pub fn write_change_signal(&self, metrics: &ChangeDetectionMetrics, path: &Path) -> Result<(), VisionError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| VisionError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(metrics)?;
        std::fs::write(path, json).map_err(|e| VisionError::io(path, e))
    }
}

/// Mean of 0.3 solidity + 0.3 circularity + 0.2 (1 - eccentricity) + 0.2 compactness.
pub fn morphology_score(instances: &[PlantInstance]) -> f64 {
    if instances.is_empty() {
        return 0.0;
    }
    let total: f64 = instances
        .iter()
        .map(|i| 0.3 * i.solidity + 0.3 * i.circularity + 0.2 * (1.0 - i.eccentricity) + 0.2 * i.compactness)
        .sum();
    total / instances.len() as f64
}
