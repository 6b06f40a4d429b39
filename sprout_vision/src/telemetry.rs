// THEORY:
// Telemetry turns a `PlantAnalysisResult` into the JSON documents published to the
// broker: one summary per frame on the camera's topic, plus one document per plant
// on `{topic}/plants/{id}/telemetry`. The transport never looks inside these bytes;
// this module owns their shape.

use std::io::{Read, Write};

use serde::Serialize;

use crate::core_modules::instance::PlantInstance;
use crate::error::TransportError;
use crate::pipeline::PlantAnalysisResult;
use crate::transport::MqttClient;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlantTelemetry {
    pub id: usize,
    #[serde(rename = "type")]
    pub plant_type: &'static str,
    pub stage: &'static str,
    /// [x, y, width, height]
    pub bbox: [i64; 4],
    pub area_pixels: f64,
    pub area_cm2: f64,
    pub health_score: f64,
    pub mean_rgb: [f64; 3],
    pub leaf_count: usize,
    pub leaf_length_px: f64,
    pub leaf_width_px: f64,
    pub branch_count: usize,
    pub tip_count: usize,
    pub ndvi: f64,
    pub exg: f64,
    pub brown_spots: usize,
    pub yellow_areas: usize,
}

impl From<&PlantInstance> for PlantTelemetry {
    fn from(instance: &PlantInstance) -> Self {
        let b = instance.bbox;
        PlantTelemetry {
            id: instance.id,
            plant_type: instance.plant_type.as_str(),
            stage: instance.stage.as_str(),
            bbox: [b.x as i64, b.y as i64, b.width as i64, b.height as i64],
            area_pixels: instance.area_pixels,
            area_cm2: instance.area_cm2,
            health_score: instance.health_score,
            mean_rgb: instance.color.mean,
            leaf_count: instance.leaf_count,
            leaf_length_px: instance.leaf_length_px,
            leaf_width_px: instance.leaf_width_px,
            branch_count: instance.branch_count,
            tip_count: instance.tip_count,
            ndvi: instance.ndvi,
            exg: instance.exg,
            brown_spots: instance.brown_spots.len(),
            yellow_areas: instance.yellow_areas.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryPayload {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub num_plants: usize,
    pub sprout_count: usize,
    pub plant_count: usize,
    pub total_area_pixels: f64,
    pub total_area_cm2: f64,
    pub average_health: f64,
    pub processing_time_ms: f64,
    pub scale_px_per_cm: f64,
    pub significant_change: bool,
    pub plants: Vec<PlantTelemetry>,
}

impl TelemetryPayload {
    pub fn from_result(result: &PlantAnalysisResult) -> Self {
        TelemetryPayload {
            timestamp: result.timestamp.timestamp_millis(),
            num_plants: result.total_instance_count,
            sprout_count: result.sprout_count,
            plant_count: result.plant_count,
            total_area_pixels: result.total_area_pixels,
            total_area_cm2: result.total_area_cm2,
            average_health: result.average_health,
            processing_time_ms: result.processing_time_ms,
            scale_px_per_cm: result.scale_px_per_cm,
            significant_change: result.change.as_ref().is_some_and(|c| c.significant_change),
            plants: result.instances.iter().map(PlantTelemetry::from).collect(),
        }
    }
}

pub fn plant_topic(base_topic: &str, id: usize) -> String {
    format!("{base_topic}/plants/{id}/telemetry")
}

/// Publishes the summary and every per-plant document. Stops at the first
/// failed write; nothing is retried.
pub fn publish_result<S: Read + Write>(
    client: &mut MqttClient<S>,
    topic: &str,
    result: &PlantAnalysisResult,
) -> Result<usize, TransportError> {
    let payload = TelemetryPayload::from_result(result);
    let summary = serde_json::to_vec(&payload).map_err(|e| TransportError::Io(e.into()))?;
    client.publish(topic, &summary, 0, false)?;
    let mut sent = 1;
    for plant in &payload.plants {
        let body = serde_json::to_vec(plant).map_err(|e| TransportError::Io(e.into()))?;
        client.publish(&plant_topic(topic, plant.id), &body, 0, false)?;
        sent += 1;
    }
    Ok(sent)
}
