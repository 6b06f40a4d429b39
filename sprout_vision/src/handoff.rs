// THEORY:
// The handoff is the engine's only contact with the external AI module, and it is
// file-based: a request JSON in `requests_dir`, a small `.signal` file announcing it,
// and eventually a result JSON with the same request id in `results_dir`. The
// engine never waits for the result; it polls with `load_result` and cleans up the
// pair once a result has been consumed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::HandoffConfig;
use crate::core_modules::geometry::BoundingBox;
use crate::error::VisionError;
use crate::pipeline::PlantAnalysisResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl From<BoundingBox> for Roi {
    fn from(b: BoundingBox) -> Self {
        Roi { x: b.x, y: b.y, width: b.width, height: b.height }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiRequest {
    pub request_id: String,
    pub image_path: PathBuf,
    pub model_preference: String,
    pub depth_analysis_required: bool,
    pub classification_required: bool,
    pub confidence_threshold: f64,
    pub roi: Roi,
    pub timestamp: DateTime<Utc>,
}

impl AiRequest {
    /// A request covering every instance of `result`, or the whole frame if none.
    pub fn for_result(result: &PlantAnalysisResult, image_path: PathBuf) -> Self {
        let (width, height) = result.annotated_frame.dimensions();
        let frame_box = BoundingBox { x: 0, y: 0, width, height };
        let roi = result
            .instances
            .iter()
            .map(|i| i.bbox)
            .reduce(|a, b| a.union(&b))
            .and_then(|b| b.clip_to(width, height))
            .unwrap_or(frame_box);
        AiRequest {
            request_id: request_id(result.frame_number, &result.timestamp),
            image_path,
            model_preference: "auto".to_string(),
            depth_analysis_required: true,
            classification_required: true,
            confidence_threshold: 0.5,
            roi: roi.into(),
            timestamp: result.timestamp,
        }
    }
}

pub fn request_id(frame_number: u64, at: &DateTime<Utc>) -> String {
    format!("frame_{frame_number}_{}", at.timestamp())
}

#[derive(Debug, Clone)]
pub struct HandoffStore {
    requests_dir: PathBuf,
    results_dir: PathBuf,
    signal_dir: PathBuf,
}

impl HandoffStore {
    pub fn new(config: &HandoffConfig) -> Self {
        Self {
            requests_dir: config.requests_dir.clone(),
            results_dir: config.results_dir.clone(),
            signal_dir: config.signal_dir.clone(),
        }
    }

    pub fn request_path(&self, request_id: &str) -> PathBuf {
        self.requests_dir.join(format!("{request_id}.json"))
    }

    pub fn result_path(&self, request_id: &str) -> PathBuf {
        self.results_dir.join(format!("{request_id}.json"))
    }

    pub fn signal_path(&self, request_id: &str) -> PathBuf {
        self.signal_dir.join(format!("ai_analysis_{request_id}.signal"))
    }

    /// Where the frame image of a request is expected to be stored.
    pub fn image_path(&self, request_id: &str) -> PathBuf {
        self.requests_dir.join(format!("{request_id}.png"))
    }

    /// Writes the request document and its signal file.
    pub fn submit(&self, request: &AiRequest) -> Result<PathBuf, VisionError> {
        ensure_dir(&self.requests_dir)?;
        ensure_dir(&self.signal_dir)?;

        let path = self.request_path(&request.request_id);
        let json = serde_json::to_string_pretty(request)?;
        std::fs::write(&path, json).map_err(|e| VisionError::io(&path, e))?;

        let signal = self.signal_path(&request.request_id);
        std::fs::write(&signal, &request.request_id).map_err(|e| VisionError::io(&signal, e))?;

        info!(request_id = %request.request_id, "AI analysis requested");
        Ok(path)
    }

    /// The result for `request_id`, if the AI module has produced one. A consumed
    /// result is removed together with its request.
    pub fn load_result(&self, request_id: &str) -> Result<Option<serde_json::Value>, VisionError> {
        let path = self.result_path(request_id);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(VisionError::io(&path, e)),
        };
        let value = serde_json::from_str(&text)?;

        remove_if_present(&path)?;
        remove_if_present(&self.request_path(request_id))?;
        debug!(request_id, "AI result consumed");
        Ok(Some(value))
    }
}

fn ensure_dir(dir: &Path) -> Result<(), VisionError> {
    std::fs::create_dir_all(dir).map_err(|e| VisionError::io(dir, e))
}

fn remove_if_present(path: &Path) -> Result<(), VisionError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VisionError::io(path, e)),
    }
}
