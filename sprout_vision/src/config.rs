// THEORY:
// `VisionConfig` is the single configuration value of the engine. It is built once
// by the host process (TOML file, then environment overrides) and handed by
// reference to every component constructor. Components copy the scalars they need,
// so there is no shared mutable configuration once the pipeline is running.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::VisionError;

/// Tunables of the per-frame analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Floor for the grayscale Otsu fallback threshold (0-255).
    pub threshold: u32,
    /// Pixels per centimetre. `0.0` means the scale is unknown.
    pub scale_px_per_cm: f64,
    /// Soft per-tick budget. Exceeding it only logs a warning.
    pub max_processing_time_ms: u64,
    /// Where the change signal JSON is written each tick.
    pub change_signal_path: PathBuf,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            threshold: 100,
            scale_px_per_cm: 0.0,
            max_processing_time_ms: 100,
            change_signal_path: PathBuf::from("data/change_signal.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u16,
    /// Overrides the topic built from the namespace fields.
    pub topic: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "plantvision-client".to_string(),
            keep_alive_secs: 60,
            topic: None,
        }
    }
}

/// Unified-namespace coordinates of the camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnsConfig {
    pub room: String,
    pub area: String,
    pub camera_id: String,
    pub plant_id: String,
}

impl Default for UnsConfig {
    fn default() -> Self {
        Self {
            room: "room1".to_string(),
            area: "area1".to_string(),
            camera_id: "camera1".to_string(),
            plant_id: "plant1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    pub requests_dir: PathBuf,
    pub results_dir: PathBuf,
    pub signal_dir: PathBuf,
    /// Emit a request every N frames even when nothing changed. `0` disables it.
    pub periodic_every: u64,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            requests_dir: PathBuf::from("data/ai_requests"),
            results_dir: PathBuf::from("data/ai_results"),
            signal_dir: PathBuf::from("data/signals"),
            periodic_every: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Still images cycled as the frame source.
    pub paths: Vec<PathBuf>,
    pub interval_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { paths: Vec::new(), interval_ms: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub processing: ProcessingConfig,
    pub mqtt: MqttConfig,
    pub uns: UnsConfig,
    pub handoff: HandoffConfig,
    pub input: InputConfig,
}

impl VisionConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, VisionError> {
        toml::from_str(source).map_err(|e| VisionError::Config(e.to_string()))
    }

    /// Reads a TOML file, applies the process environment on top and validates.
    pub fn load(path: &Path) -> Result<Self, VisionError> {
        let source = std::fs::read_to_string(path).map_err(|e| VisionError::io(path, e))?;
        let mut config = Self::from_toml_str(&source)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies the recognised environment variables through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), VisionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("THRESHOLD") {
            self.processing.threshold = parse_var("THRESHOLD", &value)?;
        }
        if let Some(value) = lookup("SCALE_PX_PER_CM") {
            self.processing.scale_px_per_cm = parse_var("SCALE_PX_PER_CM", &value)?;
        }
        if let Some(value) = lookup("MQTT_HOST") {
            self.mqtt.host = value;
        }
        if let Some(value) = lookup("MQTT_PORT") {
            self.mqtt.port = parse_var("MQTT_PORT", &value)?;
        }
        if let Some(value) = lookup("MQTT_TOPIC") {
            self.mqtt.topic = Some(value);
        }
        if let Some(value) = lookup("PUBLISH_INTERVAL_MS") {
            self.input.interval_ms = parse_var("PUBLISH_INTERVAL_MS", &value)?;
        }
        if let Some(value) = lookup("INPUT_PATH") {
            self.input.paths = vec![PathBuf::from(value)];
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), VisionError> {
        let scale = self.processing.scale_px_per_cm;
        if !scale.is_finite() || scale < 0.0 {
            return Err(VisionError::Config(format!("scale_px_per_cm must be >= 0, got {scale}")));
        }
        if self.processing.threshold > 255 {
            return Err(VisionError::Config(format!(
                "threshold must be in 0..=255, got {}",
                self.processing.threshold
            )));
        }
        if self.mqtt.port == 0 {
            return Err(VisionError::Config("mqtt.port must be non-zero".to_string()));
        }
        if self.mqtt.client_id.is_empty() {
            return Err(VisionError::Config("mqtt.client_id must not be empty".to_string()));
        }
        if self.input.interval_ms == 0 {
            return Err(VisionError::Config("input.interval_ms must be non-zero".to_string()));
        }
        Ok(())
    }

    /// The summary telemetry topic: the explicit override, or the namespace path.
    pub fn telemetry_topic(&self) -> String {
        match &self.mqtt.topic {
            Some(topic) => topic.clone(),
            None => format!(
                "plantvision/{}/{}/{}/{}/telemetry",
                self.uns.room, self.uns.area, self.uns.camera_id, self.uns.plant_id
            ),
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, VisionError> {
    value
        .trim()
        .parse()
        .map_err(|_| VisionError::Config(format!("{key} has an invalid value: {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = VisionConfig::default();
        config.validate().expect("default config should validate");
        assert_eq!(config.processing.threshold, 100);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.client_id, "plantvision-client");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = VisionConfig::from_toml_str(
            r#"
            [processing]
            scale_px_per_cm = 12.5

            [uns]
            room = "greenhouse"
            "#,
        )
        .expect("toml should parse");
        assert_eq!(config.processing.scale_px_per_cm, 12.5);
        assert_eq!(config.processing.threshold, 100);
        assert_eq!(config.uns.room, "greenhouse");
        assert_eq!(config.uns.area, "area1");
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = [
            ("THRESHOLD", "80"),
            ("MQTT_HOST", "broker.local"),
            ("MQTT_PORT", "8883"),
            ("INPUT_PATH", "/tmp/frame.png"),
        ]
        .into_iter()
        .collect();
        let mut config = VisionConfig::default();
        config
            .apply_env_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .expect("overrides should apply");
        assert_eq!(config.processing.threshold, 80);
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.input.paths, vec![PathBuf::from("/tmp/frame.png")]);
    }

    #[test]
    fn bad_env_value_is_a_config_error() {
        let mut config = VisionConfig::default();
        let result = config.apply_env_overrides(|key| (key == "MQTT_PORT").then(|| "abc".to_string()));
        assert!(matches!(result, Err(VisionError::Config(_))));
    }

    #[test]
    fn validation_rejects_negative_scale_and_zero_port() {
        let mut config = VisionConfig::default();
        config.processing.scale_px_per_cm = -1.0;
        assert!(config.validate().is_err());

        let mut config = VisionConfig::default();
        config.mqtt.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn topic_comes_from_namespace_unless_overridden() {
        let mut config = VisionConfig::default();
        assert_eq!(config.telemetry_topic(), "plantvision/room1/area1/camera1/plant1/telemetry");
        config.mqtt.topic = Some("custom/topic".to_string());
        assert_eq!(config.telemetry_topic(), "custom/topic");
    }
}
