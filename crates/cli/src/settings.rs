use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use stereocam_core::detection::domain::detection_session_config::DetectionSessionConfig;
use stereocam_core::shared::constants::{
    DEFAULT_DETECTION_INTERVAL, DEFAULT_IDEAL_HEIGHT, DEFAULT_IDEAL_WIDTH,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Simulated,
    Onnx,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Simulated => write!(f, "simulated"),
            EngineKind::Onnx => write!(f, "onnx"),
        }
    }
}

/// Persisted defaults for the command line. Flags override every field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub preferred_device: Option<String>,
    pub width: u32,
    pub height: u32,
    pub detection_enabled: bool,
    /// Target detection dispatches per second.
    pub detection_rate: f64,
    pub engine: EngineKind,
    pub detection: DetectionSessionConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            preferred_device: None,
            width: DEFAULT_IDEAL_WIDTH,
            height: DEFAULT_IDEAL_HEIGHT,
            detection_enabled: false,
            detection_rate: 1.0 / DEFAULT_DETECTION_INTERVAL.as_secs_f64(),
            engine: EngineKind::Simulated,
            detection: DetectionSessionConfig::default(),
        }
    }
}

impl Settings {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("StereoCam").join("settings.json"))
    }

    /// Loads saved settings, falling back to defaults on any error.
    pub fn load() -> Self {
        Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default()
    }

    pub fn save(&self) {
        let Some(path) = Self::config_path() else {
            log::warn!("No config directory; settings not saved");
            return;
        };
        match self.save_to(&path) {
            Ok(()) => log::info!("Settings saved to {}", path.display()),
            Err(e) => log::warn!("Failed to save settings to {}: {e}", path.display()),
        }
    }

    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereocam_core::detection::domain::detection_session_config::ModelVariant;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("settings.json"));
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.detection_rate, 10.0);
    }

    #[test]
    fn test_saved_settings_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            preferred_device: Some("synthetic-front".to_string()),
            detection_enabled: true,
            engine: EngineKind::Onnx,
            detection: DetectionSessionConfig {
                max_faces: 4,
                min_confidence: 0.7,
                model_variant: ModelVariant::FullRange,
            },
            ..Default::default()
        };

        settings.save_to(&path).unwrap();

        assert_eq!(Settings::load_from(&path), settings);
    }

    #[test]
    fn test_malformed_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());
    }

    #[test]
    fn test_partial_file_fills_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"detection_enabled": true, "detection": {"max_faces": 3}}"#).unwrap();

        let settings = Settings::load_from(&path);

        assert!(settings.detection_enabled);
        assert_eq!(settings.detection.max_faces, 3);
        assert_eq!(settings.detection.min_confidence, 0.5);
        assert_eq!(settings.width, 1920);
    }
}
