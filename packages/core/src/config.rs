//! Conversion settings
//!
//! Settings are stored as JSON in the user's config directory. A missing
//! file is not an error; defaults are used instead.

use crate::media::VideoCodec;
use crate::planner::{FitMode, PlanOptions, DEFAULT_OVERHEAD_FACTOR};
use crate::{SuperviewError, SuperviewResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SETTINGS_FILE: &str = "settings.json";

const ENCODER_PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
];

/// Tunables for a conversion that are not part of the per-call request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertSettings {
    /// Multiplier applied on top of the pixel-count bitrate scaling
    pub overhead_factor: f64,
    pub fit_mode: FitMode,
    /// Codec for 8-bit sources; 10-bit sources always use H.265
    pub video_codec: VideoCodec,
    /// Prefer a hardware encoder when one is available
    pub hardware_accel: bool,
    /// x264/x265 speed preset
    pub encoder_preset: String,
    /// How long a pump loop sleeps when the writer is not ready
    pub writer_poll_interval_ms: u64,
    /// Frames the writer may buffer before reporting not-ready
    pub writer_queue_depth: usize,
}

impl Default for ConvertSettings {
    fn default() -> Self {
        Self {
            overhead_factor: DEFAULT_OVERHEAD_FACTOR,
            fit_mode: FitMode::Superview,
            video_codec: VideoCodec::H264,
            hardware_accel: false,
            encoder_preset: "medium".to_string(),
            writer_poll_interval_ms: 10,
            writer_queue_depth: 4,
        }
    }
}

impl ConvertSettings {
    pub fn validate(&self) -> SuperviewResult<()> {
        if !(1.0..=2.0).contains(&self.overhead_factor) {
            return Err(SuperviewError::Configuration(format!(
                "overhead_factor must be within [1.0, 2.0], got {}",
                self.overhead_factor
            )));
        }
        if self.writer_poll_interval_ms == 0 {
            return Err(SuperviewError::Configuration(
                "writer_poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.writer_queue_depth == 0 {
            return Err(SuperviewError::Configuration(
                "writer_queue_depth must be at least 1".to_string(),
            ));
        }
        if !ENCODER_PRESETS.contains(&self.encoder_preset.as_str()) {
            return Err(SuperviewError::Configuration(format!(
                "Unknown encoder preset '{}'",
                self.encoder_preset
            )));
        }
        Ok(())
    }

    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            overhead_factor: self.overhead_factor,
            fit_mode: self.fit_mode,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.writer_poll_interval_ms)
    }
}

/// Loads and saves [`ConvertSettings`]
pub struct SettingsStore {
    path: PathBuf,
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsStore {
    /// Store backed by the default config directory
    pub fn new() -> Self {
        Self {
            path: Self::default_settings_path(),
        }
    }

    /// Store backed by an explicit file
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn default_settings_path() -> PathBuf {
        directories::ProjectDirs::from("com", "superview", "Superview")
            .map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
            .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> SuperviewResult<ConvertSettings> {
        if !tokio::fs::try_exists(&self.path).await? {
            tracing::debug!("No settings at {:?}, using defaults", self.path);
            return Ok(ConvertSettings::default());
        }

        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SuperviewError::Configuration(format!(
                "Failed to read settings file {:?}: {}",
                self.path, e
            ))
        })?;
        let settings: ConvertSettings = serde_json::from_str(&content).map_err(|e| {
            tracing::warn!("Failed to parse settings file {:?}: {}", self.path, e);
            e
        })?;
        settings.validate()?;

        tracing::debug!("Loaded settings from {:?}", self.path);
        Ok(settings)
    }

    pub async fn save(&self, settings: &ConvertSettings) -> SuperviewResult<()> {
        settings.validate()?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(settings)?;
        tokio::fs::write(&self.path, content).await?;

        tracing::info!("Saved settings to {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = ConvertSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.overhead_factor, 1.15);
        assert_eq!(settings.poll_interval(), Duration::from_millis(10));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = ConvertSettings {
            overhead_factor: 0.0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        settings.overhead_factor = 1.0;
        settings.writer_queue_depth = 0;
        assert!(settings.validate().is_err());

        settings.writer_queue_depth = 2;
        settings.encoder_preset = "ludicrous".to_string();
        assert!(matches!(
            settings.validate(),
            Err(SuperviewError::Configuration(_))
        ));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let settings: ConvertSettings =
            serde_json::from_str(r#"{ "fit_mode": "crop", "hardware_accel": true }"#).unwrap();
        assert_eq!(settings.fit_mode, FitMode::Crop);
        assert!(settings.hardware_accel);
        assert_eq!(settings.encoder_preset, "medium");
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let store = SettingsStore::with_path(temp_dir.path().join("nope.json"));
        assert_eq!(store.load().await.unwrap(), ConvertSettings::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = SettingsStore::with_path(temp_dir.path().join("nested").join("settings.json"));

        let settings = ConvertSettings {
            overhead_factor: 1.3,
            fit_mode: FitMode::Squeeze,
            video_codec: VideoCodec::H265,
            ..Default::default()
        };
        store.save(&settings).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, settings);
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        tokio::fs::write(&path, r#"{ "writer_poll_interval_ms": 0 }"#)
            .await
            .unwrap();

        let store = SettingsStore::with_path(&path);
        assert!(matches!(
            store.load().await,
            Err(SuperviewError::Configuration(_))
        ));
    }

    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_malformed_file_is_logged_and_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let capture = LogCapture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let store = SettingsStore::with_path(&path);
        assert!(matches!(
            store.load().await,
            Err(SuperviewError::Serialization(_))
        ));

        let logs = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("WARN"));
        assert!(logs.contains("Failed to parse settings file"));
    }
}
