//! Persistent application settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use voxlink_core::audio::format::{is_supported_rate, DEFAULT_WARMUP_BUFFERS};
use voxlink_core::PipelineConfig;

const FALLBACK_SAMPLE_RATE: u32 = 8_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_device: Option<String>,
    pub sample_rate: u32,
    pub warmup_buffers: usize,
    pub frame_channel_capacity: usize,
    pub device_poll_interval_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_device: None,
            sample_rate: FALLBACK_SAMPLE_RATE,
            warmup_buffers: DEFAULT_WARMUP_BUFFERS,
            frame_channel_capacity: 256,
            device_poll_interval_ms: 1_000,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        if !is_supported_rate(self.sample_rate) {
            warn!(
                sample_rate = self.sample_rate,
                "unsupported sample rate in settings, using {FALLBACK_SAMPLE_RATE} Hz"
            );
            self.sample_rate = FALLBACK_SAMPLE_RATE;
        }
        self.warmup_buffers = self.warmup_buffers.clamp(1, 32);
        self.frame_channel_capacity = self.frame_channel_capacity.clamp(1, 4_096);
        self.device_poll_interval_ms = self.device_poll_interval_ms.clamp(50, 60_000);
        self.preferred_device = self
            .preferred_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            warmup_buffers: self.warmup_buffers,
            frame_channel_capacity: self.frame_channel_capacity,
            device_poll_interval: Duration::from_millis(self.device_poll_interval_ms),
            ..PipelineConfig::default()
        }
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Voxlink")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("voxlink")
            .join("settings.json")
    }
}

/// Load settings, falling back to defaults for a missing or unreadable file.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<AppSettings>(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), "ignoring malformed settings file: {e}");
            AppSettings::default()
        }),
        Err(_) => AppSettings::default(),
    };
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_replaces_unsupported_rate_and_clamps_warmup() {
        let mut settings = AppSettings {
            preferred_device: Some("   ".into()),
            sample_rate: 44_100,
            warmup_buffers: 0,
            ..AppSettings::default()
        };
        settings.normalize();
        assert_eq!(settings.sample_rate, 8_000);
        assert_eq!(settings.warmup_buffers, 1);
        assert_eq!(settings.preferred_device, None);

        settings.warmup_buffers = 500;
        settings.normalize();
        assert_eq!(settings.warmup_buffers, 32);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: AppSettings =
            serde_json::from_str(r#"{"sampleRate":16000,"preferredDevice":"USB Headset"}"#)
                .expect("parse");
        assert_eq!(settings.sample_rate, 16_000);
        assert_eq!(settings.preferred_device.as_deref(), Some("USB Headset"));
        assert_eq!(settings.warmup_buffers, DEFAULT_WARMUP_BUFFERS);
    }

    #[test]
    fn save_then_load_preserves_values() {
        let path = std::env::temp_dir()
            .join(format!("voxlink-settings-{}", std::process::id()))
            .join("settings.json");
        let settings = AppSettings {
            preferred_device: Some("Headset".into()),
            sample_rate: 16_000,
            warmup_buffers: 8,
            frame_channel_capacity: 64,
            device_poll_interval_ms: 250,
        };
        save_settings(&path, &settings).expect("save");
        let loaded = load_settings(&path);
        let _ = fs::remove_dir_all(path.parent().expect("parent"));
        assert_eq!(loaded, settings);

        let config = loaded.pipeline_config();
        assert_eq!(config.warmup_buffers, 8);
        assert_eq!(config.device_poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let loaded = load_settings(Path::new("/nonexistent/voxlink/settings.json"));
        assert_eq!(loaded, AppSettings::default());
    }
}
