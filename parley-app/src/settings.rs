//! Persistent host settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use parley_core::{
    audio::{input::CaptureRequest, output::PlaybackRequest},
    AnalyserConfig, SessionConfig,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
    pub model: String,
    pub voice: String,
    pub block_size: usize,
    pub analyser_smoothing: f32,
    /// Analyser ticks per second.
    pub visualizer_fps: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            preferred_input_device: None,
            preferred_output_device: None,
            model: session.model,
            voice: session.voice,
            block_size: session.block_size,
            analyser_smoothing: session.analyser.smoothing,
            visualizer_fps: 60,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        let defaults = SessionConfig::default();
        self.preferred_input_device = normalize_device(self.preferred_input_device.take());
        self.preferred_output_device = normalize_device(self.preferred_output_device.take());
        self.model = non_empty_or(&self.model, defaults.model);
        self.voice = non_empty_or(&self.voice, defaults.voice);
        self.block_size = self.block_size.clamp(128, 4096);
        self.analyser_smoothing = if self.analyser_smoothing.is_finite() {
            self.analyser_smoothing.clamp(0.0, 0.99)
        } else {
            defaults.analyser.smoothing
        };
        self.visualizer_fps = self.visualizer_fps.clamp(1, 120);
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            block_size: self.block_size,
            capture: CaptureRequest {
                preferred_device: self.preferred_input_device.clone(),
                ..CaptureRequest::default()
            },
            playback: PlaybackRequest {
                preferred_device: self.preferred_output_device.clone(),
                ..PlaybackRequest::default()
            },
            analyser: AnalyserConfig {
                smoothing: self.analyser_smoothing,
                ..AnalyserConfig::default()
            },
            model: self.model.clone(),
            voice: self.voice.clone(),
            ..SessionConfig::default()
        }
    }
}

fn normalize_device(raw: Option<String>) -> Option<String> {
    raw.map(|d| d.trim().to_string()).filter(|d| !d.is_empty())
}

fn non_empty_or(raw: &str, fallback: String) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        fallback
    } else {
        trimmed.to_string()
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Parley")
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
            .join("parley")
            .join("settings.json")
    }
}

/// Missing or unreadable files yield defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
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
