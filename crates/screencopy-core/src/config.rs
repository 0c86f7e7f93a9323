use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Host settings key: name of the output to capture.
pub const KEY_OUTPUT: &str = "output";
/// Host settings key: GBM render node override.
pub const KEY_GBM_DEVICE: &str = "gbm_device";
/// Host settings key: Wayland display override.
pub const KEY_WL_DISPLAY: &str = "wl_display";

/// Render node used when no `gbm_device` override is set.
pub const DEFAULT_GBM_DEVICE: &str = "/dev/dri/renderD128";

/// Source settings as stored by the host.
///
/// Empty strings are treated as unset, matching how hosts persist blank
/// text fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Output to capture (`wl_output` name, e.g. `DP-1`).
    pub output: String,
    #[serde(alias = "gbmDevice")]
    pub gbm_device: Option<String>,
    #[serde(alias = "wlDisplay")]
    pub wl_display: Option<String>,
}

impl SourceSettings {
    /// Build settings from a host `settings.get(key)` lookup.
    pub fn from_lookup<F>(mut get: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        Self {
            output: get(KEY_OUTPUT).unwrap_or_default(),
            gbm_device: get(KEY_GBM_DEVICE),
            wl_display: get(KEY_WL_DISPLAY),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// `SCREENCOPY_OUTPUT`, `SCREENCOPY_GBM_DEVICE`, `SCREENCOPY_WL_DISPLAY`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(format!("SCREENCOPY_{}", key.to_ascii_uppercase())).ok())
    }

    /// Target output name, `None` when blank.
    pub fn output_name(&self) -> Option<&str> {
        non_empty(Some(self.output.as_str()))
    }

    pub fn gbm_device_path(&self) -> &Path {
        Path::new(non_empty(self.gbm_device.as_deref()).unwrap_or(DEFAULT_GBM_DEVICE))
    }

    /// Display socket name or path, `None` for the environment default.
    pub fn wl_display(&self) -> Option<&str> {
        non_empty(self.wl_display.as_deref())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    let parsed = raw.trim().parse().ok();
    if parsed.is_none() {
        warn!("Ignoring {}={:?}: not a number", key, raw);
    }
    parsed
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

// MARK: - CaptureConfig

/// Probe configuration: source settings plus cadence and run length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    #[serde(flatten)]
    pub settings: SourceSettings,
    pub fps: u32,
    /// Stop after this many seconds; run until interrupted when `None`.
    #[serde(alias = "durationSecs")]
    pub duration_secs: Option<u64>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            settings: SourceSettings::default(),
            fps: 60,
            duration_secs: None,
        }
    }
}

impl CaptureConfig {
    /// Load from `SCREENCOPY_CONFIG` (JSON file) when set, then apply
    /// `SCREENCOPY_*` environment overrides.
    pub fn load() -> std::io::Result<Self> {
        let mut cfg = match std::env::var_os("SCREENCOPY_CONFIG") {
            Some(path) => {
                let path = PathBuf::from(path);
                debug!("Loading capture config from {}", path.display());
                Self::from_file(path)?
            }
            None => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(std::io::Error::from)
    }

    fn apply_env(&mut self) {
        let env = SourceSettings::from_env();
        if env.output_name().is_some() {
            self.settings.output = env.output;
        }
        if env.gbm_device.is_some() {
            self.settings.gbm_device = env.gbm_device;
        }
        if env.wl_display.is_some() {
            self.settings.wl_display = env.wl_display;
        }
        if let Some(fps) = parse_env("SCREENCOPY_FPS") {
            self.fps = fps;
        }
        if let Some(secs) = parse_env("SCREENCOPY_DURATION_SECS") {
            self.duration_secs = Some(secs);
        }
    }

    /// Interval between captures derived from `fps` (clamped to at least 1).
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.fps.max(1) as u64)
    }
}
