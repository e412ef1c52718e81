//! Daemon configuration.
//!
//! `vmsd` loads a JSON config file (path from `--config` or `VMS_CONFIG`),
//! then applies environment overrides, then validates. Every field has a
//! default so a bare daemon runs with no config at all.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::source::CaptureSettings;
use crate::StreamConfig;

const DEFAULT_DB_PATH: &str = "vms.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_FPS: f64 = 5.0;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_STOP_TIMEOUT_SECS: f64 = 2.0;

#[derive(Debug, Deserialize, Default)]
struct VmsdConfigFile {
    db_path: Option<String>,
    api: Option<ApiConfigFile>,
    capture: Option<CaptureConfigFile>,
    stop_timeout_secs: Option<f64>,
    streams: Option<Vec<StreamConfig>>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    fps: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct VmsdConfig {
    pub db_path: String,
    pub api_addr: String,
    pub capture: CaptureSettings,
    pub stop_timeout: Duration,
    /// Streams to start at boot.
    pub streams: Vec<StreamConfig>,
}

impl Default for VmsdConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            api_addr: DEFAULT_API_ADDR.to_string(),
            capture: CaptureSettings {
                fps: DEFAULT_FPS,
                width: DEFAULT_WIDTH,
                height: DEFAULT_HEIGHT,
            },
            stop_timeout: Duration::from_secs_f64(DEFAULT_STOP_TIMEOUT_SECS),
            streams: Vec::new(),
        }
    }
}

impl VmsdConfig {
    /// Load from `VMS_CONFIG` (when set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VMS_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => VmsdConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: VmsdConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            db_path: file.db_path.unwrap_or(defaults.db_path),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or(defaults.api_addr),
            capture: CaptureSettings {
                fps: file
                    .capture
                    .as_ref()
                    .and_then(|capture| capture.fps)
                    .unwrap_or(DEFAULT_FPS),
                width: file
                    .capture
                    .as_ref()
                    .and_then(|capture| capture.width)
                    .unwrap_or(DEFAULT_WIDTH),
                height: file
                    .capture
                    .as_ref()
                    .and_then(|capture| capture.height)
                    .unwrap_or(DEFAULT_HEIGHT),
            },
            stop_timeout: file
                .stop_timeout_secs
                .and_then(duration_secs)
                .unwrap_or(defaults.stop_timeout),
            streams: file.streams.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("VMS_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(addr) = std::env::var("VMS_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(fps) = std::env::var("VMS_FPS") {
            self.capture.fps = fps
                .parse()
                .map_err(|_| anyhow!("VMS_FPS must be a number of frames per second"))?;
        }
        if let Ok(timeout) = std::env::var("VMS_STOP_TIMEOUT_SECS") {
            let seconds: f64 = timeout
                .parse()
                .map_err(|_| anyhow!("VMS_STOP_TIMEOUT_SECS must be a number of seconds"))?;
            self.stop_timeout = duration_secs(seconds)
                .ok_or_else(|| anyhow!("VMS_STOP_TIMEOUT_SECS must be a positive number"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !self.capture.fps.is_finite() || self.capture.fps <= 0.0 {
            return Err(anyhow!("capture fps must be a positive finite number"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture dimensions must be non-zero"));
        }
        if self.stop_timeout.is_zero() {
            return Err(anyhow!("stop timeout must be greater than zero"));
        }
        for stream in &self.streams {
            if stream.stream_id.trim().is_empty() {
                return Err(anyhow!("configured stream has an empty stream_id"));
            }
        }
        Ok(())
    }
}

/// `Duration::from_secs_f64` panics on negative or non-finite input.
fn duration_secs(seconds: f64) -> Option<Duration> {
    if seconds.is_finite() && seconds > 0.0 {
        Some(Duration::from_secs_f64(seconds))
    } else {
        None
    }
}

fn read_config_file(path: &Path) -> Result<VmsdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
