use std::collections::HashMap;
use std::env;

use crate::errors::{Result, WorkerError};
use crate::types::CameraConfig;

/// Worker configuration assembled from environment variables. An optional
/// `.env` file is read first; values already present in the process
/// environment win on conflict.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_env: String,
    pub log_level: String,
    pub ffmpeg_bin: String,
    pub processing_fps: u32,
    pub backend_base_url: String,
    pub backend_alert_endpoint: String,
    pub mediamtx_url: String,
    pub api_address: String,
    pub camera_configs: HashMap<String, CameraConfig>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let fps_raw = env_or("PROCESSING_FPS", "15");
        let processing_fps: u32 = fps_raw
            .parse()
            .map_err(|_| WorkerError::config(format!("invalid PROCESSING_FPS value: {fps_raw}")))?;
        if processing_fps == 0 {
            return Err(WorkerError::config("PROCESSING_FPS must be positive"));
        }

        let camera_configs = parse_camera_configs(&env_or("CAMERA_CONFIGS", ""))?;

        Ok(Self {
            app_env: env_or("APP_ENV", "development"),
            log_level: env_or("LOG_LEVEL", "info"),
            ffmpeg_bin: env_or("FFMPEG_BIN", "ffmpeg"),
            processing_fps,
            backend_base_url: env_or("BACKEND_BASE_URL", "http://localhost:8081"),
            backend_alert_endpoint: env_or("BACKEND_ALERT_ENDPOINT", "/alerts"),
            mediamtx_url: env_or("MEDIAMTX_URL", "rtsp://localhost:8554"),
            api_address: env_or("API_ADDRESS", ":8080"),
            camera_configs,
        })
    }

    /// Listen address for the management API. A bare `:port` form binds all
    /// interfaces.
    pub fn bind_address(&self) -> String {
        if self.api_address.starts_with(':') {
            format!("0.0.0.0{}", self.api_address)
        } else {
            self.api_address.clone()
        }
    }
}

/// Parses the `CAMERA_CONFIGS` value: `id=rtspUrl` pairs separated by `;`.
fn parse_camera_configs(raw: &str) -> Result<HashMap<String, CameraConfig>> {
    let mut configs = HashMap::new();
    for entry in raw.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (id, url) = entry
            .split_once('=')
            .ok_or_else(|| WorkerError::config(format!("invalid camera config entry: {entry}")))?;
        let id = id.trim();
        let url = url.trim();
        if id.is_empty() || url.is_empty() {
            return Err(WorkerError::config(format!("invalid camera config entry: {entry}")));
        }
        configs.insert(
            id.to_string(),
            CameraConfig { id: id.to_string(), rtsp_url: url.to_string() },
        );
    }
    Ok(configs)
}

fn env_or(key: &str, fallback: &str) -> String {
    env::var(key).unwrap_or_else(|_| fallback.to_string())
}
