use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Some(path) = option_env!("MOODREEL_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    ProjectDirs::from("", "", "moodreel")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("moodreel.toml"))
});

/// Overrides `subscription_key` at load time.
pub const SUBSCRIPTION_KEY_ENV: &str = "MOODREEL_SUBSCRIPTION_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Face API base, e.g. `https://westus.api.cognitive.microsoft.com/face/v1.0`
    pub endpoint: String,
    pub subscription_key: String,
    /// Pause between two detection calls of a batch.
    pub request_delay_secs: f64,
    /// Seconds of video between two sampled frames.
    pub sample_interval_secs: u32,
    /// Where the emotion series is persisted after each frame.
    pub data_path: PathBuf,
    pub chart_path: PathBuf,
    pub chart_bins: usize,
    pub chart_width: u32,
    pub chart_height: u32,
}

impl Config {
    pub fn request_delay(&self) -> Duration {
        Duration::from_secs_f64(self.request_delay_secs.max(0.0))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "https://westus.api.cognitive.microsoft.com/face/v1.0".to_string(),
            subscription_key: String::new(),
            request_delay_secs: 3.1,
            sample_interval_secs: 3,
            data_path: PathBuf::from("data.txt"),
            chart_path: PathBuf::from("emotions.png"),
            chart_bins: 10,
            chart_width: 640,
            chart_height: 400,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(CONFIG_PATH.as_path());
    let mut cfg = if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?
    } else {
        Config::default()
    };
    if let Ok(key) = std::env::var(SUBSCRIPTION_KEY_ENV) {
        cfg.subscription_key = key;
    }
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(CONFIG_PATH.as_path());
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg.sample_interval_secs, 3);
        assert_eq!(cfg.request_delay(), Duration::from_millis(3100));
        assert_eq!(cfg.data_path, PathBuf::from("data.txt"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "request_delay_secs = 0.5\nchart_bins = 20\n").unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.request_delay_secs, 0.5);
        assert_eq!(cfg.chart_bins, 20);
        assert_eq!(cfg.sample_interval_secs, 3);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            endpoint: "http://localhost:8080/face/v1.0".to_string(),
            chart_bins: 5,
            ..Config::default()
        };
        save_config(&cfg, Some(&path)).unwrap();
        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded.endpoint, cfg.endpoint);
        assert_eq!(loaded.chart_bins, 5);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "chart_bins = \"many\"").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
