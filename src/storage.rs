use crate::emotion::EmotionSeries;
use anyhow::{Context, Result};
use std::path::Path;

/// Overwrite `path` with the whole series as JSON.
pub fn save_series(path: &Path, series: &EmotionSeries) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let data = serde_json::to_vec(series)?;
    std::fs::write(path, data).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

pub fn load_series(path: &Path) -> Result<EmotionSeries> {
    if !path.exists() {
        return Ok(EmotionSeries::new());
    }

    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let series: EmotionSeries =
        serde_json::from_slice(&data).with_context(|| format!("parsing {}", path.display()))?;
    if !series.is_consistent() {
        anyhow::bail!("{} holds series of different lengths", path.display());
    }
    Ok(series)
}
