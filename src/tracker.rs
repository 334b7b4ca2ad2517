use std::path::{Path, PathBuf};

use moodreel_vision::StackedHistogram;
use thiserror::Error;

use crate::config::Config;
use crate::emotion::{AggregateError, DetectionResponse, Emotion, EmotionSeries};
use crate::storage;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error("saving emotion series: {0:#}")]
    Persist(anyhow::Error),
    #[error("rendering emotion chart: {0:#}")]
    Render(anyhow::Error),
}

/// Emotion series of one batch, kept on disk and charted after every frame.
pub struct EmotionTracker {
    series: EmotionSeries,
    data_path: PathBuf,
    chart_path: PathBuf,
    bins: usize,
    width: u32,
    height: u32,
}

impl EmotionTracker {
    pub fn new(config: &Config) -> Self {
        Self {
            series: EmotionSeries::new(),
            data_path: config.data_path.clone(),
            chart_path: config.chart_path.clone(),
            bins: config.chart_bins,
            width: config.chart_width,
            height: config.chart_height,
        }
    }

    pub fn with_series(mut self, series: EmotionSeries) -> Self {
        self.series = series;
        self
    }

    pub fn series(&self) -> &EmotionSeries {
        &self.series
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn chart_path(&self) -> &Path {
        &self.chart_path
    }

    pub fn reset(&mut self) {
        self.series.clear();
    }

    /// Append the means of `response`, then rewrite `data.txt` and the chart.
    pub fn record(&mut self, response: &DetectionResponse) -> Result<&EmotionSeries, TrackerError> {
        self.series.record(response)?;
        log::debug!("emotion series now holds {} frame(s)", self.series.len());
        storage::save_series(&self.data_path, &self.series).map_err(TrackerError::Persist)?;
        self.render()?;
        Ok(&self.series)
    }

    pub fn histogram(&self) -> StackedHistogram {
        StackedHistogram::compute(self.series.as_slices(), self.bins)
    }

    pub fn render(&self) -> Result<(), TrackerError> {
        self.histogram()
            .save(&self.chart_path, &Emotion::palette(), self.width, self.height)
            .map_err(TrackerError::Render)
    }
}
