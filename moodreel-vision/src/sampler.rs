use std::path::{Path, PathBuf};

use image::ImageFormat;
use thiserror::Error;

use crate::video::{open_video, VideoError, VideoSource};

#[derive(Debug, Error)]
pub enum SampleError {
    #[error(transparent)]
    Video(#[from] VideoError),
    #[error("creating output directory {}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("writing frame {index} to {}", path.display())]
    Write {
        index: u64,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// One frame written to disk by the sampler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledFrame {
    pub source_path: PathBuf,
    pub frame_index: u64,
    pub output_path: PathBuf,
}

/// Frame index increment for a stream: `max(1, round(fps) * interval_secs)`.
pub fn stride(frame_rate: f64, interval_secs: u32) -> u64 {
    let fps = frame_rate.round();
    if !fps.is_finite() || fps <= 0.0 {
        return 1;
    }
    (fps as u64).saturating_mul(interval_secs as u64).max(1)
}

/// Indices the sampler visits: `0, stride, 2 * stride, ...` up to and including `frame_count`.
pub fn frame_indices(frame_count: u64, stride: u64) -> impl Iterator<Item = u64> {
    (0..=frame_count).step_by(stride.max(1) as usize)
}

/// `<source_dir>/images/<source_basename>_frame<index>.jpg`
pub fn frame_output_path(source_path: &Path, index: u64) -> PathBuf {
    let absolute = std::fs::canonicalize(source_path).unwrap_or_else(|_| source_path.to_path_buf());
    let dir = absolute.parent().map(Path::to_path_buf).unwrap_or_default();
    let basename = absolute
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join("images")
        .join(format!("{basename}_frame{index}.jpg"))
}

/// Extracts one frame every `interval_secs` seconds of video and writes it as JPEG.
#[derive(Debug, Clone)]
pub struct FrameSampler {
    interval_secs: u32,
}

impl FrameSampler {
    pub fn new(interval_secs: u32) -> Self {
        Self { interval_secs }
    }

    /// Open `source_path` and sample it. The stream is released before returning,
    /// whether sampling succeeded or not.
    pub fn sample(&self, source_path: &Path) -> Result<Vec<SampledFrame>, SampleError> {
        let mut video = open_video(source_path)?;
        self.sample_from(video.as_mut(), source_path)
    }

    pub fn sample_from(
        &self,
        video: &mut dyn VideoSource,
        source_path: &Path,
    ) -> Result<Vec<SampledFrame>, SampleError> {
        let frame_rate = video.frame_rate();
        let frame_count = video.frame_count();
        let step = stride(frame_rate, self.interval_secs);
        log::info!(
            "sampling {}: fps={:.3} frames={} stride={}",
            source_path.display(),
            frame_rate,
            frame_count,
            step
        );

        let mut frames = Vec::new();
        for index in frame_indices(frame_count, step) {
            let decoded = video.seek(index).and_then(|_| video.read());
            let image = match decoded {
                Ok(image) => image,
                Err(e @ VideoError::Decode { .. }) => {
                    log::warn!("skipping frame {}: {}", index, e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let output_path = frame_output_path(source_path, index);
            if let Some(dir) = output_path.parent() {
                std::fs::create_dir_all(dir).map_err(|source| SampleError::OutputDir {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
            image
                .save_with_format(&output_path, ImageFormat::Jpeg)
                .map_err(|source| SampleError::Write {
                    index,
                    path: output_path.clone(),
                    source,
                })?;
            log::debug!("wrote {}", output_path.display());

            frames.push(SampledFrame {
                source_path: source_path.to_path_buf(),
                frame_index: index,
                output_path,
            });
        }

        Ok(frames)
    }
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(3)
    }
}
