use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveTime;
use moodreel_vision::{FrameSampler, SampleError};
use thiserror::Error;

use crate::config::Config;
use crate::emotion::{DetectionResponse, EmotionSeries};
use crate::face_api::{FaceDetector, ServiceError};
use crate::invoker::{BatchHandle, BatchOutcome, BatchSink, BatchSummary, DetectionInvoker};
use crate::tracker::EmotionTracker;

/// What the panel draws into. Calls always come from the thread driving the batch.
pub trait PanelView {
    fn log(&mut self, message: &str);
    fn set_status(&mut self, text: &str);
    fn set_enabled(&mut self, enabled: bool);
    fn chart_updated(&mut self, _series: &EmotionSeries, _chart_path: &Path) {}
}

/// A panel log line: `[HH:MM:SS]: message`.
pub fn log_line(at: NaiveTime, message: &str) -> String {
    format!("[{}]: {}", at.format("%H:%M:%S"), message)
}

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("a detection batch is already running")]
    Busy,
    #[error(transparent)]
    Sample(#[from] SampleError),
    #[error("starting detection worker")]
    Spawn(#[source] std::io::Error),
}

/// Clears the busy flag when dropped.
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Video panel controller: sample a video, detect every frame, chart the emotions.
pub struct VideoPanel<V: PanelView> {
    sampler: FrameSampler,
    invoker: DetectionInvoker<dyn FaceDetector>,
    tracker: EmotionTracker,
    busy: Arc<AtomicBool>,
    max_faces: usize,
    view: V,
}

impl<V: PanelView> VideoPanel<V> {
    pub fn new(config: &Config, detector: Arc<dyn FaceDetector>, view: V) -> Self {
        Self {
            sampler: FrameSampler::new(config.sample_interval_secs),
            invoker: DetectionInvoker::new(detector, config.request_delay()),
            tracker: EmotionTracker::new(config),
            busy: Arc::new(AtomicBool::new(false)),
            max_faces: 0,
            view,
        }
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn series(&self) -> &EmotionSeries {
        self.tracker.series()
    }

    pub fn max_faces(&self) -> usize {
        self.max_faces
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Sample `path` on this thread, then start detecting the frames in the background.
    pub fn choose_video(&mut self, path: &Path) -> Result<BatchHandle, PanelError> {
        let guard = BusyGuard::acquire(&self.busy).ok_or(PanelError::Busy)?;
        self.begin();
        self.view.log(&format!("Sampling {}", path.display()));

        let frames = match self.sampler.sample(path) {
            Ok(frames) => frames,
            Err(e) => {
                self.view.log(&format!("Sampling failed: {e}"));
                self.view.set_enabled(true);
                return Err(e.into());
            }
        };
        self.view
            .log(&format!("Sampled {} frame(s) from {}", frames.len(), path.display()));

        let paths = frames.into_iter().map(|f| f.output_path).collect();
        self.start_batch(paths, guard)
    }

    /// Detect already extracted images.
    pub fn detect_paths(&mut self, paths: Vec<PathBuf>) -> Result<BatchHandle, PanelError> {
        let guard = BusyGuard::acquire(&self.busy).ok_or(PanelError::Busy)?;
        self.begin();
        self.start_batch(paths, guard)
    }

    /// `choose_video` followed by driving the batch to completion on this thread.
    pub fn run_video(&mut self, path: &Path) -> Result<BatchSummary, PanelError> {
        let handle = self.choose_video(path)?;
        Ok(handle.drive(self))
    }

    fn begin(&mut self) {
        self.view.set_enabled(false);
        self.tracker.reset();
        self.max_faces = 0;
        self.view.set_status("Detecting ...");
    }

    fn start_batch(
        &mut self,
        paths: Vec<PathBuf>,
        guard: BusyGuard,
    ) -> Result<BatchHandle, PanelError> {
        match self.invoker.spawn_guarded(paths, guard) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.view.set_enabled(true);
                Err(PanelError::Spawn(e))
            }
        }
    }
}

impl<V: PanelView> BatchSink for VideoPanel<V> {
    fn on_log(&mut self, message: &str) {
        self.view.log(message);
    }

    fn on_result(&mut self, path: &Path, response: DetectionResponse) {
        self.max_faces = self.max_faces.max(response.len());
        self.view
            .set_status(&format!("{} face(s) has been detected.", self.max_faces));

        if let Err(e) = self.tracker.record(&response) {
            self.view.log(&format!("{}: {}", path.display(), e));
            return;
        }
        self.view
            .chart_updated(self.tracker.series(), self.tracker.chart_path());
    }

    fn on_error(&mut self, _path: &Path, error: &ServiceError) {
        self.view
            .log(&format!("Response: {}. {}", error.code, error.message));
    }

    fn on_finished(&mut self, summary: &BatchSummary) {
        match &summary.outcome {
            BatchOutcome::Completed => self.view.log(&format!(
                "Detected {} of {} frame(s)",
                summary.succeeded, summary.attempted
            )),
            BatchOutcome::Aborted(_) => self.view.log(&format!(
                "Stopped after {} frame(s)",
                summary.attempted
            )),
            BatchOutcome::Cancelled => self.view.log("Detection cancelled"),
        }
        self.view.set_enabled(true);
    }
}
