//! Runs a batch of detection calls on a dedicated worker thread.
//!
//! Calls are made strictly in path order, one at a time, with a fixed pause
//! between consecutive calls. The first service error ends the batch. Progress
//! is reported as [`BatchEvent`]s over a channel; [`BatchHandle::drive`]
//! replays them into a [`BatchSink`] on the calling thread.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use uuid::Uuid;

use crate::emotion::DetectionResponse;
use crate::face_api::{DetectOptions, FaceDetector, ServiceError};

#[derive(Debug, Clone)]
pub enum BatchEvent {
    Started { batch_id: Uuid, total: usize },
    Requesting { index: usize, path: PathBuf },
    Detected {
        index: usize,
        path: PathBuf,
        response: DetectionResponse,
    },
    Failed {
        index: usize,
        path: PathBuf,
        error: ServiceError,
    },
    Finished(BatchSummary),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Completed,
    Aborted(ServiceError),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub attempted: usize,
    pub succeeded: usize,
    pub outcome: BatchOutcome,
}

/// Receives the progress of a batch on the thread that drives it.
pub trait BatchSink {
    fn on_log(&mut self, message: &str);
    fn on_result(&mut self, path: &Path, response: DetectionResponse);
    fn on_error(&mut self, path: &Path, error: &ServiceError);
    fn on_finished(&mut self, _summary: &BatchSummary) {}
}

pub struct DetectionInvoker<D: ?Sized> {
    detector: Arc<D>,
    options: DetectOptions,
    delay: Duration,
}

impl<D: FaceDetector + ?Sized + 'static> DetectionInvoker<D> {
    pub fn new(detector: Arc<D>, delay: Duration) -> Self {
        Self {
            detector,
            options: DetectOptions::emotion_only(),
            delay,
        }
    }

    pub fn with_options(mut self, options: DetectOptions) -> Self {
        self.options = options;
        self
    }

    pub fn spawn(&self, paths: Vec<PathBuf>) -> std::io::Result<BatchHandle> {
        self.spawn_guarded(paths, ())
    }

    /// Like [`spawn`](Self::spawn); the handle holds `guard` until every event
    /// has been delivered by [`BatchHandle::drive`], the batch is joined, or the
    /// handle is dropped.
    pub fn spawn_guarded<G: Send + 'static>(
        &self,
        paths: Vec<PathBuf>,
        guard: G,
    ) -> std::io::Result<BatchHandle> {
        let (event_tx, events) = channel::unbounded();
        let (cancel, cancel_rx) = channel::bounded(1);
        let detector = Arc::clone(&self.detector);
        let options = self.options.clone();
        let delay = self.delay;

        let worker = thread::Builder::new()
            .name("detect-batch".to_string())
            .spawn(move || {
                run_batch(detector.as_ref(), &options, delay, &paths, &event_tx, &cancel_rx)
            })?;

        Ok(BatchHandle {
            events,
            cancel,
            worker: Some(worker),
            guard: Some(Box::new(guard)),
        })
    }
}

fn run_batch<D: FaceDetector + ?Sized>(
    detector: &D,
    options: &DetectOptions,
    delay: Duration,
    paths: &[PathBuf],
    events: &Sender<BatchEvent>,
    cancel: &Receiver<()>,
) -> BatchSummary {
    let batch_id = Uuid::new_v4();
    log::info!("batch {}: detecting {} frame(s)", batch_id, paths.len());
    let _ = events.send(BatchEvent::Started {
        batch_id,
        total: paths.len(),
    });

    let mut attempted = 0;
    let mut succeeded = 0;
    let mut outcome = BatchOutcome::Completed;

    for (index, path) in paths.iter().enumerate() {
        let pause = if index == 0 { Duration::ZERO } else { delay };
        if cancelled_during(cancel, pause) {
            log::info!("batch {}: cancelled before {}", batch_id, path.display());
            outcome = BatchOutcome::Cancelled;
            break;
        }

        let _ = events.send(BatchEvent::Requesting {
            index,
            path: path.clone(),
        });
        attempted += 1;

        match detector.detect(path, options) {
            Ok(response) => {
                log::debug!("{}: {} face(s)", path.display(), response.len());
                succeeded += 1;
                let _ = events.send(BatchEvent::Detected {
                    index,
                    path: path.clone(),
                    response,
                });
            }
            Err(error) => {
                log::warn!("batch {}: {} failed: {}", batch_id, path.display(), error);
                let _ = events.send(BatchEvent::Failed {
                    index,
                    path: path.clone(),
                    error: error.clone(),
                });
                outcome = BatchOutcome::Aborted(error);
                break;
            }
        }
    }

    let summary = BatchSummary {
        batch_id,
        attempted,
        succeeded,
        outcome,
    };
    let _ = events.send(BatchEvent::Finished(summary.clone()));
    summary
}

/// Wait up to `pause`; true when a cancel arrived or every handle is gone.
fn cancelled_during(cancel: &Receiver<()>, pause: Duration) -> bool {
    !matches!(cancel.recv_timeout(pause), Err(RecvTimeoutError::Timeout))
}

/// Cancels a running batch from any thread.
#[derive(Debug, Clone)]
pub struct Canceller(Sender<()>);

impl Canceller {
    pub fn cancel(&self) {
        let _ = self.0.try_send(());
    }
}

/// A batch running on its worker thread.
pub struct BatchHandle {
    events: Receiver<BatchEvent>,
    cancel: Sender<()>,
    worker: Option<JoinHandle<BatchSummary>>,
    guard: Option<Box<dyn Send>>,
}

impl BatchHandle {
    pub fn events(&self) -> &Receiver<BatchEvent> {
        &self.events
    }

    /// Stop before the next call. A call already in flight still completes.
    pub fn cancel(&self) {
        let _ = self.cancel.try_send(());
    }

    pub fn canceller(&self) -> Canceller {
        Canceller(self.cancel.clone())
    }

    /// Deliver every remaining event to `sink`, in order, then join the worker.
    pub fn drive<S: BatchSink + ?Sized>(mut self, sink: &mut S) -> BatchSummary {
        let mut batch_id = Uuid::nil();
        let mut attempted = 0;
        let mut succeeded = 0;
        let mut finished = None;

        for event in self.events.iter() {
            match event {
                BatchEvent::Started { batch_id: id, .. } => {
                    batch_id = id;
                    sink.on_log("Request Total: Detecting");
                }
                BatchEvent::Requesting { path, .. } => {
                    attempted += 1;
                    sink.on_log(&format!("Request: Detecting {}", path.display()));
                }
                BatchEvent::Detected { path, response, .. } => {
                    succeeded += 1;
                    sink.on_result(&path, response);
                }
                BatchEvent::Failed { path, error, .. } => sink.on_error(&path, &error),
                BatchEvent::Finished(summary) => {
                    finished = Some(summary);
                    break;
                }
            }
        }

        let joined = self.worker.take().map(JoinHandle::join);
        let summary = match (finished, joined) {
            (Some(summary), _) => summary,
            (None, Some(Ok(summary))) => summary,
            (None, _) => BatchSummary {
                batch_id,
                attempted,
                succeeded,
                outcome: BatchOutcome::Aborted(ServiceError::new(
                    "WorkerStopped",
                    "detection worker stopped unexpectedly",
                )),
            },
        };
        drop(self.guard.take());
        sink.on_finished(&summary);
        summary
    }

    /// Wait for the worker without dispatching events.
    pub fn join(mut self) -> thread::Result<BatchSummary> {
        match self.worker.take() {
            Some(worker) => worker.join(),
            None => Err(Box::new("batch already joined")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct ScriptedDetector {
        fail_on: Option<usize>,
        calls: Mutex<Vec<(PathBuf, Instant)>>,
    }

    impl FaceDetector for ScriptedDetector {
        fn detect(
            &self,
            image_path: &Path,
            options: &DetectOptions,
        ) -> Result<DetectionResponse, ServiceError> {
            assert_eq!(options.attributes, vec!["emotion".to_string()]);
            let mut calls = self.calls.lock().unwrap();
            calls.push((image_path.to_path_buf(), Instant::now()));
            if Some(calls.len() - 1) == self.fail_on {
                return Err(ServiceError::new("RateLimitExceeded", "slow down"));
            }
            Ok(DetectionResponse::default())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        logs: Vec<String>,
        results: Vec<PathBuf>,
        errors: Vec<(PathBuf, ServiceError)>,
        finished: usize,
    }

    impl BatchSink for RecordingSink {
        fn on_log(&mut self, message: &str) {
            self.logs.push(message.to_string());
        }

        fn on_result(&mut self, path: &Path, _response: DetectionResponse) {
            self.results.push(path.to_path_buf());
        }

        fn on_error(&mut self, path: &Path, error: &ServiceError) {
            self.errors.push((path.to_path_buf(), error.clone()));
        }

        fn on_finished(&mut self, _summary: &BatchSummary) {
            self.finished += 1;
        }
    }

    fn paths(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("frame{i}.jpg"))).collect()
    }

    #[test]
    fn test_all_paths_in_order() {
        let detector = Arc::new(ScriptedDetector::default());
        let invoker = DetectionInvoker::new(Arc::clone(&detector), Duration::ZERO);
        let mut sink = RecordingSink::default();

        let summary = invoker.spawn(paths(4)).unwrap().drive(&mut sink);

        assert_eq!(summary.outcome, BatchOutcome::Completed);
        assert_eq!((summary.attempted, summary.succeeded), (4, 4));
        assert_eq!(sink.results, paths(4));
        assert_eq!(sink.logs.len(), 5);
        assert_eq!(sink.logs[0], "Request Total: Detecting");
        assert_eq!(sink.logs[1], "Request: Detecting frame0.jpg");
        assert_eq!(sink.finished, 1);
    }

    #[test]
    fn test_first_error_stops_batch() {
        let detector = Arc::new(ScriptedDetector {
            fail_on: Some(2),
            ..Default::default()
        });
        let invoker = DetectionInvoker::new(Arc::clone(&detector), Duration::ZERO);
        let mut sink = RecordingSink::default();

        let summary = invoker.spawn(paths(4)).unwrap().drive(&mut sink);

        assert_eq!(
            summary.outcome,
            BatchOutcome::Aborted(ServiceError::new("RateLimitExceeded", "slow down"))
        );
        assert_eq!((summary.attempted, summary.succeeded), (3, 2));
        assert_eq!(sink.results, paths(2));
        assert_eq!(sink.errors.len(), 1);
        assert_eq!(sink.errors[0].0, PathBuf::from("frame2.jpg"));
        assert_eq!(detector.calls.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_delay_between_calls() {
        let delay = Duration::from_millis(40);
        let detector = Arc::new(ScriptedDetector::default());
        let invoker = DetectionInvoker::new(Arc::clone(&detector), delay);

        let summary = invoker.spawn(paths(3)).unwrap().join().unwrap();
        assert_eq!(summary.attempted, 3);

        let calls = detector.calls.lock().unwrap();
        for pair in calls.windows(2) {
            assert!(pair[1].1.duration_since(pair[0].1) >= delay);
        }
    }

    #[test]
    fn test_cancel_wakes_worker() {
        let detector = Arc::new(ScriptedDetector::default());
        let invoker = DetectionInvoker::new(Arc::clone(&detector), Duration::from_secs(30));
        let handle = invoker.spawn(paths(3)).unwrap();

        loop {
            match handle.events().recv().unwrap() {
                BatchEvent::Detected { index: 0, .. } => break,
                _ => continue,
            }
        }
        let started = Instant::now();
        handle.canceller().cancel();

        let mut sink = RecordingSink::default();
        let summary = handle.drive(&mut sink);
        assert_eq!(summary.outcome, BatchOutcome::Cancelled);
        assert_eq!(summary.attempted, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(detector.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_guard_held_until_events_drained() {
        let flag = Arc::new(());
        let detector = Arc::new(ScriptedDetector::default());
        let invoker = DetectionInvoker::new(detector, Duration::ZERO);

        let handle = invoker.spawn_guarded(paths(2), Arc::clone(&flag)).unwrap();
        while handle.worker.as_ref().is_some_and(|w| !w.is_finished()) {
            thread::sleep(Duration::from_millis(5));
        }
        // Worker is gone but its results are still queued.
        assert_eq!(Arc::strong_count(&flag), 2);

        let mut sink = RecordingSink::default();
        handle.drive(&mut sink);
        assert_eq!(sink.results, paths(2));
        assert_eq!(Arc::strong_count(&flag), 1);
    }

    #[test]
    fn test_guard_released_on_join_and_drop() {
        let flag = Arc::new(());
        let detector = Arc::new(ScriptedDetector::default());
        let invoker = DetectionInvoker::new(detector, Duration::ZERO);

        let handle = invoker.spawn_guarded(paths(1), Arc::clone(&flag)).unwrap();
        handle.join().unwrap();
        assert_eq!(Arc::strong_count(&flag), 1);

        let handle = invoker.spawn_guarded(paths(1), Arc::clone(&flag)).unwrap();
        drop(handle);
        assert_eq!(Arc::strong_count(&flag), 1);
    }

    #[test]
    fn test_empty_batch() {
        let detector = Arc::new(ScriptedDetector::default());
        let invoker = DetectionInvoker::new(detector, Duration::from_secs(30));
        let mut sink = RecordingSink::default();

        let summary = invoker.spawn(Vec::new()).unwrap().drive(&mut sink);
        assert_eq!(summary.outcome, BatchOutcome::Completed);
        assert_eq!(summary.attempted, 0);
        assert_eq!(sink.logs, vec!["Request Total: Detecting".to_string()]);
    }
}
