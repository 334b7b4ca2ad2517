pub mod config;
pub mod emotion;
pub mod face_api;
pub mod invoker;
pub mod panel;
pub mod storage;
pub mod tracker;

// Re-export vision types for convenience
pub use moodreel_vision::{chart, sampler, video, FrameSampler, SampledFrame, StackedHistogram};

pub use emotion::{DetectionResponse, Emotion, EmotionSeries};
pub use face_api::{DetectOptions, FaceClient, FaceDetector, ServiceError};
pub use invoker::{BatchHandle, BatchOutcome, BatchSink, BatchSummary, DetectionInvoker};
pub use panel::{PanelError, PanelView, VideoPanel};
