pub mod chart;
pub mod sampler;
pub mod video;

// Re-export commonly used types
pub use chart::StackedHistogram;
pub use sampler::{FrameSampler, SampleError, SampledFrame};
pub use video::{open_video, VideoError, VideoSource};
