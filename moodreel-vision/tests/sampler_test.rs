use anyhow::Result;
use image::RgbImage;
use moodreel_vision::sampler::{frame_output_path, stride};
use moodreel_vision::{FrameSampler, StackedHistogram, VideoError, VideoSource};

/// Stream that paints each frame with a shade derived from its index.
struct SyntheticVideo {
    frame_rate: f64,
    frame_count: u64,
    position: u64,
    reads: Vec<u64>,
}

impl SyntheticVideo {
    fn new(frame_rate: f64, frame_count: u64) -> Self {
        Self {
            frame_rate,
            frame_count,
            position: 0,
            reads: Vec::new(),
        }
    }
}

impl VideoSource for SyntheticVideo {
    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, index: u64) -> Result<(), VideoError> {
        self.position = index;
        Ok(())
    }

    fn read(&mut self) -> Result<RgbImage, VideoError> {
        let shade = (self.position % 256) as u8;
        self.reads.push(self.position);
        self.position += 1;
        Ok(RgbImage::from_pixel(16, 12, image::Rgb([shade, shade, shade])))
    }
}

#[test]
fn test_thirty_fps_three_hundred_frames() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("party.mp4");
    std::fs::write(&source, b"")?;

    let mut video = SyntheticVideo::new(30.0, 300);
    assert_eq!(stride(video.frame_rate(), 3), 90);

    let frames = FrameSampler::new(3).sample_from(&mut video, &source)?;

    assert_eq!(video.reads, vec![0, 90, 180, 270]);
    assert_eq!(frames.len(), 4);
    for frame in &frames {
        assert_eq!(frame.output_path, frame_output_path(&source, frame.frame_index));
        assert!(frame.output_path.exists());
        let name = frame.output_path.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name, format!("party.mp4_frame{}.jpg", frame.frame_index));
        assert_eq!(frame.output_path.parent().unwrap().file_name().unwrap(), "images");

        let decoded = image::open(&frame.output_path)?;
        assert_eq!((decoded.width(), decoded.height()), (16, 12));
    }
    Ok(())
}

#[test]
fn test_zero_frame_rate_uses_stride_one() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("still.avi");
    std::fs::write(&source, b"")?;

    let mut video = SyntheticVideo::new(0.0, 4);
    let frames = FrameSampler::default().sample_from(&mut video, &source)?;
    let indices: Vec<u64> = frames.iter().map(|f| f.frame_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    Ok(())
}

#[test]
fn test_unreadable_source() {
    let err = FrameSampler::default()
        .sample(std::path::Path::new("/no/such/video.mp4"))
        .unwrap_err();
    assert!(matches!(
        err,
        moodreel_vision::SampleError::Video(VideoError::UnreadableSource { .. })
    ));
}

#[test]
fn test_chart_saved_as_png() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("charts").join("emotions.png");
    let series = vec![vec![0.1, 0.2], vec![0.9, 0.8]];
    StackedHistogram::compute(&series, 10).save(&path, &[[255, 0, 0], [0, 255, 0]], 320, 240)?;

    let img = image::open(&path)?;
    assert_eq!((img.width(), img.height()), (320, 240));
    Ok(())
}
