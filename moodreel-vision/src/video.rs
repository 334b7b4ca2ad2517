use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("cannot open video {}: {reason}", path.display())]
    UnreadableSource { path: PathBuf, reason: String },
    #[error("failed to decode frame {index}: {reason}")]
    Decode { index: u64, reason: String },
    #[error("video backend unavailable: {0}")]
    Backend(String),
}

/// An opened video stream, read one frame at a time.
///
/// The stream is released when the value is dropped.
pub trait VideoSource {
    fn frame_rate(&self) -> f64;
    fn frame_count(&self) -> u64;
    /// Index of the frame the next `read` returns.
    fn position(&self) -> u64;
    fn seek(&mut self, index: u64) -> Result<(), VideoError>;
    /// Decode the frame at `position` and advance by one.
    fn read(&mut self) -> Result<RgbImage, VideoError>;
}

/// Open `path` with the backend selected at build time.
pub fn open_video(path: &Path) -> Result<Box<dyn VideoSource>, VideoError> {
    #[cfg(feature = "opencv")]
    {
        Ok(Box::new(cv::OpencvVideo::open(path)?))
    }

    #[cfg(not(feature = "opencv"))]
    {
        Ok(Box::new(FfmpegVideo::open(path)?))
    }
}

/// Decodes through the `ffprobe`/`ffmpeg` command line tools.
pub struct FfmpegVideo {
    path: PathBuf,
    width: u32,
    height: u32,
    frame_rate: f64,
    frame_count: u64,
    position: u64,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: u32,
    height: u32,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

impl ProbeOutput {
    /// Frame rate and frame count of the first video stream. Containers that
    /// do not store a frame count fall back to `duration * frame_rate`.
    fn rate_and_count(&self) -> (f64, u64) {
        let Some(stream) = self.streams.first() else {
            return (0.0, 0);
        };

        let frame_rate = stream
            .avg_frame_rate
            .as_deref()
            .and_then(parse_rate)
            .filter(|r| *r > 0.0)
            .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
            .unwrap_or(0.0);

        let frame_count = match stream.nb_frames.as_deref().and_then(|n| n.parse().ok()) {
            Some(n) => n,
            None => stream
                .duration
                .as_deref()
                .or(self.format.as_ref().and_then(|f| f.duration.as_deref()))
                .and_then(|d| d.parse::<f64>().ok())
                .filter(|d| d.is_finite() && *d > 0.0)
                .map(|d| (d * frame_rate).floor() as u64)
                .unwrap_or(0),
        };

        (frame_rate, frame_count)
    }
}

impl FfmpegVideo {
    pub fn open(path: &Path) -> Result<Self, VideoError> {
        let unreadable = |reason: String| VideoError::UnreadableSource {
            path: path.to_path_buf(),
            reason,
        };

        std::fs::metadata(path).map_err(|e| unreadable(e.to_string()))?;

        let output = Command::new("ffprobe")
            .args(["-v", "error", "-select_streams", "v:0", "-show_entries"])
            .arg("stream=width,height,avg_frame_rate,r_frame_rate,nb_frames,duration:format=duration")
            .args(["-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| VideoError::Backend(format!("spawning ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(unreadable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let probe: ProbeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| unreadable(format!("parsing ffprobe output: {e}")))?;
        let (frame_rate, frame_count) = probe.rate_and_count();
        let stream = probe
            .streams
            .into_iter()
            .next()
            .ok_or_else(|| unreadable("no video stream".to_string()))?;

        log::debug!(
            "probed {}: {}x{} fps={:.3} frames={}",
            path.display(),
            stream.width,
            stream.height,
            frame_rate,
            frame_count
        );

        Ok(Self {
            path: path.to_path_buf(),
            width: stream.width,
            height: stream.height,
            frame_rate,
            frame_count,
            position: 0,
        })
    }
}

impl VideoSource for FfmpegVideo {
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
        let index = self.position;
        let decode = |reason: String| VideoError::Decode { index, reason };
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|n| n.checked_mul(3))
            .ok_or_else(|| decode(format!("frame size {}x{} too large", self.width, self.height)))?;

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-v", "error", "-nostdin"]);
        if self.frame_rate > 0.0 {
            // Input-side seek jumps to the nearest keyframe instead of decoding from the start.
            cmd.arg("-ss")
                .arg(format!("{:.6}", index as f64 / self.frame_rate))
                .arg("-i")
                .arg(&self.path);
        } else {
            cmd.arg("-i")
                .arg(&self.path)
                .arg("-vf")
                .arg(format!("select=eq(n\\,{index})"))
                .args(["-vsync", "0"]);
        }
        let mut child = cmd
            .args(["-frames:v", "1"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| VideoError::Backend(format!("spawning ffmpeg: {e}")))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| decode("ffmpeg stdout unavailable".to_string()))?;
        let mut buf = Vec::new();
        stdout
            .read_to_end(&mut buf)
            .map_err(|e| decode(e.to_string()))?;
        let status = child.wait().map_err(|e| decode(e.to_string()))?;
        if !status.success() {
            return Err(decode(format!("ffmpeg exited with {status}")));
        }

        if buf.len() < expected {
            return Err(decode(format!(
                "short frame: got {} bytes, expected {}",
                buf.len(),
                expected
            )));
        }
        buf.truncate(expected);

        self.position += 1;
        RgbImage::from_raw(self.width, self.height, buf)
            .ok_or_else(|| decode("failed to build image buffer".to_string()))
    }
}

/// Parse an ffprobe rational such as `30000/1001`.
fn parse_rate(raw: &str) -> Option<f64> {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                None
            } else {
                Some(num / den)
            }
        }
        None => raw.trim().parse().ok(),
    }
}

#[cfg(feature = "opencv")]
mod cv {
    use std::path::Path;

    use image::RgbImage;
    use opencv::core::Mat;
    use opencv::prelude::*;
    use opencv::videoio::{self, VideoCapture};

    use super::{VideoError, VideoSource};

    pub struct OpencvVideo {
        cap: VideoCapture,
        frame_rate: f64,
        frame_count: u64,
    }

    impl OpencvVideo {
        pub fn open(path: &Path) -> Result<Self, VideoError> {
            let unreadable = |reason: String| VideoError::UnreadableSource {
                path: path.to_path_buf(),
                reason,
            };
            let name = path
                .to_str()
                .ok_or_else(|| unreadable("path is not valid UTF-8".to_string()))?;
            let cap = VideoCapture::from_file(name, videoio::CAP_ANY)
                .map_err(|e| unreadable(e.to_string()))?;
            if !cap.is_opened().unwrap_or(false) {
                return Err(unreadable("capture did not open".to_string()));
            }
            let frame_rate = cap.get(videoio::CAP_PROP_FPS).unwrap_or(0.0);
            let frame_count = cap.get(videoio::CAP_PROP_FRAME_COUNT).unwrap_or(0.0).max(0.0) as u64;
            Ok(Self {
                cap,
                frame_rate,
                frame_count,
            })
        }
    }

    impl VideoSource for OpencvVideo {
        fn frame_rate(&self) -> f64 {
            self.frame_rate
        }

        fn frame_count(&self) -> u64 {
            self.frame_count
        }

        fn position(&self) -> u64 {
            self.cap
                .get(videoio::CAP_PROP_POS_FRAMES)
                .map(|p| p.round().max(0.0) as u64)
                .unwrap_or(0)
        }

        fn seek(&mut self, index: u64) -> Result<(), VideoError> {
            self.cap
                .set(videoio::CAP_PROP_POS_FRAMES, index as f64)
                .map(|_| ())
                .map_err(|e| VideoError::Decode {
                    index,
                    reason: e.to_string(),
                })
        }

        fn read(&mut self) -> Result<RgbImage, VideoError> {
            let index = self.position();
            let decode = |reason: String| VideoError::Decode { index, reason };

            let mut frame = Mat::default();
            let ok = self.cap.read(&mut frame).map_err(|e| decode(e.to_string()))?;
            if !ok || frame.empty() {
                return Err(decode("no frame returned".to_string()));
            }
            if frame.channels() != 3 || !frame.is_continuous() {
                return Err(decode(format!("unexpected frame layout ({} channels)", frame.channels())));
            }

            let width = frame.cols() as u32;
            let height = frame.rows() as u32;
            let bgr = frame.data_bytes().map_err(|e| decode(e.to_string()))?;
            let mut rgb = Vec::with_capacity(bgr.len());
            for px in bgr.chunks_exact(3) {
                rgb.extend_from_slice(&[px[2], px[1], px[0]]);
            }
            RgbImage::from_raw(width, height, rgb)
                .ok_or_else(|| decode("failed to build image buffer".to_string()))
        }
    }

    impl Drop for OpencvVideo {
        fn drop(&mut self) {
            let _ = self.cap.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("30/1"), Some(30.0));
        assert_eq!(parse_rate("25"), Some(25.0));
        assert_eq!(parse_rate("0/0"), None);
        let ntsc = parse_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_rate("abc"), None);
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let err = FfmpegVideo::open(Path::new("/definitely/not/here.mp4"))
            .err()
            .unwrap();
        assert!(matches!(err, VideoError::UnreadableSource { .. }));
    }

    #[test]
    fn test_probe_output_parses() {
        let raw = r#"{"streams":[{"width":640,"height":480,"avg_frame_rate":"30/1","r_frame_rate":"30/1","nb_frames":"300","duration":"10.000000"}]}"#;
        let probe: ProbeOutput = serde_json::from_str(raw).unwrap();
        assert_eq!(probe.streams.len(), 1);
        assert_eq!(probe.rate_and_count(), (30.0, 300));
    }

    #[test]
    fn test_frame_count_from_duration() {
        let raw = r#"{"streams":[{"width":64,"height":48,"avg_frame_rate":"0/0","r_frame_rate":"25/1","duration":"4.000000"}]}"#;
        let probe: ProbeOutput = serde_json::from_str(raw).unwrap();
        assert_eq!(probe.rate_and_count(), (25.0, 100));

        // Matroska only reports the container duration.
        let raw = r#"{"streams":[{"width":64,"height":48,"avg_frame_rate":"10/1"}],"format":{"duration":"2.050000"}}"#;
        let probe: ProbeOutput = serde_json::from_str(raw).unwrap();
        assert_eq!(probe.rate_and_count(), (10.0, 20));

        let raw = r#"{"streams":[{"width":64,"height":48,"avg_frame_rate":"10/1"}]}"#;
        let probe: ProbeOutput = serde_json::from_str(raw).unwrap();
        assert_eq!(probe.rate_and_count(), (10.0, 0));
    }

    #[test]
    fn test_oversized_frame_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.mp4");
        std::fs::write(&path, b"").unwrap();
        let mut video = FfmpegVideo {
            path,
            width: u32::MAX,
            height: u32::MAX,
            frame_rate: 30.0,
            frame_count: 1,
            position: 0,
        };
        match video.read() {
            Err(VideoError::Decode { index: 0, reason }) => assert!(reason.contains("too large")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
