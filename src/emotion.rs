use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The emotion keys reported by the detection service, in series order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Emotion {
    Anger,
    Contempt,
    Disgust,
    Fear,
    Happiness,
    Sadness,
    Surprise,
    Neutral,
}

impl Emotion {
    pub const ALL: [Emotion; 8] = [
        Emotion::Anger,
        Emotion::Contempt,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happiness,
        Emotion::Sadness,
        Emotion::Surprise,
        Emotion::Neutral,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Emotion::Anger => "anger",
            Emotion::Contempt => "contempt",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Happiness => "happiness",
            Emotion::Sadness => "sadness",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
        }
    }

    /// Chart colour: r, g, b, c, m, y, k, gray.
    pub fn color(self) -> [u8; 3] {
        match self {
            Emotion::Anger => [255, 0, 0],
            Emotion::Contempt => [0, 128, 0],
            Emotion::Disgust => [0, 0, 255],
            Emotion::Fear => [0, 191, 191],
            Emotion::Happiness => [191, 0, 191],
            Emotion::Sadness => [191, 191, 0],
            Emotion::Surprise => [0, 0, 0],
            Emotion::Neutral => [128, 128, 128],
        }
    }

    pub fn palette() -> [[u8; 3]; 8] {
        Emotion::ALL.map(Emotion::color)
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Emotion confidences of one face. Every key is required.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionScores {
    pub anger: f64,
    pub contempt: f64,
    pub disgust: f64,
    pub fear: f64,
    pub happiness: f64,
    pub sadness: f64,
    pub surprise: f64,
    pub neutral: f64,
}

impl EmotionScores {
    pub fn get(&self, emotion: Emotion) -> f64 {
        match emotion {
            Emotion::Anger => self.anger,
            Emotion::Contempt => self.contempt,
            Emotion::Disgust => self.disgust,
            Emotion::Fear => self.fear,
            Emotion::Happiness => self.happiness,
            Emotion::Sadness => self.sadness,
            Emotion::Surprise => self.surprise,
            Emotion::Neutral => self.neutral,
        }
    }

    pub fn dominant(&self) -> Emotion {
        Emotion::ALL
            .into_iter()
            .fold(Emotion::Neutral, |best, e| {
                if self.get(e) > self.get(best) {
                    e
                } else {
                    best
                }
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRectangle {
    pub top: u32,
    pub left: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceAttributes {
    pub emotion: Option<EmotionScores>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedFace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_rectangle: Option<FaceRectangle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_attributes: Option<FaceAttributes>,
}

impl DetectedFace {
    pub fn emotion(&self) -> Option<&EmotionScores> {
        self.face_attributes.as_ref()?.emotion.as_ref()
    }
}

/// Faces detected in a single image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectionResponse {
    pub faces: Vec<DetectedFace>,
}

impl DetectionResponse {
    pub fn new(faces: Vec<DetectedFace>) -> Self {
        Self { faces }
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum AggregateError {
    #[error("face {face} has no emotion attribute")]
    MissingEmotion { face: usize },
    #[error("face {face} has {emotion} score {value} outside [0, 1]")]
    ScoreOutOfRange {
        face: usize,
        emotion: Emotion,
        value: f64,
    },
}

/// One list of per-frame means for every emotion, in [`Emotion::ALL`] order.
///
/// Serialises as a JSON array of 8 arrays.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmotionSeries {
    series: [Vec<f64>; 8],
}

impl EmotionSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded frames.
    pub fn len(&self) -> usize {
        self.series[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, emotion: Emotion) -> &[f64] {
        &self.series[emotion as usize]
    }

    pub fn as_slices(&self) -> &[Vec<f64>; 8] {
        &self.series
    }

    /// Means of the frame at `index`.
    pub fn entry(&self, index: usize) -> Option<[f64; 8]> {
        if index >= self.len() {
            return None;
        }
        Some(Emotion::ALL.map(|e| self.series[e as usize][index]))
    }

    /// Append the per-emotion means of `response`. A response without faces
    /// appends zeros. Invalid faces reject the whole response.
    pub fn record(&mut self, response: &DetectionResponse) -> Result<&Self, AggregateError> {
        let entry = frame_means(response)?;
        for (values, mean) in self.series.iter_mut().zip(entry) {
            values.push(mean);
        }
        Ok(self)
    }

    pub fn clear(&mut self) {
        for values in &mut self.series {
            values.clear();
        }
    }

    /// Series read back from storage must have equal lengths.
    pub fn is_consistent(&self) -> bool {
        let len = self.len();
        self.series.iter().all(|v| v.len() == len)
    }
}

/// Mean score of each emotion across the faces of one frame.
pub fn frame_means(response: &DetectionResponse) -> Result<[f64; 8], AggregateError> {
    let mut sums = [0.0f64; 8];
    for (face, detected) in response.faces.iter().enumerate() {
        let scores = detected
            .emotion()
            .ok_or(AggregateError::MissingEmotion { face })?;
        for emotion in Emotion::ALL {
            let value = scores.get(emotion);
            if !(0.0..=1.0).contains(&value) {
                return Err(AggregateError::ScoreOutOfRange {
                    face,
                    emotion,
                    value,
                });
            }
            sums[emotion as usize] += value;
        }
    }

    let n = response.faces.len().max(1) as f64;
    Ok(sums.map(|s| s / n))
}
