use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use thiserror::Error;

use crate::config::Config;
use crate::emotion::DetectionResponse;

/// Error reported by the detection service, or on the way to it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}. {message}")]
pub struct ServiceError {
    pub code: String,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// What a `detect` call asks the service to return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectOptions {
    pub return_face_id: bool,
    pub return_landmarks: bool,
    pub attributes: Vec<String>,
}

impl DetectOptions {
    /// The request used for video frames: emotion only.
    pub fn emotion_only() -> Self {
        Self {
            return_face_id: false,
            return_landmarks: false,
            attributes: vec!["emotion".to_string()],
        }
    }

    pub fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("returnFaceId", self.return_face_id.to_string()),
            ("returnFaceLandmarks", self.return_landmarks.to_string()),
            ("returnFaceAttributes", self.attributes.join(",")),
        ]
    }
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self::emotion_only()
    }
}

pub trait FaceDetector: Send + Sync {
    fn detect(&self, image_path: &Path, options: &DetectOptions)
        -> Result<DetectionResponse, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Blocking client for the Face API `detect` endpoint.
pub struct FaceClient {
    client: Client,
    endpoint: String,
    subscription_key: String,
}

impl FaceClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            subscription_key: config.subscription_key.clone(),
        })
    }

    fn detect_url(&self) -> String {
        format!("{}/detect", self.endpoint)
    }
}

impl FaceDetector for FaceClient {
    fn detect(
        &self,
        image_path: &Path,
        options: &DetectOptions,
    ) -> Result<DetectionResponse, ServiceError> {
        let body = std::fs::read(image_path).map_err(|e| {
            ServiceError::new("InvalidImage", format!("{}: {}", image_path.display(), e))
        })?;

        let response = self
            .client
            .post(self.detect_url())
            .query(&options.query())
            .header("Ocp-Apim-Subscription-Key", &self.subscription_key)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .map_err(|e| ServiceError::new("Transport", e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| ServiceError::new("Transport", e.to_string()))?;

        if !status.is_success() {
            return Err(error_from_body(status.as_u16(), &text));
        }

        serde_json::from_str(&text).map_err(|e| ServiceError::new("BadResponse", e.to_string()))
    }
}

fn error_from_body(status: u16, text: &str) -> ServiceError {
    match serde_json::from_str::<ErrorBody>(text) {
        Ok(body) => ServiceError::new(body.error.code, body.error.message),
        Err(_) => ServiceError::new(status.to_string(), text.trim().to_string()),
    }
}
