//! Object localization through an OWLv2 deployment on Replicate.
//!
//! The deployment answers with pixel-space boxes; they are normalized by the
//! frame's dimensions before being returned.

use std::io::Cursor;
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};

use super::ObjectDetector;
use crate::error::{Error, Result};
use crate::protocol::BoundingBox;

/// Default Replicate deployment, `owner/name`.
pub const DEFAULT_DEPLOYMENT: &str = "andreemic/owlv2";

const DEFAULT_API_BASE: &str = "https://api.replicate.com/v1";
const MAX_ATTEMPTS: u32 = 3;
const RETRY_PAUSE: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const POLL_TIMEOUT: Duration = Duration::from_secs(60);

/// [`ObjectDetector`] backed by a Replicate OWLv2 deployment.
#[derive(Debug, Clone)]
pub struct ReplicateDetector {
    api_token: String,
    api_base: String,
    deployment: String,
    http_client: reqwest::Client,
}

impl ReplicateDetector {
    /// Create a detector using `api_token`.
    pub fn new(api_token: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            api_token: api_token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            deployment: DEFAULT_DEPLOYMENT.to_string(),
            http_client,
        })
    }

    /// Create a detector from `REPLICATE_API_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("REPLICATE_API_TOKEN")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| Error::Config("REPLICATE_API_TOKEN environment variable not set".into()))?;
        Self::new(token)
    }

    /// Use a different deployment (`owner/name`).
    pub fn with_deployment(mut self, deployment: impl Into<String>) -> Self {
        self.deployment = deployment.into();
        self
    }

    /// Use a different API base URL.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn predictions_endpoint(&self) -> String {
        format!("{}/deployments/{}/predictions", self.api_base, self.deployment)
    }

    async fn predict(&self, input: &Value) -> Result<Value> {
        let response = self
            .http_client
            .post(self.predictions_endpoint())
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(&json!({ "input": input }))
            .send()
            .await?;
        let mut prediction = json_or_error(response).await?;

        let started = Instant::now();
        loop {
            match prediction_status(&prediction).as_str() {
                "succeeded" => {
                    return Ok(prediction.get("output").cloned().unwrap_or(Value::Null))
                }
                "starting" | "processing" => {}
                _ => {
                    return Err(Error::analysis(format!(
                        "Replicate prediction failed: {prediction}"
                    )))
                }
            }
            if started.elapsed() >= POLL_TIMEOUT {
                return Err(Error::analysis("Replicate polling timed out"));
            }
            let poll_url = prediction
                .pointer("/urls/get")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::analysis("Replicate prediction missing poll URL"))?
                .to_string();
            tokio::time::sleep(POLL_INTERVAL).await;
            let response = self
                .http_client
                .get(&poll_url)
                .bearer_auth(&self.api_token)
                .send()
                .await?;
            prediction = json_or_error(response).await?;
        }
    }
}

#[async_trait]
impl ObjectDetector for ReplicateDetector {
    async fn detect(&self, frame: &Path, object: &str) -> Result<Vec<BoundingBox>> {
        if object.trim().is_empty() {
            return Err(Error::detection(object, "object name must not be empty"));
        }
        let bytes = tokio::fs::read(frame)
            .await
            .map_err(|e| Error::storage(frame, e))?;
        let (width, height) = image_dimensions(&bytes).map_err(|e| Error::detection(object, e))?;

        let input = json!({
            "image": format!("data:image/jpeg;base64,{}", STANDARD.encode(&bytes)),
            "query": object,
        });

        let mut attempt = 0;
        let output = loop {
            attempt += 1;
            match self.predict(&input).await {
                Ok(output) => break output,
                Err(e) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!(object, attempt, error = %e, "detection attempt failed");
                    tokio::time::sleep(RETRY_PAUSE).await;
                }
                Err(e) => {
                    return Err(Error::detection(
                        object,
                        format!("failed after {MAX_ATTEMPTS} attempts: {e}"),
                    ))
                }
            }
        };

        let boxes = parse_detections(&output, width, height);
        tracing::debug!(object, count = boxes.len(), "detection finished");
        Ok(boxes)
    }
}

async fn json_or_error(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::analysis(format!(
            "Replicate API returned {status}: {body}"
        )));
    }
    Ok(response.json().await?)
}

fn prediction_status(prediction: &Value) -> String {
    prediction
        .get("status")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

fn image_dimensions(bytes: &[u8]) -> std::result::Result<(u32, u32), String> {
    let (width, height) = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| format!("unreadable frame: {e}"))?
        .into_dimensions()
        .map_err(|e| format!("unreadable frame: {e}"))?;
    if width == 0 || height == 0 {
        return Err("frame has zero size".to_string());
    }
    Ok((width, height))
}

/// Normalize the pixel boxes in a deployment output.
///
/// Accepted shapes: a list of detections, `{"json_data": {"objects": [..]}}`
/// and `{"detections": [..]}`, where each detection carries
/// `"bbox": [x_min, y_min, x_max, y_max]`.
fn parse_detections(output: &Value, width: u32, height: u32) -> Vec<BoundingBox> {
    let detections = match output {
        Value::Array(items) => Some(items),
        Value::Object(_) => output
            .pointer("/json_data/objects")
            .or_else(|| output.get("detections"))
            .and_then(Value::as_array),
        _ => None,
    };
    let (w, h) = (f64::from(width), f64::from(height));

    detections
        .into_iter()
        .flatten()
        .filter_map(|detection| {
            let coords: Vec<f64> = detection
                .get("bbox")?
                .as_array()?
                .iter()
                .filter_map(Value::as_f64)
                .collect();
            match coords[..] {
                [x_min, y_min, x_max, y_max] => {
                    Some(BoundingBox::new(x_min / w, y_min / h, x_max / w, y_max / h))
                }
                _ => None,
            }
        })
        .collect()
}
