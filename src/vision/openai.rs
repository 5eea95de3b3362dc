//! Frame analysis through the OpenAI chat-completions API.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};

use super::prompt::{build_prompt, parse_verdict};
use super::{FrameAnalyzer, StepContext, Verdict};
use crate::error::{Error, Result};

/// Default chat model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const MAX_TOKENS: u32 = 1000;

/// [`FrameAnalyzer`] backed by an OpenAI vision-capable chat model.
#[derive(Debug, Clone)]
pub struct OpenAiAnalyzer {
    api_key: String,
    model: String,
    endpoint: String,
    http_client: reqwest::Client,
}

impl OpenAiAnalyzer {
    /// Create an analyzer using `api_key`.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            http_client,
        })
    }

    /// Create an analyzer from `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY environment variable not set".into()))?;
        Self::new(api_key)
    }

    /// Use a different model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Use a different chat-completions endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// The model in use.
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn request_body(&self, prompt: String, frames: &[PathBuf]) -> Result<Value> {
        let mut content = vec![json!({"type": "text", "text": prompt})];
        for frame in frames {
            let bytes = tokio::fs::read(frame)
                .await
                .map_err(|e| Error::storage(frame, e))?;
            content.push(json!({
                "type": "image_url",
                "image_url": {"url": data_url(frame, &bytes)?, "detail": "high"},
            }));
        }
        Ok(json!({
            "model": self.model,
            "messages": [{"role": "user", "content": content}],
            "max_tokens": MAX_TOKENS,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl FrameAnalyzer for OpenAiAnalyzer {
    async fn analyze(&self, context: &StepContext, frames: &[PathBuf]) -> Result<Verdict> {
        let body = self.request_body(build_prompt(context), frames).await?;

        tracing::debug!(model = %self.model, frames = frames.len(), "requesting frame analysis");
        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::analysis(format!(
                "OpenAI API returned {status}: {error_text}"
            )));
        }

        let completion: ChatCompletion = response.json().await?;
        let reply = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::analysis("empty response from OpenAI API"))?;

        tracing::debug!(reply = %reply, "frame analysis reply");
        parse_verdict(&reply)
    }
}

/// Encode an image as a `data:` URL, choosing the MIME type by extension.
fn data_url(path: &Path, bytes: &[u8]) -> Result<String> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let mime = match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        other => {
            return Err(Error::analysis(format!(
                "unsupported image type '{other}', only jpg, jpeg and png are supported"
            )))
        }
    };
    Ok(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
}
