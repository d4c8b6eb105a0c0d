use crate::traits::ChatModel;
use crate::{ChatMessage, ModelError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            temperature: 0.0,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    usage: Option<CompletionUsage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct CompletionUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint (Groq by default).
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: String,
    temperature: f32,
}

impl OpenAiCompatibleClient {
    pub fn new(config: ModelConfig) -> Result<Self, ModelError> {
        let api_key = config
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ModelError::MissingApiKey(config.base_url.clone()))?;

        let base = format!("{}/", config.base_url.trim_end_matches('/'));
        let endpoint = Url::parse(&base)?.join("chat/completions")?;
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            model: config.model,
            api_key,
            temperature: config.temperature,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatibleClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&CompletionRequest {
                model: &self.model,
                messages,
                temperature: self.temperature,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let payload: CompletionResponse = response.json().await?;
        if let Some(usage) = &payload.usage {
            debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "completion usage"
            );
        }

        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(ModelError::EmptyResponse)
    }
}

fn status_error(status: StatusCode, body: String) -> ModelError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ModelError::Unauthorized {
            status: status.as_u16(),
            body,
        },
        StatusCode::TOO_MANY_REQUESTS => ModelError::RateLimited(body),
        _ => ModelError::Status {
            status: status.as_u16(),
            body,
        },
    }
}
