use crate::error::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

const HTTP_BATCH_SIZE: usize = 64;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Local hashed character-trigram embedder. Needs no model download and is
/// fully deterministic.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        Ok(self.embed_sync(text))
    }
}

#[derive(Debug, Clone)]
pub struct HttpEmbedderConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub dimensions: usize,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Embedder backed by an OpenAI-compatible `/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(config: HttpEmbedderConfig) -> Result<Self, SearchError> {
        let base = format!("{}/", config.base_url.trim_end_matches('/'));
        let endpoint = Url::parse(&base)?.join("embeddings")?;
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            model: config.model,
            api_key: config.api_key,
            dimensions: config.dimensions,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut request = self.client.post(self.endpoint.clone()).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: self.endpoint.to_string(),
                details: response.status().to_string(),
            });
        }

        let payload: EmbeddingResponse = response.json().await?;
        order_embeddings(payload, texts.len(), self.dimensions, self.endpoint.as_str())
    }
}

fn order_embeddings(
    payload: EmbeddingResponse,
    expected: usize,
    dimensions: usize,
    backend: &str,
) -> Result<Vec<Vec<f32>>, SearchError> {
    if payload.data.len() != expected {
        return Err(SearchError::BackendResponse {
            backend: backend.to_string(),
            details: format!("expected {expected} embeddings, got {}", payload.data.len()),
        });
    }

    let mut items = payload.data;
    if items.iter().all(|item| item.index.is_some()) {
        items.sort_by_key(|item| item.index);
    }

    items
        .into_iter()
        .map(|item| {
            if item.embedding.len() == dimensions {
                Ok(item.embedding)
            } else {
                Err(SearchError::Dimension {
                    expected: dimensions,
                    actual: item.embedding.len(),
                })
            }
        })
        .collect()
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| SearchError::BackendResponse {
            backend: self.endpoint.to_string(),
            details: "empty embedding response".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(HTTP_BATCH_SIZE) {
            vectors.extend(self.request(batch).await?);
        }
        Ok(vectors)
    }
}
