use clap::{Args, ValueEnum};
use docchat_core::{
    CharacterNgramEmbedder, ChatModel, DistanceMetric, DocumentLoader, Embedder, HttpEmbedder,
    HttpEmbedderConfig, ModelConfig, OcrEndpointConfig, OpenAiCompatibleClient, PdfExtractor,
    RebuildPolicy, Session, SessionBackends, SessionConfig, DEFAULT_BASE_URL, DEFAULT_MODEL,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_EMBEDDING_URL: &str = "http://localhost:8080/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbedderKind {
    /// Local hashed character trigrams.
    Ngram,
    /// OpenAI-compatible /embeddings endpoint.
    Http,
}

#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Directory uploaded files are written to
    #[arg(long, global = true, env = "DOCCHAT_WORKING_DIR", default_value = "uploads")]
    pub working_dir: PathBuf,

    /// Hosted chat model identifier
    #[arg(long, global = true, env = "DOCCHAT_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Base URL of the OpenAI-compatible model endpoint
    #[arg(long, global = true, env = "DOCCHAT_MODEL_URL", default_value = DEFAULT_BASE_URL)]
    pub model_url: String,

    /// API key for the model endpoint
    #[arg(long, global = true, env = "GROQ_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Number of chunks retrieved per question
    #[arg(long, global = true, env = "DOCCHAT_TOP_K", default_value_t = docchat_core::DEFAULT_TOP_K)]
    pub top_k: usize,

    /// When to rebuild the index after an upload (ordered-list or name-set)
    #[arg(long, global = true, env = "DOCCHAT_REBUILD_POLICY", default_value = "ordered-list")]
    pub rebuild_policy: RebuildPolicy,

    /// Vector distance (euclidean or cosine)
    #[arg(long, global = true, env = "DOCCHAT_METRIC", default_value = "euclidean")]
    pub metric: DistanceMetric,

    /// Send follow-up questions as-is instead of rephrasing them first
    #[arg(long, global = true, default_value_t = false)]
    pub no_condense: bool,

    /// Embedding backend; defaults to http when an embeddings URL is set, ngram otherwise
    #[arg(long, global = true, env = "DOCCHAT_EMBEDDER", value_enum)]
    pub embedder: Option<EmbedderKind>,

    /// Base URL of the OpenAI-compatible embeddings endpoint
    #[arg(long, global = true, env = "DOCCHAT_EMBEDDING_URL")]
    pub embedding_url: Option<String>,

    #[arg(
        long,
        global = true,
        env = "DOCCHAT_EMBEDDING_MODEL",
        default_value = "sentence-transformers/all-mpnet-base-v2"
    )]
    pub embedding_model: String,

    #[arg(long, global = true, env = "DOCCHAT_EMBEDDING_DIMENSIONS", default_value_t = 768)]
    pub embedding_dimensions: usize,

    #[arg(long, global = true, env = "DOCCHAT_EMBEDDING_API_KEY", hide_env_values = true)]
    pub embedding_api_key: Option<String>,

    /// OCR service used for PDFs without a text layer
    #[arg(long, global = true, env = "LLM_OCR_ENDPOINT")]
    pub ocr_endpoint: Option<String>,

    #[arg(long, global = true, env = "LLM_OCR_API_KEY", hide_env_values = true)]
    pub ocr_api_key: Option<String>,

    /// Timeout for each model or embedding request
    #[arg(long, global = true, env = "DOCCHAT_REQUEST_TIMEOUT_SECS", default_value_t = docchat_core::DEFAULT_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,
}

impl Settings {
    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(&self.working_dir);
        config.rebuild_policy = self.rebuild_policy;
        config.metric = self.metric;
        config.chain.top_k = self.top_k;
        config.chain.condense_question = !self.no_condense;
        config
    }

    pub fn model(&self) -> anyhow::Result<Arc<dyn ChatModel>> {
        let client = OpenAiCompatibleClient::new(ModelConfig {
            base_url: self.model_url.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            temperature: 0.0,
            timeout: Duration::from_secs(self.request_timeout_secs),
        })?;
        Ok(Arc::new(client))
    }

    pub fn embedder_kind(&self) -> EmbedderKind {
        match (self.embedder, &self.embedding_url) {
            (Some(kind), _) => kind,
            (None, Some(_)) => EmbedderKind::Http,
            (None, None) => EmbedderKind::Ngram,
        }
    }

    pub fn embedder(&self) -> anyhow::Result<Arc<dyn Embedder>> {
        match self.embedder_kind() {
            EmbedderKind::Ngram => Ok(Arc::new(CharacterNgramEmbedder::default())),
            EmbedderKind::Http => Ok(Arc::new(HttpEmbedder::new(HttpEmbedderConfig {
                base_url: self
                    .embedding_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_EMBEDDING_URL.to_string()),
                model: self.embedding_model.clone(),
                api_key: self.embedding_api_key.clone(),
                dimensions: self.embedding_dimensions,
                timeout: Duration::from_secs(self.request_timeout_secs),
            })?)),
        }
    }

    pub fn ocr_config(&self) -> Option<OcrEndpointConfig> {
        let endpoint = self.ocr_endpoint.as_deref().map(str::trim).filter(|url| !url.is_empty())?;
        let api_key = self
            .ocr_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string);

        Some(OcrEndpointConfig {
            endpoint: endpoint.to_string(),
            api_key,
            timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }

    pub fn loader(&self) -> DocumentLoader {
        match self.ocr_config() {
            Some(ocr) => DocumentLoader::default().with_extractor("pdf", PdfExtractor::with_ocr(ocr)),
            None => DocumentLoader::default(),
        }
    }

    pub fn session_factory(&self) -> anyhow::Result<SessionFactory> {
        let backends = SessionBackends::new(self.model()?)
            .with_embedder(self.embedder()?)
            .with_loader(self.loader());
        Ok(SessionFactory::new(self.session_config(), backends))
    }
}

/// Builds sessions sharing one set of backends.
#[derive(Clone)]
pub struct SessionFactory {
    config: SessionConfig,
    backends: SessionBackends,
}

impl SessionFactory {
    pub fn new(config: SessionConfig, backends: SessionBackends) -> Self {
        Self { config, backends }
    }

    /// A session writing straight into the configured working directory.
    pub fn shared(&self) -> Session {
        Session::new(self.config.clone(), self.backends.clone())
    }

    /// A session with its own subdirectory of the working directory.
    pub fn isolated(&self) -> Session {
        let id = Uuid::new_v4();
        let mut config = self.config.clone();
        config.working_dir = config.working_dir.join(id.to_string());
        Session::with_id(id, config, self.backends.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        settings: Settings,
    }

    #[test]
    fn defaults_match_reference_behaviour() {
        let harness = Harness::parse_from(["docchat"]);
        let config = harness.settings.session_config();

        assert_eq!(harness.settings.model, DEFAULT_MODEL);
        assert_eq!(config.rebuild_policy, RebuildPolicy::OrderedList);
        assert_eq!(config.metric, DistanceMetric::Euclidean);
        assert_eq!(config.chain.top_k, 4);
        assert!(config.chain.condense_question);
        assert_eq!(config.splitter.chunk_size, 1_000);
        assert_eq!(config.splitter.chunk_overlap, 200);
    }

    #[test]
    fn policies_and_embedders_parse_from_flags() {
        let harness = Harness::parse_from([
            "docchat",
            "--rebuild-policy",
            "name-set",
            "--metric",
            "cosine",
            "--embedder",
            "http",
            "--no-condense",
        ]);

        assert_eq!(harness.settings.rebuild_policy, RebuildPolicy::NameSet);
        assert_eq!(harness.settings.metric, DistanceMetric::Cosine);
        assert_eq!(harness.settings.embedder_kind(), EmbedderKind::Http);
        assert!(!harness.settings.session_config().chain.condense_question);
    }

    #[test]
    fn embeddings_url_selects_the_http_embedder() {
        let harness = Harness::parse_from(["docchat", "--embedder", "ngram"]);
        assert_eq!(harness.settings.embedder_kind(), EmbedderKind::Ngram);

        let harness = Harness::parse_from(["docchat", "--embedding-url", "http://embed:8080/v1"]);
        assert_eq!(harness.settings.embedder_kind(), EmbedderKind::Http);

        let harness = Harness::parse_from([
            "docchat",
            "--embedding-url",
            "http://embed:8080/v1",
            "--embedder",
            "ngram",
        ]);
        assert_eq!(harness.settings.embedder_kind(), EmbedderKind::Ngram);
    }

    #[test]
    fn ocr_is_configured_only_with_an_endpoint() {
        let harness = Harness::parse_from(["docchat", "--ocr-endpoint", "  "]);
        assert!(harness.settings.ocr_config().is_none());

        let harness = Harness::parse_from([
            "docchat",
            "--ocr-endpoint",
            "http://ocr:9000/extract",
            "--ocr-api-key",
            "secret",
        ]);
        let ocr = harness.settings.ocr_config().unwrap();
        assert_eq!(ocr.endpoint, "http://ocr:9000/extract");
        assert_eq!(ocr.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn model_requires_an_api_key() {
        let harness = Harness::parse_from(["docchat", "--api-key", ""]);
        assert!(harness.settings.model().is_err());
    }
}
