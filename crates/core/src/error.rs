use thiserror::Error;

pub const NO_DOCUMENTS_MESSAGE: &str =
    "Please upload at least one PDF or DOCX file before asking a question.";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("docx parse error: {0}")]
    DocxParse(String),

    #[error("ocr failed: {0}")]
    OcrFailed(String),

    #[error("ocr request failed: {0}")]
    OcrHttp(#[from] reqwest::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),
}

impl From<zip::result::ZipError> for IngestError {
    fn from(error: zip::result::ZipError) -> Self {
        IngestError::DocxParse(error.to_string())
    }
}

impl From<quick_xml::Error> for IngestError {
    fn from(error: quick_xml::Error) -> Self {
        IngestError::DocxParse(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("vector dimension {actual} does not match index dimension {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("embedding count {embeddings} doesn't match chunk count {chunks}")]
    CountMismatch { chunks: usize, embeddings: usize },

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("missing api key for {0}")]
    MissingApiKey(String),

    #[error("model endpoint rejected credentials ({status}): {body}")]
    Unauthorized { status: u16, body: String },

    #[error("model endpoint is rate limiting requests: {0}")]
    RateLimited(String),

    #[error("model endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model response had no content")]
    EmptyResponse,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("retrieval failed: {0}")]
    Search(#[from] SearchError),

    #[error("generation failed: {0}")]
    Model(#[from] ModelError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{}", NO_DOCUMENTS_MESSAGE)]
    NoDocuments,

    #[error("question is empty")]
    EmptyQuestion,

    #[error("could not load documents: {0}")]
    Ingest(#[from] IngestError),

    #[error("could not build the vector index: {0}")]
    Search(#[from] SearchError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("could not store uploaded file: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether the session can keep serving after this error. Every variant
    /// leaves session state untouched; only a failing working directory is
    /// treated as fatal.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SessionError::Io(_))
    }
}
