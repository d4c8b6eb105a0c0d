pub mod chain;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod memory;
pub mod models;
pub mod session;
pub mod traits;

pub use chain::{answer_prompt, condense_prompt, ChainConfig, ConversationalRetrievalChain, DEFAULT_TOP_K};
pub use chunking::{
    CharacterSplitter, TextWindow, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_SEPARATOR,
};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, HttpEmbedder, HttpEmbedderConfig,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    ChainError, IngestError, ModelError, SearchError, SessionError, NO_DOCUMENTS_MESSAGE,
};
pub use extractor::{
    digest_bytes, docx_xml_to_text, DocxExtractor, OcrEndpointConfig, PdfExtractor, TextExtractor,
};
pub use index::{build_index, InMemoryIndex};
pub use ingest::{load_documents, DocumentLoader};
pub use llm::{ModelConfig, OpenAiCompatibleClient, DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TIMEOUT_SECS};
pub use memory::{ConversationMemory, Turn};
pub use models::{
    Answer, ChatMessage, ChatRecord, Chunk, DistanceMetric, Document, RebuildPolicy, Role,
    ScoredChunk, UploadedFile,
};
pub use session::{Session, SessionBackends, SessionConfig, SessionPhase, UploadOutcome};
pub use traits::{ChatModel, VectorIndex};
