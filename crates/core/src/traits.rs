use crate::{ChatMessage, ModelError, ScoredChunk, SearchError};
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, SearchError>;
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;
}
