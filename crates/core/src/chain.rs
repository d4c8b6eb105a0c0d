use crate::embeddings::Embedder;
use crate::memory::ConversationMemory;
use crate::traits::{ChatModel, VectorIndex};
use crate::{Answer, ChainError, ChatMessage, ScoredChunk};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_TOP_K: usize = 4;

const CONDENSE_TEMPLATE: &str = "Given the following conversation and a follow up question, \
rephrase the follow up question to be a standalone question, in its original language.";

const ANSWER_TEMPLATE: &str = "Use the following pieces of context to answer the user's question. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainConfig {
    pub top_k: usize,
    pub condense_question: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            condense_question: true,
        }
    }
}

/// Retriever, model client and memory bundled for one index build.
pub struct ConversationalRetrievalChain {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn ChatModel>,
    memory: ConversationMemory,
    config: ChainConfig,
}

impl ConversationalRetrievalChain {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ChatModel>,
        config: ChainConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            model,
            memory: ConversationMemory::new(),
            config,
        }
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// Answers `question` against the index. Memory only grows when the
    /// whole round trip succeeds.
    pub async fn answer(&mut self, question: &str) -> Result<Answer, ChainError> {
        let standalone_question = if self.config.condense_question && !self.memory.is_empty() {
            let prompt = condense_prompt(&self.memory, question);
            self.model.generate(&prompt).await?
        } else {
            question.to_string()
        };

        let query_vector = self.embedder.embed(&standalone_question).await?;
        let sources = self.index.search(&query_vector, self.config.top_k).await?;
        debug!(
            question = %standalone_question,
            hits = sources.len(),
            "retrieved context"
        );

        let prompt = answer_prompt(&sources, &self.memory, question);
        let text = self.model.generate(&prompt).await?;

        self.memory.push(question, text.clone());

        Ok(Answer {
            text,
            standalone_question,
            sources,
        })
    }
}

pub fn condense_prompt(memory: &ConversationMemory, question: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(format!(
        "{CONDENSE_TEMPLATE}\n\nChat History:\n{}\nFollow Up Input: {question}\nStandalone question:",
        memory.render_history()
    ))]
}

pub fn answer_prompt(
    sources: &[ScoredChunk],
    memory: &ConversationMemory,
    question: &str,
) -> Vec<ChatMessage> {
    let context = sources
        .iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut messages = vec![ChatMessage::system(format!(
        "{ANSWER_TEMPLATE}\n----------------\n{context}"
    ))];
    messages.extend(memory.as_messages());
    messages.push(ChatMessage::user(question));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::index::build_index;
    use crate::{Chunk, DistanceMetric, ModelError, Role};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, ModelError>>>,
        prompts: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<String, ModelError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<Vec<ChatMessage>> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
            self.prompts.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ModelError::EmptyResponse))
        }
    }

    fn chunk(index: u64, text: &str) -> Chunk {
        Chunk {
            chunk_id: format!("chunk-{index}"),
            source_path: PathBuf::from("/tmp/manual.pdf"),
            file_name: "manual.pdf".to_string(),
            chunk_index: index,
            start_offset: 0,
            text: text.to_string(),
        }
    }

    async fn chain_with(model: Arc<ScriptedModel>, config: ChainConfig) -> ConversationalRetrievalChain {
        let embedder = Arc::new(CharacterNgramEmbedder::default());
        let index = build_index(
            vec![
                chunk(0, "The hydraulic pump runs at 3000 psi."),
                chunk(1, "Replace the air filter every six months."),
            ],
            embedder.as_ref(),
            DistanceMetric::Euclidean,
        )
        .await
        .unwrap();

        ConversationalRetrievalChain::new(Arc::new(index), embedder, model, config)
    }

    #[tokio::test]
    async fn first_question_skips_condensing() {
        let model = Arc::new(ScriptedModel::new(vec![Ok("3000 psi".to_string())]));
        let mut chain = chain_with(model.clone(), ChainConfig { top_k: 1, condense_question: true }).await;

        let answer = chain.answer("What pressure does the hydraulic pump run at?").await.unwrap();

        assert_eq!(answer.text, "3000 psi");
        assert_eq!(answer.standalone_question, "What pressure does the hydraulic pump run at?");
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].chunk.chunk_index, 0);

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0][0].role, Role::System);
        assert!(prompts[0][0].content.contains("3000 psi"));
    }

    #[tokio::test]
    async fn follow_up_prompts_carry_prior_turns() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok("3000 psi".to_string()),
            Ok("How often is the air filter replaced?".to_string()),
            Ok("Every six months".to_string()),
        ]));
        let mut chain = chain_with(model.clone(), ChainConfig::default()).await;

        chain.answer("What pressure does the pump run at?").await.unwrap();
        let second = chain.answer("And the filter?").await.unwrap();

        assert_eq!(second.standalone_question, "How often is the air filter replaced?");
        assert_eq!(
            chain
                .memory()
                .turns()
                .iter()
                .map(|turn| (turn.question.as_str(), turn.answer.as_str()))
                .collect::<Vec<_>>(),
            vec![
                ("What pressure does the pump run at?", "3000 psi"),
                ("And the filter?", "Every six months"),
            ]
        );

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 3);
        let condense = &prompts[1][0].content;
        assert!(condense.contains("Human: What pressure does the pump run at?"));
        assert!(condense.contains("Assistant: 3000 psi"));
        assert!(condense.contains("Follow Up Input: And the filter?"));

        let answer_prompt = &prompts[2];
        assert_eq!(answer_prompt[1], ChatMessage::user("What pressure does the pump run at?"));
        assert_eq!(answer_prompt[2], ChatMessage::assistant("3000 psi"));
        assert_eq!(answer_prompt.last(), Some(&ChatMessage::user("And the filter?")));
    }

    #[tokio::test]
    async fn model_failure_leaves_memory_untouched() {
        let model = Arc::new(ScriptedModel::new(vec![Err(ModelError::RateLimited(
            "slow down".to_string(),
        ))]));
        let mut chain = chain_with(model, ChainConfig::default()).await;

        let result = chain.answer("What pressure?").await;

        assert!(matches!(result, Err(ChainError::Model(ModelError::RateLimited(_)))));
        assert!(chain.memory().is_empty());
    }

    #[tokio::test]
    async fn condensing_can_be_disabled() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok("first".to_string()),
            Ok("second".to_string()),
        ]));
        let config = ChainConfig {
            top_k: 2,
            condense_question: false,
        };
        let mut chain = chain_with(model.clone(), config).await;

        chain.answer("one").await.unwrap();
        let second = chain.answer("two").await.unwrap();

        assert_eq!(second.standalone_question, "two");
        assert_eq!(model.prompts().len(), 2);
    }
}
