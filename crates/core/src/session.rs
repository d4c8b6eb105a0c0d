use crate::chain::{ChainConfig, ConversationalRetrievalChain};
use crate::chunking::CharacterSplitter;
use crate::embeddings::{CharacterNgramEmbedder, Embedder};
use crate::index::build_index;
use crate::ingest::DocumentLoader;
use crate::memory::ConversationMemory;
use crate::traits::{ChatModel, VectorIndex};
use crate::{
    Answer, ChatRecord, DistanceMetric, IngestError, RebuildPolicy, Role, SessionError,
    UploadedFile,
};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub working_dir: PathBuf,
    pub rebuild_policy: RebuildPolicy,
    pub metric: DistanceMetric,
    pub chain: ChainConfig,
    pub splitter: CharacterSplitter,
}

impl SessionConfig {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            rebuild_policy: RebuildPolicy::default(),
            metric: DistanceMetric::default(),
            chain: ChainConfig::default(),
            splitter: CharacterSplitter::default(),
        }
    }
}

#[derive(Clone)]
pub struct SessionBackends {
    pub loader: DocumentLoader,
    pub embedder: Arc<dyn Embedder>,
    pub model: Arc<dyn ChatModel>,
}

impl SessionBackends {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            loader: DocumentLoader::default(),
            embedder: Arc::new(CharacterNgramEmbedder::default()),
            model,
        }
    }

    pub fn with_loader(mut self, loader: DocumentLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Empty,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UploadOutcome {
    Rebuilt {
        documents: usize,
        chunks: usize,
        generation: u64,
    },
    Unchanged,
    Cleared,
}

struct Build {
    key: Vec<String>,
    chain: ConversationalRetrievalChain,
}

/// One user's conversation: uploaded files, the index/chain built from them
/// and the rendered transcript.
pub struct Session {
    id: Uuid,
    config: SessionConfig,
    backends: SessionBackends,
    files: Vec<String>,
    build: Option<Build>,
    transcript: Vec<ChatRecord>,
    generation: u64,
    phase: SessionPhase,
}

impl Session {
    pub fn new(config: SessionConfig, backends: SessionBackends) -> Self {
        Self::with_id(Uuid::new_v4(), config, backends)
    }

    pub fn with_id(id: Uuid, config: SessionConfig, backends: SessionBackends) -> Self {
        Self {
            id,
            config,
            backends,
            files: Vec::new(),
            build: None,
            transcript: Vec::new(),
            generation: 0,
            phase: SessionPhase::Empty,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn working_dir(&self) -> &Path {
        &self.config.working_dir
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn build_key(&self) -> Option<&[String]> {
        self.build.as_ref().map(|build| build.key.as_slice())
    }

    /// Number of index builds performed so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn index(&self) -> Option<&Arc<dyn VectorIndex>> {
        self.build.as_ref().map(|build| build.chain.index())
    }

    pub fn memory(&self) -> Option<&ConversationMemory> {
        self.build.as_ref().map(|build| build.chain.memory())
    }

    pub fn transcript(&self) -> &[ChatRecord] {
        &self.transcript
    }

    /// Replaces the current upload set. Files are written to the working
    /// directory; the index and chain are rebuilt only when the rebuild
    /// policy says the names differ from the last build. On error the
    /// session is left as it was.
    pub async fn upload(&mut self, files: Vec<UploadedFile>) -> Result<UploadOutcome, SessionError> {
        if files.is_empty() {
            self.files.clear();
            self.phase = SessionPhase::Empty;
            info!(session = %self.id, "upload set cleared");
            return Ok(UploadOutcome::Cleared);
        }

        tokio::fs::create_dir_all(&self.config.working_dir).await?;

        let mut names = Vec::with_capacity(files.len());
        let mut paths = Vec::with_capacity(files.len());
        for file in &files {
            let name = stored_file_name(&file.name)?;
            let path = self.config.working_dir.join(&name);
            tokio::fs::write(&path, &file.bytes).await?;
            debug!(session = %self.id, path = %path.display(), bytes = file.bytes.len(), "stored upload");
            names.push(name);
            paths.push(path);
        }

        let needs_rebuild = match &self.build {
            None => true,
            Some(build) => self.config.rebuild_policy.requires_rebuild(&build.key, &names),
        };

        if !needs_rebuild {
            self.files = names;
            self.phase = SessionPhase::Ready;
            debug!(session = %self.id, "upload set unchanged, keeping index");
            return Ok(UploadOutcome::Unchanged);
        }

        info!(session = %self.id, files = ?names, "indexing uploads");

        match self.build_chain(paths).await {
            Ok((chain, documents, chunks)) => {
                self.generation += 1;
                self.build = Some(Build {
                    key: names.clone(),
                    chain,
                });
                self.files = names;
                self.phase = SessionPhase::Ready;
                info!(
                    session = %self.id,
                    documents,
                    chunks,
                    generation = self.generation,
                    "index rebuilt"
                );
                Ok(UploadOutcome::Rebuilt {
                    documents,
                    chunks,
                    generation: self.generation,
                })
            }
            Err(error) => {
                warn!(session = %self.id, %error, "indexing failed");
                Err(error)
            }
        }
    }

    async fn build_chain(
        &self,
        paths: Vec<PathBuf>,
    ) -> Result<(ConversationalRetrievalChain, usize, usize), SessionError> {
        let loader = self.backends.loader.clone();
        let documents = tokio::task::spawn_blocking(move || loader.load_documents(paths.as_slice()))
            .await
            .map_err(|error| IngestError::Io(std::io::Error::other(error)))??;

        let chunks = self.config.splitter.split_documents(&documents)?;
        let chunk_count = chunks.len();

        let index = build_index(chunks, self.backends.embedder.as_ref(), self.config.metric).await?;
        let chain = ConversationalRetrievalChain::new(
            Arc::new(index),
            self.backends.embedder.clone(),
            self.backends.model.clone(),
            self.config.chain,
        );

        Ok((chain, documents.len(), chunk_count))
    }

    /// Answers a question and appends it and the answer to the transcript.
    /// Nothing is recorded when the question is rejected or the chain fails.
    pub async fn ask(&mut self, question: &str) -> Result<Answer, SessionError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::EmptyQuestion);
        }

        if self.files.is_empty() {
            return Err(SessionError::NoDocuments);
        }

        let build = self.build.as_mut().ok_or(SessionError::NoDocuments)?;
        let answer = match build.chain.answer(question).await {
            Ok(answer) => answer,
            Err(error) => {
                warn!(session = %self.id, %error, "question failed");
                return Err(error.into());
            }
        };

        self.transcript.push(ChatRecord::user(question));
        self.transcript.push(ChatRecord::assistant(answer.text.clone()));

        Ok(answer)
    }

    /// The full transcript, oldest first.
    pub fn render(&self) -> &[ChatRecord] {
        &self.transcript
    }

    pub fn render_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        for record in &self.transcript {
            let label = match record.role {
                Role::User => "you",
                Role::Assistant => "assistant",
                Role::System => "system",
            };
            writeln!(out, "{label}> {}", record.content)?;
        }
        Ok(())
    }

    /// Ends the session, optionally deleting its working directory.
    pub async fn close(self, remove_files: bool) -> Result<(), SessionError> {
        info!(session = %self.id, turns = self.transcript.len() / 2, "session closed");
        if remove_files && tokio::fs::try_exists(&self.config.working_dir).await? {
            tokio::fs::remove_dir_all(&self.config.working_dir).await?;
        }
        Ok(())
    }
}

fn stored_file_name(name: &str) -> Result<String, IngestError> {
    Path::new(name)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(name.to_string()))
}
