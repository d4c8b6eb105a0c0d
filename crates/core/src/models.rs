use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub source_path: PathBuf,
    pub file_name: String,
    pub checksum: String,
    pub page_count: Option<u32>,
    pub text: String,
    pub loaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub source_path: PathBuf,
    pub file_name: String,
    pub chunk_index: u64,
    pub start_offset: usize,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub distance: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One rendered transcript entry. Only `User` and `Assistant` records are
/// ever appended by a session.
pub type ChatRecord = ChatMessage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub text: String,
    pub standalone_question: String,
    pub sources: Vec<ScoredChunk>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    Cosine,
}

impl std::str::FromStr for DistanceMetric {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Self::Euclidean),
            "cosine" => Ok(Self::Cosine),
            other => Err(format!("unknown distance metric: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RebuildPolicy {
    /// Rebuild whenever the uploaded names differ as an ordered list.
    #[default]
    OrderedList,
    /// Rebuild only when the set of uploaded names differs.
    NameSet,
}

impl RebuildPolicy {
    pub fn requires_rebuild(&self, previous: &[String], current: &[String]) -> bool {
        match self {
            RebuildPolicy::OrderedList => previous != current,
            RebuildPolicy::NameSet => {
                let mut left = previous.to_vec();
                let mut right = current.to_vec();
                left.sort_unstable();
                left.dedup();
                right.sort_unstable();
                right.dedup();
                left != right
            }
        }
    }
}

impl std::str::FromStr for RebuildPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ordered-list" | "list" => Ok(Self::OrderedList),
            "name-set" | "set" => Ok(Self::NameSet),
            other => Err(format!("unknown rebuild policy: {other}")),
        }
    }
}
