use crate::ChatMessage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

/// Append-only question/answer history owned by one chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationMemory {
    turns: Vec<Turn>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.turns.push(Turn {
            question: question.into(),
            answer: answer.into(),
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn as_messages(&self) -> Vec<ChatMessage> {
        self.turns
            .iter()
            .flat_map(|turn| {
                [
                    ChatMessage::user(turn.question.clone()),
                    ChatMessage::assistant(turn.answer.clone()),
                ]
            })
            .collect()
    }

    pub fn render_history(&self) -> String {
        self.turns
            .iter()
            .map(|turn| format!("Human: {}\nAssistant: {}", turn.question, turn.answer))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
