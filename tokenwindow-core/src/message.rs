use serde::{Deserialize, Serialize};

use crate::tokens::TokenCounter;

/// Role of a chat message as presented by the client.
///
/// Deserialization is the rejection point for unknown roles: anything outside
/// system/user/assistant fails before it reaches the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message of the client's view of the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Originator hint. `"api"` marks messages arriving from an external API
    /// caller; this switches prompt selection to the external variants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            source: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// One cache-tagged text block of the rendered system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    pub text: String,
    pub cache_control: bool,
}

/// The system prompt sent upstream. Ordinarily a single cached block; a
/// conversation with secondary system content renders as two blocks so the
/// provider can cache them independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPrompt {
    blocks: Vec<SystemBlock>,
}

impl SystemPrompt {
    pub fn single(text: String) -> Self {
        Self {
            blocks: vec![SystemBlock {
                text,
                cache_control: true,
            }],
        }
    }

    pub fn with_secondary(primary: String, secondary: String) -> Self {
        Self {
            blocks: vec![
                SystemBlock {
                    text: primary,
                    cache_control: true,
                },
                SystemBlock {
                    text: secondary,
                    cache_control: true,
                },
            ],
        }
    }

    pub fn blocks(&self) -> &[SystemBlock] {
        &self.blocks
    }

    /// Concatenated text of all blocks, used for token accounting.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn token_count(&self, counter: &dyn TokenCounter) -> u32 {
        self.blocks
            .iter()
            .map(|b| counter.count_tokens(&b.text))
            .sum()
    }
}

/// Result of one `process_request` turn: the rewritten history and the
/// system prompt to send upstream with it.
#[derive(Debug, Clone)]
pub struct TurnOutput {
    pub messages: Vec<ChatMessage>,
    pub system_prompt: SystemPrompt,
}

/// Prefix-cache accounting for the most recent turn, split at the breakpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub cache_creation_input_tokens: u32,
    pub cache_read_input_tokens: u32,
}
