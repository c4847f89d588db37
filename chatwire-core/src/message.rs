use serde::{Deserialize, Serialize};

use crate::file::FileRef;
use crate::tool::ToolCallResponse;

/// Represents the role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Whether a message is conversation content or a context divider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Normal,
    /// Everything before this marker is excluded from the model context
    ContextClear,
}

/// Token accounting for a completed exchange
///
/// `total_tokens` follows the estimation formulas, so it is not always
/// `prompt_tokens + completion_tokens`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64, total_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }
}

/// An attached file, optionally with its content already resolved
///
/// `inline` holds base64 data for images and extracted text otherwise. Request
/// transformers only use what is inlined; they never read files themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileBlock {
    pub file: FileRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<String>,
}

/// A tool invocation recorded in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolBlock {
    pub response: ToolCallResponse,
}

/// One content block of a message, in display order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBlock {
    MainText { content: String },
    Thinking { content: String },
    File(FileBlock),
    Tool(ToolBlock),
}

/// Represents a message in a conversation
///
/// Messages belong to the conversation history; this crate only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub blocks: Vec<MessageBlock>,
    /// Usage recorded when the exchange completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        let blocks = if content.is_empty() {
            Vec::new()
        } else {
            vec![MessageBlock::MainText { content }]
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            kind: MessageKind::Normal,
            blocks,
            usage: None,
        }
    }

    /// Creates a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Creates a new user message
    ///
    /// # Examples
    ///
    /// ```
    /// use chatwire_core::Message;
    ///
    /// let msg = Message::user("Hello, can you help me?");
    /// assert_eq!(msg.main_text(), "Hello, can you help me?");
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Creates a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Creates a context divider
    pub fn context_clear() -> Self {
        Self {
            kind: MessageKind::ContextClear,
            ..Self::with_role(Role::User, "")
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_block(mut self, block: MessageBlock) -> Self {
        self.blocks.push(block);
        self
    }

    #[must_use]
    pub fn with_thinking(self, content: impl Into<String>) -> Self {
        self.with_block(MessageBlock::Thinking {
            content: content.into(),
        })
    }

    #[must_use]
    pub fn with_file(self, file: FileRef) -> Self {
        self.with_block(MessageBlock::File(FileBlock { file, inline: None }))
    }

    #[must_use]
    pub fn with_inline_file(self, file: FileRef, inline: impl Into<String>) -> Self {
        self.with_block(MessageBlock::File(FileBlock {
            file,
            inline: Some(inline.into()),
        }))
    }

    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Main text blocks joined with blank lines
    pub fn main_text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                MessageBlock::MainText { content } => Some(content.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Reasoning text, if the message has any thinking blocks
    pub fn thinking(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .blocks
            .iter()
            .filter_map(|b| match b {
                MessageBlock::Thinking { content } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    pub fn file_blocks(&self) -> impl Iterator<Item = &FileBlock> {
        self.blocks.iter().filter_map(|b| match b {
            MessageBlock::File(f) => Some(f),
            _ => None,
        })
    }

    pub fn tool_blocks(&self) -> impl Iterator<Item = &ToolBlock> {
        self.blocks.iter().filter_map(|b| match b {
            MessageBlock::Tool(t) => Some(t),
            _ => None,
        })
    }

    pub fn is_context_clear(&self) -> bool {
        self.kind == MessageKind::ContextClear
    }
}
