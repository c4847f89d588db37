//! Usage estimation for prompts, messages and conversation history.

use std::sync::Arc;
use tracing::{debug, error, instrument};

use crate::config::AssistantSettings;
use crate::file::{FileKind, FileReader, FileRef};
use crate::message::{FileBlock, Message, Role, Usage};
use crate::token::{
    corrected_image_tokens, estimate_image_tokens, estimate_text_files_tokens,
    estimate_text_tokens,
};

/// Decides which of the most recent messages take part in the model context
pub trait ContextPolicy: Send + Sync {
    fn filter<'a>(&self, messages: &'a [Message]) -> Vec<&'a Message>;
}

/// Keeps messages after the last context divider that have content
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultContextPolicy;

impl ContextPolicy for DefaultContextPolicy {
    fn filter<'a>(&self, messages: &'a [Message]) -> Vec<&'a Message> {
        let start = messages
            .iter()
            .rposition(Message::is_context_clear)
            .map_or(0, |i| i + 1);
        messages[start..]
            .iter()
            .filter(|m| !m.is_context_clear() && !m.blocks.is_empty())
            .collect()
    }
}

/// Estimates usage of one complete message
///
/// Main text and reasoning are joined with a single space. Image blocks add
/// their size estimate minus the fixed overlap. Prompt and completion tokens
/// both carry the text estimate.
pub fn estimate_message_usage(message: &Message) -> Usage {
    let image_tokens: u64 = message
        .file_blocks()
        .filter(|b| b.file.kind == FileKind::Image)
        .map(|b| estimate_image_tokens(&b.file))
        .sum();

    let mut combined = message.main_text();
    if let Some(thinking) = message.thinking() {
        combined.push(' ');
        combined.push_str(&thinking);
    }
    let tokens = estimate_text_tokens(&combined);

    Usage::new(tokens, tokens, tokens + corrected_image_tokens(image_tokens))
}

/// Budgeting entry points that may need to read attached files
pub struct ContextBudgeter {
    reader: Arc<dyn FileReader>,
    policy: Box<dyn ContextPolicy>,
}

impl ContextBudgeter {
    pub fn new(reader: Arc<dyn FileReader>) -> Self {
        Self {
            reader,
            policy: Box::new(DefaultContextPolicy),
        }
    }

    #[must_use]
    pub fn with_policy<P: ContextPolicy + 'static>(mut self, policy: P) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Estimates the usage of what the user is about to send
    ///
    /// `total = text + (images > 0 ? images - 7 : 0) + text files`
    ///
    /// # Examples
    ///
    /// ```
    /// use chatwire_core::budget::ContextBudgeter;
    /// use chatwire_core::{FsFileReader, Usage};
    /// use std::sync::Arc;
    ///
    /// # async fn example() {
    /// let budgeter = ContextBudgeter::new(Arc::new(FsFileReader::new("/tmp")));
    /// let usage = budgeter.estimate_user_prompt_usage(Some(""), &[]).await;
    /// assert_eq!(usage, Usage::default());
    /// # }
    /// ```
    pub async fn estimate_user_prompt_usage(&self, content: Option<&str>, files: &[FileRef]) -> Usage {
        let image_tokens: u64 = files
            .iter()
            .filter(|f| f.kind == FileKind::Image)
            .map(|f| f.tokens.unwrap_or_else(|| estimate_image_tokens(f)))
            .sum();

        let text_files: Vec<FileRef> = files
            .iter()
            .filter(|f| f.kind.is_readable())
            .cloned()
            .collect();
        let file_tokens = estimate_text_files_tokens(&text_files, self.reader.as_ref()).await;

        let tokens = estimate_text_tokens(content.unwrap_or_default());
        Usage::new(
            tokens,
            tokens,
            tokens + corrected_image_tokens(image_tokens) + file_tokens,
        )
    }

    /// Estimates the usage of an exchange whose last message is the output
    ///
    /// Everything before the last message is the prompt side.
    pub async fn estimate_messages_usage(
        &self,
        settings: &AssistantSettings,
        messages: &[Message],
        topic_prompt: Option<&str>,
    ) -> Usage {
        let Some((output, history)) = messages.split_last() else {
            return Usage::default();
        };
        let prompt_tokens = self
            .estimate_history_tokens(settings, history, topic_prompt)
            .await;
        let completion_tokens = estimate_message_usage(output).completion_tokens;

        Usage::new(
            prompt_tokens,
            completion_tokens,
            prompt_tokens + completion_tokens,
        )
    }

    /// Estimates the prompt tokens the recent history will cost
    ///
    /// Messages with recorded usage are summed directly (users by total,
    /// assistants by completion). The rest, with their attached text files,
    /// are joined with the system and topic prompts and estimated once.
    #[instrument(skip_all, fields(messages = messages.len()))]
    pub async fn estimate_history_tokens(
        &self,
        settings: &AssistantSettings,
        messages: &[Message],
        topic_prompt: Option<&str>,
    ) -> u64 {
        let count = settings.resolved_context_count();
        let recent = &messages[messages.len().saturating_sub(count)..];
        let in_context = self.policy.filter(recent);

        let usage_tokens: u64 = in_context
            .iter()
            .filter_map(|m| m.usage.map(|u| (m.role, u)))
            .map(|(role, usage)| match role {
                Role::User => usage.total_tokens,
                _ => usage.completion_tokens,
            })
            .sum();

        let mut contents = Vec::new();
        for message in in_context.iter().filter(|m| m.usage.is_none()) {
            contents.push(message.main_text());
            for block in message.file_blocks() {
                contents.push(self.file_content(block).await);
            }
        }
        debug!(
            "History: {} usage tokens, {} items to estimate",
            usage_tokens,
            contents.len()
        );

        let prompt = match topic_prompt {
            Some(topic) if !topic.is_empty() => format!("{}\n{}", settings.prompt, topic),
            _ => settings.prompt.clone(),
        };
        estimate_text_tokens(&(prompt + &contents.join("\n"))) + usage_tokens
    }

    async fn file_content(&self, block: &FileBlock) -> String {
        if block.file.kind != FileKind::Text {
            return String::new();
        }
        if let Some(inline) = &block.inline {
            return inline.clone();
        }
        match self.reader.read(&block.file).await {
            Ok(content) => content,
            Err(e) => {
                error!("Skipping unreadable file {}: {}", block.file.id, e);
                String::new()
            }
        }
    }
}
