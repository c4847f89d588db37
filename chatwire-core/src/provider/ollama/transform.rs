use tracing::{debug, warn};
use uuid::Uuid;

use super::types::{
    OllamaChatRequest, OllamaChatResponse, OllamaMessage, OllamaRequestOptions, OllamaTool,
    OllamaToolCall, OllamaToolFunctionDefinition,
};
use crate::budget::{ContextPolicy, DefaultContextPolicy};
use crate::chunk::CanonicalChunk;
use crate::file::FileKind;
use crate::message::{Message, Usage};
use crate::model::Model;
use crate::provider::{CoreRequest, RequestTransformed, RequestTransformer, ResponseChunkTransformer};
use crate::tool::{ToolCallRequest, ToolDescriptor, content_with_tools};

/// Converts tools to Ollama function definitions
///
/// Ollama only accepts object schemas; any other tool is skipped.
pub(crate) fn to_ollama_tools(tools: &[ToolDescriptor]) -> Vec<OllamaTool> {
    tools
        .iter()
        .filter(|tool| {
            let ok = tool.input_schema.is_object();
            if !ok {
                warn!("Omitting tool {}: input schema is not an object", tool.name);
            }
            ok
        })
        .map(|tool| OllamaTool {
            type_field: "function".to_string(),
            function: OllamaToolFunctionDefinition {
                name: tool.name.clone(),
                description: (!tool.description.is_empty()).then(|| tool.description.clone()),
                parameters: tool.input_schema.clone(),
            },
        })
        .collect()
}

/// Builds `/api/chat` requests from canonical requests
#[derive(Debug, Clone, Default)]
pub struct OllamaRequestTransformer {
    keep_alive: Option<String>,
}

impl OllamaRequestTransformer {
    pub fn new(keep_alive: Option<String>) -> Self {
        Self { keep_alive }
    }

    fn to_message(message: &Message, model: &Model) -> OllamaMessage {
        let mut content = content_with_tools(&message.blocks);
        let mut images = Vec::new();

        for block in message.file_blocks() {
            let Some(inline) = &block.inline else {
                debug!("File {} has no inline content, skipping", block.file.id);
                continue;
            };
            match block.file.kind {
                FileKind::Image if model.capabilities.vision => images.push(inline.clone()),
                FileKind::Image => debug!("Model {} has no vision, dropping image", model.id),
                FileKind::Text | FileKind::Document => {
                    let name = if block.file.name.is_empty() {
                        block.file.storage_name()
                    } else {
                        block.file.name.clone()
                    };
                    content.push_str(&format!("\n\n---\n\n{name}\n{inline}"));
                }
                FileKind::Other => {}
            }
        }

        OllamaMessage {
            role: message.role.as_str().to_string(),
            content,
            images: (!images.is_empty()).then_some(images),
            ..Default::default()
        }
    }
}

impl RequestTransformer<OllamaChatRequest, OllamaMessage> for OllamaRequestTransformer {
    fn transform(&self, request: &CoreRequest) -> RequestTransformed<OllamaChatRequest, OllamaMessage> {
        let settings = &request.settings;
        let model = &request.model;

        let mut messages = Vec::new();
        let system_prompt = request.system_prompt();
        if !system_prompt.is_empty() {
            messages.push(OllamaMessage::new("system", system_prompt));
        }

        // the new message plus `context_count` prior ones
        let keep = settings.resolved_context_count().saturating_add(1);
        let recent = &request.messages[request.messages.len().saturating_sub(keep)..];
        messages.extend(
            DefaultContextPolicy
                .filter(recent)
                .into_iter()
                .map(|m| Self::to_message(m, model)),
        );

        let tools = (settings.enable_tool_use && model.capabilities.function_calling)
            .then(|| to_ollama_tools(&request.mcp_tools))
            .filter(|tools| !tools.is_empty());

        let think = model
            .capabilities
            .reasoning
            .then(|| settings.reasoning_effort.is_some());

        let options = OllamaRequestOptions {
            temperature: settings.temperature,
            top_p: settings.top_p,
            num_predict: settings.max_tokens,
            num_ctx: None,
        };

        let payload = OllamaChatRequest {
            model: model.id.clone(),
            messages: messages.clone(),
            tools,
            format: None,
            options: (!options.is_empty()).then_some(options),
            stream: settings.stream_output,
            think,
            keep_alive: self.keep_alive.clone(),
        };
        RequestTransformed { payload, messages }
    }
}

/// Maps `/api/chat` responses and stream lines onto canonical chunks
#[derive(Debug, Clone, Copy, Default)]
pub struct OllamaChunkTransformer;

impl OllamaChunkTransformer {
    /// Ollama sends no call ids, so one is derived from the response timestamp,
    /// the call's position and its name. The same chunk always yields the same ids.
    fn tool_requests(created_at: &str, calls: &[OllamaToolCall]) -> Vec<ToolCallRequest> {
        calls
            .iter()
            .enumerate()
            .map(|(index, call)| ToolCallRequest {
                id: call.id.clone().unwrap_or_else(|| {
                    let key = format!("{created_at}/{index}/{}", call.function.name);
                    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
                }),
                name: call.function.name.clone(),
                arguments: call.function.arguments.clone(),
            })
            .collect()
    }
}

impl ResponseChunkTransformer<OllamaChatResponse> for OllamaChunkTransformer {
    fn transform(&self, chunk: &OllamaChatResponse) -> Vec<CanonicalChunk> {
        if let Some(message) = &chunk.error {
            return vec![CanonicalChunk::Error {
                message: message.clone(),
            }];
        }

        let mut chunks = Vec::new();
        if let Some(message) = &chunk.message {
            if let Some(thinking) = message.thinking.as_ref().filter(|t| !t.is_empty()) {
                chunks.push(CanonicalChunk::ThinkingDelta {
                    text: thinking.clone(),
                });
            }
            if !message.content.is_empty() {
                chunks.push(CanonicalChunk::TextDelta {
                    text: message.content.clone(),
                });
            }
            if let Some(calls) = message.tool_calls.as_ref().filter(|c| !c.is_empty()) {
                chunks.push(CanonicalChunk::ToolCallCreated {
                    tool_calls: Self::tool_requests(&chunk.created_at, calls),
                });
            }
        }

        if chunk.done {
            let usage = match (chunk.prompt_eval_count, chunk.eval_count) {
                (None, None) => None,
                (prompt, completion) => {
                    let prompt = prompt.unwrap_or_default();
                    let completion = completion.unwrap_or_default();
                    Some(Usage::new(prompt, completion, prompt + completion))
                }
            };
            chunks.push(CanonicalChunk::StreamEnd {
                finish_reason: chunk.done_reason.clone(),
                usage,
            });
        }
        chunks
    }
}
