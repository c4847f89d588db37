use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::chunk::CanonicalChunk;
use crate::config::AssistantSettings;
use crate::error::Result;
use crate::message::Message;
use crate::model::{Model, SdkModel};
use crate::tool::{McpCallToolResponse, ToolCallResponse, ToolDescriptor};

pub mod ollama;

/// Everything a provider needs to build one chat request
#[derive(Debug, Clone)]
pub struct CoreRequest {
    /// Conversation so far, oldest first, ending with the new user message
    pub messages: Vec<Message>,
    pub model: Model,
    pub settings: AssistantSettings,
    /// Tools offered to the model
    pub mcp_tools: Vec<ToolDescriptor>,
    /// Topic-specific prompt appended to the assistant prompt
    pub topic_prompt: Option<String>,
}

impl CoreRequest {
    pub fn new(model: Model, messages: Vec<Message>) -> Self {
        Self {
            messages,
            model,
            settings: AssistantSettings::default(),
            mcp_tools: Vec::new(),
            topic_prompt: None,
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: AssistantSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.mcp_tools = tools;
        self
    }

    #[must_use]
    pub fn with_topic_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.topic_prompt = Some(prompt.into());
        self
    }

    /// Assistant prompt followed by the topic prompt, newline separated
    pub fn system_prompt(&self) -> String {
        match self.topic_prompt.as_deref() {
            Some(topic) if !topic.is_empty() && !self.settings.prompt.is_empty() => {
                format!("{}\n{}", self.settings.prompt, topic)
            }
            Some(topic) if !topic.is_empty() => topic.to_string(),
            _ => self.settings.prompt.clone(),
        }
    }
}

/// Per-call options for `create_completions`
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Return a lazy chunk stream instead of a complete response
    pub stream: bool,
    /// Aborts the call, or ends the stream it produced
    pub cancel: CancellationToken,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn streaming(cancel: CancellationToken) -> Self {
        Self {
            stream: true,
            cancel,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateImageParams {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    /// e.g. `1024x1024`
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default = "default_image_count")]
    pub n: u32,
}

fn default_image_count() -> u32 {
    1
}

/// Output of a request transformer
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTransformed<P, M> {
    /// Complete vendor request body
    pub payload: P,
    /// Vendor messages inside `payload`, for follow-up tool rounds
    pub messages: Vec<M>,
}

/// Maps a canonical request onto vendor request parameters
///
/// Implementations are pure: no I/O, and the same request always yields the
/// same parameters.
pub trait RequestTransformer<P, M>: Send + Sync {
    fn transform(&self, request: &CoreRequest) -> RequestTransformed<P, M>;
}

/// Maps one raw vendor stream chunk onto canonical chunks, in order
///
/// Implementations hold no per-stream state, so one transformer can serve
/// many streams at once.
pub trait ResponseChunkTransformer<C>: Send + Sync {
    fn transform(&self, chunk: &C) -> Vec<CanonicalChunk>;
}

/// Contract every vendor client implements
///
/// The orchestration layer only talks to this trait. Associated types carry
/// the vendor's own shapes; everything crossing the boundary is canonical.
/// An operation the vendor cannot offer at all fails with
/// [`Error::NotImplemented`](crate::Error::NotImplemented); one it offers but
/// cannot serve for a given request fails with
/// [`Error::NotSupported`](crate::Error::NotSupported).
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Vendor SDK handle
    type Sdk: Send + Sync;
    /// Request parameters
    type Params: Send + Sync;
    /// Non-streaming output, or a lazy chunk stream when streaming
    type RawOutput: Send;
    /// One raw stream chunk
    type RawChunk: Send + 'static;
    /// One vendor message
    type MessageParam: Clone + Send + Sync;
    /// A tool call as the vendor reports it
    type ToolCall: Send + Sync;
    /// A tool definition as the vendor accepts it
    type Tool: Send + Sync;

    /// Provider id, e.g. `ollama`
    fn provider_id(&self) -> &str;

    /// Sends a chat request
    ///
    /// # Errors
    ///
    /// `Provider`/`Request` on transport, authentication or vendor failures,
    /// `NotSupported` when the model cannot serve the request (e.g. tools on
    /// a model without function calling).
    async fn create_completions(
        &self,
        params: Self::Params,
        options: RequestOptions,
    ) -> Result<Self::RawOutput>;

    /// Generates images, returning URLs or base64 data
    async fn generate_image(&self, params: GenerateImageParams) -> Result<Vec<String>>;

    /// Width of the embedding vectors a model produces
    ///
    /// # Errors
    ///
    /// `UnknownModel` when the model is not recognized.
    async fn get_embedding_dimensions(&self, model: Option<&Model>) -> Result<usize>;

    /// Current model catalog; an empty catalog is not an error
    async fn list_models(&self) -> Result<Vec<SdkModel>>;

    /// The SDK handle, built on first use and reused afterwards
    async fn sdk_instance(&self) -> Result<&Self::Sdk>;

    fn request_transformer(&self) -> Arc<dyn RequestTransformer<Self::Params, Self::MessageParam>>;

    fn response_chunk_transformer(&self) -> Arc<dyn ResponseChunkTransformer<Self::RawChunk>>;

    /// Converts tools to the vendor's schema, omitting ones it cannot express
    fn convert_mcp_tools_to_sdk_tools(&self, tools: &[ToolDescriptor]) -> Vec<Self::Tool>;

    /// Finds the tool a vendor call refers to; `None` when it is not registered
    fn convert_sdk_tool_call_to_mcp<'a>(
        &self,
        call: &Self::ToolCall,
        tools: &'a [ToolDescriptor],
    ) -> Option<&'a ToolDescriptor>;

    /// Canonical response record for a vendor call, ready for execution
    fn convert_sdk_tool_call_to_mcp_tool_response(
        &self,
        call: &Self::ToolCall,
        tool: &ToolDescriptor,
    ) -> ToolCallResponse;

    /// Next round's messages: history, then the assistant turn with its tool
    /// calls, then the tool results, in the order the vendor requires
    fn build_sdk_messages(
        &self,
        history: &[Self::MessageParam],
        last_output: &str,
        tool_results: &[Self::MessageParam],
        tool_calls: Option<&[Self::ToolCall]>,
    ) -> Vec<Self::MessageParam>;

    /// Token estimate for one vendor message
    fn estimate_message_tokens(&self, message: &Self::MessageParam) -> u64;

    /// Vendor message carrying an executed tool's result
    fn convert_mcp_tool_response_to_sdk_message_param(
        &self,
        response: &ToolCallResponse,
        result: &McpCallToolResponse,
        model: &Model,
    ) -> Self::MessageParam;

    /// The message list inside a request payload
    fn extract_messages_from_sdk_payload<'a>(
        &self,
        payload: &'a Self::Params,
    ) -> &'a [Self::MessageParam];
}
