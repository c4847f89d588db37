//! Reference provider for a local or remote Ollama server

mod ndjson;
mod sdk;
mod transform;
mod types;

pub use sdk::{OllamaApiError, OllamaSdk};
pub use transform::{OllamaChunkTransformer, OllamaRequestTransformer};
pub use types::{
    OllamaChatRequest, OllamaChatResponse, OllamaEmbedResponse, OllamaFunctionCall, OllamaMessage,
    OllamaModelDetails, OllamaModelTag, OllamaRequestOptions, OllamaTagsResponse, OllamaTool,
    OllamaToolCall, OllamaToolFunctionDefinition,
};

use async_trait::async_trait;
use futures::stream;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::chunk::{ChunkStream, RawChunkStream, canonicalize};
use crate::config::ProviderClientConfig;
use crate::error::{Error, Result};
use crate::model::{Model, SdkModel};
use crate::provider::{
    CoreRequest, GenerateImageParams, ProviderClient, RequestOptions, RequestTransformer,
    ResponseChunkTransformer,
};
use crate::token::{IMAGE_BYTES_PER_TOKEN, estimate_text_tokens};
use crate::tool::{
    McpCallToolResponse, ToolCallResponse, ToolDescriptor, find_tool, wrap_tool_result,
};

/// Embedding widths of popular Ollama embedding models, by base name
const KNOWN_EMBEDDING_DIMENSIONS: &[(&str, usize)] = &[
    ("nomic-embed-text", 768),
    ("mxbai-embed-large", 1024),
    ("all-minilm", 384),
    ("bge-m3", 1024),
    ("bge-large", 1024),
    ("snowflake-arctic-embed", 1024),
];

const EMBEDDING_PROBE: &str = "dimension probe";

/// What `/api/chat` returned
pub enum OllamaOutput {
    Complete(OllamaChatResponse),
    Stream(RawChunkStream<OllamaChatResponse>),
}

impl std::fmt::Debug for OllamaOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(response) => f.debug_tuple("Complete").field(response).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// [`ProviderClient`] for Ollama's native API
pub struct OllamaClient {
    config: ProviderClientConfig,
    sdk: OnceCell<OllamaSdk>,
}

impl OllamaClient {
    pub fn new(config: ProviderClientConfig) -> Self {
        Self {
            config,
            sdk: OnceCell::new(),
        }
    }

    /// Client configured from `OLLAMA_HOST` and `OLLAMA_API_KEY`
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(ProviderClientConfig::ollama_from_env()?))
    }

    pub fn config(&self) -> &ProviderClientConfig {
        &self.config
    }

    /// Transforms, sends and canonicalizes a request in one step
    ///
    /// Non-streaming settings still produce a stream, holding the chunks of
    /// the complete response.
    #[instrument(skip_all, fields(model = %request.model.id))]
    pub async fn stream_completions(
        &self,
        request: &CoreRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream> {
        let params = self.request_transformer().transform(request).payload;
        let options = RequestOptions {
            stream: params.stream,
            ..RequestOptions::streaming(cancel.clone())
        };
        let transformer = self.response_chunk_transformer();

        Ok(match self.create_completions(params, options).await? {
            OllamaOutput::Stream(raw) => canonicalize(raw, transformer, cancel),
            OllamaOutput::Complete(response) => {
                ChunkStream::new(stream::iter(transformer.transform(&response)), cancel)
            }
        })
    }

    fn known_embedding_dimensions(model_id: &str) -> Option<usize> {
        let base = model_id.split(':').next().unwrap_or(model_id);
        KNOWN_EMBEDDING_DIMENSIONS
            .iter()
            .find(|(name, _)| *name == base)
            .map(|(_, dims)| *dims)
    }
}

#[async_trait]
impl ProviderClient for OllamaClient {
    type Sdk = OllamaSdk;
    type Params = OllamaChatRequest;
    type RawOutput = OllamaOutput;
    type RawChunk = OllamaChatResponse;
    type MessageParam = OllamaMessage;
    type ToolCall = OllamaToolCall;
    type Tool = OllamaTool;

    fn provider_id(&self) -> &str {
        &self.config.id
    }

    #[instrument(skip_all, fields(model = %params.model, stream = options.stream))]
    async fn create_completions(
        &self,
        mut params: OllamaChatRequest,
        options: RequestOptions,
    ) -> Result<OllamaOutput> {
        let wants_tools = params.tools.as_ref().is_some_and(|t| !t.is_empty());
        if wants_tools
            && self
                .config
                .model(&params.model)
                .is_some_and(|m| !m.capabilities.function_calling)
        {
            return Err(Error::NotSupported(format!(
                "{} does not support tool calling",
                params.model
            )));
        }

        info!("Creating chat completion with Ollama");
        debug!("Number of messages: {}", params.messages.len());
        let sdk = self.sdk_instance().await?;
        params.stream = options.stream;

        let call = async {
            if options.stream {
                sdk.chat_stream(&params, options.timeout)
                    .await
                    .map(OllamaOutput::Stream)
            } else {
                sdk.chat(&params, options.timeout)
                    .await
                    .map(OllamaOutput::Complete)
            }
        };
        tokio::select! {
            _ = options.cancel.cancelled() => Err(Error::Cancelled),
            output = call => output,
        }
    }

    async fn generate_image(&self, params: GenerateImageParams) -> Result<Vec<String>> {
        Err(Error::NotSupported(format!(
            "{} cannot generate images with {}",
            self.config.id, params.model
        )))
    }

    #[instrument(skip_all, fields(model = ?model.map(|m| &m.id)))]
    async fn get_embedding_dimensions(&self, model: Option<&Model>) -> Result<usize> {
        let model = model.ok_or_else(|| Error::UnknownModel("no embedding model given".into()))?;
        if let Some(dims) = model
            .embedding_dimensions
            .or_else(|| Self::known_embedding_dimensions(&model.id))
        {
            return Ok(dims);
        }

        debug!("Probing embedding width of {}", model.id);
        let response = self.sdk_instance().await?.embed(&model.id, EMBEDDING_PROBE).await?;
        response
            .embeddings
            .first()
            .map(Vec::len)
            .filter(|dims| *dims > 0)
            .ok_or_else(|| Error::UnknownModel(format!("{} returned no embeddings", model.id)))
    }

    async fn list_models(&self) -> Result<Vec<SdkModel>> {
        let tags = self.sdk_instance().await?.tags().await?;
        debug!("Ollama lists {} models", tags.models.len());
        Ok(tags
            .models
            .into_iter()
            .map(|tag| SdkModel {
                id: tag.name.clone(),
                name: tag.name,
                owned_by: Some(self.config.id.clone()),
                family: tag.details.and_then(|d| d.family),
                size_bytes: Some(tag.size),
            })
            .collect())
    }

    async fn sdk_instance(&self) -> Result<&OllamaSdk> {
        self.sdk
            .get_or_try_init(|| async {
                debug!("Creating Ollama SDK for {}", self.config.api_host);
                OllamaSdk::new(&self.config)
            })
            .await
    }

    fn request_transformer(&self) -> Arc<dyn RequestTransformer<OllamaChatRequest, OllamaMessage>> {
        Arc::new(OllamaRequestTransformer::new(self.config.keep_alive.clone()))
    }

    fn response_chunk_transformer(&self) -> Arc<dyn ResponseChunkTransformer<OllamaChatResponse>> {
        Arc::new(OllamaChunkTransformer)
    }

    fn convert_mcp_tools_to_sdk_tools(&self, tools: &[ToolDescriptor]) -> Vec<OllamaTool> {
        transform::to_ollama_tools(tools)
    }

    fn convert_sdk_tool_call_to_mcp<'a>(
        &self,
        call: &OllamaToolCall,
        tools: &'a [ToolDescriptor],
    ) -> Option<&'a ToolDescriptor> {
        let tool = find_tool(tools, &call.function.name);
        if tool.is_none() {
            warn!("Model called unregistered tool {}", call.function.name);
        }
        tool
    }

    fn convert_sdk_tool_call_to_mcp_tool_response(
        &self,
        call: &OllamaToolCall,
        tool: &ToolDescriptor,
    ) -> ToolCallResponse {
        ToolCallResponse::pending(tool.clone(), call.function.arguments.clone(), call.id.clone())
    }

    fn build_sdk_messages(
        &self,
        history: &[OllamaMessage],
        last_output: &str,
        tool_results: &[OllamaMessage],
        tool_calls: Option<&[OllamaToolCall]>,
    ) -> Vec<OllamaMessage> {
        let mut messages = history.to_vec();
        let tool_calls = tool_calls.filter(|c| !c.is_empty());
        if !last_output.is_empty() || tool_calls.is_some() {
            messages.push(OllamaMessage {
                tool_calls: tool_calls.map(<[_]>::to_vec),
                ..OllamaMessage::new("assistant", last_output)
            });
        }
        messages.extend_from_slice(tool_results);
        messages
    }

    fn estimate_message_tokens(&self, message: &OllamaMessage) -> u64 {
        let text = estimate_text_tokens(&message.content)
            + message.thinking.as_deref().map_or(0, estimate_text_tokens);
        // base64 carries 3 bytes per 4 characters
        let images: u64 = message
            .images
            .iter()
            .flatten()
            .map(|data| (data.len() as u64 * 3 / 4) / IMAGE_BYTES_PER_TOKEN)
            .sum();
        text + images
    }

    fn convert_mcp_tool_response_to_sdk_message_param(
        &self,
        response: &ToolCallResponse,
        result: &McpCallToolResponse,
        model: &Model,
    ) -> OllamaMessage {
        if !model.capabilities.function_calling {
            return OllamaMessage::new(
                "user",
                wrap_tool_result(&response.tool.name, &response.arguments, result),
            );
        }

        let images: Vec<String> = if model.capabilities.vision {
            result.images().map(str::to_string).collect()
        } else {
            Vec::new()
        };
        OllamaMessage {
            images: (!images.is_empty()).then_some(images),
            tool_name: Some(response.tool.name.clone()),
            ..OllamaMessage::new("tool", result.joined_text())
        }
    }

    fn extract_messages_from_sdk_payload<'a>(
        &self,
        payload: &'a OllamaChatRequest,
    ) -> &'a [OllamaMessage] {
        &payload.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> OllamaClient {
        let config = ProviderClientConfig::new("ollama", "http://localhost:11434")
            .unwrap()
            .with_model(Model::new("ollama", "gemma"));
        OllamaClient::new(config)
    }

    fn weather_call() -> OllamaToolCall {
        OllamaToolCall {
            id: Some("call-1".into()),
            function: OllamaFunctionCall {
                name: "get_weather".into(),
                arguments: json!({"city": "Paris"}),
            },
        }
    }

    fn weather_tool() -> ToolDescriptor {
        ToolDescriptor::new("get_weather", "Current weather", json!({"type": "object"}))
    }

    #[tokio::test]
    async fn test_sdk_built_once() {
        let client = client();
        let first = client.sdk_instance().await.unwrap() as *const OllamaSdk;
        let second = client.sdk_instance().await.unwrap() as *const OllamaSdk;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_tools_rejected_without_function_calling() {
        let params = OllamaChatRequest {
            model: "gemma".into(),
            messages: vec![OllamaMessage::new("user", "hi")],
            tools: Some(transform::to_ollama_tools(&[weather_tool()])),
            format: None,
            options: None,
            stream: false,
            think: None,
            keep_alive: None,
        };
        let err = client()
            .create_completions(params, RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_image_generation_not_supported() {
        let params = GenerateImageParams {
            model: "llava".into(),
            prompt: "a cat".into(),
            negative_prompt: None,
            size: None,
            n: 1,
        };
        assert!(matches!(
            client().generate_image(params).await,
            Err(Error::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn test_known_embedding_dimensions() {
        let client = client();
        let dims = client
            .get_embedding_dimensions(Some(&Model::new("ollama", "nomic-embed-text:latest")))
            .await
            .unwrap();
        assert_eq!(dims, 768);

        let configured = Model::new("ollama", "custom").with_embedding_dimensions(256);
        assert_eq!(client.get_embedding_dimensions(Some(&configured)).await.unwrap(), 256);

        assert!(matches!(
            client.get_embedding_dimensions(None).await,
            Err(Error::UnknownModel(_))
        ));
    }

    #[test]
    fn test_tool_call_round_trip() {
        let client = client();
        let tools = vec![weather_tool()];
        let call = weather_call();

        let tool = client.convert_sdk_tool_call_to_mcp(&call, &tools).unwrap();
        let response = client.convert_sdk_tool_call_to_mcp_tool_response(&call, tool);
        assert_eq!(response.tool.name, call.function.name);
        assert_eq!(response.tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(response.arguments, json!({"city": "Paris"}));

        let mut unknown = weather_call();
        unknown.function.name = "Get_Weather".into();
        assert!(client.convert_sdk_tool_call_to_mcp(&unknown, &tools).is_none());
    }

    #[test]
    fn test_tool_results_follow_tool_call_turn() {
        let client = client();
        let history = vec![OllamaMessage::new("user", "weather in Paris?")];
        let results = vec![OllamaMessage::new("tool", "sunny")];
        let calls = [weather_call()];

        let messages = client.build_sdk_messages(&history, "", &results, Some(&calls));
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "tool"]);
        assert_eq!(messages[1].tool_calls.as_deref(), Some(&calls[..]));

        let plain = client.build_sdk_messages(&history, "", &[], None);
        assert_eq!(plain, history);
    }

    #[test]
    fn test_tool_response_message_param() {
        let client = client();
        let response = ToolCallResponse::pending(weather_tool(), json!({"city": "Paris"}), None);
        let result = McpCallToolResponse::text("sunny");

        let native = client.convert_mcp_tool_response_to_sdk_message_param(
            &response,
            &result,
            &Model::new("ollama", "llama3.1").with_function_calling(),
        );
        assert_eq!(native.role, "tool");
        assert_eq!(native.content, "sunny");
        assert_eq!(native.tool_name.as_deref(), Some("get_weather"));

        let wrapped = client.convert_mcp_tool_response_to_sdk_message_param(
            &response,
            &result,
            &Model::new("ollama", "gemma"),
        );
        assert_eq!(wrapped.role, "user");
        assert!(wrapped.content.contains("Tool Name:get_weather"));
    }

    #[test]
    fn test_estimate_and_extract() {
        let client = client();
        let message = OllamaMessage {
            images: Some(vec!["A".repeat(400)]),
            ..OllamaMessage::new("user", "Hello, world!")
        };
        assert_eq!(client.estimate_message_tokens(&message), 4 + 3);

        let payload = OllamaChatRequest {
            model: "gemma".into(),
            messages: vec![message.clone()],
            tools: None,
            format: None,
            options: None,
            stream: true,
            think: None,
            keep_alive: None,
        };
        assert_eq!(client.extract_messages_from_sdk_payload(&payload), &[message][..]);
    }
}
