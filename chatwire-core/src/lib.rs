// Provider-neutral chat client contract plus the heuristic token budgeting
// that decides what fits into a request.

pub mod budget;
pub mod cache;
pub mod chunk;
pub mod compactor;
pub mod config;
pub mod error;
pub mod file;
pub mod message;
pub mod model;
pub mod provider;
pub mod secret;
pub mod token;
pub mod tool;

// Re-export the main types for convenient usage
pub use budget::{ContextBudgeter, ContextPolicy, DefaultContextPolicy, estimate_message_usage};
pub use cache::{FileTokenCache, FileTokenManager};
pub use chunk::{CanonicalChunk, ChunkStream, StreamSummary, canonicalize};
pub use compactor::{ChatHistoryCompactor, DropOldestCompactor};
pub use config::{AssistantSettings, ProviderClientConfig};
pub use error::{Error, Result};
pub use file::{FileKind, FileReader, FileRef, FsFileReader};
pub use message::{FileBlock, Message, MessageBlock, MessageKind, Role, ToolBlock, Usage};
pub use model::{Model, ModelCapabilities, ModelInfo, SdkModel};
pub use provider::ollama::OllamaClient;
pub use provider::{
    CoreRequest, GenerateImageParams, ProviderClient, RequestOptions, RequestTransformed,
    RequestTransformer, ResponseChunkTransformer,
};
pub use secret::Secret;
pub use token::TokenCounter;
pub use tool::{
    McpCallToolResponse, McpContent, ToolCallRequest, ToolCallResponse, ToolCallStatus,
    ToolDefinition, ToolDescriptor,
};
