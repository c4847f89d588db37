use serde::{Deserialize, Serialize};
use std::fmt;

/// Context window and output limits of a model
pub trait ModelInfo: Send + Sync + fmt::Debug {
    /// Context window size in tokens
    fn context_window(&self) -> usize;

    /// Maximum number of output tokens
    fn max_output_tokens(&self) -> usize;
}

/// Capability flags a provider declares for one of its models
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCapabilities {
    pub vision: bool,
    pub function_calling: bool,
    pub reasoning: bool,
    pub embedding: bool,
    pub web_search: bool,
}

/// A model as configured for a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Vendor model id, sent verbatim in requests (e.g. `llama3.1:8b`)
    pub id: String,
    /// Id of the provider this model belongs to
    pub provider: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub capabilities: ModelCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_dimensions: Option<usize>,
}

impl Model {
    const DEFAULT_CONTEXT_WINDOW: usize = 8192;
    const DEFAULT_MAX_OUTPUT_TOKENS: usize = 4096;

    /// Creates a model with no capabilities set
    ///
    /// # Examples
    ///
    /// ```
    /// use chatwire_core::Model;
    ///
    /// let model = Model::new("ollama", "llama3.1:8b").with_function_calling();
    /// assert!(model.capabilities.function_calling);
    /// assert!(!model.capabilities.vision);
    /// ```
    pub fn new(provider: impl Into<String>, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            provider: provider.into(),
            capabilities: ModelCapabilities::default(),
            context_window: None,
            max_output_tokens: None,
            embedding_dimensions: None,
        }
    }

    #[must_use]
    pub fn with_vision(mut self) -> Self {
        self.capabilities.vision = true;
        self
    }

    #[must_use]
    pub fn with_function_calling(mut self) -> Self {
        self.capabilities.function_calling = true;
        self
    }

    #[must_use]
    pub fn with_reasoning(mut self) -> Self {
        self.capabilities.reasoning = true;
        self
    }

    #[must_use]
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = Some(tokens);
        self
    }

    #[must_use]
    pub fn with_embedding_dimensions(mut self, dimensions: usize) -> Self {
        self.capabilities.embedding = true;
        self.embedding_dimensions = Some(dimensions);
        self
    }
}

impl ModelInfo for Model {
    fn context_window(&self) -> usize {
        self.context_window.unwrap_or(Self::DEFAULT_CONTEXT_WINDOW)
    }

    fn max_output_tokens(&self) -> usize {
        self.max_output_tokens
            .unwrap_or(Self::DEFAULT_MAX_OUTPUT_TOKENS)
    }
}

/// One entry of a vendor's model catalog, as returned by `list_models`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkModel {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owned_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_defaults() {
        let model = Model::new("ollama", "qwen2.5");
        assert_eq!(model.name, "qwen2.5");
        assert_eq!(model.context_window(), 8192);
        assert_eq!(model.max_output_tokens(), 4096);
    }

    #[test]
    fn test_capabilities_deserialize_partially() {
        let model: Model = serde_json::from_str(
            r#"{"id":"llava","provider":"ollama","capabilities":{"vision":true}}"#,
        )
        .unwrap();
        assert!(model.capabilities.vision);
        assert!(!model.capabilities.function_calling);
        assert_eq!(model.name, "");
    }
}
