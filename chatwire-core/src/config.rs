use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use url::Url;

use crate::error::Result;
use crate::model::Model;
use crate::secret::Secret;

const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Per-provider settings, fixed at client construction
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderClientConfig {
    /// Provider id, e.g. `ollama`
    pub id: String,
    /// Base URL of the vendor API, without the `/api` suffix
    pub api_host: Url,
    #[serde(default)]
    pub api_key: Option<Secret<String>>,
    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// How long the vendor keeps a model loaded, e.g. `5m`
    #[serde(default)]
    pub keep_alive: Option<String>,
    /// Models this provider serves, with their capability flags
    #[serde(default)]
    pub models: Vec<Model>,
}

impl ProviderClientConfig {
    pub fn new(id: impl Into<String>, api_host: &str) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            api_host: Url::parse(api_host)?,
            api_key: None,
            headers: HashMap::new(),
            timeout_secs: None,
            keep_alive: None,
            models: Vec::new(),
        })
    }

    /// Ollama settings from `OLLAMA_HOST` and `OLLAMA_API_KEY`
    ///
    /// Falls back to the local default host when the variable is unset.
    pub fn ollama_from_env() -> Result<Self> {
        let host = env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_OLLAMA_HOST.to_string());
        let mut config = Self::new("ollama", &host)?;
        config.api_key = env::var("OLLAMA_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(Secret::new);
        config.keep_alive = Some("5m".to_string());
        Ok(config)
    }

    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(Secret::new(key.into()));
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: Model) -> Self {
        self.models.push(model);
        self
    }

    /// Configured model with this id, if any
    pub fn model(&self, id: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.id == id)
    }
}

/// Context count that means "no limit" in assistant settings
pub const MAX_CONTEXT_COUNT: usize = 100;
/// What [`MAX_CONTEXT_COUNT`] resolves to
pub const UNLIMITED_CONTEXT_COUNT: usize = 100_000;
pub const DEFAULT_CONTEXT_COUNT: usize = 5;

/// Assistant-level settings consumed by request building and budgeting
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AssistantSettings {
    /// System prompt
    pub prompt: String,
    /// How many prior messages are sent with a request
    pub context_count: usize,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stream_output: bool,
    pub enable_tool_use: bool,
    /// `low`, `medium` or `high`; enables thinking on reasoning models
    pub reasoning_effort: Option<String>,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            context_count: DEFAULT_CONTEXT_COUNT,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stream_output: true,
            enable_tool_use: true,
            reasoning_effort: None,
        }
    }
}

impl AssistantSettings {
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn with_context_count(mut self, count: usize) -> Self {
        self.context_count = count;
        self
    }

    /// Effective context count, with the unlimited sentinel applied
    pub fn resolved_context_count(&self) -> usize {
        if self.context_count == MAX_CONTEXT_COUNT {
            UNLIMITED_CONTEXT_COUNT
        } else {
            self.context_count
        }
    }
}
