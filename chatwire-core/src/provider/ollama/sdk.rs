use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument};
use url::Url;

use super::ndjson::decode_ndjson;
use super::types::{
    OllamaChatRequest, OllamaChatResponse, OllamaEmbedRequest, OllamaEmbedResponse,
    OllamaErrorBody, OllamaTagsResponse,
};
use crate::chunk::RawChunkStream;
use crate::config::ProviderClientConfig;
use crate::error::{Error, Result};

/// Failures reported by the Ollama HTTP API
#[derive(Error, Debug)]
pub enum OllamaApiError {
    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("unexpected response ({status}): {message}")]
    UnexpectedResponse { status: u16, message: String },

    #[error("undecodable response: {content}")]
    Deserialization {
        content: String,
        source: serde_json::Error,
    },
}

impl From<OllamaApiError> for Error {
    fn from(err: OllamaApiError) -> Self {
        match err {
            OllamaApiError::ModelNotFound(message) => Error::UnknownModel(message),
            OllamaApiError::UnexpectedResponse { status, message } => {
                Error::Provider(format!("Ollama API error ({status}): {message}"))
            }
            OllamaApiError::Deserialization { source, .. } => Error::Serialization(source),
        }
    }
}

/// Thin handle over the Ollama HTTP API
#[derive(Debug, Clone)]
pub struct OllamaSdk {
    client: Client,
    base_url: Url,
    keep_alive: Option<String>,
}

impl OllamaSdk {
    /// Builds the HTTP client with the configured credentials and headers
    pub fn new(config: &ProviderClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Other(format!("Invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Other(format!("Invalid header value for {name}: {e}")))?;
            headers.insert(name, value);
        }
        if let Some(key) = &config.api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", key.expose()))
                .map_err(|_| Error::Other("API key is not a valid header value".to_string()))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        let mut builder = Client::builder().default_headers(headers);
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let mut base_url = config.api_host.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: base_url.join("api/")?,
            keep_alive: config.keep_alive.clone(),
        })
    }

    /// Root of the `/api` endpoints
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn post<B: Serialize>(&self, path: &str, body: &B, timeout: Option<Duration>) -> Result<RequestBuilder> {
        let mut request = self
            .client
            .post(self.base_url.join(path)?)
            .header(header::CONTENT_TYPE, "application/json")
            .json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        Ok(request)
    }

    /// Non-streaming `/api/chat`
    #[instrument(skip_all, fields(model = %request.model))]
    pub async fn chat(
        &self,
        request: &OllamaChatRequest,
        timeout: Option<Duration>,
    ) -> Result<OllamaChatResponse> {
        let body = OllamaChatRequest {
            stream: false,
            ..request.clone()
        };
        let response = self.post("chat", &body, timeout)?.send().await?;
        read_json(check_status(response, &request.model).await?).await
    }

    /// Streaming `/api/chat`; each NDJSON line becomes one response chunk
    #[instrument(skip_all, fields(model = %request.model))]
    pub async fn chat_stream(
        &self,
        request: &OllamaChatRequest,
        timeout: Option<Duration>,
    ) -> Result<RawChunkStream<OllamaChatResponse>> {
        let body = OllamaChatRequest {
            stream: true,
            ..request.clone()
        };
        let response = self
            .post("chat", &body, timeout)?
            .header(header::ACCEPT, "application/x-ndjson")
            .send()
            .await?;
        let response = check_status(response, &request.model).await?;
        debug!("Streaming response from Ollama");
        Ok(decode_ndjson(response.bytes_stream()))
    }

    /// Locally available models
    #[instrument(skip(self))]
    pub async fn tags(&self) -> Result<OllamaTagsResponse> {
        let response = self.client.get(self.base_url.join("tags")?).send().await?;
        read_json(check_status(response, "").await?).await
    }

    /// Embeds one input with `model`
    #[instrument(skip(self, input))]
    pub async fn embed(&self, model: &str, input: &str) -> Result<OllamaEmbedResponse> {
        let body = OllamaEmbedRequest {
            model: model.to_string(),
            input: input.to_string(),
            keep_alive: self.keep_alive.clone(),
        };
        let response = self.post("embed", &body, None)?.send().await?;
        read_json(check_status(response, model).await?).await
    }
}

async fn check_status(response: Response, model: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let content = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<OllamaErrorBody>(&content)
        .map(|b| b.error)
        .unwrap_or(content);
    error!("Ollama returned {}: {}", status, message);

    let err = if status == StatusCode::NOT_FOUND && !model.is_empty() {
        OllamaApiError::ModelNotFound(format!("{model}: {message}"))
    } else {
        OllamaApiError::UnexpectedResponse {
            status: status.as_u16(),
            message,
        }
    };
    Err(err.into())
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let content = response.text().await?;
    serde_json::from_str(&content).map_err(|source| {
        OllamaApiError::Deserialization {
            content,
            source,
        }
        .into()
    })
}
