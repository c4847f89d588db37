use std::path::PathBuf;

use thiserror::Error;

/// Represents errors that can occur in the chatwire library
#[derive(Error, Debug)]
pub enum Error {
    /// The provider does not implement this operation at all
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// The operation exists for this provider but cannot serve this request
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Transport, authentication or rate-limit failure reported by the vendor
    #[error("Provider error: {0}")]
    Provider(String),

    /// Model is not known to the provider
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Error during serialization or deserialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error during HTTP request
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Couldn't parse base url")]
    BaseUrl(#[from] url::ParseError),

    /// A file could not be read while estimating its tokens
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The caller cancelled the request before it completed
    #[error("Request cancelled")]
    Cancelled,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the orchestration layer may retry the failed call.
    ///
    /// Nothing inside this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Provider(_) | Error::Request(_))
    }

    /// Error for an operation a provider does not offer at all
    pub fn not_implemented(provider: &str, operation: &str) -> Self {
        Error::NotImplemented(format!("{operation} is not available for {provider}"))
    }
}

/// A Result type that uses our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_variants() {
        assert!(Error::Provider("rate limited".into()).is_retryable());
        assert!(!Error::NotSupported("images".into()).is_retryable());
        assert!(!Error::UnknownModel("nope".into()).is_retryable());
    }

    #[test]
    fn test_not_implemented_message() {
        let err = Error::not_implemented("ollama", "generate_image");
        assert_eq!(
            err.to_string(),
            "Not implemented: generate_image is not available for ollama"
        );
    }
}
