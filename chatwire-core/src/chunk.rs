use futures::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;
use crate::message::Usage;
use crate::provider::ResponseChunkTransformer;
use crate::tool::{ToolCallRequest, ToolCallResponse};

/// Normalized streaming unit shared by all providers
///
/// Deltas must be applied in arrival order; concatenating them rebuilds the
/// full text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalChunk {
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        text: String,
    },
    ToolCallCreated {
        tool_calls: Vec<ToolCallRequest>,
    },
    ToolCallResult {
        response: ToolCallResponse,
    },
    WebSearchInProgress,
    WebSearchComplete {
        results: Value,
    },
    Error {
        message: String,
    },
    StreamEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

/// Raw vendor chunks as they come off the wire
pub type RawChunkStream<C> = Pin<Box<dyn Stream<Item = Result<C>> + Send>>;

/// Cancellable, single-consumer stream of canonical chunks
///
/// Once the token is cancelled the stream yields `None` and drops the vendor
/// stream underneath it, which closes the connection.
pub struct ChunkStream {
    inner: Option<Pin<Box<dyn Stream<Item = CanonicalChunk> + Send>>>,
    cancelled: Pin<Box<dyn Future<Output = ()> + Send>>,
    token: CancellationToken,
}

impl ChunkStream {
    pub fn new(
        inner: impl Stream<Item = CanonicalChunk> + Send + 'static,
        token: CancellationToken,
    ) -> Self {
        Self {
            inner: Some(Box::pin(inner)),
            cancelled: Box::pin(token.clone().cancelled_owned()),
            token,
        }
    }

    /// Stops the stream immediately and releases the vendor connection
    pub fn cancel(&mut self) {
        self.token.cancel();
        self.inner = None;
    }

    /// Token that cancels this stream from elsewhere
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Consumes the stream and folds it into a summary
    pub async fn drain(mut self) -> StreamSummary {
        let mut summary = StreamSummary::default();
        while let Some(chunk) = self.next().await {
            summary.apply(chunk);
        }
        summary
    }
}

impl Stream for ChunkStream {
    type Item = CanonicalChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };
        if this.cancelled.as_mut().poll(cx).is_ready() {
            debug!("Chunk stream cancelled, dropping vendor stream");
            this.inner = None;
            return Poll::Ready(None);
        }
        match inner.as_mut().poll_next(cx) {
            Poll::Ready(None) => {
                this.inner = None;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

/// Turns a raw vendor stream into canonical chunks
///
/// Each raw chunk is transformed as soon as it arrives; transport errors
/// become `Error` chunks.
pub fn canonicalize<C: Send + 'static>(
    raw: RawChunkStream<C>,
    transformer: Arc<dyn ResponseChunkTransformer<C>>,
    token: CancellationToken,
) -> ChunkStream {
    let chunks = raw.flat_map(move |item| {
        let chunks = match item {
            Ok(chunk) => transformer.transform(&chunk),
            Err(e) => vec![CanonicalChunk::Error {
                message: e.to_string(),
            }],
        };
        stream::iter(chunks)
    });
    ChunkStream::new(chunks, token)
}

/// Everything a drained stream produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    pub text: String,
    pub thinking: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub errors: Vec<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl StreamSummary {
    pub fn apply(&mut self, chunk: CanonicalChunk) {
        match chunk {
            CanonicalChunk::TextDelta { text } => self.text.push_str(&text),
            CanonicalChunk::ThinkingDelta { text } => self.thinking.push_str(&text),
            CanonicalChunk::ToolCallCreated { tool_calls } => self.tool_calls.extend(tool_calls),
            CanonicalChunk::Error { message } => self.errors.push(message),
            CanonicalChunk::StreamEnd {
                finish_reason,
                usage,
            } => {
                self.finish_reason = finish_reason;
                self.usage = usage;
            }
            CanonicalChunk::ToolCallResult { .. }
            | CanonicalChunk::WebSearchInProgress
            | CanonicalChunk::WebSearchComplete { .. } => {}
        }
    }
}
