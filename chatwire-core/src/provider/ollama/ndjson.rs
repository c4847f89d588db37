use futures::{Stream, StreamExt, stream};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use tracing::trace;

use crate::chunk::RawChunkStream;
use crate::error::{Error, Result};

/// Splits a byte stream into newline-delimited frames
///
/// Only the trailing partial line is held between reads.
#[derive(Debug, Default)]
pub(crate) struct NdjsonDecoder {
    partial: Vec<u8>,
}

impl NdjsonDecoder {
    /// Feeds bytes in, returning every line they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        let mut rest = bytes;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let mut line = std::mem::take(&mut self.partial);
            line.extend_from_slice(&rest[..pos]);
            if !line.iter().all(u8::is_ascii_whitespace) {
                lines.push(line);
            }
            rest = &rest[pos + 1..];
        }
        self.partial.extend_from_slice(rest);
        lines
    }

    /// Last line when the stream ended without a newline
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let line = std::mem::take(&mut self.partial);
        (!line.iter().all(u8::is_ascii_whitespace)).then_some(line)
    }
}

fn parse_line<T: DeserializeOwned>(line: &[u8]) -> Result<T> {
    trace!("NDJSON line: {}", String::from_utf8_lossy(line));
    serde_json::from_slice(line).map_err(Error::from)
}

struct DecodeState<T> {
    inner: std::pin::Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>,
    decoder: NdjsonDecoder,
    ready: VecDeque<Result<T>>,
    done: bool,
}

/// Decodes an NDJSON byte stream into values, one per line
///
/// Values are yielded as soon as their line is complete. Transport errors and
/// undecodable lines are yielded as errors without ending the stream.
pub(crate) fn decode_ndjson<T, S, B, E>(bytes: S) -> RawChunkStream<T>
where
    T: DeserializeOwned + Send + 'static,
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: Into<Error>,
{
    let state = DecodeState {
        inner: Box::pin(bytes.map(|r| r.map(|b| b.as_ref().to_vec()).map_err(Into::into))),
        decoder: NdjsonDecoder::default(),
        ready: VecDeque::new(),
        done: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(bytes)) => {
                    for line in state.decoder.push(&bytes) {
                        state.ready.push_back(parse_line(&line));
                    }
                }
                Some(Err(e)) => state.ready.push_back(Err(e)),
                None => {
                    state.done = true;
                    if let Some(line) = state.decoder.finish() {
                        state.ready.push_back(parse_line(&line));
                    }
                }
            }
        }
    }))
}
