use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use tracing::debug;

use crate::error::{Error, Result};

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Reassembles newline-delimited lines from arbitrarily split byte reads.
///
/// A physical read can end mid-line (and mid-JSON-payload); bytes are held
/// back until the terminating newline arrives. Splitting happens on the raw
/// bytes so a multi-byte character straddling two reads is never broken up.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete line, without its newline. `None` until one is buffered.
    pub fn pop_line(&mut self) -> Option<String> {
        let newline_pos = self.buf.iter().position(|&b| b == b'\n')?;
        let rest = self.buf.split_off(newline_pos + 1);
        let mut line = std::mem::replace(&mut self.buf, rest);
        line.pop(); // the newline
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Drain whatever is left after end-of-stream, for upstreams that do not
    /// terminate the last line.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(line)
    }
}

/// Lazy sequence of `data:` payloads from a text/event-stream response body.
///
/// Yields raw payload strings until the underlying stream ends; read failures
/// propagate as terminal errors and the stream is not restartable. Comment
/// lines, blank separators, and non-`data` fields are skipped.
pub struct SseStream {
    inner: ByteStream,
    lines: LineBuffer,
    finished: bool,
}

impl SseStream {
    pub fn new(response: reqwest::Response) -> Self {
        let bytes = response.bytes_stream().map(|chunk| match chunk {
            Ok(bytes) => Ok(bytes.to_vec()),
            Err(e) if e.is_timeout() => Err(Error::timeout(format!("Stream read timed out: {}", e))),
            Err(e) => Err(Error::transport(format!("Stream read error: {}", e))),
        });
        Self::from_stream(bytes)
    }

    pub fn from_stream(stream: impl Stream<Item = Result<Vec<u8>>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
            lines: LineBuffer::new(),
            finished: false,
        }
    }

    /// Next `data:` payload, or `None` at end-of-stream.
    pub async fn next_payload(&mut self) -> Result<Option<String>> {
        loop {
            while let Some(line) = self.lines.pop_line() {
                if let Some(payload) = Self::payload_of(&line) {
                    return Ok(Some(payload));
                }
            }

            if self.finished {
                if let Some(line) = self.lines.take_remainder() {
                    if let Some(payload) = Self::payload_of(&line) {
                        return Ok(Some(payload));
                    }
                }
                return Ok(None);
            }

            match self.inner.next().await {
                Some(Ok(bytes)) => self.lines.push(&bytes),
                Some(Err(e)) => return Err(e),
                None => {
                    debug!("Event stream ended");
                    self.finished = true;
                }
            }
        }
    }

    fn payload_of(line: &str) -> Option<String> {
        let line = line.trim();
        // Blank separators and SSE comments.
        if line.is_empty() || line.starts_with(':') {
            return None;
        }
        let data = line.strip_prefix("data:")?;
        Some(data.trim_start().to_string())
    }
}
