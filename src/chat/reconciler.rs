use tracing::debug;

use crate::chat::types::StreamChunk;

/// Lifecycle of one streaming call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingFirstChunk,
    Streaming,
    Completed,
    Errored,
}

/// Outcome of feeding one chunk to the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    /// Duplicate or empty chunk; no state change, no callback due.
    Ignored,
    /// Cumulative text so far; the call stays open.
    Partial(String),
    /// Final text; the call is resolved.
    Completed(String),
}

/// Per-call accumulator over the chunk sequence.
///
/// Owns the text assembled so far, the last-seen message ID (duplicates are
/// redelivered by the upstream during network hiccups and must be dropped),
/// and the session ID adopted from the first chunk that carries one. Created
/// fresh for every send-message call and discarded with it; concurrent calls
/// each get their own instance.
#[derive(Debug)]
pub struct Reconciler {
    phase: Phase,
    accumulated: String,
    last_message_id: Option<String>,
    session_id: Option<String>,
}

impl Reconciler {
    /// `session_id` is the ID the caller sent with the request, if any. When
    /// set it is never overwritten by chunk-carried values.
    pub fn new(session_id: Option<String>) -> Self {
        Self {
            phase: Phase::AwaitingFirstChunk,
            accumulated: String::new(),
            last_message_id: None,
            session_id,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, Phase::Completed | Phase::Errored)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated
    }

    /// Apply one decoded chunk.
    ///
    /// Partial chunks append; a non-partial chunk carries the whole final
    /// text and replaces the accumulation outright.
    pub fn apply(&mut self, chunk: StreamChunk) -> StreamUpdate {
        if self.is_terminal() {
            debug!("Dropping chunk {} received after resolution", chunk.message_id);
            return StreamUpdate::Ignored;
        }

        if self.last_message_id.as_deref() == Some(chunk.message_id.as_str()) {
            debug!("Dropping redelivered chunk {}", chunk.message_id);
            return StreamUpdate::Ignored;
        }
        self.last_message_id = Some(chunk.message_id);

        if self.session_id.is_none() {
            if let Some(session_id) = chunk.session_id {
                debug!("Adopted session {}", session_id);
                self.session_id = Some(session_id);
            }
        }

        if chunk.is_partial {
            self.accumulated.push_str(&chunk.text);
            self.phase = Phase::Streaming;
            StreamUpdate::Partial(self.accumulated.clone())
        } else {
            self.accumulated = chunk.text;
            self.phase = Phase::Completed;
            StreamUpdate::Completed(self.accumulated.clone())
        }
    }

    /// Resolve with whatever text has accumulated. Used for the `[DONE]`
    /// sentinel and for upstreams that close the connection without one.
    /// Returns `None` if the call already resolved.
    pub fn complete(&mut self) -> Option<String> {
        if self.is_terminal() {
            return None;
        }
        self.phase = Phase::Completed;
        Some(self.accumulated.clone())
    }

    /// Move to the errored terminal state. Returns `false` if the call
    /// already resolved, in which case no error callback is due.
    pub fn fail(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.phase = Phase::Errored;
        true
    }
}
