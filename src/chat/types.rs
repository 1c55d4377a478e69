use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Terminator payload sent by the backend as the last stream event.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Request body for the streaming answer endpoint.
///
/// `session_id` is `None` on the first turn of a conversation, which asks the
/// backend to allocate a new session; later turns carry the adopted ID. The
/// field must serialize as an explicit `null`, not be omitted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(skip)]
    pub id: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub knowledge_ids: Vec<String>,
    pub message: String,
    pub online_mode: bool,
}

impl ChatRequest {
    pub fn new(user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            session_id: None,
            knowledge_ids: Vec::new(),
            message: message.into(),
            online_mode: false,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_knowledge_ids(mut self, knowledge_ids: Vec<String>) -> Self {
        self.knowledge_ids = knowledge_ids;
        self
    }

    pub fn with_online_mode(mut self, online_mode: bool) -> Self {
        self.online_mode = online_mode;
        self
    }
}

/// One decoded stream event.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    pub session_id: Option<String>,
    pub message_id: String,
    pub text: String,
    pub is_partial: bool,
}

impl StreamChunk {
    /// Parse one `data:` payload into a chunk.
    ///
    /// Returns `Ok(None)` for events that carry no message (session-only
    /// keep-alives); malformed JSON surfaces as an error the caller is
    /// expected to log and skip.
    pub fn parse(payload: &str) -> Result<Option<StreamChunk>> {
        let event: WireEvent = serde_json::from_str(payload)
            .map_err(|e| Error::parse(format!("Malformed stream payload: {}", e)))?;

        let Some(message) = event.data else {
            return Ok(None);
        };
        if message.id.is_empty() {
            return Ok(None);
        }

        let text = message
            .content
            .and_then(|content| content.parts.into_iter().next())
            .and_then(|part| part.text)
            .unwrap_or_default();

        Ok(Some(StreamChunk {
            session_id: event.session,
            message_id: message.id,
            text,
            // A terminal event may omit the flag entirely; absent means final.
            is_partial: message.partial.unwrap_or(false),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    session: Option<String>,
    data: Option<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    id: String,
    partial: Option<bool>,
    content: Option<WireContent>,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Deserialize)]
struct WirePart {
    text: Option<String>,
}

/// Terminal value of one send-message call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResult {
    pub success: bool,
    pub content: String,
    pub session_id: Option<String>,
    pub error: Option<String>,
    pub response_time_ms: u64,
}

impl ChatResult {
    pub fn success(content: String, session_id: Option<String>, response_time_ms: u64) -> Self {
        Self {
            success: true,
            content,
            session_id,
            error: None,
            response_time_ms,
        }
    }

    /// Failed call. `content` keeps whatever partial text was streamed before
    /// the failure so the caller can leave it visible.
    pub fn failure(
        error: impl Into<String>,
        content: String,
        session_id: Option<String>,
        response_time_ms: u64,
    ) -> Self {
        Self {
            success: false,
            content,
            session_id,
            error: Some(error.into()),
            response_time_ms,
        }
    }
}

/// Caller-supplied callbacks for one streaming call.
///
/// `on_stream_data` receives the cumulative text so far, not a delta.
/// All methods default to no-ops.
pub trait StreamObserver: Send {
    fn on_stream_data(&mut self, _text: &str) {}
    fn on_complete(&mut self, _text: &str) {}
    fn on_error(&mut self, _message: &str) {}
}

/// Observer that discards every event.
pub struct NoopObserver;

impl StreamObserver for NoopObserver {}

/// Client-side bookkeeping for one conversation.
///
/// Holds the server-assigned session ID across turns: the first send posts
/// `sessionId: null`, and the ID the backend hands back is adopted for every
/// later turn. Nothing here is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub knowledge_ids: Vec<String>,
    pub session_id: Option<String>,
    pub online_mode: bool,
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            knowledge_ids: Vec::new(),
            session_id: None,
            online_mode: false,
            message_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_knowledge_ids(mut self, knowledge_ids: Vec<String>) -> Self {
        self.knowledge_ids = knowledge_ids;
        self
    }

    pub fn with_online_mode(mut self, online_mode: bool) -> Self {
        self.online_mode = online_mode;
        self
    }

    /// Resume a conversation whose session was established earlier.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Build the request body for the next turn.
    pub fn request(&self, message: impl Into<String>) -> ChatRequest {
        ChatRequest {
            id: Uuid::new_v4().to_string(),
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            knowledge_ids: self.knowledge_ids.clone(),
            message: message.into(),
            online_mode: self.online_mode,
        }
    }

    /// Adopt the server-assigned session ID. First writer wins; later calls
    /// with a different ID are ignored.
    pub fn adopt_session(&mut self, session_id: &str) {
        if self.session_id.is_none() && !session_id.is_empty() {
            self.session_id = Some(session_id.to_string());
            self.updated_at = Utc::now();
        }
    }

    pub fn record_turn(&mut self) {
        self.message_count += 1;
        self.updated_at = Utc::now();
    }

    /// Fold a resolved call back into the conversation: adopt the session on
    /// a successful first turn and bump the turn counter.
    pub fn absorb(&mut self, result: &ChatResult) {
        if !result.success {
            return;
        }
        if let Some(session_id) = &result.session_id {
            self.adopt_session(session_id);
        }
        self.record_turn();
    }
}

/// Errors specific to chat operations.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Message must not be empty")]
    EmptyMessage,

    #[error("No endpoints configured")]
    NoEndpoints,

    #[error("All {attempts} endpoint attempts failed")]
    AllEndpointsFailed { attempts: usize },
}

impl From<ChatError> for Error {
    fn from(err: ChatError) -> Self {
        Error::Chat(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = ChatRequest::new("user-1", "hello")
            .with_knowledge_ids(vec!["kb-1".to_string(), "kb-2".to_string()])
            .with_online_mode(true);

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["userId"], "user-1");
        assert_eq!(body["message"], "hello");
        assert_eq!(body["knowledgeIds"], json!(["kb-1", "kb-2"]));
        assert_eq!(body["onlineMode"], true);
        // New-session request must carry an explicit null, not omit the field.
        assert!(body.get("sessionId").is_some());
        assert!(body["sessionId"].is_null());
        // The correlation id is local only.
        assert!(body.get("id").is_none());
    }

    #[test]
    fn test_request_with_session() {
        let request = ChatRequest::new("user-1", "hello").with_session("sess-9");
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["sessionId"], "sess-9");
    }

    #[test]
    fn test_chunk_parse_partial() {
        let payload = r#"{"session":"sess-1","data":{"id":"m1","partial":true,"content":{"parts":[{"text":"Hel"}]}}}"#;
        let chunk = StreamChunk::parse(payload).unwrap().unwrap();

        assert_eq!(chunk.session_id.as_deref(), Some("sess-1"));
        assert_eq!(chunk.message_id, "m1");
        assert_eq!(chunk.text, "Hel");
        assert!(chunk.is_partial);
    }

    #[test]
    fn test_chunk_parse_final_without_partial_flag() {
        let payload = r#"{"data":{"id":"m2","content":{"parts":[{"text":"done"}]}}}"#;
        let chunk = StreamChunk::parse(payload).unwrap().unwrap();

        assert!(!chunk.is_partial);
        assert!(chunk.session_id.is_none());
    }

    #[test]
    fn test_chunk_parse_session_only_event() {
        let chunk = StreamChunk::parse(r#"{"session":"sess-1"}"#).unwrap();
        assert!(chunk.is_none());
    }

    #[test]
    fn test_chunk_parse_malformed() {
        assert!(StreamChunk::parse("not json").is_err());
        assert!(StreamChunk::parse(r#"{"data": 42}"#).is_err());
    }

    #[test]
    fn test_conversation_session_adoption() {
        let mut conversation = Conversation::new("user-1");
        assert!(conversation.session_id.is_none());

        conversation.adopt_session("sess-1");
        assert_eq!(conversation.session_id.as_deref(), Some("sess-1"));

        // First writer wins.
        conversation.adopt_session("sess-2");
        assert_eq!(conversation.session_id.as_deref(), Some("sess-1"));
    }

    #[test]
    fn test_conversation_request_carries_state() {
        let mut conversation = Conversation::new("user-1")
            .with_knowledge_ids(vec!["kb-1".to_string()])
            .with_online_mode(true);

        let first = conversation.request("hi");
        assert!(first.session_id.is_none());
        assert_eq!(first.knowledge_ids, vec!["kb-1".to_string()]);
        assert!(first.online_mode);

        conversation.adopt_session("sess-1");
        conversation.record_turn();

        let second = conversation.request("again");
        assert_eq!(second.session_id.as_deref(), Some("sess-1"));
        assert_eq!(conversation.message_count, 1);
    }

    #[test]
    fn test_conversation_absorb() {
        let mut conversation = Conversation::new("user-1");

        let failed = ChatResult::failure("boom", String::new(), Some("sess-x".to_string()), 5);
        conversation.absorb(&failed);
        assert!(conversation.session_id.is_none());
        assert_eq!(conversation.message_count, 0);

        let succeeded = ChatResult::success("hi".to_string(), Some("sess-1".to_string()), 5);
        conversation.absorb(&succeeded);
        assert_eq!(conversation.session_id.as_deref(), Some("sess-1"));
        assert_eq!(conversation.message_count, 1);
    }

    #[test]
    fn test_chat_result_failure_keeps_partial_content() {
        let result = ChatResult::failure("connection reset", "partial text".to_string(), None, 120);
        assert!(!result.success);
        assert_eq!(result.content, "partial text");
        assert_eq!(result.error.as_deref(), Some("connection reset"));
    }
}
