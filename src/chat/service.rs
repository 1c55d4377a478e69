use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::TokenProvider;
use crate::chat::reconciler::{Reconciler, StreamUpdate};
use crate::chat::sse::SseStream;
use crate::chat::types::{
    ChatError, ChatRequest, ChatResult, Conversation, StreamChunk, StreamObserver, DONE_SENTINEL,
};
use crate::error::{Error, Result};

const STREAM_PATH: &str = "/api/chat/stream";

/// Configuration for the chat service.
#[derive(Debug, Clone)]
pub struct ChatServiceConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ChatServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Client for the streaming answer endpoint.
///
/// One instance serves any number of calls; per-call state lives in the
/// [`Reconciler`] created for each send, so concurrent sends never share
/// mutable state. Cancellation is dropping the in-flight future, which
/// abandons the connection.
pub struct ChatService {
    client: Client,
    config: ChatServiceConfig,
    token_provider: Arc<dyn TokenProvider>,
}

impl ChatService {
    pub fn new(config: ChatServiceConfig, token_provider: Arc<dyn TokenProvider>) -> Result<Self> {
        Url::parse(&config.base_url)?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            token_provider,
        })
    }

    pub fn config(&self) -> &ChatServiceConfig {
        &self.config
    }

    /// Send one message in a conversation and stream the answer through
    /// `observer`. Resolves to a [`ChatResult`] for both success and
    /// transport failure; `Err` is reserved for caller mistakes such as an
    /// empty message.
    pub async fn send_message(
        &self,
        conversation: &mut Conversation,
        message: &str,
        observer: &mut dyn StreamObserver,
    ) -> Result<ChatResult> {
        if message.trim().is_empty() {
            return Err(ChatError::EmptyMessage.into());
        }

        let request = conversation.request(message);
        let start = Instant::now();

        let result = match self
            .send_request(&self.config.base_url, &request, observer)
            .await
        {
            Ok(outcome) => outcome.into_result(start.elapsed().as_millis() as u64),
            Err(e) => {
                // Failed before any stream state existed, so this is the one
                // and only resolution.
                let message = e.to_string();
                observer.on_error(&message);
                ChatResult::failure(
                    message,
                    String::new(),
                    request.session_id.clone(),
                    start.elapsed().as_millis() as u64,
                )
            }
        };

        conversation.absorb(&result);
        Ok(result)
    }

    /// POST the request to one endpoint and drive the stream to resolution.
    ///
    /// Returns `Err` only for failures before streaming began (connect
    /// errors, non-2xx status); those are safe to retry against another
    /// endpoint because no observer callback has fired yet. Once the body is
    /// being consumed the outcome is final, error or not.
    pub(crate) async fn send_request(
        &self,
        base_url: &str,
        request: &ChatRequest,
        observer: &mut dyn StreamObserver,
    ) -> Result<StreamOutcome> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), STREAM_PATH);
        let headers = self.create_headers().await?;

        debug!(
            "Sending chat request {}: user={}, session={:?}, knowledge_ids={}",
            request.id,
            request.user_id,
            request.session_id,
            request.knowledge_ids.len()
        );

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(format!("Request timed out: {}", e))
                } else {
                    Error::transport(format!("HTTP request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            return Err(Error::transport(format!(
                "API error {}: {}",
                status, error_body
            )));
        }

        let stream = SseStream::new(response);
        let reconciler = Reconciler::new(request.session_id.clone());
        let outcome = drive_stream(stream, reconciler, observer).await;

        info!(
            "Chat request {} resolved: success={}, content_len={}",
            request.id,
            outcome.error.is_none(),
            outcome.content.len()
        );
        Ok(outcome)
    }

    async fn create_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        let token = self.token_provider.bearer_token().await?;
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| Error::auth(format!("Invalid bearer token: {}", e)))?;
        headers.insert(AUTHORIZATION, auth_value);

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        Ok(headers)
    }
}

/// Resolved state of one streamed call, before timing is attached.
#[derive(Debug)]
pub(crate) struct StreamOutcome {
    pub content: String,
    pub session_id: Option<String>,
    pub error: Option<String>,
}

impl StreamOutcome {
    pub(crate) fn into_result(self, response_time_ms: u64) -> ChatResult {
        match self.error {
            None => ChatResult::success(self.content, self.session_id, response_time_ms),
            Some(error) => {
                ChatResult::failure(error, self.content, self.session_id, response_time_ms)
            }
        }
    }
}

/// Pump payloads from the stream into the reconciler until the call
/// resolves, forwarding updates to the observer.
pub(crate) async fn drive_stream(
    mut stream: SseStream,
    mut reconciler: Reconciler,
    observer: &mut dyn StreamObserver,
) -> StreamOutcome {
    loop {
        match stream.next_payload().await {
            Ok(Some(payload)) => {
                if payload == DONE_SENTINEL {
                    if let Some(text) = reconciler.complete() {
                        observer.on_complete(&text);
                    }
                    break;
                }

                let chunk = match StreamChunk::parse(&payload) {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => continue,
                    Err(e) => {
                        // One corrupt line must not abort a healthy stream.
                        warn!("Skipping malformed stream payload: {}", e);
                        continue;
                    }
                };

                match reconciler.apply(chunk) {
                    StreamUpdate::Partial(text) => observer.on_stream_data(&text),
                    StreamUpdate::Completed(text) => {
                        observer.on_complete(&text);
                        break;
                    }
                    StreamUpdate::Ignored => {}
                }
            }
            Ok(None) => {
                // Upstream closed without a terminator; resolve with what we
                // have, unless a terminal chunk already did.
                if let Some(text) = reconciler.complete() {
                    observer.on_complete(&text);
                }
                break;
            }
            Err(e) => {
                let message = e.to_string();
                if reconciler.fail() {
                    observer.on_error(&message);
                }
                return StreamOutcome {
                    content: reconciler.accumulated_text().to_string(),
                    session_id: reconciler.session_id().map(String::from),
                    error: Some(message),
                };
            }
        }
    }

    StreamOutcome {
        content: reconciler.accumulated_text().to_string(),
        session_id: reconciler.session_id().map(String::from),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use futures_util::stream;

    #[derive(Default)]
    struct RecordingObserver {
        stream_data: Vec<String>,
        completions: Vec<String>,
        errors: Vec<String>,
    }

    impl StreamObserver for RecordingObserver {
        fn on_stream_data(&mut self, text: &str) {
            self.stream_data.push(text.to_string());
        }
        fn on_complete(&mut self, text: &str) {
            self.completions.push(text.to_string());
        }
        fn on_error(&mut self, message: &str) {
            self.errors.push(message.to_string());
        }
    }

    fn sse_from(chunks: Vec<Result<Vec<u8>>>) -> SseStream {
        SseStream::from_stream(stream::iter(chunks))
    }

    fn ok(bytes: &str) -> Result<Vec<u8>> {
        Ok(bytes.as_bytes().to_vec())
    }

    fn event(id: &str, text: &str, partial: bool, session: Option<&str>) -> String {
        let session = match session {
            Some(s) => format!("\"session\":\"{}\",", s),
            None => String::new(),
        };
        format!(
            "data: {{{}\"data\":{{\"id\":\"{}\",\"partial\":{},\"content\":{{\"parts\":[{{\"text\":\"{}\"}}]}}}}}}\n",
            session, id, partial, text
        )
    }

    #[tokio::test]
    async fn test_drive_stream_scenario() {
        let sse = sse_from(vec![
            ok(&event("1", "Hel", true, Some("sess-1"))),
            ok(&event("1", "Hel", true, None)),
            ok(&event("2", "lo", true, None)),
            ok(&event("3", "Hello world", false, None)),
        ]);
        let mut observer = RecordingObserver::default();

        let outcome = drive_stream(sse, Reconciler::new(None), &mut observer).await;

        assert_eq!(observer.stream_data, vec!["Hel".to_string(), "Hello".to_string()]);
        assert_eq!(observer.completions, vec!["Hello world".to_string()]);
        assert!(observer.errors.is_empty());
        assert_eq!(outcome.content, "Hello world");
        assert_eq!(outcome.session_id.as_deref(), Some("sess-1"));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_drive_stream_done_sentinel() {
        let sse = sse_from(vec![
            ok(&event("1", "partial ", true, None)),
            ok(&event("2", "answer", true, None)),
            ok("data: [DONE]\n"),
        ]);
        let mut observer = RecordingObserver::default();

        let outcome = drive_stream(sse, Reconciler::new(None), &mut observer).await;

        assert_eq!(observer.completions, vec!["partial answer".to_string()]);
        assert_eq!(outcome.content, "partial answer");
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_drive_stream_eof_fallback() {
        let sse = sse_from(vec![ok(&event("1", "half an answ", true, None))]);
        let mut observer = RecordingObserver::default();

        let outcome = drive_stream(sse, Reconciler::new(None), &mut observer).await;

        // No [DONE], no final chunk: resolve with the accumulation.
        assert_eq!(observer.completions, vec!["half an answ".to_string()]);
        assert_eq!(outcome.content, "half an answ");
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_drive_stream_malformed_line_skipped() {
        let sse = sse_from(vec![
            ok(&event("1", "good", true, None)),
            ok("data: {broken json\n"),
            ok(&event("2", " text", false, None)),
        ]);
        let mut observer = RecordingObserver::default();

        let outcome = drive_stream(sse, Reconciler::new(None), &mut observer).await;

        assert_eq!(observer.completions, vec![" text".to_string()]);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_drive_stream_transport_error() {
        let sse = sse_from(vec![
            ok(&event("1", "partial", true, None)),
            Err(Error::transport("connection reset")),
        ]);
        let mut observer = RecordingObserver::default();

        let outcome = drive_stream(sse, Reconciler::new(None), &mut observer).await;

        assert_eq!(observer.stream_data, vec!["partial".to_string()]);
        assert!(observer.completions.is_empty());
        assert_eq!(observer.errors.len(), 1);
        assert!(!observer.errors[0].is_empty());
        // Streamed text survives the failure.
        assert_eq!(outcome.content, "partial");
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_drive_stream_caller_session_kept() {
        let sse = sse_from(vec![ok(&event("1", "ok", false, Some("sess-other")))]);
        let mut observer = RecordingObserver::default();

        let outcome = drive_stream(
            sse,
            Reconciler::new(Some("sess-mine".to_string())),
            &mut observer,
        )
        .await;

        assert_eq!(outcome.session_id.as_deref(), Some("sess-mine"));
    }

    #[test]
    fn test_service_rejects_invalid_base_url() {
        let config = ChatServiceConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        let result = ChatService::new(config, Arc::new(StaticTokenProvider::new("t")));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_service_rejects_empty_message() {
        let service = ChatService::new(
            ChatServiceConfig::default(),
            Arc::new(StaticTokenProvider::new("t")),
        )
        .unwrap();
        let mut conversation = Conversation::new("user-1");
        let mut observer = RecordingObserver::default();

        let result = service
            .send_message(&mut conversation, "   ", &mut observer)
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_outcome_into_result() {
        let success = StreamOutcome {
            content: "text".to_string(),
            session_id: Some("s".to_string()),
            error: None,
        }
        .into_result(42);
        assert!(success.success);
        assert_eq!(success.response_time_ms, 42);

        let failure = StreamOutcome {
            content: "part".to_string(),
            session_id: None,
            error: Some("boom".to_string()),
        }
        .into_result(7);
        assert!(!failure.success);
        assert_eq!(failure.content, "part");
        assert_eq!(failure.error.as_deref(), Some("boom"));
    }
}
