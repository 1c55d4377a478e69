pub mod fallback;
pub mod reconciler;
pub mod service;
pub mod sse;
pub mod types;

pub use fallback::{EndpointFallback, FallbackAttempt, FallbackConfig};
pub use reconciler::{Phase, Reconciler, StreamUpdate};
pub use service::{ChatService, ChatServiceConfig};
pub use sse::{LineBuffer, SseStream};
pub use types::{
    ChatError, ChatRequest, ChatResult, Conversation, NoopObserver, StreamChunk, StreamObserver,
    DONE_SENTINEL,
};
