use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::chat::service::ChatService;
use crate::chat::types::{ChatError, ChatResult, Conversation, StreamObserver};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub max_attempts: usize,
    pub retry_delay: Duration,
    pub failure_threshold: usize,
    pub cooldown: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
            failure_threshold: 5,
            cooldown: Duration::from_secs(300),
        }
    }
}

/// One endpoint try, for caller-side diagnostics.
#[derive(Debug, Clone)]
pub struct FallbackAttempt {
    pub endpoint: String,
    pub attempt_number: usize,
    pub error: Option<String>,
    pub response_time_ms: u64,
    pub success: bool,
}

/// Ordered list of backend endpoints tried in sequence, first success
/// short-circuiting.
///
/// Only failures from before streaming began are retried here; once a stream
/// has started delivering, its outcome is final. Endpoints that keep failing
/// are skipped for a cooldown period.
pub struct EndpointFallback {
    endpoints: Vec<String>,
    config: FallbackConfig,
    failure_counts: HashMap<String, usize>,
    last_success: HashMap<String, Instant>,
}

impl EndpointFallback {
    pub fn new(endpoints: Vec<String>, config: FallbackConfig) -> Self {
        Self {
            endpoints,
            config,
            failure_counts: HashMap::new(),
            last_success: HashMap::new(),
        }
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Send one message, walking the endpoint list until a call resolves.
    pub async fn send_message(
        &mut self,
        service: &ChatService,
        conversation: &mut Conversation,
        message: &str,
        observer: &mut dyn StreamObserver,
    ) -> Result<(ChatResult, Vec<FallbackAttempt>)> {
        if self.endpoints.is_empty() {
            return Err(ChatError::NoEndpoints.into());
        }
        if message.trim().is_empty() {
            return Err(ChatError::EmptyMessage.into());
        }

        let request = conversation.request(message);
        let total_start = Instant::now();
        let mut attempts: Vec<FallbackAttempt> = Vec::new();
        let mut last_error: Option<String> = None;

        let endpoints: Vec<String> = self
            .endpoints
            .iter()
            .take(self.config.max_attempts)
            .cloned()
            .collect();
        let candidate_count = endpoints.len();

        for (index, endpoint) in endpoints.into_iter().enumerate() {
            if self.should_skip(&endpoint) {
                debug!("Skipping endpoint {} during cooldown", endpoint);
                continue;
            }

            let attempt_start = Instant::now();

            match service.send_request(&endpoint, &request, observer).await {
                Ok(outcome) => {
                    let elapsed = attempt_start.elapsed().as_millis() as u64;
                    let failed = outcome.error.is_some();
                    if failed {
                        self.record_failure(&endpoint);
                    } else {
                        self.record_success(&endpoint);
                    }

                    attempts.push(FallbackAttempt {
                        endpoint: endpoint.clone(),
                        attempt_number: index + 1,
                        error: outcome.error.clone(),
                        response_time_ms: elapsed,
                        success: !failed,
                    });

                    // The stream resolved (the observer has already been
                    // notified either way); no further endpoints are tried.
                    let result = outcome.into_result(elapsed);
                    conversation.absorb(&result);
                    info!(
                        "Chat resolved via {} after {} attempt(s)",
                        endpoint,
                        attempts.len()
                    );
                    return Ok((result, attempts));
                }
                Err(e) => {
                    let elapsed = attempt_start.elapsed().as_millis() as u64;
                    self.record_failure(&endpoint);
                    warn!(
                        "Endpoint {} failed before streaming: {} (attempt {}/{})",
                        endpoint,
                        e,
                        index + 1,
                        candidate_count
                    );
                    attempts.push(FallbackAttempt {
                        endpoint,
                        attempt_number: index + 1,
                        error: Some(e.to_string()),
                        response_time_ms: elapsed,
                        success: false,
                    });
                    last_error = Some(e.to_string());

                    if index + 1 < candidate_count && !self.config.retry_delay.is_zero() {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        let message = last_error
            .unwrap_or_else(|| ChatError::AllEndpointsFailed {
                attempts: attempts.len(),
            }
            .to_string());
        observer.on_error(&message);

        let result = ChatResult::failure(
            message,
            String::new(),
            request.session_id.clone(),
            total_start.elapsed().as_millis() as u64,
        );
        Ok((result, attempts))
    }

    fn should_skip(&self, endpoint: &str) -> bool {
        match self.failure_counts.get(endpoint) {
            Some(&count) if count >= self.config.failure_threshold => {
                match self.last_success.get(endpoint) {
                    Some(last) => last.elapsed() < self.config.cooldown,
                    None => true,
                }
            }
            _ => false,
        }
    }

    fn record_success(&mut self, endpoint: &str) {
        self.failure_counts.insert(endpoint.to_string(), 0);
        self.last_success.insert(endpoint.to_string(), Instant::now());
    }

    fn record_failure(&mut self, endpoint: &str) {
        *self.failure_counts.entry(endpoint.to_string()).or_insert(0) += 1;
    }
}
