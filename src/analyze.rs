//! OpenRouter diagnosis client.
//!
//! One error event in, one structured diagnosis out. The client itself
//! never retries; callers that want retry pass a `RetryPolicy` to
//! `analyze_with_retry` so the retry budget is explicit and bounded.

use crate::error::AnalysisError;
use crate::extract::extract_commands;
use crate::scan::ErrorEvent;
use crate::util::truncate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OpenRouter chat completions endpoint.
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Hard ceiling on one diagnostic request. A stuck call must not stall the
/// monitor loop past this grace period.
const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_COMPLETION_TOKENS: u32 = 1024;

const SYSTEM_PROMPT: &str = "You are a DevOps assistant that diagnoses errors found in log files. \
Explain the likely cause in a few sentences, then list any shell commands that could fix the \
problem, one per line, each prefixed with `$ `. Only propose commands when you are confident \
they address the cause. If no command applies, say so and list none.";

/// A diagnosis for one error event. Immutable once produced.
#[derive(Debug, Clone)]
pub struct DiagnosticResult {
    pub event: ErrorEvent,
    pub explanation: String,
    pub commands: Vec<String>,
}

/// Bounded retry budget for diagnostic requests. Backoff doubles per
/// attempt; a retryable failure past `max_attempts` is returned as-is so a
/// systemic outage never turns into a request storm.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
        }
    }

    fn backoff_for(&self, completed_attempts: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(completed_attempts.saturating_sub(1))
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

pub struct AnalysisClient {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
}

impl AnalysisClient {
    pub fn new(api_key: Option<String>, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.to_string(),
        }
    }

    /// Build the user half of the prompt. Deterministic for a given event
    /// so identical errors produce identical requests.
    fn prompt_for(event: &ErrorEvent) -> String {
        format!(
            "An error was detected while monitoring logs.\n\n\
             Source: {}\n\
             Matched pattern: {}\n\
             Error text:\n{}",
            event.source.display(),
            event.matched_pattern,
            event.raw_text,
        )
    }

    /// Request a diagnosis for one event. Fails with an `AnalysisError`
    /// rather than panicking or throwing across the pipeline boundary.
    pub async fn analyze(&self, event: &ErrorEvent) -> Result<DiagnosticResult, AnalysisError> {
        let api_key = self.api_key.as_deref().ok_or(AnalysisError::MissingApiKey)?;

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: Self::prompt_for(event),
                },
            ],
            max_tokens: MAX_COMPLETION_TOKENS,
            stream: false,
        };

        let response = self
            .client
            .post(OPENROUTER_URL)
            .timeout(ANALYSIS_TIMEOUT)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if status.as_u16() == 401 {
            return Err(AnalysisError::Auth);
        }
        if !status.is_success() {
            return Err(AnalysisError::Api {
                status: status.as_u16(),
                body: truncate(&text, 200),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| AnalysisError::Malformed(format!("{}: {}", e, truncate(&text, 200))))?;

        let explanation = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| AnalysisError::Malformed("response contained no choices".to_string()))?;

        let commands = extract_commands(&explanation);

        Ok(DiagnosticResult {
            event: event.clone(),
            explanation,
            commands,
        })
    }

    /// Analyze with a bounded retry budget. Non-retryable failures (auth,
    /// missing key, 4xx) are returned immediately.
    pub async fn analyze_with_retry(
        &self,
        event: &ErrorEvent,
        policy: &RetryPolicy,
    ) -> Result<DiagnosticResult, AnalysisError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.analyze(event).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    let backoff = policy.backoff_for(attempt);
                    tracing::warn!(
                        dedupe_key = %event.dedupe_key,
                        attempt,
                        "analysis failed, retrying in {:?}: {e}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
