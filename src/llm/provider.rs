//! GenerationBackend trait and shared streaming types
//!
//! Defines the common interface for all generation backends (local inference,
//! OpenAI-compatible chat APIs, Gemini) plus the cumulative stop-sequence
//! scanner every variant shares.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::AssistantError;
use crate::models::ChatRole;

/// Bounded capacity for token streams. Producers suspend once the consumer
/// falls this far behind; a dropped consumer surfaces as a send failure.
pub const STREAM_CAPACITY: usize = 64;

/// Sampling and termination parameters, immutable per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub stop: Vec<String>,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
            top_p: None,
            stop: Vec::new(),
        }
    }
}

/// A prior conversation turn forwarded to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// One generation call: prompt parts plus parameters.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: String,
    /// Retrieved or full-transcript context, injected ahead of the question
    pub context: Option<String>,
    pub user: String,
    pub history: Vec<ChatTurn>,
    pub params: GenerationParameters,
}

impl GenerationRequest {
    pub fn new(system_prompt: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            context: None,
            user: user.into(),
            history: Vec::new(),
            params: GenerationParameters::default(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_params(mut self, params: GenerationParameters) -> Self {
        self.params = params;
        self
    }
}

/// Single-consumer stream of generated text increments.
///
/// Terminates normally when the channel closes, or with a typed error sent
/// as the final item. Dropping the stream is cooperative cancellation: the
/// producer sees its next send fail and releases any held I/O resources.
#[derive(Debug)]
pub struct TokenStream {
    rx: mpsc::Receiver<Result<String, AssistantError>>,
}

impl TokenStream {
    pub fn channel() -> (mpsc::Sender<Result<String, AssistantError>>, TokenStream) {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        (tx, TokenStream { rx })
    }

    pub async fn next(&mut self) -> Option<Result<String, AssistantError>> {
        self.rx.recv().await
    }

    /// Drain the stream into a single string, propagating the first error.
    pub async fn collect_text(mut self) -> Result<String, AssistantError> {
        let mut out = String::new();
        while let Some(item) = self.next().await {
            out.push_str(&item?);
        }
        Ok(out)
    }
}

/// The contract every generation backend implements.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Backend name (e.g. "local", "openai", "gemini")
    fn name(&self) -> &'static str;

    /// Effective context window in estimated tokens. Local backends report a
    /// much smaller budget than hosted APIs; the router subtracts its own
    /// prompt/response reserve from this.
    fn context_budget(&self) -> u32;

    /// Whether this backend holds an expensive in-process resource that the
    /// lifecycle manager may evict when idle.
    fn is_local(&self) -> bool {
        false
    }

    /// Start one streamed generation. Every call is stateless; no decoder or
    /// session state is carried between calls.
    async fn generate(&self, request: GenerationRequest) -> Result<TokenStream, AssistantError>;
}

/// Result of feeding one increment through a [`StopScanner`].
#[derive(Debug, Clone, PartialEq)]
pub struct StopScan {
    /// Text safe to emit now
    pub text: String,
    /// A stop sequence appeared in the cumulative output
    pub hit: bool,
}

/// Cumulative-buffer stop-sequence detection.
///
/// Containment is checked against everything generated so far, not a sliding
/// window, so a stop string split across two increments is still caught. To
/// honor "no text at or past the match point is yielded", the scanner holds
/// back the longest possible partial match until more text arrives or
/// [`StopScanner::finish`] flushes it.
pub struct StopScanner {
    stops: Vec<String>,
    buffer: String,
    /// Bytes of `buffer` already emitted
    emitted: usize,
    holdback: usize,
    hit: bool,
}

impl StopScanner {
    pub fn new(stops: &[String]) -> Self {
        let holdback = stops
            .iter()
            .map(|s| s.len().saturating_sub(1))
            .max()
            .unwrap_or(0);
        Self {
            stops: stops.to_vec(),
            buffer: String::new(),
            emitted: 0,
            holdback,
            hit: false,
        }
    }

    /// Append one increment and return the text safe to emit.
    pub fn push(&mut self, increment: &str) -> StopScan {
        if self.hit {
            return StopScan {
                text: String::new(),
                hit: true,
            };
        }
        self.buffer.push_str(increment);

        // Earliest match across all configured stop sequences.
        let earliest = self
            .stops
            .iter()
            .filter_map(|s| self.buffer.find(s.as_str()))
            .min();

        if let Some(pos) = earliest {
            self.hit = true;
            let text = if pos > self.emitted {
                self.buffer[self.emitted..pos].to_string()
            } else {
                String::new()
            };
            self.emitted = pos;
            return StopScan { text, hit: true };
        }

        // No match yet: emit everything except a tail that could still be
        // the start of a stop sequence.
        let safe_end = self.safe_flush_end();
        let text = if safe_end > self.emitted {
            let t = self.buffer[self.emitted..safe_end].to_string();
            self.emitted = safe_end;
            t
        } else {
            String::new()
        };
        StopScan { text, hit: false }
    }

    /// Flush whatever is still held back at natural end of stream.
    pub fn finish(&mut self) -> String {
        if self.hit || self.emitted >= self.buffer.len() {
            return String::new();
        }
        let tail = self.buffer[self.emitted..].to_string();
        self.emitted = self.buffer.len();
        tail
    }

    fn safe_flush_end(&self) -> usize {
        if self.holdback == 0 {
            return self.buffer.len();
        }
        // Longest suffix of the buffer that is a proper prefix of some stop
        // sequence must stay buffered. Prefixes are sliced at char
        // boundaries only; stop sequences may be multibyte.
        let mut keep = 0;
        for stop in &self.stops {
            for (boundary, _) in stop.char_indices().skip(1) {
                if boundary > keep && self.buffer.ends_with(&stop[..boundary]) {
                    keep = boundary;
                }
            }
        }
        self.buffer.len() - keep
    }
}
