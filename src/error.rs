//! Error types for the assistant core
//!
//! Every fallible operation in the orchestration layer returns one of these
//! variants. Locally recoverable conditions (unknown document id, malformed
//! stream frame) are logged and skipped at the call site instead.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed errors surfaced to callers of the orchestration layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AssistantError {
    /// No backend has been initialized yet
    NotInitialized,
    /// No backend configuration has been selected
    NotConfigured,
    /// The selected backend cannot be reached or loaded
    BackendUnavailable(String),
    /// Not enough memory to load the requested local model
    InsufficientResource { available: u64, required: u64 },
    /// A bounded wait elapsed without the awaited condition
    Timeout(String),
    /// Request failed at the network layer (carries the reason or status)
    NetworkError(String),
    /// Vector index operation failed
    IndexError(String),
    /// The scoped recording has no transcript
    TranscriptNotFound(i64),
    /// Rejected configuration (empty credentials, bad URL, ...)
    InvalidConfiguration(String),
    /// Persistence collaborator failure
    StoreError(String),
}

impl fmt::Display for AssistantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssistantError::NotInitialized => write!(f, "Backend not initialized"),
            AssistantError::NotConfigured => write!(f, "No backend configured"),
            AssistantError::BackendUnavailable(msg) => write!(f, "Backend unavailable: {}", msg),
            AssistantError::InsufficientResource {
                available,
                required,
            } => write!(
                f,
                "Insufficient memory: {} MB required, {} MB available",
                required / (1024 * 1024),
                available / (1024 * 1024)
            ),
            AssistantError::Timeout(msg) => write!(f, "Timed out: {}", msg),
            AssistantError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            AssistantError::IndexError(msg) => write!(f, "Index error: {}", msg),
            AssistantError::TranscriptNotFound(id) => {
                write!(f, "No transcript found for recording {}", id)
            }
            AssistantError::InvalidConfiguration(msg) => {
                write!(f, "Invalid configuration: {}", msg)
            }
            AssistantError::StoreError(msg) => write!(f, "Store error: {}", msg),
        }
    }
}

impl std::error::Error for AssistantError {}

impl AssistantError {
    /// Short, categorized, human-readable message for presentation layers.
    ///
    /// Known failure substrings (memory / network / permission / not-found)
    /// map to actionable guidance so the UI never needs to inspect the
    /// variant itself.
    pub fn user_message(&self) -> String {
        match self {
            AssistantError::NotInitialized | AssistantError::NotConfigured => {
                "No AI model is set up yet. Pick a model in settings to get started.".to_string()
            }
            AssistantError::InsufficientResource {
                available,
                required,
            } => format!(
                "This model needs about {} MB of free memory but only {} MB is available. \
                 Try a smaller model or close other applications.",
                required / (1024 * 1024),
                available / (1024 * 1024)
            ),
            AssistantError::TranscriptNotFound(_) => {
                "This recording has no transcript yet. Wait for transcription to finish."
                    .to_string()
            }
            AssistantError::Timeout(_) => {
                "The operation took too long. Please try again.".to_string()
            }
            AssistantError::InvalidConfiguration(msg) => {
                format!("Configuration problem: {}", msg)
            }
            AssistantError::BackendUnavailable(msg)
            | AssistantError::NetworkError(msg)
            | AssistantError::IndexError(msg)
            | AssistantError::StoreError(msg) => categorize_failure(msg),
        }
    }
}

/// Map a raw failure detail onto a user-actionable message by substring.
pub fn categorize_failure(detail: &str) -> String {
    let lower = detail.to_lowercase();

    if lower.contains("memory")
        || lower.contains("alloc")
        || lower.contains("out of resource")
    {
        "Not enough memory to run the model. Try a smaller model or close other applications."
            .to_string()
    } else if lower.contains("network")
        || lower.contains("connection")
        || lower.contains("timed out")
        || lower.contains("dns")
        || lower.contains("unreachable")
    {
        "Could not reach the service. Check your internet connection and try again.".to_string()
    } else if lower.contains("permission")
        || lower.contains("denied")
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
        || lower.contains("401")
        || lower.contains("403")
    {
        "Access was denied. Check your API key or file permissions.".to_string()
    } else if lower.contains("not found") || lower.contains("no such") || lower.contains("404") {
        "The requested model or resource was not found. It may need to be downloaded first."
            .to_string()
    } else {
        format!("Something went wrong: {}", detail)
    }
}
