//! Backend implementations

pub mod gemini;
pub mod local;
pub mod openai;

pub use gemini::{GeminiBackend, GeminiConfig};
pub use local::{LocalBackend, LocalBackendConfig, LocalGenerator};
pub use openai::{OpenAiBackend, OpenAiConfig};
