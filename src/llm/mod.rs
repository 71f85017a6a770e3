//! Generation backend abstraction
//!
//! Unifies local in-process inference and the two hosted HTTP APIs behind one
//! streaming-generate contract.

pub mod provider;
pub mod providers;

pub use provider::{
    ChatTurn, GenerationBackend, GenerationParameters, GenerationRequest, StopScanner,
    TokenStream,
};
pub use providers::{
    GeminiBackend, GeminiConfig, LocalBackend, LocalBackendConfig, LocalGenerator,
    OpenAiBackend, OpenAiConfig,
};
