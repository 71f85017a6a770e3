//! Local-first RAG orchestration core for a meeting-transcript assistant.
//!
//! Coordinates transcript retrieval, vector search, chunked map-reduce
//! summarization and streamed generation over interchangeable backends
//! (local in-process inference, OpenAI-compatible APIs, Gemini). The
//! persistence engine, the embedding model and the inference runtime live
//! outside this crate behind the [`store::Store`], [`rag::Embedder`] and
//! [`llm::LocalGenerator`] seams.

pub mod error;
pub mod llm;
pub mod manager;
pub mod models;
pub mod rag;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::AssistantError;
pub use manager::{
    BackendConfig, ManagerConfig, ModelFetcher, ResourceLifecycleManager, ServiceStatus,
};
pub use models::{ChatEvent, ChatMessage, ChatRole, ChatStream};
pub use store::Store;
