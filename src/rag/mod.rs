//! Retrieval-augmented generation layer
//!
//! Vector-indexed retrieval, chunking, map-reduce summarization, query
//! routing and the reasoning-span stream filter.

pub mod chunking;
pub mod embedder;
pub mod index;
pub mod postprocess;
pub mod prompts;
pub mod router;
pub mod summarize;

pub use chunking::{estimate_tokens, Chunk, ChunkingConfig, ChunkingEngine};
pub use embedder::Embedder;
pub use index::{ScoredResult, VectorIndex, VectorIndexConfig};
pub use postprocess::{clean_response, StreamPostProcessor};
pub use router::{QueryRouter, QueryStrategy, RouterConfig};
pub use summarize::{MapReduceSummarizer, SummarizerConfig};
