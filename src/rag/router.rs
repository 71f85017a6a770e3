//! Query routing
//!
//! Picks how to answer a query - vector-search retrieval, direct
//! full-context generation, or chunked map-reduce synthesis - and drives the
//! chosen strategy, piping every increment through the reasoning-span
//! filter.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::AssistantError;
use crate::llm::provider::{ChatTurn, GenerationBackend, GenerationRequest};
use crate::models::{format_clock, transcript_text, ChatEvent};
use crate::rag::chunking::{estimate_tokens, Chunk, ChunkingEngine};
use crate::rag::postprocess::{clean_response, StreamPostProcessor};
use crate::rag::prompts;
use crate::rag::summarize::MapReduceSummarizer;
use crate::rag::index::VectorIndex;
use crate::store::Store;

/// Estimated tokens held back from the context budget for the system
/// prompt, question and response.
pub const PROMPT_RESPONSE_RESERVE: u32 = 1536;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Retrieval hits requested for RAG answers
    pub search_limit: usize,
    pub prompt_response_reserve: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            search_limit: 6,
            prompt_response_reserve: PROMPT_RESPONSE_RESERVE,
        }
    }
}

/// How a query will be answered.
#[derive(Debug, Clone)]
pub enum QueryStrategy {
    /// No scoped recording: retrieve the most relevant segments
    RagSearch,
    /// Scoped recording whose transcript fits the backend budget
    DirectFullContext { text: String, title: String },
    /// Scoped recording too large for one call
    MapReduce { chunks: Vec<Chunk> },
}

type EventSender = mpsc::Sender<Result<ChatEvent, AssistantError>>;

pub struct QueryRouter {
    store: Arc<dyn Store>,
    index: Arc<VectorIndex>,
    chunker: ChunkingEngine,
    summarizer: MapReduceSummarizer,
    config: RouterConfig,
}

impl QueryRouter {
    pub fn new(
        store: Arc<dyn Store>,
        index: Arc<VectorIndex>,
        chunker: ChunkingEngine,
        summarizer: MapReduceSummarizer,
        config: RouterConfig,
    ) -> Self {
        Self {
            store,
            index,
            chunker,
            summarizer,
            config,
        }
    }

    /// Pick the strategy for a query.
    ///
    /// No scoped recording always routes to retrieval. A scoped recording is
    /// answered directly when its estimated token count fits the backend's
    /// budget minus the prompt/response reserve, and chunked otherwise.
    pub async fn decide(
        &self,
        backend: &dyn GenerationBackend,
        recording_id: Option<i64>,
    ) -> Result<QueryStrategy, AssistantError> {
        let Some(recording_id) = recording_id else {
            return Ok(QueryStrategy::RagSearch);
        };

        let transcript = self
            .store
            .get_transcript(recording_id)
            .await?
            .ok_or(AssistantError::TranscriptNotFound(recording_id))?;
        let segments = self.store.get_segments(transcript.id).await?;
        let text = transcript_text(&segments);

        let estimated = estimate_tokens(&text);
        let budget = backend
            .context_budget()
            .saturating_sub(self.config.prompt_response_reserve);

        if estimated <= budget {
            let title = self
                .store
                .get_recording(recording_id)
                .await?
                .map(|r| r.title)
                .unwrap_or_else(|| "Untitled recording".to_string());
            log::debug!(
                "Recording {} fits directly ({} est. tokens, budget {})",
                recording_id,
                estimated,
                budget
            );
            Ok(QueryStrategy::DirectFullContext { text, title })
        } else {
            let chunks = self.chunker.chunk_segments(recording_id, &segments);
            log::debug!(
                "Recording {} needs map-reduce: {} est. tokens over budget {}, {} chunks",
                recording_id,
                estimated,
                budget,
                chunks.len()
            );
            Ok(QueryStrategy::MapReduce { chunks })
        }
    }

    /// Run a strategy, emitting display-ready events into `tx`.
    ///
    /// Returns the complete cleaned answer for persistence. A closed `tx`
    /// means the consumer walked away; execution stops early and whatever
    /// was produced so far is returned.
    pub async fn execute(
        &self,
        backend: Arc<dyn GenerationBackend>,
        strategy: QueryStrategy,
        query: &str,
        history: Vec<ChatTurn>,
        tx: &EventSender,
    ) -> Result<String, AssistantError> {
        match strategy {
            QueryStrategy::RagSearch => self.run_rag(backend, query, history, tx).await,
            QueryStrategy::DirectFullContext { text, title } => {
                self.run_direct(backend, query, history, text, title, tx).await
            }
            QueryStrategy::MapReduce { chunks } => {
                self.run_map_reduce(backend, query, &chunks, tx).await
            }
        }
    }

    async fn run_rag(
        &self,
        backend: Arc<dyn GenerationBackend>,
        query: &str,
        history: Vec<ChatTurn>,
        tx: &EventSender,
    ) -> Result<String, AssistantError> {
        let hits = match self
            .index
            .search(query, self.config.search_limit, None)
            .await
        {
            Ok(hits) => hits,
            // Nothing indexed yet is an answerable situation, not a failure.
            Err(AssistantError::NotInitialized) => Vec::new(),
            Err(e) => return Err(e),
        };

        if hits.is_empty() {
            let message =
                "I couldn't find anything relevant in your indexed meetings for that question."
                    .to_string();
            let _ = tx
                .send(Ok(ChatEvent::Token {
                    text: message.clone(),
                }))
                .await;
            return Ok(message);
        }

        let mut context = String::new();
        for hit in &hits {
            let title = self
                .store
                .get_recording(hit.recording_id)
                .await
                .ok()
                .flatten()
                .map(|r| r.title)
                .unwrap_or_else(|| format!("Recording {}", hit.recording_id));
            let speaker = hit.speaker.as_deref().unwrap_or("Unknown");
            context.push_str(&format!(
                "[{}] {} {}: {}\n",
                title,
                format_clock(hit.start_time),
                speaker,
                hit.text
            ));
        }

        let request = GenerationRequest::new(prompts::rag_system_prompt(), query)
            .with_context(context)
            .with_history(history);
        self.stream_filtered(backend, request, tx).await
    }

    async fn run_direct(
        &self,
        backend: Arc<dyn GenerationBackend>,
        query: &str,
        history: Vec<ChatTurn>,
        text: String,
        title: String,
        tx: &EventSender,
    ) -> Result<String, AssistantError> {
        // An empty transcript invites hallucination; answer with a canned
        // message instead of generating.
        if text.trim().is_empty() {
            let message = prompts::no_content_message();
            let _ = tx
                .send(Ok(ChatEvent::Token {
                    text: message.clone(),
                }))
                .await;
            return Ok(message);
        }

        let context = format!("Meeting: {}\n\nTRANSCRIPT:\n{}", title, text);
        let request = GenerationRequest::new(prompts::chat_system_prompt(), query)
            .with_context(context)
            .with_history(history);
        self.stream_filtered(backend, request, tx).await
    }

    async fn run_map_reduce(
        &self,
        backend: Arc<dyn GenerationBackend>,
        query: &str,
        chunks: &[Chunk],
        tx: &EventSender,
    ) -> Result<String, AssistantError> {
        let synthesized = self
            .summarizer
            .summarize(backend.as_ref(), query, chunks)
            .await?;
        let cleaned = clean_response(&synthesized);

        // Re-emit character by character so the typing effect is consistent
        // regardless of how the backend chunked its output.
        for ch in cleaned.chars() {
            if tx
                .send(Ok(ChatEvent::Token {
                    text: ch.to_string(),
                }))
                .await
                .is_err()
            {
                break;
            }
        }
        Ok(cleaned)
    }

    /// Stream one generation call through the reasoning-span filter.
    async fn stream_filtered(
        &self,
        backend: Arc<dyn GenerationBackend>,
        request: GenerationRequest,
        tx: &EventSender,
    ) -> Result<String, AssistantError> {
        let mut stream = backend.generate(request).await?;
        let mut filter = StreamPostProcessor::new();
        let mut full = String::new();

        while let Some(item) = stream.next().await {
            match item {
                Ok(token) => {
                    let out = filter.push(&token);
                    if out.thinking_started && tx.send(Ok(ChatEvent::Thinking)).await.is_err() {
                        return Ok(clean_response(&full));
                    }
                    if !out.text.is_empty() {
                        full.push_str(&out.text);
                        if tx
                            .send(Ok(ChatEvent::Token { text: out.text }))
                            .await
                            .is_err()
                        {
                            return Ok(clean_response(&full));
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }

        let tail = filter.flush();
        if !tail.is_empty() {
            full.push_str(&tail);
            let _ = tx.send(Ok(ChatEvent::Token { text: tail })).await;
        }
        Ok(clean_response(&full))
    }
}
