//! Vector-indexed retrieval engine
//!
//! Keeps an in-memory cosine index over segment embeddings, a bidirectional
//! segment/document mapping, and the set of fully indexed recordings. Raw
//! vectors are additionally persisted through the Store so the index can be
//! rebuilt after a crash without re-embedding from scratch elsewhere.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AssistantError;
use crate::models::TranscriptSegment;
use crate::rag::embedder::Embedder;
use crate::store::Store;

/// Tunables for indexing and search. The similarity floor and batch size are
/// deliberately configuration, not constants.
#[derive(Debug, Clone)]
pub struct VectorIndexConfig {
    /// Segments embedded per batch
    pub batch_size: usize,
    /// Results scoring below this never surface
    pub min_similarity: f32,
    /// Tag stored alongside persisted vectors, identifying the embedding
    /// model generation
    pub embedding_tag: String,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            min_similarity: 0.25,
            embedding_tag: "semantic-v1".to_string(),
        }
    }
}

/// A search hit resolved back through the Store.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ScoredResult {
    pub recording_id: i64,
    pub segment_id: i64,
    pub score: f32,
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
    pub speaker: Option<String>,
}

/// Derive the stable document id for a segment.
///
/// Pure function of the `(segment_id, recording_id, transcript_id)` triple:
/// two splitmix64 finalizer passes mix the three integers into a 128-bit
/// value. The same triple always yields the same id across restarts, which
/// makes re-indexing idempotent without re-embedding. Not a randomness
/// source.
pub fn document_id(segment_id: i64, recording_id: i64, transcript_id: i64) -> Uuid {
    let hi = splitmix64((segment_id as u64) ^ splitmix64(transcript_id as u64));
    let lo = splitmix64((recording_id as u64).wrapping_add(hi.rotate_left(32)));
    Uuid::from_u128(((hi as u128) << 64) | (lo as u128))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[derive(Default)]
struct IndexState {
    /// Document id -> embedding
    docs: HashMap<Uuid, Vec<f32>>,
    /// Segment -> its one live document
    seg_to_doc: HashMap<i64, Uuid>,
    /// Document -> (recording, segment)
    doc_to_seg: HashMap<Uuid, (i64, i64)>,
    /// Recordings whose every segment resolves to a document
    indexed: HashSet<i64>,
}

impl IndexState {
    fn remove_document(&mut self, doc_id: &Uuid) {
        self.docs.remove(doc_id);
        if let Some((_, segment_id)) = self.doc_to_seg.remove(doc_id) {
            self.seg_to_doc.remove(&segment_id);
        }
    }
}

/// Retrieval engine over an Embedder and the Store.
pub struct VectorIndex {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    config: VectorIndexConfig,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        config: VectorIndexConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
            state: RwLock::new(IndexState::default()),
        }
    }

    /// Whether a recording is fully indexed.
    pub async fn is_indexed(&self, recording_id: i64) -> bool {
        self.state.read().await.indexed.contains(&recording_id)
    }

    /// Number of live documents (test and diagnostics hook).
    pub async fn document_count(&self) -> usize {
        self.state.read().await.docs.len()
    }

    /// Index every segment of a recording's transcript.
    ///
    /// No-op if the recording is already indexed. Segments are embedded in
    /// fixed-size batches; each batch is committed to the in-memory index
    /// and persisted before the next starts, so a failing batch never
    /// corrupts earlier ones. The recording joins the indexed set only once
    /// every segment resolves to a document.
    pub async fn index_recording(
        &self,
        recording_id: i64,
        transcript_id: i64,
        segments: &[TranscriptSegment],
    ) -> Result<(), AssistantError> {
        if self.is_indexed(recording_id).await {
            log::debug!("Recording {} already indexed, skipping", recording_id);
            return Ok(());
        }

        self.embedder.ensure_loaded().await?;

        for batch in segments.chunks(self.config.batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|s| s.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(AssistantError::IndexError(format!(
                    "embedder returned {} vectors for {} segments",
                    vectors.len(),
                    batch.len()
                )));
            }

            // Commit this batch: in-memory first, then the durable copy.
            let mut state = self.state.write().await;
            for (segment, vector) in batch.iter().zip(vectors.iter()) {
                let doc_id = document_id(segment.id, recording_id, transcript_id);

                // At most one live document per segment.
                if let Some(old) = state.seg_to_doc.get(&segment.id).copied() {
                    if old != doc_id {
                        state.remove_document(&old);
                    }
                }

                state.docs.insert(doc_id, vector.clone());
                state.seg_to_doc.insert(segment.id, doc_id);
                state.doc_to_seg.insert(doc_id, (recording_id, segment.id));
            }
            drop(state);

            for (segment, vector) in batch.iter().zip(vectors.iter()) {
                self.store
                    .save_embedding(segment.id, vector, &self.config.embedding_tag)
                    .await?;
            }
        }

        let mut state = self.state.write().await;
        let all_resolved = segments
            .iter()
            .all(|s| state.seg_to_doc.contains_key(&s.id));
        if all_resolved {
            state.indexed.insert(recording_id);
            log::info!(
                "Indexed recording {} ({} segments)",
                recording_id,
                segments.len()
            );
        } else {
            log::warn!(
                "Recording {} left partially indexed; not marking complete",
                recording_id
            );
        }
        Ok(())
    }

    /// Nearest-segment search, optionally scoped to one recording.
    ///
    /// With a scope filter the raw similarity query fetches `2 x limit`
    /// candidates to compensate for post-filter loss. Hits that cannot be
    /// mapped or resolved are logged and skipped, never fatal.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        scope: Option<i64>,
    ) -> Result<Vec<ScoredResult>, AssistantError> {
        {
            let state = self.state.read().await;
            if state.docs.is_empty() {
                if state.indexed.is_empty() {
                    return Err(AssistantError::NotInitialized);
                }
                return Ok(Vec::new());
            }
        }

        self.embedder
            .ensure_loaded()
            .await
            .map_err(|e| AssistantError::BackendUnavailable(e.to_string()))?;
        let query_vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| AssistantError::BackendUnavailable(e.to_string()))?;

        let fetch = if scope.is_some() { limit * 2 } else { limit };

        // Rank candidates above the similarity floor.
        let candidates: Vec<(Uuid, f32)> = {
            let state = self.state.read().await;
            let mut scored: Vec<(Uuid, f32)> = state
                .docs
                .iter()
                .map(|(id, vec)| (*id, cosine_similarity(&query_vector, vec)))
                .filter(|(_, score)| *score >= self.config.min_similarity)
                .collect();
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(fetch);
            scored
        };

        let mut results = Vec::with_capacity(limit);
        for (doc_id, score) in candidates {
            if results.len() >= limit {
                break;
            }

            let mapped = {
                let state = self.state.read().await;
                state.doc_to_seg.get(&doc_id).copied()
            };
            let Some((recording_id, segment_id)) = mapped else {
                log::warn!("Search hit references unknown document {}", doc_id);
                continue;
            };

            if let Some(scope_id) = scope {
                if recording_id != scope_id {
                    continue;
                }
            }

            match self.store.get_segment(segment_id).await {
                Ok(Some(segment)) => results.push(ScoredResult {
                    recording_id,
                    segment_id,
                    score,
                    text: segment.text,
                    start_time: segment.start_time,
                    end_time: segment.end_time,
                    speaker: segment.speaker,
                }),
                Ok(None) => {
                    log::warn!("Segment {} no longer exists in store, skipping", segment_id);
                }
                Err(e) => {
                    log::warn!("Failed to resolve segment {}: {}", segment_id, e);
                }
            }
        }

        Ok(results)
    }

    /// Disaster recovery: drop everything and re-index every recording with
    /// a completed transcript.
    pub async fn rebuild_index(&self) -> Result<(), AssistantError> {
        {
            let mut state = self.state.write().await;
            *state = IndexState::default();
        }
        log::info!("Rebuilding vector index from store");

        let recordings = self.store.get_all_recordings().await?;
        for recording in recordings {
            let Some(transcript) = self.store.get_transcript(recording.id).await? else {
                continue;
            };
            if !transcript.complete {
                continue;
            }
            self.store.delete_embeddings(transcript.id).await?;
            let segments = self.store.get_segments(transcript.id).await?;
            self.index_recording(recording.id, transcript.id, &segments)
                .await?;
        }
        Ok(())
    }

    /// Remove one recording's documents and mapping entries.
    pub async fn remove_recording(&self, recording_id: i64) -> Result<(), AssistantError> {
        let mut state = self.state.write().await;
        state.indexed.remove(&recording_id);

        let doomed: Vec<Uuid> = state
            .doc_to_seg
            .iter()
            .filter(|(_, (rec, _))| *rec == recording_id)
            .map(|(id, _)| *id)
            .collect();
        for doc_id in &doomed {
            state.remove_document(doc_id);
        }
        drop(state);

        if let Ok(Some(transcript)) = self.store.get_transcript(recording_id).await {
            if let Err(e) = self.store.delete_embeddings(transcript.id).await {
                log::warn!(
                    "Failed to delete persisted embeddings for transcript {}: {}",
                    transcript.id,
                    e
                );
            }
        }

        log::info!(
            "Removed recording {} from index ({} documents)",
            recording_id,
            doomed.len()
        );
        Ok(())
    }
}
