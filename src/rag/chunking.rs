//! Chunking engine
//!
//! Splits a chronologically ordered transcript into overlapping
//! token-bounded windows. Token counts are estimated with the same
//! characters/4 heuristic the router uses for its fit/no-fit decision, so
//! both sides agree on budgets.

use serde::{Deserialize, Serialize};

use crate::models::TranscriptSegment;

/// Estimate the token count of a text. Roughly 4 characters per token.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() as u32 + 3) / 4
}

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Window budget in estimated tokens
    pub max_tokens: u32,
    /// Budget for the trailing overlap seeded into the next window
    pub overlap_tokens: u32,
    /// Reserved for per-chunk prompt scaffolding
    pub overhead_tokens: u32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 2000,
            overlap_tokens: 200,
            overhead_tokens: 512,
        }
    }
}

/// A token-bounded grouping of consecutive segments, derived per query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Zero-based chronological position
    pub index: usize,
    pub recording_id: i64,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    pub segment_ids: Vec<i64>,
    pub estimated_tokens: u32,
}

pub struct ChunkingEngine {
    config: ChunkingConfig,
}

impl ChunkingEngine {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Greedily accumulate segments into windows under the effective budget.
    ///
    /// When the next segment would overflow, the window closes and the next
    /// one is seeded with the closed window's tail segments, bounded by the
    /// overlap budget, so facts spanning a boundary are visible on both
    /// sides. The final window is always emitted.
    pub fn chunk_segments(
        &self,
        recording_id: i64,
        segments: &[TranscriptSegment],
    ) -> Vec<Chunk> {
        let budget = self
            .config
            .max_tokens
            .saturating_sub(self.config.overhead_tokens)
            .max(1);

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut window: Vec<&TranscriptSegment> = Vec::new();
        let mut window_tokens: u32 = 0;

        for segment in segments {
            let seg_tokens = estimate_tokens(&segment.display_line());

            if !window.is_empty() && window_tokens + seg_tokens > budget {
                chunks.push(self.close_window(recording_id, chunks.len(), &window));

                let (overlap, overlap_tokens) = self.trailing_overlap(&window);
                window = overlap;
                window_tokens = overlap_tokens;
            }

            window.push(segment);
            window_tokens += seg_tokens;
        }

        if !window.is_empty() {
            chunks.push(self.close_window(recording_id, chunks.len(), &window));
        }

        chunks
    }

    fn close_window(
        &self,
        recording_id: i64,
        index: usize,
        window: &[&TranscriptSegment],
    ) -> Chunk {
        let text = window
            .iter()
            .map(|s| s.display_line())
            .collect::<Vec<_>>()
            .join("\n");
        Chunk {
            index,
            recording_id,
            start_time: window.first().map(|s| s.start_time).unwrap_or(0.0),
            end_time: window.last().map(|s| s.end_time).unwrap_or(0.0),
            estimated_tokens: estimate_tokens(&text),
            segment_ids: window.iter().map(|s| s.id).collect(),
            text,
        }
    }

    /// Tail segments of a closed window fitting the overlap budget,
    /// chronological order preserved.
    fn trailing_overlap<'a>(
        &self,
        window: &[&'a TranscriptSegment],
    ) -> (Vec<&'a TranscriptSegment>, u32) {
        let mut overlap: Vec<&TranscriptSegment> = Vec::new();
        let mut total = 0u32;

        for segment in window.iter().rev() {
            let tokens = estimate_tokens(&segment.display_line());
            if total + tokens > self.config.overlap_tokens {
                break;
            }
            overlap.push(segment);
            total += tokens;
        }
        overlap.reverse();
        (overlap, total)
    }
}

impl Default for ChunkingEngine {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}
