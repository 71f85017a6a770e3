//! Store collaborator trait
//!
//! The persistence engine lives outside this crate; the orchestration layer
//! talks to it exclusively through this seam. The Store is authoritative for
//! recordings, transcripts and segment text - search results are always
//! resolved back through it, never from index-side copies.

use async_trait::async_trait;

use crate::error::AssistantError;
use crate::models::{ChatMessage, Recording, Transcript, TranscriptSegment};

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_all_recordings(&self) -> Result<Vec<Recording>, AssistantError>;

    async fn get_recording(&self, recording_id: i64) -> Result<Option<Recording>, AssistantError>;

    /// Transcript for a recording, if one has been produced.
    async fn get_transcript(
        &self,
        recording_id: i64,
    ) -> Result<Option<Transcript>, AssistantError>;

    /// All segments of a transcript in chronological order.
    async fn get_segments(
        &self,
        transcript_id: i64,
    ) -> Result<Vec<TranscriptSegment>, AssistantError>;

    async fn get_segment(
        &self,
        segment_id: i64,
    ) -> Result<Option<TranscriptSegment>, AssistantError>;

    /// Persist a raw embedding vector for rebuild durability.
    async fn save_embedding(
        &self,
        segment_id: i64,
        vector: &[f32],
        tag: &str,
    ) -> Result<(), AssistantError>;

    /// Drop all persisted embeddings for a transcript.
    async fn delete_embeddings(&self, transcript_id: i64) -> Result<(), AssistantError>;

    async fn save_chat_message(&self, message: &ChatMessage) -> Result<(), AssistantError>;

    /// Messages of a session in chronological order.
    async fn get_chat_history(
        &self,
        session_id: &str,
    ) -> Result<Vec<ChatMessage>, AssistantError>;
}
