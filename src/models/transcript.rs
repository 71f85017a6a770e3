// Data model - recordings, transcripts and segments
use serde::{Deserialize, Serialize};

/// A recorded meeting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub id: i64,
    pub title: String,
    pub created_at: String,
}

/// A transcript produced for a recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub id: i64,
    pub recording_id: i64,
    /// Whether transcription has finished for the whole recording
    pub complete: bool,
}

/// A speaker-attributed span of transcribed speech.
///
/// Immutable and owned by the Store; the orchestration layer only reads
/// these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub id: i64,
    pub recording_id: i64,
    /// Seconds from the start of the recording
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    pub speaker: Option<String>,
}

impl TranscriptSegment {
    /// Render this segment as a single transcript line: `[mm:ss] Speaker: text`
    pub fn display_line(&self) -> String {
        let speaker = self.speaker.as_deref().unwrap_or("Unknown");
        format!(
            "{} {}: {}",
            format_clock(self.start_time),
            speaker,
            self.text
        )
    }
}

/// Format a second offset as a `[mm:ss]` clock marker.
pub fn format_clock(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("[{:02}:{:02}]", total / 60, total % 60)
}

/// Join segments into the full transcript text, one line per segment.
pub fn transcript_text(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|s| s.display_line())
        .collect::<Vec<_>>()
        .join("\n")
}
