//! Prompt templates
//!
//! Builders for the system and user prompts used by each query strategy.

use crate::models::format_clock;
use crate::rag::chunking::Chunk;

/// System prompt for answering over a full transcript or retrieved excerpts.
pub fn chat_system_prompt() -> String {
    "You are a helpful assistant analyzing meeting transcripts. \
     You can summarize meetings, extract action items and decisions, list \
     participants, and answer questions about what was discussed. \
     Base every answer strictly on the transcript content provided; if the \
     transcript does not contain the answer, say so instead of guessing. \
     Provide clear, concise answers."
        .to_string()
}

/// System prompt for answers grounded in vector-search excerpts.
pub fn rag_system_prompt() -> String {
    "You are a helpful assistant answering questions across a library of \
     meeting transcripts. The context below contains the excerpts most \
     relevant to the question, each labeled with its meeting and timestamp. \
     Answer based only on these excerpts and mention which meeting the \
     information comes from. If the excerpts do not contain the answer, \
     say so."
        .to_string()
}

/// Canned reply when a scoped recording has no usable transcript text.
pub fn no_content_message() -> String {
    "This recording doesn't have any transcript content yet. Once \
     transcription has produced some text, ask me again."
        .to_string()
}

/// Map-phase system prompt.
pub fn map_system_prompt() -> String {
    "You extract information from one section of a longer meeting \
     transcript. Report only what this section actually contains; do not \
     speculate about the rest of the meeting."
        .to_string()
}

/// Map-phase user prompt for one chunk.
pub fn map_prompt(query: &str, chunk: &Chunk) -> String {
    format!(
        "This is section {} of the meeting, covering {} to {}.\n\n\
         {}\n\n\
         Extract everything from this section that is relevant to the \
         following request. If nothing is relevant, reply with \"Nothing \
         relevant in this section.\"\n\nRequest: {}",
        chunk.index + 1,
        format_clock(chunk.start_time),
        format_clock(chunk.end_time),
        chunk.text,
        query
    )
}

/// Reduce-phase system prompt.
pub fn reduce_system_prompt() -> String {
    "You combine per-section notes from a single meeting into one coherent \
     answer. Merge overlapping points instead of repeating them, drop \
     duplicates, and organize the result logically rather than section by \
     section."
        .to_string()
}

/// Reduce-phase user prompt over the labeled section summaries.
pub fn reduce_prompt(query: &str, sections: &str) -> String {
    format!(
        "Here are notes extracted from consecutive sections of one meeting:\n\n\
         {}\n\n\
         Using these notes, answer the following request as a single \
         unified response. Do not mention the section structure.\n\n\
         Request: {}",
        sections, query
    )
}

/// Label one map result with its section index and time window.
pub fn section_label(chunk: &Chunk) -> String {
    format!(
        "Section {} ({} - {})",
        chunk.index + 1,
        format_clock(chunk.start_time),
        format_clock(chunk.end_time)
    )
}
