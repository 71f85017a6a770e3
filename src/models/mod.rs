// Data model for the assistant core
// Recordings, transcripts and segments are owned by the Store; chat types
// cover the conversation surface.

pub mod chat;
pub mod transcript;

pub use chat::*;
pub use transcript::*;
