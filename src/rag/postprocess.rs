//! Stream post-processing
//!
//! A stateful two-state filter strips `<think>...</think>` reasoning spans
//! from a token stream as it arrives, and a stateless companion pass cleans
//! a complete response before persistence.

use once_cell::sync::Lazy;
use regex::Regex;

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterState {
    Normal,
    Thinking,
}

/// Output of feeding one increment through the filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Filtered {
    /// Display-ready text
    pub text: String,
    /// A reasoning span just opened; signal the caller once per span
    pub thinking_started: bool,
}

/// Stateful reasoning-span filter.
///
/// In `Normal` the filter withholds just enough trailing characters to cover
/// an opening marker split across increments; in `Thinking` everything is
/// discarded until the closing marker. An unterminated span is dropped
/// entirely at [`StreamPostProcessor::flush`] - partial reasoning text never
/// leaks to the display.
pub struct StreamPostProcessor {
    state: FilterState,
    buffer: String,
    span_signaled: bool,
}

impl StreamPostProcessor {
    pub fn new() -> Self {
        Self {
            state: FilterState::Normal,
            buffer: String::new(),
            span_signaled: false,
        }
    }

    pub fn push(&mut self, increment: &str) -> Filtered {
        self.buffer.push_str(increment);
        let mut text = String::new();
        let mut thinking_started = false;

        loop {
            match self.state {
                FilterState::Normal => {
                    if let Some(pos) = self.buffer.find(THINK_OPEN) {
                        text.push_str(&self.buffer[..pos]);
                        self.buffer.drain(..pos + THINK_OPEN.len());
                        self.state = FilterState::Thinking;
                        if !self.span_signaled {
                            thinking_started = true;
                            self.span_signaled = true;
                        }
                        continue;
                    }
                    let keep = partial_suffix_len(&self.buffer, THINK_OPEN);
                    let flush_to = self.buffer.len() - keep;
                    text.push_str(&self.buffer[..flush_to]);
                    self.buffer.drain(..flush_to);
                    break;
                }
                FilterState::Thinking => {
                    if let Some(pos) = self.buffer.find(THINK_CLOSE) {
                        self.buffer.drain(..pos + THINK_CLOSE.len());
                        self.state = FilterState::Normal;
                        self.span_signaled = false;
                        continue;
                    }
                    // Reasoning text is dropped; keep only the tail that
                    // could be the start of the closing marker.
                    let keep = partial_suffix_len(&self.buffer, THINK_CLOSE);
                    self.buffer.drain(..self.buffer.len() - keep);
                    break;
                }
            }
        }

        Filtered {
            text,
            thinking_started,
        }
    }

    /// End of stream. Returns any remaining display text; a pending
    /// unterminated reasoning buffer is discarded.
    pub fn flush(&mut self) -> String {
        match self.state {
            FilterState::Normal => std::mem::take(&mut self.buffer),
            FilterState::Thinking => {
                self.buffer.clear();
                self.state = FilterState::Normal;
                self.span_signaled = false;
                String::new()
            }
        }
    }
}

impl Default for StreamPostProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Length of the longest buffer suffix that is a proper prefix of `marker`.
fn partial_suffix_len(buffer: &str, marker: &str) -> usize {
    let max_k = marker.len().saturating_sub(1).min(buffer.len());
    for k in (1..=max_k).rev() {
        if buffer.ends_with(&marker[..k]) {
            return k;
        }
    }
    0
}

static THINK_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));
static ORPHAN_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?think>").expect("valid regex"));
static STATUS_PHRASE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^[ \t]*(thinking\.{3}|let me think\.?)[ \t]*$").expect("valid regex")
});
static EXCESS_NEWLINES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));
static BULLET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([ \t]*)[•‣∙][ \t]*").expect("valid regex"));
static NUMBERED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([ \t]*\d+)\.(\S)").expect("valid regex"));

/// One-shot cleanup over a complete response.
///
/// Strips any marker pairs that slipped through the streaming filter,
/// removes leftover literal status phrases, collapses runs of blank lines,
/// normalizes bullet glyphs and fixes numbered-list spacing.
pub fn clean_response(text: &str) -> String {
    let cleaned = THINK_BLOCK_RE.replace_all(text, "");
    let cleaned = ORPHAN_MARKER_RE.replace_all(&cleaned, "");
    let cleaned = STATUS_PHRASE_RE.replace_all(&cleaned, "");
    let cleaned = BULLET_RE.replace_all(&cleaned, "$1- ");
    let cleaned = NUMBERED_RE.replace_all(&cleaned, "$1. $2");
    let cleaned = EXCESS_NEWLINES_RE.replace_all(&cleaned, "\n\n");
    cleaned.trim().to_string()
}
