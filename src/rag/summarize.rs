//! Map-reduce summarization
//!
//! Per-chunk extraction followed by one synthesis pass. Chunks are processed
//! in chronological order and a failed map call aborts the whole operation -
//! silently dropping a section from the synthesis would corrupt the answer.

use crate::error::AssistantError;
use crate::llm::provider::{GenerationBackend, GenerationParameters, GenerationRequest};
use crate::rag::chunking::Chunk;
use crate::rag::prompts;

#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    pub map_max_tokens: u32,
    pub reduce_max_tokens: u32,
    /// Low temperature keeps extraction faithful to the transcript
    pub temperature: f32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            map_max_tokens: 640,
            reduce_max_tokens: 1024,
            temperature: 0.3,
        }
    }
}

pub struct MapReduceSummarizer {
    config: SummarizerConfig,
}

impl MapReduceSummarizer {
    pub fn new(config: SummarizerConfig) -> Self {
        Self { config }
    }

    /// Answer `query` over `chunks`, returning one synthesized response.
    pub async fn summarize(
        &self,
        backend: &dyn GenerationBackend,
        query: &str,
        chunks: &[Chunk],
    ) -> Result<String, AssistantError> {
        if chunks.is_empty() {
            return Ok(String::new());
        }

        let mut summaries: Vec<String> = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            log::debug!(
                "Map pass over chunk {} ({} est. tokens)",
                chunk.index,
                chunk.estimated_tokens
            );
            let request = GenerationRequest::new(
                prompts::map_system_prompt(),
                prompts::map_prompt(query, chunk),
            )
            .with_params(GenerationParameters {
                max_tokens: self.config.map_max_tokens,
                temperature: self.config.temperature,
                ..Default::default()
            });

            let stream = backend.generate(request).await?;
            let text = stream.collect_text().await?;
            summaries.push(text.trim().to_string());
        }

        // A single chunk needs no synthesis call.
        if summaries.len() == 1 {
            return Ok(summaries.pop().unwrap_or_default());
        }

        let sections = chunks
            .iter()
            .zip(summaries.iter())
            .map(|(chunk, summary)| format!("{}:\n{}", prompts::section_label(chunk), summary))
            .collect::<Vec<_>>()
            .join("\n\n");

        let request = GenerationRequest::new(
            prompts::reduce_system_prompt(),
            prompts::reduce_prompt(query, &sections),
        )
        .with_params(GenerationParameters {
            max_tokens: self.config.reduce_max_tokens,
            temperature: self.config.temperature,
            ..Default::default()
        });

        let stream = backend.generate(request).await?;
        let synthesized = stream.collect_text().await?;
        Ok(synthesized.trim().to_string())
    }
}

impl Default for MapReduceSummarizer {
    fn default() -> Self {
        Self::new(SummarizerConfig::default())
    }
}
