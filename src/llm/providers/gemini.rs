//! Gemini API backend
//!
//! Issues a streaming request to the model-specific `streamGenerateContent`
//! endpoint: one system-instruction block plus ordered turn contents. Event
//! frames are shaped `candidates -> content -> parts -> text` and the stream
//! terminates on connection close rather than a sentinel line.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::AssistantError;
use crate::llm::provider::{
    GenerationBackend, GenerationRequest, StopScanner, TokenStream,
};
use crate::models::ChatRole;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Maximum bytes of an error body read for diagnostics.
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    system_instruction: SystemInstruction,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
struct FrameBody {
    #[serde(default)]
    candidates: Vec<FrameCandidate>,
}

#[derive(Debug, Deserialize)]
struct FrameCandidate {
    #[serde(default)]
    content: Option<FrameContent>,
}

#[derive(Debug, Deserialize)]
struct FrameContent {
    #[serde(default)]
    parts: Vec<FramePart>,
}

#[derive(Debug, Deserialize)]
struct FramePart {
    #[serde(default)]
    text: Option<String>,
}

/// Extract incremental text from one `data: {json}` frame line.
pub(crate) fn parse_frame_line(line: &str) -> Option<String> {
    let payload = line.trim().strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_str::<FrameBody>(payload) {
        Ok(body) => {
            let text: String = body
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.content)
                .map(|c| {
                    c.parts
                        .into_iter()
                        .filter_map(|p| p.text)
                        .collect::<Vec<_>>()
                        .join("")
                })
                .unwrap_or_default();
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        }
        Err(e) => {
            log::debug!("Skipping malformed Gemini frame: {}", e);
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub base_url: String,
    pub timeout_secs: u64,
    pub context_budget: u32,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.7,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 120,
            context_budget: 128_000,
        }
    }
}

/// Hosted turn-structured generation backend.
pub struct GeminiBackend {
    config: GeminiConfig,
    client: Client,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig) -> Result<Self, AssistantError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                AssistantError::InvalidConfiguration(format!("failed to create HTTP client: {}", e))
            })?;
        Ok(Self { config, client })
    }

    fn build_body(&self, request: &GenerationRequest) -> GenerateContentRequest {
        let mut contents = Vec::with_capacity(request.history.len() + 1);
        for turn in &request.history {
            let role = match turn.role {
                ChatRole::Assistant => "model",
                _ => "user",
            };
            contents.push(Content {
                role,
                parts: vec![Part {
                    text: turn.content.clone(),
                }],
            });
        }

        let user_text = match request.context {
            Some(ref context) => format!("CONTEXT:\n{}\n\n{}", context, request.user),
            None => request.user.clone(),
        };
        contents.push(Content {
            role: "user",
            parts: vec![Part { text: user_text }],
        });

        GenerateContentRequest {
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: request.system_prompt.clone(),
                }],
            },
            contents,
            generation_config: GenerationConfig {
                max_output_tokens: request.params.max_tokens,
                temperature: request.params.temperature,
                top_p: request.params.top_p,
                stop_sequences: request.params.stop.clone(),
            },
        }
    }
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn context_budget(&self) -> u32 {
        self.config.context_budget
    }

    async fn generate(&self, request: GenerationRequest) -> Result<TokenStream, AssistantError> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model,
            self.config.api_key
        );

        let body = self.build_body(&request);

        let mut response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::NetworkError(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            // Read a bounded prefix of the error body for diagnostics.
            let mut prefix = Vec::new();
            while prefix.len() < ERROR_BODY_LIMIT {
                match response.chunk().await {
                    Ok(Some(chunk)) => {
                        let take = (ERROR_BODY_LIMIT - prefix.len()).min(chunk.len());
                        prefix.extend_from_slice(&chunk[..take]);
                    }
                    _ => break,
                }
            }
            let detail = String::from_utf8_lossy(&prefix);
            return Err(AssistantError::NetworkError(format!(
                "Gemini API returned status {}: {}",
                status.as_u16(),
                detail.trim()
            )));
        }

        let stops = request.params.stop.clone();
        let (tx, stream) = TokenStream::channel();

        tokio::spawn(async move {
            let mut scanner = StopScanner::new(&stops);
            let mut bytes = response.bytes_stream();
            let mut pending = String::new();

            'outer: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx
                            .send(Err(AssistantError::NetworkError(format!(
                                "stream error: {}",
                                e
                            ))))
                            .await;
                        return;
                    }
                };
                pending.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = pending.find('\n') {
                    let line = pending[..newline].to_string();
                    pending.drain(..=newline);

                    if let Some(text) = parse_frame_line(&line) {
                        let scan = scanner.push(&text);
                        if !scan.text.is_empty() && tx.send(Ok(scan.text)).await.is_err() {
                            return;
                        }
                        if scan.hit {
                            break 'outer;
                        }
                    }
                }
            }

            // Connection close terminates the stream; flush the last partial
            // line if it was a complete frame, then any held-back tail.
            if let Some(text) = parse_frame_line(&pending) {
                let scan = scanner.push(&text);
                if !scan.text.is_empty() {
                    let _ = tx.send(Ok(scan.text)).await;
                }
            }
            let tail = scanner.finish();
            if !tail.is_empty() {
                let _ = tx.send(Ok(tail)).await;
            }
        });

        Ok(stream)
    }
}
