//! OpenAI-compatible chat API backend
//!
//! Issues a streaming chat-completions request and consumes newline-delimited
//! `data: {json}` event frames until the literal `[DONE]` sentinel. Malformed
//! frames are skipped, never fatal.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::AssistantError;
use crate::llm::provider::{
    GenerationBackend, GenerationRequest, StopScanner, TokenStream,
};
use crate::models::ChatRole;

const DONE_SENTINEL: &str = "[DONE]";

/// Chat API wire message
#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

impl WireMessage {
    fn new(role: ChatRole, content: String) -> Self {
        Self {
            role: role.as_str(),
            content,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Extract the incremental delta text from one SSE line.
///
/// Returns `None` for non-data lines and frames without text; `Some(None)`
/// marks the end-of-stream sentinel.
pub(crate) fn parse_sse_line(line: &str) -> Option<Option<String>> {
    let payload = line.trim().strip_prefix("data:")?.trim();
    if payload == DONE_SENTINEL {
        return Some(None);
    }
    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => {
            let text = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .unwrap_or_default();
            if text.is_empty() {
                None
            } else {
                Some(Some(text))
            }
        }
        Err(e) => {
            log::debug!("Skipping malformed chat API frame: {}", e);
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub context_budget: u32,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            temperature: 0.7,
            timeout_secs: 120,
            context_budget: 128_000,
        }
    }
}

/// Hosted chat-style generation backend.
pub struct OpenAiBackend {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig) -> Result<Self, AssistantError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                AssistantError::InvalidConfiguration(format!("failed to create HTTP client: {}", e))
            })?;
        Ok(Self { config, client })
    }

    fn build_messages(request: &GenerationRequest) -> Vec<WireMessage> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);

        let system = match request.context {
            Some(ref context) => {
                format!("{}\n\nCONTEXT:\n{}", request.system_prompt, context)
            }
            None => request.system_prompt.clone(),
        };
        messages.push(WireMessage::new(ChatRole::System, system));

        for turn in &request.history {
            messages.push(WireMessage::new(turn.role, turn.content.clone()));
        }
        messages.push(WireMessage::new(ChatRole::User, request.user.clone()));
        messages
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn context_budget(&self) -> u32 {
        self.config.context_budget
    }

    async fn generate(&self, request: GenerationRequest) -> Result<TokenStream, AssistantError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let body = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: Self::build_messages(&request),
            stream: true,
            max_tokens: request.params.max_tokens,
            temperature: request.params.temperature,
            top_p: request.params.top_p,
            stop: request.params.stop.clone(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::NetworkError(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AssistantError::NetworkError(format!(
                "chat API returned status {}",
                status.as_u16()
            )));
        }

        let stops = request.params.stop.clone();
        let (tx, stream) = TokenStream::channel();

        tokio::spawn(async move {
            let mut scanner = StopScanner::new(&stops);
            let mut bytes = response.bytes_stream();
            // Frames can split across network chunks; keep the partial line.
            let mut pending = String::new();
            let mut done = false;

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

                    match parse_sse_line(&line) {
                        Some(Some(delta)) => {
                            let scan = scanner.push(&delta);
                            if !scan.text.is_empty() && tx.send(Ok(scan.text)).await.is_err() {
                                // Consumer gone; dropping `bytes` abandons
                                // the connection.
                                return;
                            }
                            if scan.hit {
                                done = true;
                                break 'outer;
                            }
                        }
                        Some(None) => {
                            done = true;
                            break 'outer;
                        }
                        None => {}
                    }
                }
            }

            if done || pending.trim().is_empty() {
                // Either sentinel/stop reached or the stream drained cleanly.
            } else if let Some(Some(delta)) = parse_sse_line(&pending) {
                let scan = scanner.push(&delta);
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
