//! Local inference backend
//!
//! Wraps an in-process inference handle behind the [`LocalGenerator`] seam.
//! Every call is stateless - no decoder or session state survives between
//! calls, matching hosted-API semantics. An optional fixed per-token delay
//! throttles sustained CPU/GPU usage.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::AssistantError;
use crate::llm::provider::{
    GenerationBackend, GenerationParameters, GenerationRequest, StopScanner, TokenStream,
};
use crate::models::ChatRole;

/// The in-process inference handle.
///
/// This crate never touches model weights or tokenization; the generator is
/// handed a fully shaped prompt and pushes raw text increments into `tx`.
/// When `tx` is closed the generator must stop producing and return.
#[async_trait]
pub trait LocalGenerator: Send + Sync {
    async fn load(&self, model_path: &Path) -> Result<(), AssistantError>;

    async fn unload(&self);

    async fn is_loaded(&self) -> bool;

    async fn generate(
        &self,
        prompt: String,
        params: GenerationParameters,
        tx: mpsc::Sender<String>,
    ) -> Result<(), AssistantError>;
}

#[derive(Debug, Clone)]
pub struct LocalBackendConfig {
    /// Fixed delay inserted after each forwarded token, if any
    pub token_delay: Option<Duration>,
    /// Effective context window in estimated tokens
    pub context_budget: u32,
}

impl Default for LocalBackendConfig {
    fn default() -> Self {
        Self {
            token_delay: None,
            context_budget: 4096,
        }
    }
}

/// Local generation backend over a loaded [`LocalGenerator`].
pub struct LocalBackend {
    generator: Arc<dyn LocalGenerator>,
    config: LocalBackendConfig,
}

impl LocalBackend {
    pub fn new(generator: Arc<dyn LocalGenerator>, config: LocalBackendConfig) -> Self {
        Self { generator, config }
    }

    /// Flatten system prompt, context, history and question into one prompt.
    fn flatten_prompt(request: &GenerationRequest) -> String {
        let mut prompt = String::new();
        prompt.push_str(&request.system_prompt);
        prompt.push_str("\n\n");
        if let Some(ref context) = request.context {
            prompt.push_str("CONTEXT:\n");
            prompt.push_str(context);
            prompt.push_str("\n\n");
        }
        for turn in &request.history {
            let label = match turn.role {
                ChatRole::Assistant => "Assistant",
                _ => "User",
            };
            prompt.push_str(label);
            prompt.push_str(": ");
            prompt.push_str(&turn.content);
            prompt.push('\n');
        }
        prompt.push_str("User: ");
        prompt.push_str(&request.user);
        prompt.push_str("\nAssistant:");
        prompt
    }
}

#[async_trait]
impl GenerationBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn context_budget(&self) -> u32 {
        self.config.context_budget
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn generate(&self, request: GenerationRequest) -> Result<TokenStream, AssistantError> {
        if !self.generator.is_loaded().await {
            return Err(AssistantError::NotInitialized);
        }

        let prompt = Self::flatten_prompt(&request);
        let stops = request.params.stop.clone();
        let params = request.params;
        let token_delay = self.config.token_delay;

        let (raw_tx, mut raw_rx) =
            mpsc::channel::<String>(crate::llm::provider::STREAM_CAPACITY);
        let (out_tx, stream) = TokenStream::channel();

        let generator = self.generator.clone();
        let gen_handle =
            tokio::spawn(async move { generator.generate(prompt, params, raw_tx).await });

        tokio::spawn(async move {
            let mut scanner = StopScanner::new(&stops);
            let mut stopped = false;

            while let Some(token) = raw_rx.recv().await {
                let scan = scanner.push(&token);
                if !scan.text.is_empty() && out_tx.send(Ok(scan.text)).await.is_err() {
                    // Consumer abandoned the stream; closing raw_rx below
                    // tells the generator to halt.
                    stopped = true;
                    break;
                }
                if scan.hit {
                    stopped = true;
                    break;
                }
                if let Some(delay) = token_delay {
                    tokio::time::sleep(delay).await;
                }
            }
            drop(raw_rx);

            match gen_handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    // An error after an intentional stop is expected: the
                    // generator saw its channel close mid-call.
                    if !stopped {
                        let _ = out_tx.send(Err(e)).await;
                        return;
                    }
                }
                Err(e) => {
                    if !stopped {
                        let _ = out_tx
                            .send(Err(AssistantError::BackendUnavailable(format!(
                                "local generation task failed: {}",
                                e
                            ))))
                            .await;
                        return;
                    }
                }
            }

            if !stopped {
                let tail = scanner.finish();
                if !tail.is_empty() {
                    let _ = out_tx.send(Ok(tail)).await;
                }
            }
        });

        Ok(stream)
    }
}
