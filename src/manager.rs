//! Resource lifecycle manager
//!
//! Owns backend selection and the readiness state machine, gates local model
//! loads on available memory, evicts an idle local model after a threshold
//! and reloads it transparently on the next request. Also the caller-facing
//! entry point for chat and index operations.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::AssistantError;
use crate::llm::provider::{ChatTurn, GenerationBackend, STREAM_CAPACITY};
use crate::llm::providers::gemini::{GeminiBackend, GeminiConfig};
use crate::llm::providers::local::{LocalBackend, LocalBackendConfig, LocalGenerator};
use crate::llm::providers::openai::{OpenAiBackend, OpenAiConfig};
use crate::models::{ChatMessage, ChatStream};
use crate::rag::chunking::ChunkingEngine;
use crate::rag::embedder::Embedder;
use crate::rag::index::{ScoredResult, VectorIndex, VectorIndexConfig};
use crate::rag::router::{QueryRouter, RouterConfig};
use crate::rag::summarize::MapReduceSummarizer;
use crate::store::Store;

/// Observable lifecycle state of the generation service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServiceStatus {
    NotConfigured,
    Downloading { model: String, progress: f32 },
    Loading { model: String },
    Ready { model: String },
    /// Local model evicted after idling; reloaded on the next request
    Sleeping { model: String },
    Error { message: String },
}

/// Immutable backend selection, replaced atomically on switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Local {
        model_id: String,
    },
    OpenAiCompatible {
        api_key: String,
        base_url: String,
        model: String,
        temperature: f32,
    },
    Gemini {
        api_key: String,
        model: String,
        temperature: f32,
    },
}

/// Model acquisition collaborator. Download mechanics live behind this seam;
/// the manager only maps fractional progress into status updates.
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    /// Whether the model artifact is already on disk.
    async fn is_available(&self, model_id: &str) -> bool;

    async fn model_size_bytes(&self, model_id: &str) -> Result<u64, AssistantError>;

    /// Resolve the model to a local path, downloading if needed.
    /// `on_progress` receives fractions in `0.0..=1.0`.
    async fn fetch(
        &self,
        model_id: &str,
        on_progress: Box<dyn Fn(f32) + Send + Sync>,
    ) -> Result<PathBuf, AssistantError>;
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Local model unloaded after this much idle time
    pub idle_threshold: Duration,
    /// Poll interval while another caller holds initialization
    pub init_poll_interval: Duration,
    /// How long a late arrival waits before proceeding on its own
    pub init_poll_timeout: Duration,
    /// Fraction of available memory a local model may claim
    pub memory_fraction: f64,
    /// Weights-to-runtime memory multiplier (KV cache and overhead)
    pub model_memory_factor: f64,
    /// Retrieval hits per unscoped chat query
    pub search_limit: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::from_secs(300),
            init_poll_interval: Duration::from_millis(100),
            init_poll_timeout: Duration::from_secs(30),
            memory_fraction: 0.3,
            model_memory_factor: 1.4,
            search_limit: 6,
        }
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct ActiveBackend {
    backend: Arc<dyn GenerationBackend>,
    model_label: String,
    /// Cached artifact path, kept so a slept model reloads without refetch
    model_path: Option<PathBuf>,
}

/// Idle-eviction timer. Re-armed after every generation; firing unloads the
/// local model unless a generation is still in flight.
struct IdleWatchdog {
    generator: Arc<dyn LocalGenerator>,
    status: Arc<Mutex<ServiceStatus>>,
    inflight: Arc<AtomicUsize>,
    threshold: Duration,
    current: Mutex<Option<CancellationToken>>,
}

impl IdleWatchdog {
    fn arm(self: &Arc<Self>, model: String) {
        let token = CancellationToken::new();
        if let Some(old) = lock(&self.current).replace(token.clone()) {
            old.cancel();
        }

        let watchdog = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(watchdog.threshold) => {
                    if watchdog.inflight.load(Ordering::SeqCst) > 0 {
                        return;
                    }
                    if watchdog.generator.is_loaded().await {
                        watchdog.generator.unload().await;
                        *lock(&watchdog.status) = ServiceStatus::Sleeping {
                            model: model.clone(),
                        };
                        log::info!("Unloaded idle local model {}", model);
                    }
                }
            }
        });
    }

    fn disarm(&self) {
        if let Some(token) = lock(&self.current).take() {
            token.cancel();
        }
    }
}

/// Caller-facing orchestration surface.
pub struct ResourceLifecycleManager {
    store: Arc<dyn Store>,
    generator: Arc<dyn LocalGenerator>,
    fetcher: Arc<dyn ModelFetcher>,
    index: Arc<VectorIndex>,
    router: Arc<QueryRouter>,
    config: ManagerConfig,
    status: Arc<Mutex<ServiceStatus>>,
    active: RwLock<Option<ActiveBackend>>,
    inflight: Arc<AtomicUsize>,
    initializing: Arc<AtomicBool>,
    watchdog: Arc<IdleWatchdog>,
}

impl ResourceLifecycleManager {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn LocalGenerator>,
        fetcher: Arc<dyn ModelFetcher>,
        config: ManagerConfig,
    ) -> Self {
        let index = Arc::new(VectorIndex::new(
            store.clone(),
            embedder,
            VectorIndexConfig::default(),
        ));
        let router = Arc::new(QueryRouter::new(
            store.clone(),
            index.clone(),
            ChunkingEngine::default(),
            MapReduceSummarizer::default(),
            RouterConfig {
                search_limit: config.search_limit,
                ..RouterConfig::default()
            },
        ));
        let status = Arc::new(Mutex::new(ServiceStatus::NotConfigured));
        let inflight = Arc::new(AtomicUsize::new(0));
        let watchdog = Arc::new(IdleWatchdog {
            generator: generator.clone(),
            status: status.clone(),
            inflight: inflight.clone(),
            threshold: config.idle_threshold,
            current: Mutex::new(None),
        });

        Self {
            store,
            generator,
            fetcher,
            index,
            router,
            config,
            status,
            active: RwLock::new(None),
            inflight,
            initializing: Arc::new(AtomicBool::new(false)),
            watchdog,
        }
    }

    pub fn status(&self) -> ServiceStatus {
        lock(&self.status).clone()
    }

    fn set_status(&self, status: ServiceStatus) {
        *lock(&self.status) = status;
    }

    fn fail(&self, error: &AssistantError) {
        self.set_status(ServiceStatus::Error {
            message: error.user_message(),
        });
    }

    /// Switch the active backend. The previous selection is torn down first;
    /// a failed switch leaves the manager in `Error`, not half-configured.
    pub async fn select_backend(&self, config: BackendConfig) -> Result<(), AssistantError> {
        match config {
            BackendConfig::Local { model_id } => self.select_local_backend(&model_id).await,
            hosted => self.select_hosted_backend(hosted).await,
        }
    }

    /// Single-flight local setup: one caller fetches and loads while late
    /// arrivals poll-wait, then adopt the result when it selected the same
    /// model.
    async fn select_local_backend(&self, model_id: &str) -> Result<(), AssistantError> {
        if self.is_active_local(model_id).await {
            return Ok(());
        }

        if self
            .initializing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let deadline = tokio::time::Instant::now() + self.config.init_poll_timeout;
            while self.initializing.load(Ordering::SeqCst)
                && tokio::time::Instant::now() < deadline
            {
                tokio::time::sleep(self.config.init_poll_interval).await;
            }
            if self.is_active_local(model_id).await {
                return Ok(());
            }
            if self
                .initializing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Err(AssistantError::Timeout(
                    "backend setup already in progress".to_string(),
                ));
            }
        }

        let result = self.setup_local_backend(model_id).await;
        self.initializing.store(false, Ordering::SeqCst);
        result
    }

    /// Whether the requested local model is already the loaded active
    /// backend.
    async fn is_active_local(&self, model_id: &str) -> bool {
        let guard = self.active.read().await;
        match guard.as_ref() {
            Some(active) => {
                active.model_path.is_some()
                    && active.model_label == model_id
                    && self.generator.is_loaded().await
            }
            None => false,
        }
    }

    async fn setup_local_backend(&self, model_id: &str) -> Result<(), AssistantError> {
        self.watchdog.disarm();
        if self.generator.is_loaded().await {
            self.generator.unload().await;
        }
        *self.active.write().await = None;

        let size = self.fetcher.model_size_bytes(model_id).await.map_err(|e| {
            self.fail(&e);
            e
        })?;
        if let Err(e) = self.memory_gate(size) {
            self.fail(&e);
            return Err(e);
        }

        if !self.fetcher.is_available(model_id).await {
            self.set_status(ServiceStatus::Downloading {
                model: model_id.to_string(),
                progress: 0.0,
            });
        }
        let status = self.status.clone();
        let model = model_id.to_string();
        let on_progress = Box::new(move |progress: f32| {
            *lock(&status) = ServiceStatus::Downloading {
                model: model.clone(),
                progress,
            };
        });
        let path = self.fetcher.fetch(model_id, on_progress).await.map_err(|e| {
            self.fail(&e);
            e
        })?;

        self.set_status(ServiceStatus::Loading {
            model: model_id.to_string(),
        });
        if let Err(e) = self.generator.load(&path).await {
            self.fail(&e);
            return Err(e);
        }

        let backend: Arc<dyn GenerationBackend> = Arc::new(LocalBackend::new(
            self.generator.clone(),
            LocalBackendConfig::default(),
        ));
        *self.active.write().await = Some(ActiveBackend {
            backend,
            model_label: model_id.to_string(),
            model_path: Some(path),
        });
        self.set_status(ServiceStatus::Ready {
            model: model_id.to_string(),
        });
        self.watchdog.arm(model_id.to_string());
        log::info!("Local backend ready: {}", model_id);
        Ok(())
    }

    async fn select_hosted_backend(&self, config: BackendConfig) -> Result<(), AssistantError> {
        let (backend, label): (Arc<dyn GenerationBackend>, String) = match config {
            BackendConfig::OpenAiCompatible {
                api_key,
                base_url,
                model,
                temperature,
            } => {
                if api_key.trim().is_empty() {
                    return Err(AssistantError::InvalidConfiguration(
                        "API key must not be empty".to_string(),
                    ));
                }
                let mut cfg = OpenAiConfig::new(api_key, base_url, model.clone());
                cfg.temperature = temperature;
                (Arc::new(OpenAiBackend::new(cfg)?), model)
            }
            BackendConfig::Gemini {
                api_key,
                model,
                temperature,
            } => {
                if api_key.trim().is_empty() {
                    return Err(AssistantError::InvalidConfiguration(
                        "API key must not be empty".to_string(),
                    ));
                }
                let mut cfg = GeminiConfig::new(api_key, model.clone());
                cfg.temperature = temperature;
                (Arc::new(GeminiBackend::new(cfg)?), model)
            }
            BackendConfig::Local { .. } => {
                return Err(AssistantError::InvalidConfiguration(
                    "local models are set up through the model loader".to_string(),
                ))
            }
        };

        self.watchdog.disarm();
        if self.generator.is_loaded().await {
            self.generator.unload().await;
        }
        *self.active.write().await = Some(ActiveBackend {
            backend,
            model_label: label.clone(),
            model_path: None,
        });
        self.set_status(ServiceStatus::Ready {
            model: label.clone(),
        });
        log::info!("Hosted backend ready: {}", label);
        Ok(())
    }

    /// Reject a model whose runtime footprint would not fit in the share of
    /// available memory this process may claim.
    fn memory_gate(&self, model_size_bytes: u64) -> Result<(), AssistantError> {
        let required = (model_size_bytes as f64 * self.config.model_memory_factor) as u64;
        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        let available = sys.available_memory();
        let budget = (available as f64 * self.config.memory_fraction) as u64;

        if required > budget {
            log::warn!(
                "Model needs {} bytes but only {} of {} available may be used",
                required,
                budget,
                available
            );
            return Err(AssistantError::InsufficientResource {
                available,
                required,
            });
        }
        Ok(())
    }

    /// Resolve the active backend, reloading a slept local model on demand.
    ///
    /// Reload is single flight: one caller performs the load while late
    /// arrivals poll until it finishes or the wait bound elapses, after
    /// which they proceed independently.
    async fn ensure_ready(&self) -> Result<Arc<dyn GenerationBackend>, AssistantError> {
        let (backend, is_local, model_path, model_label) = {
            let guard = self.active.read().await;
            let active = guard.as_ref().ok_or(AssistantError::NotConfigured)?;
            (
                active.backend.clone(),
                active.backend.is_local(),
                active.model_path.clone(),
                active.model_label.clone(),
            )
        };

        if !is_local || self.generator.is_loaded().await {
            return Ok(backend);
        }

        let path = model_path.ok_or(AssistantError::NotInitialized)?;

        if self
            .initializing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            log::info!("Reloading slept local model {}", model_label);
            self.set_status(ServiceStatus::Loading {
                model: model_label.clone(),
            });
            let result = self.generator.load(&path).await;
            self.initializing.store(false, Ordering::SeqCst);
            match result {
                Ok(()) => {
                    self.set_status(ServiceStatus::Ready { model: model_label });
                    Ok(backend)
                }
                Err(e) => {
                    self.fail(&e);
                    Err(e)
                }
            }
        } else {
            let deadline = tokio::time::Instant::now() + self.config.init_poll_timeout;
            while self.initializing.load(Ordering::SeqCst)
                && tokio::time::Instant::now() < deadline
            {
                tokio::time::sleep(self.config.init_poll_interval).await;
            }
            if self.generator.is_loaded().await {
                return Ok(backend);
            }
            // The other caller failed or the wait elapsed; load on our own.
            log::warn!("Initialization wait elapsed; loading {} directly", model_label);
            self.generator.load(&path).await?;
            self.set_status(ServiceStatus::Ready { model: model_label });
            Ok(backend)
        }
    }

    /// Answer a query, streaming display-ready events.
    ///
    /// The user message and the final assistant message are persisted to the
    /// Store under `session_id`; prior session messages are forwarded to the
    /// backend as conversation history.
    pub async fn chat(
        &self,
        query: &str,
        recording_id: Option<i64>,
        session_id: &str,
    ) -> Result<ChatStream, AssistantError> {
        let backend = self.ensure_ready().await?;

        let history: Vec<ChatTurn> = self
            .store
            .get_chat_history(session_id)
            .await?
            .into_iter()
            .map(|m| ChatTurn {
                role: m.role,
                content: m.content,
            })
            .collect();

        let user_message = ChatMessage::user(session_id, recording_id, query);
        self.store.save_chat_message(&user_message).await?;

        let is_local = backend.is_local();
        let model_label = {
            let guard = self.active.read().await;
            guard
                .as_ref()
                .map(|a| a.model_label.clone())
                .unwrap_or_default()
        };
        let strategy = self.router.decide(backend.as_ref(), recording_id).await?;

        let (tx, stream) = ChatStream::channel(STREAM_CAPACITY);
        let router = self.router.clone();
        let store = self.store.clone();
        let inflight = self.inflight.clone();
        let watchdog = self.watchdog.clone();
        let query = query.to_string();
        let session = session_id.to_string();

        inflight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let result = router
                .execute(backend, strategy, &query, history, &tx)
                .await;
            match result {
                Ok(answer) => {
                    if !answer.is_empty() {
                        let message = ChatMessage::assistant(&session, recording_id, &answer);
                        if let Err(e) = store.save_chat_message(&message).await {
                            log::warn!("Failed to persist assistant message: {}", e);
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
            inflight.fetch_sub(1, Ordering::SeqCst);
            if is_local {
                watchdog.arm(model_label);
            }
        });

        Ok(stream)
    }

    /// Index one recording's transcript for retrieval.
    pub async fn index_recording(&self, recording_id: i64) -> Result<(), AssistantError> {
        let transcript = self
            .store
            .get_transcript(recording_id)
            .await?
            .ok_or(AssistantError::TranscriptNotFound(recording_id))?;
        let segments = self.store.get_segments(transcript.id).await?;
        self.index
            .index_recording(recording_id, transcript.id, &segments)
            .await
    }

    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        scope: Option<i64>,
    ) -> Result<Vec<ScoredResult>, AssistantError> {
        self.index.search(query, limit, scope).await
    }

    pub async fn rebuild_index(&self) -> Result<(), AssistantError> {
        self.index.rebuild_index().await
    }

    pub async fn remove_recording(&self, recording_id: i64) -> Result<(), AssistantError> {
        self.index.remove_recording(recording_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatRole, TranscriptSegment};
    use crate::test_support::{BagOfWordsEmbedder, MockFetcher, MockStore, ScriptedGenerator};

    fn segments(recording_id: i64) -> Vec<TranscriptSegment> {
        vec![
            TranscriptSegment {
                id: 1,
                recording_id,
                start_time: 0.0,
                end_time: 8.0,
                text: "we agreed to ship on friday".to_string(),
                speaker: Some("Alice".to_string()),
            },
            TranscriptSegment {
                id: 2,
                recording_id,
                start_time: 8.0,
                end_time: 15.0,
                text: "bob will write the release notes".to_string(),
                speaker: Some("Bob".to_string()),
            },
        ]
    }

    fn manager_with(
        store: Arc<MockStore>,
        generator: Arc<ScriptedGenerator>,
        fetcher: Arc<MockFetcher>,
    ) -> ResourceLifecycleManager {
        let _ = env_logger::builder().is_test(true).try_init();
        ResourceLifecycleManager::new(
            store,
            Arc::new(BagOfWordsEmbedder::new()),
            generator,
            fetcher,
            ManagerConfig::default(),
        )
    }

    async fn ready_local_manager(
        script: Vec<String>,
    ) -> (ResourceLifecycleManager, Arc<MockStore>, Arc<ScriptedGenerator>) {
        let store = Arc::new(MockStore::new());
        store.add_recording(1, "Standup", true, segments(1));
        let generator = Arc::new(ScriptedGenerator::new(script));
        let fetcher = Arc::new(MockFetcher::new(1024));
        let manager = manager_with(store.clone(), generator.clone(), fetcher);
        manager
            .select_backend(BackendConfig::Local {
                model_id: "tiny-model".to_string(),
            })
            .await
            .unwrap();
        (manager, store, generator)
    }

    #[tokio::test]
    async fn test_status_starts_not_configured() {
        let manager = manager_with(
            Arc::new(MockStore::new()),
            Arc::new(ScriptedGenerator::new(vec![])),
            Arc::new(MockFetcher::new(1024)),
        );
        assert_eq!(manager.status(), ServiceStatus::NotConfigured);
    }

    #[tokio::test]
    async fn test_chat_without_backend_is_rejected() {
        let manager = manager_with(
            Arc::new(MockStore::new()),
            Arc::new(ScriptedGenerator::new(vec![])),
            Arc::new(MockFetcher::new(1024)),
        );
        let err = manager.chat("hello", None, "s1").await.unwrap_err();
        assert_eq!(err, AssistantError::NotConfigured);
    }

    #[tokio::test]
    async fn test_hosted_backend_requires_api_key() {
        let manager = manager_with(
            Arc::new(MockStore::new()),
            Arc::new(ScriptedGenerator::new(vec![])),
            Arc::new(MockFetcher::new(1024)),
        );
        let err = manager
            .select_backend(BackendConfig::OpenAiCompatible {
                api_key: "   ".to_string(),
                base_url: "https://api.example.com/v1".to_string(),
                model: "gpt-test".to_string(),
                temperature: 0.7,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_hosted_selection_reaches_ready() {
        let manager = manager_with(
            Arc::new(MockStore::new()),
            Arc::new(ScriptedGenerator::new(vec![])),
            Arc::new(MockFetcher::new(1024)),
        );
        manager
            .select_backend(BackendConfig::Gemini {
                api_key: "key".to_string(),
                model: "gemini-test".to_string(),
                temperature: 0.5,
            })
            .await
            .unwrap();
        assert_eq!(
            manager.status(),
            ServiceStatus::Ready {
                model: "gemini-test".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_local_selection_loads_model() {
        let generator = Arc::new(ScriptedGenerator::new(vec![]));
        let fetcher = Arc::new(MockFetcher::new(1024));
        let manager = manager_with(Arc::new(MockStore::new()), generator.clone(), fetcher.clone());
        manager
            .select_backend(BackendConfig::Local {
                model_id: "tiny-model".to_string(),
            })
            .await
            .unwrap();
        assert!(generator.is_loaded().await);
        assert_eq!(generator.load_count(), 1);
        assert_eq!(fetcher.fetch_count(), 1);
        assert_eq!(
            manager.status(),
            ServiceStatus::Ready {
                model: "tiny-model".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_memory_gate_blocks_oversized_model() {
        let manager = manager_with(
            Arc::new(MockStore::new()),
            Arc::new(ScriptedGenerator::new(vec![])),
            // Larger than any machine's memory budget.
            Arc::new(MockFetcher::new(u64::MAX / 2)),
        );
        let err = manager
            .select_backend(BackendConfig::Local {
                model_id: "giant-model".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::InsufficientResource { .. }));
        assert!(matches!(manager.status(), ServiceStatus::Error { .. }));
    }

    #[tokio::test]
    async fn test_chat_persists_user_and_assistant_messages() {
        let (manager, store, _) =
            ready_local_manager(vec!["The team ".to_string(), "ships friday.".to_string()]).await;

        let stream = manager
            .chat("when do we ship?", Some(1), "session-1")
            .await
            .unwrap();
        let (text, _) = stream.collect().await.unwrap();
        assert_eq!(text, "The team ships friday.");

        let history = store.get_chat_history("session-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, ChatRole::User);
        assert_eq!(history[0].content, "when do we ship?");
        assert_eq!(history[1].role, ChatRole::Assistant);
        assert_eq!(history[1].content, "The team ships friday.");
    }

    #[tokio::test]
    async fn test_history_forwarded_on_follow_up() {
        let (manager, store, generator) =
            ready_local_manager(vec!["answer".to_string()]).await;
        store
            .save_chat_message(&ChatMessage::user("s2", Some(1), "earlier question"))
            .await
            .unwrap();
        store
            .save_chat_message(&ChatMessage::assistant("s2", Some(1), "earlier answer"))
            .await
            .unwrap();

        let stream = manager.chat("follow up", Some(1), "s2").await.unwrap();
        stream.collect().await.unwrap();

        let prompt = generator.last_prompt().expect("prompt recorded");
        assert!(prompt.contains("User: earlier question"));
        assert!(prompt.contains("Assistant: earlier answer"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_eviction_after_threshold() {
        let (manager, _, generator) = ready_local_manager(vec!["hi".to_string()]).await;

        let stream = manager.chat("q", Some(1), "s1").await.unwrap();
        stream.collect().await.unwrap();
        assert!(generator.is_loaded().await);

        tokio::time::sleep(Duration::from_secs(301)).await;
        tokio::task::yield_now().await;

        assert!(!generator.is_loaded().await);
        assert_eq!(
            manager.status(),
            ServiceStatus::Sleeping {
                model: "tiny-model".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slept_model_reloads_on_next_chat() {
        let (manager, _, generator) = ready_local_manager(vec!["again".to_string()]).await;

        let stream = manager.chat("first", Some(1), "s1").await.unwrap();
        stream.collect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(301)).await;
        tokio::task::yield_now().await;
        assert!(!generator.is_loaded().await);

        // Next request reloads transparently from the cached path.
        let stream = manager.chat("second", Some(1), "s1").await.unwrap();
        let (text, _) = stream.collect().await.unwrap();
        assert_eq!(text, "again");
        assert_eq!(generator.load_count(), 2);
        assert_eq!(
            manager.status(),
            ServiceStatus::Ready {
                model: "tiny-model".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_local_selection_runs_setup_once() {
        let generator = Arc::new(
            ScriptedGenerator::new(vec![]).with_load_delay(Duration::from_millis(50)),
        );
        let fetcher = Arc::new(MockFetcher::new(1024));
        let manager = Arc::new(manager_with(
            Arc::new(MockStore::new()),
            generator.clone(),
            fetcher.clone(),
        ));

        let first = manager.clone();
        let second = manager.clone();
        let h1 = tokio::spawn(async move {
            first
                .select_backend(BackendConfig::Local {
                    model_id: "tiny-model".to_string(),
                })
                .await
        });
        let h2 = tokio::spawn(async move {
            second
                .select_backend(BackendConfig::Local {
                    model_id: "tiny-model".to_string(),
                })
                .await
        });
        h1.await.unwrap().unwrap();
        h2.await.unwrap().unwrap();

        // One caller performed the setup; the other adopted it.
        assert_eq!(generator.load_count(), 1);
        assert_eq!(fetcher.fetch_count(), 1);
        assert_eq!(
            manager.status(),
            ServiceStatus::Ready {
                model: "tiny-model".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_chats_after_eviction_reload_once() {
        let store = Arc::new(MockStore::new());
        store.add_recording(1, "Standup", true, segments(1));
        let generator = Arc::new(
            ScriptedGenerator::new(vec!["ok".to_string()])
                .with_load_delay(Duration::from_millis(50)),
        );
        let fetcher = Arc::new(MockFetcher::new(1024));
        let manager = Arc::new(manager_with(store, generator.clone(), fetcher));
        manager
            .select_backend(BackendConfig::Local {
                model_id: "tiny-model".to_string(),
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(301)).await;
        tokio::task::yield_now().await;
        assert!(!generator.is_loaded().await);

        let first = manager.clone();
        let second = manager.clone();
        let h1 = tokio::spawn(async move {
            let stream = first.chat("first", Some(1), "s1").await.unwrap();
            stream.collect().await.unwrap()
        });
        let h2 = tokio::spawn(async move {
            let stream = second.chat("second", Some(1), "s1").await.unwrap();
            stream.collect().await.unwrap()
        });
        let (text1, _) = h1.await.unwrap();
        let (text2, _) = h2.await.unwrap();
        assert_eq!(text1, "ok");
        assert_eq!(text2, "ok");

        // Exactly one reload on top of the initial selection load.
        assert_eq!(generator.load_count(), 2);
    }

    #[tokio::test]
    async fn test_hosted_selector_rejects_local_config() {
        let manager = manager_with(
            Arc::new(MockStore::new()),
            Arc::new(ScriptedGenerator::new(vec![])),
            Arc::new(MockFetcher::new(1024)),
        );
        let err = manager
            .select_hosted_backend(BackendConfig::Local {
                model_id: "tiny-model".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_index_passthrough_and_search() {
        let (manager, _, _) = ready_local_manager(vec![]).await;
        manager.index_recording(1).await.unwrap();
        let results = manager.search("release notes", 5, Some(1)).await.unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.recording_id == 1));
    }

    #[tokio::test]
    async fn test_index_missing_recording_is_typed_error() {
        let (manager, _, _) = ready_local_manager(vec![]).await;
        let err = manager.index_recording(99).await.unwrap_err();
        assert_eq!(err, AssistantError::TranscriptNotFound(99));
    }
}
