//! Shared test doubles: an in-memory Store, a hashing embedder, a scripted
//! generation backend and a scripted local generator.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::AssistantError;
use crate::llm::provider::{
    GenerationBackend, GenerationParameters, GenerationRequest, TokenStream,
};
use crate::llm::providers::local::LocalGenerator;
use crate::manager::ModelFetcher;
use crate::models::{ChatMessage, Recording, Transcript, TranscriptSegment};
use crate::rag::embedder::Embedder;
use crate::store::Store;

#[derive(Default)]
struct MockStoreInner {
    recordings: Vec<Recording>,
    transcripts: HashMap<i64, Transcript>,
    segments_by_transcript: HashMap<i64, Vec<TranscriptSegment>>,
    segments: HashMap<i64, TranscriptSegment>,
    /// segment id -> (tag, vector)
    embeddings: HashMap<i64, (String, Vec<f32>)>,
    messages: Vec<ChatMessage>,
}

/// In-memory Store. Transcript ids follow the convention
/// `recording_id * 10` so tests can predict them.
pub struct MockStore {
    inner: Mutex<MockStoreInner>,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockStoreInner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockStoreInner> {
        self.inner.lock().unwrap()
    }

    pub fn add_recording(
        &self,
        id: i64,
        title: &str,
        complete: bool,
        segments: Vec<TranscriptSegment>,
    ) {
        let transcript_id = id * 10;
        let mut inner = self.lock();
        inner.recordings.push(Recording {
            id,
            title: title.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        });
        inner.transcripts.insert(
            id,
            Transcript {
                id: transcript_id,
                recording_id: id,
                complete,
            },
        );
        for segment in &segments {
            inner.segments.insert(segment.id, segment.clone());
        }
        inner.segments_by_transcript.insert(transcript_id, segments);
    }

    pub fn add_recording_without_transcript(&self, id: i64, title: &str) {
        self.lock().recordings.push(Recording {
            id,
            title: title.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        });
    }

    pub fn embedding_count(&self) -> usize {
        self.lock().embeddings.len()
    }
}

#[async_trait]
impl Store for MockStore {
    async fn get_all_recordings(&self) -> Result<Vec<Recording>, AssistantError> {
        Ok(self.lock().recordings.clone())
    }

    async fn get_recording(&self, recording_id: i64) -> Result<Option<Recording>, AssistantError> {
        Ok(self
            .lock()
            .recordings
            .iter()
            .find(|r| r.id == recording_id)
            .cloned())
    }

    async fn get_transcript(
        &self,
        recording_id: i64,
    ) -> Result<Option<Transcript>, AssistantError> {
        Ok(self.lock().transcripts.get(&recording_id).cloned())
    }

    async fn get_segments(
        &self,
        transcript_id: i64,
    ) -> Result<Vec<TranscriptSegment>, AssistantError> {
        Ok(self
            .lock()
            .segments_by_transcript
            .get(&transcript_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_segment(
        &self,
        segment_id: i64,
    ) -> Result<Option<TranscriptSegment>, AssistantError> {
        Ok(self.lock().segments.get(&segment_id).cloned())
    }

    async fn save_embedding(
        &self,
        segment_id: i64,
        vector: &[f32],
        tag: &str,
    ) -> Result<(), AssistantError> {
        self.lock()
            .embeddings
            .insert(segment_id, (tag.to_string(), vector.to_vec()));
        Ok(())
    }

    async fn delete_embeddings(&self, transcript_id: i64) -> Result<(), AssistantError> {
        let mut inner = self.lock();
        let doomed: Vec<i64> = inner
            .segments_by_transcript
            .get(&transcript_id)
            .map(|segments| segments.iter().map(|s| s.id).collect())
            .unwrap_or_default();
        for id in doomed {
            inner.embeddings.remove(&id);
        }
        Ok(())
    }

    async fn save_chat_message(&self, message: &ChatMessage) -> Result<(), AssistantError> {
        self.lock().messages.push(message.clone());
        Ok(())
    }

    async fn get_chat_history(
        &self,
        session_id: &str,
    ) -> Result<Vec<ChatMessage>, AssistantError> {
        Ok(self
            .lock()
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }
}

/// Deterministic embedder: each lowercase word hashes into one of 64 buckets.
/// Shared words between two texts produce high cosine similarity, unrelated
/// texts score near zero.
pub struct BagOfWordsEmbedder {
    loaded: AtomicBool,
    embedded: AtomicUsize,
    /// Fail once more than this many texts have been embedded
    limit: Option<usize>,
}

impl BagOfWordsEmbedder {
    const DIM: usize = 64;

    pub fn new() -> Self {
        Self {
            loaded: AtomicBool::new(false),
            embedded: AtomicUsize::new(0),
            limit: None,
        }
    }

    pub fn failing_after(texts: usize) -> Self {
        Self {
            loaded: AtomicBool::new(false),
            embedded: AtomicUsize::new(0),
            limit: Some(texts),
        }
    }

    fn vectorize(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; Self::DIM];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            vector[(hasher.finish() as usize) % Self::DIM] += 1.0;
        }
        vector
    }

    fn charge(&self, texts: usize) -> Result<(), AssistantError> {
        let total = self.embedded.fetch_add(texts, Ordering::SeqCst) + texts;
        if let Some(limit) = self.limit {
            if total > limit {
                return Err(AssistantError::IndexError(
                    "embedding backend failed".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Embedder for BagOfWordsEmbedder {
    fn dimension(&self) -> usize {
        Self::DIM
    }

    async fn ensure_loaded(&self) -> Result<(), AssistantError> {
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unload(&self) {
        self.loaded.store(false, Ordering::SeqCst);
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AssistantError> {
        self.charge(1)?;
        Ok(Self::vectorize(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AssistantError> {
        self.charge(texts.len())?;
        Ok(texts.iter().map(|t| Self::vectorize(t)).collect())
    }
}

/// Scripted generation backend: the nth `generate` call plays back the nth
/// token script and records its request for inspection.
pub struct ScriptedBackend {
    scripts: Vec<Vec<String>>,
    requests: Mutex<Vec<GenerationRequest>>,
    fail_from: Mutex<Option<usize>>,
    context_budget: u32,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<Vec<String>>) -> Self {
        Self {
            scripts,
            requests: Mutex::new(Vec::new()),
            fail_from: Mutex::new(None),
            context_budget: 128_000,
        }
    }

    pub fn with_context_budget(mut self, budget: u32) -> Self {
        self.context_budget = budget;
        self
    }

    /// Calls with index `>= from` fail instead of streaming.
    pub fn fail_after(&self, from: usize) {
        *self.fail_from.lock().unwrap() = Some(from);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request_at(&self, index: usize) -> Option<GenerationRequest> {
        self.requests.lock().unwrap().get(index).cloned()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn context_budget(&self) -> u32 {
        self.context_budget
    }

    async fn generate(&self, request: GenerationRequest) -> Result<TokenStream, AssistantError> {
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len() - 1
        };
        if let Some(from) = *self.fail_from.lock().unwrap() {
            if index >= from {
                return Err(AssistantError::BackendUnavailable(
                    "scripted failure".to_string(),
                ));
            }
        }

        let script = self.scripts.get(index).cloned().unwrap_or_default();
        let (tx, stream) = TokenStream::channel();
        tokio::spawn(async move {
            for token in script {
                if tx.send(Ok(token)).await.is_err() {
                    return;
                }
            }
        });
        Ok(stream)
    }
}

/// Scripted in-process generator. Replays the same token script on every
/// call and records the last flattened prompt it was handed.
pub struct ScriptedGenerator {
    script: Vec<String>,
    failure: Option<String>,
    loaded: AtomicBool,
    loads: AtomicUsize,
    load_delay: Option<std::time::Duration>,
    last_prompt: Mutex<Option<String>>,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<String>) -> Self {
        Self {
            script,
            failure: None,
            loaded: AtomicBool::new(false),
            loads: AtomicUsize::new(0),
            load_delay: None,
            last_prompt: Mutex::new(None),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            script: Vec::new(),
            failure: Some(message.to_string()),
            loaded: AtomicBool::new(false),
            loads: AtomicUsize::new(0),
            load_delay: None,
            last_prompt: Mutex::new(None),
        }
    }

    /// Make `load` take this long, so concurrency tests can overlap callers
    /// mid-load.
    pub fn with_load_delay(mut self, delay: std::time::Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().unwrap().clone()
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalGenerator for ScriptedGenerator {
    async fn load(&self, _model_path: &Path) -> Result<(), AssistantError> {
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unload(&self) {
        self.loaded.store(false, Ordering::SeqCst);
    }

    async fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn generate(
        &self,
        prompt: String,
        _params: GenerationParameters,
        tx: mpsc::Sender<String>,
    ) -> Result<(), AssistantError> {
        *self.last_prompt.lock().unwrap() = Some(prompt);
        if let Some(ref message) = self.failure {
            return Err(AssistantError::BackendUnavailable(message.clone()));
        }
        for token in &self.script {
            if tx.send(token.clone()).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }
}

/// In-memory model fetcher. Reports two progress ticks on first fetch and is
/// available from then on. Artifacts land in a scratch directory that lives
/// as long as the fetcher.
pub struct MockFetcher {
    size_bytes: u64,
    available: AtomicBool,
    fetches: AtomicUsize,
    dir: tempfile::TempDir,
}

impl MockFetcher {
    pub fn new(size_bytes: u64) -> Self {
        Self {
            size_bytes,
            available: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
            dir: tempfile::tempdir().expect("scratch dir"),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelFetcher for MockFetcher {
    async fn is_available(&self, _model_id: &str) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn model_size_bytes(&self, _model_id: &str) -> Result<u64, AssistantError> {
        Ok(self.size_bytes)
    }

    async fn fetch(
        &self,
        model_id: &str,
        on_progress: Box<dyn Fn(f32) + Send + Sync>,
    ) -> Result<PathBuf, AssistantError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.available.swap(true, Ordering::SeqCst) {
            on_progress(0.5);
            on_progress(1.0);
        }
        Ok(self.dir.path().join(format!("{}.bin", model_id)))
    }
}
