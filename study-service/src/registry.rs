//! Lazy, at-most-once construction of feature module groups.
//!
//! Each group has a handle that moves `Uninitialized -> Loading -> Ready`, or
//! `Loading -> Failed`. A load runs in its own task and publishes its outcome
//! on a watch channel, so every caller that arrives while it is in flight
//! awaits the same attempt. `Ready` is kept for the life of the process; a
//! failed load is forgotten and the next caller starts over.

use crate::error::ModuleLoadError;
use crate::modules::advanced::{AnalyticsEngine, RealtimeSync, SocialFeatures};
use crate::modules::ai::{
    ExtractiveFlashcards, ExtractiveQuiz, ExtractiveSummarizer, FlashcardGenerator, QuizGenerator,
    Summarizer,
};
use crate::modules::embedding::{HashedEmbeddings, SentenceTransformer};
use crate::modules::ocr::{CommandOcr, OcrProcessor};
use crate::modules::video::{HttpTranscriptFetcher, TranscriptFetcher, VideoManager};
use crate::modules::FeatureModule;
use crate::storage::KeyValueStore;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleGroup {
    Ai,
    Video,
    Advanced,
    Ocr,
    Embedding,
}

impl ModuleGroup {
    pub const ALL: [ModuleGroup; 5] = [
        ModuleGroup::Ai,
        ModuleGroup::Video,
        ModuleGroup::Advanced,
        ModuleGroup::Ocr,
        ModuleGroup::Embedding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleGroup::Ai => "ai",
            ModuleGroup::Video => "video",
            ModuleGroup::Advanced => "advanced",
            ModuleGroup::Ocr => "ocr",
            ModuleGroup::Embedding => "embedding",
        }
    }
}

impl fmt::Display for ModuleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of a group's handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleState {
    Uninitialized,
    Loading,
    Ready,
    Failed(String),
}

pub struct AiModules {
    pub summarizer: Arc<dyn Summarizer>,
    pub flashcards: Arc<dyn FlashcardGenerator>,
    pub quiz: Arc<dyn QuizGenerator>,
}

pub struct VideoModules {
    pub manager: Arc<VideoManager>,
    pub transcripts: Arc<dyn TranscriptFetcher>,
}

pub struct AdvancedModules {
    pub sync: Arc<RealtimeSync>,
    pub social: Arc<SocialFeatures>,
    pub analytics: Arc<AnalyticsEngine>,
}

pub struct OcrModules {
    pub processor: Arc<dyn OcrProcessor>,
}

pub struct EmbeddingModules {
    pub transformer: Arc<dyn SentenceTransformer>,
}

/// Builds each module group; errors become the group's load failure message
#[async_trait]
pub trait ModuleFactory: Send + Sync + 'static {
    async fn load_ai(&self) -> Result<AiModules, String>;
    async fn load_video(&self) -> Result<VideoModules, String>;
    async fn load_advanced(&self) -> Result<AdvancedModules, String>;
    async fn load_ocr(&self) -> Result<OcrModules, String>;
    async fn load_embedding(&self) -> Result<EmbeddingModules, String>;
}

async fn initialize<M: FeatureModule + ?Sized>(module: &M) -> Result<(), String> {
    debug!("Initializing {}", module.name());
    module
        .initialize()
        .await
        .map_err(|e| format!("Failed to initialize {}: {}", module.name(), e))
}

/// Production factory over the bundled implementations
pub struct DefaultModules {
    kv: Arc<dyn KeyValueStore>,
    ocr_binary: Option<PathBuf>,
    transcript_endpoint: String,
}

impl DefaultModules {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        ocr_binary: Option<PathBuf>,
        transcript_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            kv,
            ocr_binary,
            transcript_endpoint: transcript_endpoint.into(),
        }
    }
}

#[async_trait]
impl ModuleFactory for DefaultModules {
    async fn load_ai(&self) -> Result<AiModules, String> {
        let modules = AiModules {
            summarizer: Arc::new(ExtractiveSummarizer::new()),
            flashcards: Arc::new(ExtractiveFlashcards::new()),
            quiz: Arc::new(ExtractiveQuiz::new()),
        };
        initialize(modules.summarizer.as_ref()).await?;
        initialize(modules.flashcards.as_ref()).await?;
        initialize(modules.quiz.as_ref()).await?;
        Ok(modules)
    }

    async fn load_video(&self) -> Result<VideoModules, String> {
        let transcripts: Arc<dyn TranscriptFetcher> =
            Arc::new(HttpTranscriptFetcher::new(self.transcript_endpoint.clone()));
        let manager = Arc::new(VideoManager::new(
            Arc::clone(&self.kv),
            Arc::clone(&transcripts),
            Arc::new(ExtractiveSummarizer::new()),
            Arc::new(ExtractiveFlashcards::new()),
        ));
        initialize(transcripts.as_ref()).await?;
        initialize(manager.as_ref()).await?;
        Ok(VideoModules {
            manager,
            transcripts,
        })
    }

    async fn load_advanced(&self) -> Result<AdvancedModules, String> {
        let modules = AdvancedModules {
            sync: Arc::new(RealtimeSync::new()),
            social: Arc::new(SocialFeatures::new(Arc::clone(&self.kv))),
            analytics: Arc::new(AnalyticsEngine::new(Arc::clone(&self.kv))),
        };
        initialize(modules.sync.as_ref()).await?;
        initialize(modules.social.as_ref()).await?;
        initialize(modules.analytics.as_ref()).await?;
        Ok(modules)
    }

    async fn load_ocr(&self) -> Result<OcrModules, String> {
        let processor = match &self.ocr_binary {
            Some(path) => CommandOcr::with_path(path.clone()),
            None => CommandOcr::new(),
        };
        initialize(&processor).await?;
        Ok(OcrModules {
            processor: Arc::new(processor),
        })
    }

    async fn load_embedding(&self) -> Result<EmbeddingModules, String> {
        let transformer = HashedEmbeddings::new();
        initialize(&transformer).await?;
        Ok(EmbeddingModules {
            transformer: Arc::new(transformer),
        })
    }
}

type LoadOutcome<T> = Option<Result<Arc<T>, String>>;

enum Slot<T> {
    Uninitialized,
    Loading(watch::Receiver<LoadOutcome<T>>),
    Ready(Arc<T>),
    Failed(String),
}

struct ModuleHandle<T> {
    group: ModuleGroup,
    slot: Mutex<Slot<T>>,
}

impl<T: Send + Sync + 'static> ModuleHandle<T> {
    fn new(group: ModuleGroup) -> Arc<Self> {
        Arc::new(Self {
            group,
            slot: Mutex::new(Slot::Uninitialized),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> ModuleState {
        match &*self.lock() {
            Slot::Uninitialized => ModuleState::Uninitialized,
            Slot::Loading(_) => ModuleState::Loading,
            Slot::Ready(_) => ModuleState::Ready,
            Slot::Failed(message) => ModuleState::Failed(message.clone()),
        }
    }

    fn ready(&self) -> Option<Arc<T>> {
        match &*self.lock() {
            Slot::Ready(modules) => Some(Arc::clone(modules)),
            _ => None,
        }
    }

    /// Return the loaded group, starting a load with `start` if none is in flight
    async fn get<F, Fut>(self: &Arc<Self>, start: F) -> Result<Arc<T>, ModuleLoadError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, String>> + Send + 'static,
    {
        let mut rx = {
            let mut slot = self.lock();
            match &*slot {
                Slot::Ready(modules) => return Ok(Arc::clone(modules)),
                Slot::Loading(rx) => rx.clone(),
                Slot::Uninitialized | Slot::Failed(_) => {
                    info!("Loading {} modules", self.group);
                    let (tx, rx) = watch::channel(None);
                    *slot = Slot::Loading(rx.clone());

                    let handle = Arc::clone(self);
                    let load = tokio::spawn(start());
                    tokio::spawn(async move {
                        let outcome = match load.await {
                            Ok(result) => result.map(Arc::new),
                            Err(e) => Err(format!("module load task failed: {}", e)),
                        };
                        handle.finish(&outcome);
                        let _ = tx.send(Some(outcome));
                    });
                    rx
                }
            }
        };

        let outcome = rx.wait_for(Option::is_some).await;
        match outcome.as_deref() {
            Ok(Some(Ok(modules))) => Ok(Arc::clone(modules)),
            Ok(Some(Err(message))) => Err(ModuleLoadError::new(self.group, message.clone())),
            _ => Err(ModuleLoadError::new(
                self.group,
                "module load ended without a result",
            )),
        }
    }

    fn finish(&self, outcome: &Result<Arc<T>, String>) {
        let mut slot = self.lock();
        *slot = match outcome {
            Ok(modules) => {
                info!("{} modules ready", self.group);
                Slot::Ready(Arc::clone(modules))
            }
            Err(message) => {
                error!("Failed to load {} modules: {}", self.group, message);
                Slot::Failed(message.clone())
            }
        };
    }
}

/// Owns one handle per module group
pub struct ModuleRegistry {
    factory: Arc<dyn ModuleFactory>,
    ai: Arc<ModuleHandle<AiModules>>,
    video: Arc<ModuleHandle<VideoModules>>,
    advanced: Arc<ModuleHandle<AdvancedModules>>,
    ocr: Arc<ModuleHandle<OcrModules>>,
    embedding: Arc<ModuleHandle<EmbeddingModules>>,
}

impl ModuleRegistry {
    pub fn new(factory: Arc<dyn ModuleFactory>) -> Self {
        Self {
            factory,
            ai: ModuleHandle::new(ModuleGroup::Ai),
            video: ModuleHandle::new(ModuleGroup::Video),
            advanced: ModuleHandle::new(ModuleGroup::Advanced),
            ocr: ModuleHandle::new(ModuleGroup::Ocr),
            embedding: ModuleHandle::new(ModuleGroup::Embedding),
        }
    }

    pub async fn ensure_loaded(&self, group: ModuleGroup) -> Result<(), ModuleLoadError> {
        match group {
            ModuleGroup::Ai => self.ai().await.map(|_| ()),
            ModuleGroup::Video => self.video().await.map(|_| ()),
            ModuleGroup::Advanced => self.advanced().await.map(|_| ()),
            ModuleGroup::Ocr => self.ocr().await.map(|_| ()),
            ModuleGroup::Embedding => self.embedding().await.map(|_| ()),
        }
    }

    pub async fn ai(&self) -> Result<Arc<AiModules>, ModuleLoadError> {
        let factory = Arc::clone(&self.factory);
        self.ai.get(|| async move { factory.load_ai().await }).await
    }

    pub async fn video(&self) -> Result<Arc<VideoModules>, ModuleLoadError> {
        let factory = Arc::clone(&self.factory);
        self.video
            .get(|| async move { factory.load_video().await })
            .await
    }

    pub async fn advanced(&self) -> Result<Arc<AdvancedModules>, ModuleLoadError> {
        let factory = Arc::clone(&self.factory);
        self.advanced
            .get(|| async move { factory.load_advanced().await })
            .await
    }

    pub async fn ocr(&self) -> Result<Arc<OcrModules>, ModuleLoadError> {
        let factory = Arc::clone(&self.factory);
        self.ocr
            .get(|| async move { factory.load_ocr().await })
            .await
    }

    pub async fn embedding(&self) -> Result<Arc<EmbeddingModules>, ModuleLoadError> {
        let factory = Arc::clone(&self.factory);
        self.embedding
            .get(|| async move { factory.load_embedding().await })
            .await
    }

    /// Advanced modules if already loaded; never starts a load
    pub fn loaded_advanced(&self) -> Option<Arc<AdvancedModules>> {
        self.advanced.ready()
    }

    pub fn state(&self, group: ModuleGroup) -> ModuleState {
        match group {
            ModuleGroup::Ai => self.ai.state(),
            ModuleGroup::Video => self.video.state(),
            ModuleGroup::Advanced => self.advanced.state(),
            ModuleGroup::Ocr => self.ocr.state(),
            ModuleGroup::Embedding => self.embedding.state(),
        }
    }
}
