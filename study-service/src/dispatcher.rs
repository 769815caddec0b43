//! Request dispatch.
//!
//! [`Dispatcher::handle`] is the single entry point: it loads the module
//! group a request needs, consults the result cache for cacheable kinds,
//! runs the module, persists what the request produces and always answers
//! with one [`ResponseEnvelope`]. Errors never escape `handle`.

use crate::cache::{CacheKind, ResultCache};
use crate::envelope::ResponseEnvelope;
use crate::error::DispatchError;
use crate::models::{now_millis, QuizQuestion};
use crate::modules::ai::take_chars;
use crate::modules::embedding::DEFAULT_TOP_K;
use crate::modules::speech::SpeechEngine;
use crate::notify::{NotificationKind, NotificationReporter};
use crate::registry::ModuleRegistry;
use crate::request::{QuickAction, Request};
use crate::study_store::StudyStore;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const AUTO_QUIZ_TITLE: &str = "Auto Quiz";

/// Successful outcome of a request, before it becomes an envelope
enum Reply {
    Data(Value),
    Cached(Value),
    Done,
}

impl Reply {
    fn into_envelope(self) -> ResponseEnvelope {
        match self {
            Reply::Data(data) => ResponseEnvelope::ok(data),
            Reply::Cached(data) => ResponseEnvelope::cached(data),
            Reply::Done => ResponseEnvelope::done(),
        }
    }
}

fn error_event(kind: &str, message: &str) -> Value {
    json!({
        "type": "message_error",
        "messageType": kind,
        "error": message,
        "timestamp": now_millis(),
    })
}

fn to_data<T: serde::Serialize>(value: &T) -> Result<Reply, DispatchError> {
    Ok(Reply::Data(serde_json::to_value(value)?))
}

pub struct Dispatcher {
    registry: ModuleRegistry,
    cache: Mutex<ResultCache>,
    store: StudyStore,
    notifier: NotificationReporter,
    speech: Option<Arc<dyn SpeechEngine>>,
    default_top_k: usize,
}

impl Dispatcher {
    pub fn new(
        registry: ModuleRegistry,
        cache: ResultCache,
        store: StudyStore,
        notifier: NotificationReporter,
    ) -> Self {
        Self {
            registry,
            cache: Mutex::new(cache),
            store,
            notifier,
            speech: None,
            default_top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_speech(mut self, speech: Arc<dyn SpeechEngine>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn with_default_top_k(mut self, top_k: usize) -> Self {
        self.default_top_k = top_k;
        self
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn store(&self) -> &StudyStore {
        &self.store
    }

    pub fn notifier(&self) -> &NotificationReporter {
        &self.notifier
    }

    pub async fn cache_len(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Parse and handle a raw request object
    pub async fn handle_json(&self, value: Value) -> ResponseEnvelope {
        let kind = value
            .get("type")
            .or_else(|| value.get("action"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        match Request::from_json(value) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                let message = e.to_string();
                warn!("Rejected request: {}", message);
                self.track(error_event(&kind, &message)).await;
                ResponseEnvelope::error(message)
            }
        }
    }

    pub async fn handle(&self, request: Request) -> ResponseEnvelope {
        let kind = request.kind();
        debug!("Handling {}", kind);

        let (envelope, event) = match self.execute(request).await {
            Ok(reply) => (
                reply.into_envelope(),
                json!({
                    "type": "message_handled",
                    "messageType": kind,
                    "success": true,
                    "timestamp": now_millis(),
                }),
            ),
            Err(e) => {
                let message = e.to_string();
                warn!("{} failed: {}", kind, message);
                let event = error_event(kind, &message);
                (ResponseEnvelope::error(message), event)
            }
        };

        self.track(event).await;
        envelope
    }

    /// Analytics only see requests once the engine is up; never loads it
    async fn track(&self, event: Value) {
        if let Some(advanced) = self.registry.loaded_advanced() {
            advanced.analytics.track_event(event).await;
        }
    }

    async fn execute(&self, request: Request) -> Result<Reply, DispatchError> {
        if let Some(group) = request.module_group() {
            self.registry.ensure_loaded(group).await?;
        }

        match request {
            Request::Summarize { text } => self.summarize(&text).await,
            Request::GenerateFlashcard { text, folder } => {
                self.generate_flashcard(&text, folder.as_deref()).await
            }
            Request::GenerateQuiz {
                text,
                question_count,
                title,
            } => {
                self.generate_quiz(&text, question_count, title.as_deref())
                    .await
            }
            Request::QuickAction { action, text } => self.quick_action(action, &text).await,

            Request::GetFlashcards { folder } => match folder {
                Some(folder) => to_data(&self.store.get_flashcards_by_folder(&folder).await?),
                None => to_data(&self.store.get_all_flashcards().await?),
            },
            Request::GetFolders => to_data(&self.store.get_folders().await?),
            Request::GetQuizzes => to_data(&self.store.get_quizzes().await?),
            Request::GetSettings => Ok(Reply::Data(self.store.get_settings().await?)),
            Request::SaveSettings { settings } => {
                self.store.save_settings(settings).await?;
                Ok(Reply::Done)
            }
            Request::SaveFlashcard { flashcard, folder } => {
                let id = self.store.save_flashcard(&flashcard, folder.as_deref()).await?;
                Ok(Reply::Data(json!({ "id": id })))
            }
            Request::UpdateFlashcard { card_id, updates } => Ok(Reply::Data(
                self.store.update_flashcard(&card_id, &updates).await?,
            )),
            Request::DeleteFlashcard { card_id } => {
                let deleted = self.store.delete_flashcard(&card_id).await?;
                Ok(Reply::Data(json!({ "deleted": deleted })))
            }
            Request::ExportData => Ok(Reply::Data(self.store.export_data().await?)),
            Request::ImportData { data } => {
                self.store.import_data(&data).await?;
                Ok(Reply::Done)
            }
            Request::ClearData => {
                self.store.clear_all_data().await?;
                Ok(Reply::Done)
            }
            Request::TextSelected { text } => {
                debug!("Text selected: {}...", take_chars(&text, 50));
                Ok(Reply::Done)
            }

            Request::SyncData { data_type, data } => {
                let advanced = self.registry.advanced().await?;
                Ok(Reply::Data(advanced.sync.sync_data(&data_type, data).await))
            }
            Request::SetOnline { online } => {
                let advanced = self.registry.advanced().await?;
                let drained = advanced.sync.set_online(online).await;
                Ok(Reply::Data(json!({ "online": online, "drained": drained })))
            }
            Request::GetAnalytics => {
                let advanced = self.registry.advanced().await?;
                Ok(Reply::Data(advanced.analytics.generate_insights().await))
            }
            Request::ExportAnalytics => {
                let advanced = self.registry.advanced().await?;
                Ok(Reply::Data(advanced.analytics.export_analytics().await))
            }
            Request::ClearAnalytics => {
                let advanced = self.registry.advanced().await?;
                advanced.analytics.clear_analytics().await?;
                Ok(Reply::Done)
            }
            Request::SocialJoinGroup { group_id, code } => {
                let advanced = self.registry.advanced().await?;
                Ok(Reply::Data(
                    advanced.social.join_study_group(&group_id, &code).await?,
                ))
            }
            Request::SocialCreateGroup { group_data } => {
                let advanced = self.registry.advanced().await?;
                Ok(Reply::Data(
                    advanced.social.create_study_group(&group_data).await?,
                ))
            }
            Request::GetLeaderboard { timeframe } => {
                let advanced = self.registry.advanced().await?;
                Ok(Reply::Data(
                    advanced.social.get_leaderboard(timeframe.as_deref()).await?,
                ))
            }

            Request::OcrProcess { image_data, tab_id } => {
                let ocr = self.registry.ocr().await?;
                match (image_data, tab_id) {
                    (Some(image_data), _) => to_data(&ocr.processor.process_image(&image_data).await?),
                    (None, Some(tab_id)) => Err(DispatchError::InvalidRequest(format!(
                        "tab screenshots are not available to the service (tab {})",
                        tab_id
                    ))),
                    (None, None) => Err(DispatchError::InvalidRequest(
                        "imageData is required".to_string(),
                    )),
                }
            }
            Request::SemanticSearch {
                flashcards,
                query,
                top_k,
            } => {
                let embedding = self.registry.embedding().await?;
                let results = embedding
                    .transformer
                    .semantic_search(&flashcards, &query, Some(top_k.unwrap_or(self.default_top_k)))
                    .await?;
                Ok(Reply::Data(Value::Array(results)))
            }

            Request::TtsSpeak { text, options } => {
                let speech = self.speech.as_ref().ok_or(DispatchError::SpeechUnavailable)?;
                speech
                    .speak(&text, &options)
                    .await
                    .map_err(|e| DispatchError::Speech(e.to_string()))?;
                Ok(Reply::Done)
            }
            Request::TtsStop => {
                let speech = self.speech.as_ref().ok_or(DispatchError::SpeechUnavailable)?;
                speech
                    .stop()
                    .await
                    .map_err(|e| DispatchError::Speech(e.to_string()))?;
                Ok(Reply::Done)
            }

            Request::SaveVideo { video_data, folder } => {
                let video = self.registry.video().await?;
                let id = video.manager.save_video(&video_data, folder.as_deref()).await?;
                Ok(Reply::Data(json!({ "videoId": id })))
            }
            Request::GetVideo { video_id } => {
                let video = self.registry.video().await?;
                Ok(Reply::Data(
                    video.manager.get_video(&video_id).await?.unwrap_or(Value::Null),
                ))
            }
            Request::GetVideosByFolder { folder } => {
                let video = self.registry.video().await?;
                to_data(&video.manager.get_videos_by_folder(&folder).await?)
            }
            Request::GetAllVideos => {
                let video = self.registry.video().await?;
                to_data(&video.manager.get_all_videos().await?)
            }
            Request::UpdateVideo { video_id, updates } => {
                let video = self.registry.video().await?;
                Ok(Reply::Data(
                    video.manager.update_video(&video_id, &updates).await?,
                ))
            }
            Request::DeleteVideo { video_id } => {
                let video = self.registry.video().await?;
                let deleted = video.manager.delete_video(&video_id).await?;
                Ok(Reply::Data(json!({ "deleted": deleted })))
            }
            Request::SearchVideos { query, folder } => {
                let video = self.registry.video().await?;
                to_data(&video.manager.search_videos(&query, folder.as_deref()).await?)
            }
            Request::GenerateVideoSummary {
                video_url,
                transcript,
            } => {
                let video = self.registry.video().await?;
                Ok(Reply::Data(
                    video
                        .manager
                        .generate_video_summary(&video_url, transcript.as_deref())
                        .await?,
                ))
            }
            Request::GenerateVideoFlashcards {
                video_url,
                transcript,
            } => {
                let video = self.registry.video().await?;
                to_data(
                    &video
                        .manager
                        .generate_video_flashcards(&video_url, transcript.as_deref())
                        .await?,
                )
            }
            Request::ImportPlaylist {
                playlist_url,
                folder,
            } => {
                let video = self.registry.video().await?;
                Ok(Reply::Data(
                    video
                        .manager
                        .import_playlist(&playlist_url, folder.as_deref())
                        .await?,
                ))
            }
            Request::GetVideoStatistics => {
                let video = self.registry.video().await?;
                Ok(Reply::Data(video.manager.get_video_statistics().await?))
            }

            Request::Unknown => Err(DispatchError::UnknownRequest),
        }
    }

    /// Persisted on a miss; the stored record is what gets cached, so hits
    /// return identical data and are not saved again
    async fn summarize(&self, text: &str) -> Result<Reply, DispatchError> {
        let hit = self.cache.lock().await.lookup(CacheKind::Summary, text);
        if let Some(hit) = hit {
            debug!("Summary cache hit {} (age {:?})", hit.key, hit.age);
            return Ok(Reply::Cached(hit.result));
        }

        let record = self.create_summary(text).await?;
        self.cache
            .lock()
            .await
            .store(CacheKind::Summary, text, record.clone());
        Ok(Reply::Data(record))
    }

    async fn create_summary(&self, text: &str) -> Result<Value, DispatchError> {
        let ai = self.registry.ai().await?;
        let summary = ai.summarizer.generate_summary(text).await?;
        Ok(self.store.save_summary(&summary).await?)
    }

    async fn generate_flashcard(
        &self,
        text: &str,
        folder: Option<&str>,
    ) -> Result<Reply, DispatchError> {
        let (card, _) = self.create_flashcard(text, folder).await?;
        Ok(Reply::Data(card))
    }

    async fn create_flashcard(
        &self,
        text: &str,
        folder: Option<&str>,
    ) -> Result<(Value, String), DispatchError> {
        let ai = self.registry.ai().await?;
        let flashcard = ai.flashcards.generate_flashcard(text).await?;
        let id = self.store.save_flashcard(&flashcard, folder).await?;

        let mut card = serde_json::to_value(&flashcard)?;
        if let Value::Object(fields) = &mut card {
            fields.insert("id".to_string(), json!(id));
        }
        Ok((card, id))
    }

    /// Every call persists, hit or miss, under a fresh quiz id
    async fn generate_quiz(
        &self,
        text: &str,
        question_count: Option<usize>,
        title: Option<&str>,
    ) -> Result<Reply, DispatchError> {
        let title = Some(title.unwrap_or(AUTO_QUIZ_TITLE));

        let hit = self.cache.lock().await.lookup(CacheKind::Quiz, text);
        if let Some(hit) = hit {
            let questions: Vec<QuizQuestion> = serde_json::from_value(hit.result.clone())?;
            let quiz_id = self.store.save_quiz(&questions, title).await?;
            debug!("Quiz cache hit {}, saved again as {}", hit.key, quiz_id);
            return Ok(Reply::Cached(json!({ "quiz": hit.result, "quizId": quiz_id })));
        }

        let ai = self.registry.ai().await?;
        let questions = ai.quiz.generate_quiz(text, question_count).await?;
        let quiz = serde_json::to_value(&questions)?;
        self.cache
            .lock()
            .await
            .store(CacheKind::Quiz, text, quiz.clone());

        let quiz_id = self.store.save_quiz(&questions, title).await?;
        Ok(Reply::Data(json!({ "quiz": quiz, "quizId": quiz_id })))
    }

    /// Context-menu and keyboard-shortcut path: same generation, reported
    /// through notices
    async fn quick_action(&self, action: QuickAction, text: &str) -> Result<Reply, DispatchError> {
        let (empty_notice, progress_notice) = match action {
            QuickAction::Summarize => (
                "Please select some text to summarize",
                "Generating AI summary...",
            ),
            QuickAction::GenerateFlashcard => (
                "Please select some text to create a flashcard",
                "Generating flashcard...",
            ),
            QuickAction::CreateQuiz => (
                "Please select some text to create a quiz",
                "Generating quiz...",
            ),
        };

        if text.trim().is_empty() {
            self.notifier.notify(empty_notice, NotificationKind::Info);
            return Err(DispatchError::InvalidRequest(empty_notice.to_string()));
        }

        self.notifier.notify(progress_notice, NotificationKind::Progress);

        let outcome = match action {
            QuickAction::Summarize => self
                .create_summary(text)
                .await
                .map(|record| (record, "Summary generated successfully!".to_string())),
            QuickAction::GenerateFlashcard => self
                .create_flashcard(text, None)
                .await
                .map(|(card, id)| (card, format!("Flashcard created! ({})", id))),
            QuickAction::CreateQuiz => self.create_quick_quiz(text).await,
        };

        match outcome {
            Ok((data, message)) => {
                self.notifier.notify(message, NotificationKind::Success);
                self.record_progress(action).await;
                Ok(Reply::Data(data))
            }
            Err(e) => {
                self.notifier
                    .notify(format!("Action failed: {}", e), NotificationKind::Error);
                Err(e)
            }
        }
    }

    async fn create_quick_quiz(&self, text: &str) -> Result<(Value, String), DispatchError> {
        let ai = self.registry.ai().await?;
        let questions = ai.quiz.generate_quiz(text, None).await?;
        let quiz_id = self.store.save_quiz(&questions, None).await?;
        let message = format!("Quiz created with {} questions!", questions.len());
        Ok((json!({ "quiz": questions, "quizId": quiz_id }), message))
    }

    async fn record_progress(&self, action: QuickAction) {
        let Some(advanced) = self.registry.loaded_advanced() else {
            return;
        };
        if let Err(e) = advanced
            .social
            .update_user_progress(action.as_str(), now_millis())
            .await
        {
            warn!("Failed to record progress for {}: {}", action.as_str(), e);
        }
    }

    /// Drain the sync queue if the advanced modules are up; returns items drained
    pub async fn process_sync_queue(&self) -> usize {
        match self.registry.loaded_advanced() {
            Some(advanced) => advanced.sync.process_sync_queue().await,
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DefaultModules, ModuleGroup, ModuleState};
    use crate::storage::MemoryStore;
    use std::time::Duration;

    fn dispatcher() -> Dispatcher {
        let kv = Arc::new(MemoryStore::new());
        let registry = ModuleRegistry::new(Arc::new(DefaultModules::new(
            kv.clone(),
            Some("/nonexistent/ocr".into()),
            "http://localhost/",
        )));
        Dispatcher::new(
            registry,
            ResultCache::with_defaults(),
            StudyStore::new(kv),
            NotificationReporter::new(Duration::from_millis(10)),
        )
    }

    #[tokio::test]
    async fn test_summarize_second_call_is_cached() {
        let dispatcher = dispatcher();
        let text = "The sun is a star. It is very hot.";

        let first = dispatcher
            .handle(Request::Summarize { text: text.to_string() })
            .await;
        assert!(first.success);
        assert!(!first.cached);

        let second = dispatcher
            .handle(Request::Summarize { text: text.to_string() })
            .await;
        assert!(second.cached);
        assert_eq!(second.data, first.data);

        assert_eq!(dispatcher.store().get_summaries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_quiz_hit_saves_fresh_copy() {
        let dispatcher = dispatcher();
        let request = Request::GenerateQuiz {
            text: "Rust guarantees memory safety without garbage collection. Ownership rules are checked at compile time.".to_string(),
            question_count: None,
            title: Some("T".to_string()),
        };

        let first = dispatcher.handle(request.clone()).await.data.unwrap();
        let second = dispatcher.handle(request).await;
        assert!(second.cached);
        let second = second.data.unwrap();

        assert_eq!(first["quiz"], second["quiz"]);
        assert_ne!(first["quizId"], second["quizId"]);
        assert_eq!(dispatcher.store().get_quizzes().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_flashcard_gets_id_and_default_folder() {
        let dispatcher = dispatcher();
        let envelope = dispatcher
            .handle(Request::GenerateFlashcard {
                text: "Water boils at one hundred degrees Celsius at sea level.".to_string(),
                folder: None,
            })
            .await;
        let card = envelope.data.unwrap();
        let id = card["id"].as_str().unwrap();

        let stored = dispatcher
            .store()
            .get_flashcards_by_folder("General Knowledge")
            .await
            .unwrap();
        assert_eq!(stored[0]["id"], id);
    }

    #[tokio::test]
    async fn test_unknown_and_tts_errors() {
        let dispatcher = dispatcher();
        let unknown = dispatcher.handle(Request::Unknown).await;
        assert_eq!(unknown.error.as_deref(), Some("Unknown message type"));
        assert!(unknown.data.is_none());

        let tts = dispatcher
            .handle(Request::TtsSpeak {
                text: "hi".to_string(),
                options: Value::Null,
            })
            .await;
        assert_eq!(tts.error.as_deref(), Some("TTS not available"));
        let stop = dispatcher.handle(Request::TtsStop).await;
        assert_eq!(stop.error.as_deref(), Some("TTS not available"));
    }

    #[tokio::test]
    async fn test_module_load_failure_short_circuits() {
        let dispatcher = dispatcher();
        let envelope = dispatcher
            .handle(Request::OcrProcess {
                image_data: Some("abc".to_string()),
                tab_id: None,
            })
            .await;
        assert!(!envelope.success);
        assert!(envelope.error.unwrap().contains("OCR binary not found"));
        assert!(matches!(
            dispatcher.registry().state(ModuleGroup::Ocr),
            ModuleState::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_analytics_only_when_loaded() {
        let dispatcher = dispatcher();
        dispatcher.handle(Request::GetFolders).await;
        assert!(dispatcher.registry().loaded_advanced().is_none());

        dispatcher.handle(Request::GetAnalytics).await;
        dispatcher.handle(Request::Unknown).await;

        let analytics = &dispatcher.registry().loaded_advanced().unwrap().analytics;
        let insights = analytics.generate_insights().await;
        assert_eq!(insights["eventsByType"]["message_handled"], 1);
        assert_eq!(insights["eventsByType"]["message_error"], 1);
    }

    #[tokio::test]
    async fn test_quick_action_notices() {
        let dispatcher = dispatcher();
        let mut events = dispatcher.notifier().subscribe();

        let empty = dispatcher
            .handle(Request::QuickAction {
                action: QuickAction::Summarize,
                text: "  ".to_string(),
            })
            .await;
        assert!(!empty.success);
        match events.recv().await.unwrap() {
            crate::notify::NotificationEvent::Shown { message, kind, .. } => {
                assert_eq!(message, "Please select some text to summarize");
                assert_eq!(kind, NotificationKind::Info);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let quiz = dispatcher
            .handle(Request::QuickAction {
                action: QuickAction::CreateQuiz,
                text: "Cells are the basic unit of life. Mitochondria produce energy for the cell.".to_string(),
            })
            .await;
        assert!(quiz.success);

        let mut shown = Vec::new();
        while shown.len() < 2 {
            if let crate::notify::NotificationEvent::Shown { message, .. } = events.recv().await.unwrap() {
                shown.push(message);
            }
        }
        assert_eq!(shown[0], "Generating quiz...");
        assert_eq!(shown[1], "Quiz created with 2 questions!");
    }

    #[tokio::test]
    async fn test_rejected_request_is_tracked() {
        let dispatcher = dispatcher();
        dispatcher.handle(Request::GetAnalytics).await;

        let envelope = dispatcher.handle_json(json!({"type": "summarize"})).await;
        assert!(!envelope.success);

        let analytics = &dispatcher.registry().loaded_advanced().unwrap().analytics;
        let insights = analytics.generate_insights().await;
        assert_eq!(insights["eventsByType"]["message_handled"], 1);
        assert_eq!(insights["eventsByType"]["message_error"], 1);
    }

    #[tokio::test]
    async fn test_invalid_json_becomes_error_envelope() {
        let dispatcher = dispatcher();
        let envelope = dispatcher.handle_json(json!({"type": "summarize"})).await;
        assert!(!envelope.success);
        assert!(envelope.error.unwrap().starts_with("Invalid request"));
    }
}
