//! Incoming requests.
//!
//! Requests are JSON objects tagged by `type`. Older popup builds send an
//! `action` key with camelCase names instead; [`Request::from_json`] rewrites
//! those into the tagged form before deserializing, so nothing past this
//! module sees the legacy shape.

use crate::error::DispatchError;
use crate::models::Flashcard;
use crate::registry::ModuleGroup;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuickAction {
    Summarize,
    GenerateFlashcard,
    CreateQuiz,
}

impl QuickAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuickAction::Summarize => "summarize",
            QuickAction::GenerateFlashcard => "generate_flashcard",
            QuickAction::CreateQuiz => "create_quiz",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Request {
    Summarize {
        text: String,
    },
    GenerateFlashcard {
        text: String,
        folder: Option<String>,
    },
    GenerateQuiz {
        text: String,
        question_count: Option<usize>,
        title: Option<String>,
    },
    QuickAction {
        action: QuickAction,
        #[serde(default)]
        text: String,
    },

    GetFlashcards {
        folder: Option<String>,
    },
    GetFolders,
    GetQuizzes,
    GetSettings,
    SaveSettings {
        settings: Value,
    },
    SaveFlashcard {
        flashcard: Flashcard,
        folder: Option<String>,
    },
    UpdateFlashcard {
        card_id: String,
        updates: Map<String, Value>,
    },
    DeleteFlashcard {
        card_id: String,
    },
    ExportData,
    ImportData {
        data: Value,
    },
    ClearData,
    TextSelected {
        #[serde(default)]
        text: String,
    },

    SyncData {
        data_type: String,
        #[serde(default)]
        data: Value,
    },
    SetOnline {
        online: bool,
    },
    GetAnalytics,
    ExportAnalytics,
    ClearAnalytics,
    SocialJoinGroup {
        group_id: String,
        #[serde(default)]
        code: String,
    },
    SocialCreateGroup {
        #[serde(default)]
        group_data: Value,
    },
    GetLeaderboard {
        timeframe: Option<String>,
    },

    OcrProcess {
        image_data: Option<String>,
        tab_id: Option<i64>,
    },
    SemanticSearch {
        #[serde(default)]
        flashcards: Vec<Value>,
        query: String,
        top_k: Option<usize>,
    },

    TtsSpeak {
        text: String,
        #[serde(default)]
        options: Value,
    },
    TtsStop,

    SaveVideo {
        video_data: Value,
        folder: Option<String>,
    },
    GetVideo {
        video_id: String,
    },
    GetVideosByFolder {
        folder: String,
    },
    GetAllVideos,
    UpdateVideo {
        video_id: String,
        updates: Map<String, Value>,
    },
    DeleteVideo {
        video_id: String,
    },
    SearchVideos {
        query: String,
        folder: Option<String>,
    },
    GenerateVideoSummary {
        video_url: String,
        transcript: Option<String>,
    },
    GenerateVideoFlashcards {
        video_url: String,
        transcript: Option<String>,
    },
    ImportPlaylist {
        playlist_url: String,
        folder: Option<String>,
    },
    GetVideoStatistics,

    #[serde(other)]
    Unknown,
}

/// Map a legacy `action` name to its `type` equivalent
fn legacy_kind(action: &str) -> Option<&'static str> {
    Some(match action {
        "summarize" => "summarize",
        "generateFlashcards" => "generate_flashcard",
        "generateQuiz" => "generate_quiz",
        "textSelected" => "text_selected",
        "saveFlashcard" => "save_flashcard",
        "getFolders" => "get_folders",
        "getFlashcards" => "get_flashcards",
        _ => return None,
    })
}

impl Request {
    /// Parse a request object, translating the legacy `action` form
    pub fn from_json(value: Value) -> Result<Self, DispatchError> {
        let mut fields = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(DispatchError::InvalidRequest(format!(
                    "expected a JSON object, got {}",
                    other
                )))
            }
        };

        if !fields.contains_key("type") {
            if let Some(action) = fields.remove("action") {
                let kind = action.as_str().and_then(legacy_kind).unwrap_or("unknown");
                fields.insert("type".to_string(), Value::String(kind.to_string()));
            }
        }

        let kind = fields
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DispatchError::InvalidRequest("missing `type`".to_string()))?;

        let request: Request = serde_json::from_value(Value::Object(fields))
            .map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;

        if request == Request::Unknown {
            warn!("Unknown request type: {}", kind);
        }
        Ok(request)
    }

    /// Wire name of the request kind
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Summarize { .. } => "summarize",
            Request::GenerateFlashcard { .. } => "generate_flashcard",
            Request::GenerateQuiz { .. } => "generate_quiz",
            Request::QuickAction { .. } => "quick_action",
            Request::GetFlashcards { .. } => "get_flashcards",
            Request::GetFolders => "get_folders",
            Request::GetQuizzes => "get_quizzes",
            Request::GetSettings => "get_settings",
            Request::SaveSettings { .. } => "save_settings",
            Request::SaveFlashcard { .. } => "save_flashcard",
            Request::UpdateFlashcard { .. } => "update_flashcard",
            Request::DeleteFlashcard { .. } => "delete_flashcard",
            Request::ExportData => "export_data",
            Request::ImportData { .. } => "import_data",
            Request::ClearData => "clear_data",
            Request::TextSelected { .. } => "text_selected",
            Request::SyncData { .. } => "sync_data",
            Request::SetOnline { .. } => "set_online",
            Request::GetAnalytics => "get_analytics",
            Request::ExportAnalytics => "export_analytics",
            Request::ClearAnalytics => "clear_analytics",
            Request::SocialJoinGroup { .. } => "social_join_group",
            Request::SocialCreateGroup { .. } => "social_create_group",
            Request::GetLeaderboard { .. } => "get_leaderboard",
            Request::OcrProcess { .. } => "ocr_process",
            Request::SemanticSearch { .. } => "semantic_search",
            Request::TtsSpeak { .. } => "tts_speak",
            Request::TtsStop => "tts_stop",
            Request::SaveVideo { .. } => "save_video",
            Request::GetVideo { .. } => "get_video",
            Request::GetVideosByFolder { .. } => "get_videos_by_folder",
            Request::GetAllVideos => "get_all_videos",
            Request::UpdateVideo { .. } => "update_video",
            Request::DeleteVideo { .. } => "delete_video",
            Request::SearchVideos { .. } => "search_videos",
            Request::GenerateVideoSummary { .. } => "generate_video_summary",
            Request::GenerateVideoFlashcards { .. } => "generate_video_flashcards",
            Request::ImportPlaylist { .. } => "import_playlist",
            Request::GetVideoStatistics => "get_video_statistics",
            Request::Unknown => "unknown",
        }
    }

    /// Module group that must be loaded before this request can run
    pub fn module_group(&self) -> Option<ModuleGroup> {
        match self {
            Request::Summarize { .. }
            | Request::GenerateFlashcard { .. }
            | Request::GenerateQuiz { .. }
            | Request::QuickAction { .. } => Some(ModuleGroup::Ai),

            Request::SyncData { .. }
            | Request::SetOnline { .. }
            | Request::GetAnalytics
            | Request::ExportAnalytics
            | Request::ClearAnalytics
            | Request::SocialJoinGroup { .. }
            | Request::SocialCreateGroup { .. }
            | Request::GetLeaderboard { .. } => Some(ModuleGroup::Advanced),

            Request::OcrProcess { .. } => Some(ModuleGroup::Ocr),
            Request::SemanticSearch { .. } => Some(ModuleGroup::Embedding),

            Request::SaveVideo { .. }
            | Request::GetVideo { .. }
            | Request::GetVideosByFolder { .. }
            | Request::GetAllVideos
            | Request::UpdateVideo { .. }
            | Request::DeleteVideo { .. }
            | Request::SearchVideos { .. }
            | Request::GenerateVideoSummary { .. }
            | Request::GenerateVideoFlashcards { .. }
            | Request::ImportPlaylist { .. }
            | Request::GetVideoStatistics => Some(ModuleGroup::Video),

            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tagged_requests() {
        let request = Request::from_json(json!({
            "type": "generate_quiz",
            "text": "Some text",
            "questionCount": 5
        }))
        .unwrap();
        assert_eq!(
            request,
            Request::GenerateQuiz {
                text: "Some text".to_string(),
                question_count: Some(5),
                title: None,
            }
        );
        assert_eq!(request.module_group(), Some(ModuleGroup::Ai));

        let request = Request::from_json(json!({"type": "set_online", "online": false})).unwrap();
        assert_eq!(request, Request::SetOnline { online: false });
        assert_eq!(request.module_group(), Some(ModuleGroup::Advanced));

        let request = Request::from_json(json!({"type": "get_folders"})).unwrap();
        assert_eq!(request, Request::GetFolders);
        assert_eq!(request.module_group(), None);
    }

    #[test]
    fn test_unknown_type() {
        let request = Request::from_json(json!({"type": "teleport", "text": "x"})).unwrap();
        assert_eq!(request, Request::Unknown);
        assert_eq!(request.kind(), "unknown");
    }

    #[test]
    fn test_legacy_actions_are_translated() {
        let request = Request::from_json(json!({"action": "generateFlashcards", "text": "abc"})).unwrap();
        assert_eq!(
            request,
            Request::GenerateFlashcard {
                text: "abc".to_string(),
                folder: None,
            }
        );

        let request = Request::from_json(json!({"action": "getFlashcards", "folder": "Science"})).unwrap();
        assert_eq!(
            request,
            Request::GetFlashcards {
                folder: Some("Science".to_string())
            }
        );

        let request = Request::from_json(json!({"action": "dance"})).unwrap();
        assert_eq!(request, Request::Unknown);
    }

    #[test]
    fn test_malformed_requests() {
        assert!(matches!(
            Request::from_json(json!({"type": "summarize"})),
            Err(DispatchError::InvalidRequest(_))
        ));
        assert!(Request::from_json(json!("summarize")).is_err());
        assert!(Request::from_json(json!({"text": "no kind"})).is_err());
        assert!(Request::from_json(json!({"type": "quick_action", "action": "fly"})).is_err());
    }

    #[test]
    fn test_quick_action_defaults_to_empty_text() {
        let request = Request::from_json(json!({"type": "quick_action", "action": "create_quiz"})).unwrap();
        assert_eq!(
            request,
            Request::QuickAction {
                action: QuickAction::CreateQuiz,
                text: String::new(),
            }
        );
    }
}
