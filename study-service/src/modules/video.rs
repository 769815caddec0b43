//! Saved videos, grouped by folder, plus transcript-driven study material.

use super::ai::{sentences, FlashcardGenerator, Summarizer};
use super::FeatureModule;
use crate::error::{DispatchError, GenerationError, StorageError};
use crate::models::now_rfc3339;
use crate::storage::{update_object, KeyValueStore};
use crate::study_store::new_record_id;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_VIDEO_FOLDER: &str = "Videos";

const MAX_VIDEO_FLASHCARDS: usize = 5;
const SENTENCES_PER_CARD: usize = 3;

/// Source of video transcripts
#[async_trait]
pub trait TranscriptFetcher: FeatureModule {
    async fn fetch_transcript(&self, video_id: &str) -> Result<String, GenerationError>;
}

#[derive(Debug, Deserialize)]
struct TranscriptSegment {
    text: String,
}

/// Fetches transcripts from a JSON proxy answering `?videoId=<id>` with
/// `[{"text": ...}, ...]`
pub struct HttpTranscriptFetcher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTranscriptFetcher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl FeatureModule for HttpTranscriptFetcher {
    fn name(&self) -> &'static str {
        "transcript fetcher"
    }

    async fn initialize(&self) -> Result<(), String> {
        url::Url::parse(&self.endpoint)
            .map(|_| ())
            .map_err(|e| format!("Invalid transcript endpoint {}: {}", self.endpoint, e))
    }
}

#[async_trait]
impl TranscriptFetcher for HttpTranscriptFetcher {
    async fn fetch_transcript(&self, video_id: &str) -> Result<String, GenerationError> {
        let url = url::Url::parse_with_params(&self.endpoint, &[("videoId", video_id)])
            .map_err(|e| GenerationError::Transcript(e.to_string()))?;
        debug!("Fetching transcript from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| GenerationError::Transcript(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GenerationError::Transcript(e.to_string()))?;

        if body.contains("Could not find a transcript for this video") {
            return Err(GenerationError::Transcript(
                "No English transcript available for this video.".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(GenerationError::Transcript(format!(
                "Failed to fetch transcript. Status: {}",
                status.as_u16()
            )));
        }

        let segments: Vec<TranscriptSegment> = serde_json::from_str(&body)
            .map_err(|e| GenerationError::Transcript(format!("Unexpected response: {}", e)))?;
        let transcript = segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if transcript.is_empty() {
            return Err(GenerationError::Transcript(
                "Transcript is available for this video, but it is empty.".to_string(),
            ));
        }
        Ok(transcript)
    }
}

/// Extract the YouTube video id from watch, short-link, embed or shorts URLs
pub fn youtube_video_id(url: &str) -> Option<String> {
    regex::Regex::new(r"(?:[?&]v=|youtu\.be/|/embed/|/shorts/)([A-Za-z0-9_-]{11})")
        .ok()
        .and_then(|re| re.captures(url))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub struct VideoManager {
    kv: Arc<dyn KeyValueStore>,
    transcripts: Arc<dyn TranscriptFetcher>,
    summarizer: Arc<dyn Summarizer>,
    flashcards: Arc<dyn FlashcardGenerator>,
}

impl VideoManager {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        transcripts: Arc<dyn TranscriptFetcher>,
        summarizer: Arc<dyn Summarizer>,
        flashcards: Arc<dyn FlashcardGenerator>,
    ) -> Self {
        Self {
            kv,
            transcripts,
            summarizer,
            flashcards,
        }
    }

    async fn folders(&self) -> Result<Map<String, Value>, StorageError> {
        let mut result = self.kv.get(&["videos"]).await?;
        Ok(match result.remove("videos") {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        })
    }


    pub async fn save_video(
        &self,
        video: &Value,
        folder: Option<&str>,
    ) -> Result<String, DispatchError> {
        let folder = folder.unwrap_or(DEFAULT_VIDEO_FOLDER);
        let mut record = match video {
            Value::Object(map) => map.clone(),
            _ => {
                return Err(GenerationError::InvalidInput(
                    "videoData must be an object".to_string(),
                )
                .into())
            }
        };

        let id = new_record_id();
        let now = now_rfc3339();
        record.insert("id".to_string(), json!(id));
        record.insert("folder".to_string(), json!(folder));
        record.insert("created".to_string(), json!(now));
        record.insert("lastModified".to_string(), json!(now));

        update_object(self.kv.as_ref(), "videos", |folders| {
            match folders.entry(folder.to_string()).or_insert_with(|| json!([])) {
                Value::Array(videos) => videos.push(Value::Object(record)),
                other => *other = json!([Value::Object(record)]),
            }
            Ok(())
        })
        .await?;

        info!("Saved video {} to {}", id, folder);
        Ok(id)
    }

    pub async fn get_video(&self, video_id: &str) -> Result<Option<Value>, DispatchError> {
        Ok(self
            .get_all_videos()
            .await?
            .into_iter()
            .find(|v| v["id"] == video_id))
    }

    pub async fn get_videos_by_folder(&self, folder: &str) -> Result<Vec<Value>, DispatchError> {
        let mut folders = self.folders().await?;
        Ok(match folders.remove(folder) {
            Some(Value::Array(videos)) => videos,
            _ => Vec::new(),
        })
    }

    pub async fn get_all_videos(&self) -> Result<Vec<Value>, DispatchError> {
        Ok(self
            .folders()
            .await?
            .into_iter()
            .filter_map(|(_, videos)| match videos {
                Value::Array(videos) => Some(videos),
                _ => None,
            })
            .flatten()
            .collect())
    }

    pub async fn update_video(
        &self,
        video_id: &str,
        updates: &Map<String, Value>,
    ) -> Result<Value, DispatchError> {
        let updated = update_object(self.kv.as_ref(), "videos", |folders| {
            folders
                .values_mut()
                .filter_map(Value::as_array_mut)
                .flat_map(|videos| videos.iter_mut())
                .find(|video| video["id"] == video_id)
                .map(|video| {
                    if let Value::Object(fields) = video {
                        for (k, v) in updates {
                            fields.insert(k.clone(), v.clone());
                        }
                        fields.insert("lastModified".to_string(), json!(now_rfc3339()));
                    }
                    video.clone()
                })
                .ok_or(StorageError::NotFound("Video"))
        })
        .await?;
        Ok(updated)
    }

    pub async fn delete_video(&self, video_id: &str) -> Result<bool, DispatchError> {
        let removed = update_object(self.kv.as_ref(), "videos", |folders| {
            for videos in folders.values_mut().filter_map(Value::as_array_mut) {
                if let Some(index) = videos.iter().position(|v| v["id"] == video_id) {
                    videos.remove(index);
                    return Ok(true);
                }
            }
            Ok(false)
        })
        .await?;
        Ok(removed)
    }

    /// Case-insensitive match on title, description or any tag
    pub async fn search_videos(
        &self,
        query: &str,
        folder: Option<&str>,
    ) -> Result<Vec<Value>, DispatchError> {
        let videos = match folder {
            Some(folder) => self.get_videos_by_folder(folder).await?,
            None => self.get_all_videos().await?,
        };

        let needle = query.to_lowercase();
        let contains = |field: &Value| {
            field
                .as_str()
                .map(|s| s.to_lowercase().contains(&needle))
                .unwrap_or(false)
        };

        Ok(videos
            .into_iter()
            .filter(|video| {
                contains(&video["title"])
                    || contains(&video["description"])
                    || video["tags"]
                        .as_array()
                        .map(|tags| tags.iter().any(|t| contains(t)))
                        .unwrap_or(false)
            })
            .collect())
    }

    async fn resolve_transcript(
        &self,
        video_url: &str,
        transcript: Option<&str>,
    ) -> Result<String, DispatchError> {
        if let Some(transcript) = transcript.filter(|t| !t.trim().is_empty()) {
            return Ok(transcript.to_string());
        }

        let video_id = youtube_video_id(video_url).ok_or_else(|| {
            GenerationError::InvalidInput(format!("No video id in {}", video_url))
        })?;
        Ok(self.transcripts.fetch_transcript(&video_id).await?)
    }

    pub async fn generate_video_summary(
        &self,
        video_url: &str,
        transcript: Option<&str>,
    ) -> Result<Value, DispatchError> {
        let transcript = self.resolve_transcript(video_url, transcript).await?;
        let summary = self.summarizer.generate_summary(&transcript).await?;
        let key_points: Vec<&str> = sentences(&transcript, 15).into_iter().take(3).collect();

        Ok(json!({
            "summary": summary.summary,
            "keyPoints": key_points,
            "transcript": transcript,
            "videoUrl": video_url,
            "generated": now_rfc3339(),
        }))
    }

    /// One flashcard per run of transcript sentences, at most five
    pub async fn generate_video_flashcards(
        &self,
        video_url: &str,
        transcript: Option<&str>,
    ) -> Result<Vec<Value>, DispatchError> {
        let transcript = self.resolve_transcript(video_url, transcript).await?;
        let picked = sentences(&transcript, 5);

        let mut cards = Vec::new();
        for (segment, chunk) in picked
            .chunks(SENTENCES_PER_CARD)
            .take(MAX_VIDEO_FLASHCARDS)
            .enumerate()
        {
            let text = format!("{}.", chunk.join(". "));
            let card = self.flashcards.generate_flashcard(&text).await?;
            let mut value = serde_json::to_value(&card)?;
            if let Value::Object(fields) = &mut value {
                fields.insert("videoUrl".to_string(), json!(video_url));
                fields.insert("segment".to_string(), json!(segment));
            }
            cards.push(value);
        }

        if cards.is_empty() {
            warn!("Transcript for {} produced no flashcards", video_url);
        }
        Ok(cards)
    }

    /// Record a playlist as a single entry in the target folder
    pub async fn import_playlist(
        &self,
        playlist_url: &str,
        folder: Option<&str>,
    ) -> Result<Value, DispatchError> {
        let parsed = url::Url::parse(playlist_url)
            .map_err(|e| GenerationError::InvalidInput(format!("Invalid playlist URL: {}", e)))?;
        let playlist_id = parsed
            .query_pairs()
            .find(|(k, _)| k == "list")
            .map(|(_, v)| v.to_string())
            .ok_or_else(|| {
                GenerationError::InvalidInput("Playlist URL has no list parameter".to_string())
            })?;

        let folder = folder.unwrap_or(DEFAULT_VIDEO_FOLDER);
        let record = json!({
            "title": format!("Playlist {}", playlist_id),
            "url": playlist_url,
            "playlistId": playlist_id,
            "tags": ["playlist"],
        });
        let id = self.save_video(&record, Some(folder)).await?;
        let saved = self.get_video(&id).await?.unwrap_or(record);

        Ok(json!({
            "imported": 1,
            "playlistId": playlist_id,
            "videos": [saved],
            "folder": folder,
        }))
    }

    pub async fn get_video_statistics(&self) -> Result<Value, DispatchError> {
        let folders = self.folders().await?;
        let videos: Vec<Value> = folders
            .values()
            .filter_map(Value::as_array)
            .flatten()
            .cloned()
            .collect();

        let watch_time: f64 = videos
            .iter()
            .filter_map(|v| v["duration"].as_f64())
            .sum();
        let recent: Vec<Value> = videos.iter().rev().take(5).rev().cloned().collect();

        Ok(json!({
            "totalVideos": videos.len(),
            "totalFolders": folders.len(),
            "recentVideos": recent,
            "watchTime": watch_time,
        }))
    }
}

#[async_trait]
impl FeatureModule for VideoManager {
    fn name(&self) -> &'static str {
        "video manager"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ai::{ExtractiveFlashcards, ExtractiveSummarizer};
    use crate::storage::MemoryStore;

    struct StaticTranscript(&'static str);

    #[async_trait]
    impl FeatureModule for StaticTranscript {
        fn name(&self) -> &'static str {
            "static transcript"
        }
    }

    #[async_trait]
    impl TranscriptFetcher for StaticTranscript {
        async fn fetch_transcript(&self, _video_id: &str) -> Result<String, GenerationError> {
            Ok(self.0.to_string())
        }
    }

    const TRANSCRIPT: &str = "Welcome to the lecture on thermodynamics. \
        Energy cannot be created or destroyed. Entropy of an isolated system never decreases. \
        Heat flows from hot bodies to cold bodies.";

    fn manager() -> VideoManager {
        VideoManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(StaticTranscript(TRANSCRIPT)),
            Arc::new(ExtractiveSummarizer::new()),
            Arc::new(ExtractiveFlashcards::new()),
        )
    }

    #[test]
    fn test_youtube_video_id() {
        assert_eq!(
            youtube_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(
            youtube_video_id("https://youtu.be/dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(youtube_video_id("https://example.com/video"), None);
    }

    #[tokio::test]
    async fn test_save_get_update_delete() {
        let videos = manager();
        let id = videos
            .save_video(&json!({"title": "Rust Ownership", "duration": 600}), None)
            .await
            .unwrap();

        let video = videos.get_video(&id).await.unwrap().unwrap();
        assert_eq!(video["folder"], DEFAULT_VIDEO_FOLDER);

        let mut updates = Map::new();
        updates.insert("title".to_string(), json!("Borrowing"));
        let updated = videos.update_video(&id, &updates).await.unwrap();
        assert_eq!(updated["title"], "Borrowing");

        assert!(videos.delete_video(&id).await.unwrap());
        assert!(videos.get_video(&id).await.unwrap().is_none());

        let missing = videos.update_video(&id, &updates).await.unwrap_err();
        assert_eq!(missing.to_string(), "Video not found");
    }

    #[tokio::test]
    async fn test_search_matches_tags_and_titles() {
        let videos = manager();
        videos
            .save_video(&json!({"title": "Calculus basics", "tags": ["math"]}), Some("Math"))
            .await
            .unwrap();
        videos
            .save_video(&json!({"title": "World War II", "description": "History recap"}), None)
            .await
            .unwrap();

        assert_eq!(videos.search_videos("MATH", None).await.unwrap().len(), 1);
        assert_eq!(videos.search_videos("history", None).await.unwrap().len(), 1);
        assert!(videos.search_videos("history", Some("Math")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_statistics() {
        let videos = manager();
        videos.save_video(&json!({"duration": 60}), Some("A")).await.unwrap();
        videos.save_video(&json!({"duration": 30}), Some("B")).await.unwrap();

        let stats = videos.get_video_statistics().await.unwrap();
        assert_eq!(stats["totalVideos"], 2);
        assert_eq!(stats["totalFolders"], 2);
        assert_eq!(stats["watchTime"], 90.0);
    }

    #[tokio::test]
    async fn test_summary_fetches_missing_transcript() {
        let videos = manager();
        let summary = videos
            .generate_video_summary("https://youtu.be/dQw4w9WgXcQ", None)
            .await
            .unwrap();
        assert_eq!(summary["transcript"], TRANSCRIPT);
        assert_eq!(summary["keyPoints"].as_array().unwrap().len(), 3);

        let err = videos
            .generate_video_summary("https://example.com/none", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No video id"));
    }

    #[tokio::test]
    async fn test_video_flashcards_from_supplied_transcript() {
        let videos = manager();
        let cards = videos
            .generate_video_flashcards("https://youtu.be/dQw4w9WgXcQ", Some(TRANSCRIPT))
            .await
            .unwrap();
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[1]["segment"], 1);
        assert_eq!(cards[0]["videoUrl"], "https://youtu.be/dQw4w9WgXcQ");
    }

    #[tokio::test]
    async fn test_import_playlist() {
        let videos = manager();
        let result = videos
            .import_playlist("https://www.youtube.com/playlist?list=PL123", Some("Lectures"))
            .await
            .unwrap();
        assert_eq!(result["playlistId"], "PL123");
        assert_eq!(videos.get_videos_by_folder("Lectures").await.unwrap().len(), 1);

        assert!(videos
            .import_playlist("https://www.youtube.com/playlist", None)
            .await
            .is_err());
    }
}
