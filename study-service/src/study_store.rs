//! Study data layer on top of the key-value store: folders of flashcards,
//! quizzes, summaries and settings.

use crate::error::StorageError;
use crate::models::{now_rfc3339, Flashcard, QuizQuestion, StoredQuiz, Summary};
use crate::storage::{entry, update_array, update_object, KeyValueStore};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_FOLDER: &str = "General Knowledge";
pub const DEFAULT_QUIZ_TITLE: &str = "Untitled Quiz";

const DEFAULT_FOLDERS: [&str; 5] = [
    "General Knowledge",
    "JEE Physics",
    "UPSC History",
    "Science",
    "Technology",
];

pub fn default_settings() -> Value {
    json!({
        "language": "english",
        "dailyReminder": true,
        "reminderTime": "09:00",
        "autoSave": true,
        "maxFlashcards": 10,
        "summaryLength": "medium"
    })
}

/// Fresh identifier for a persisted record
pub fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Clone)]
pub struct StudyStore {
    kv: Arc<dyn KeyValueStore>,
}

impl StudyStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Underlying key-value store, shared with the feature modules
    pub fn kv(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.kv)
    }

    /// Seed default folders and settings when absent
    pub async fn ensure_default_data(&self) -> Result<(), StorageError> {
        let result = self.kv.get(&["folders", "settings"]).await?;
        let mut seed = Map::new();

        if !result.contains_key("folders") {
            let folders: Map<String, Value> = DEFAULT_FOLDERS
                .iter()
                .map(|name| (name.to_string(), json!([])))
                .collect();
            seed.insert("folders".to_string(), Value::Object(folders));
        }

        if !result.contains_key("settings") {
            seed.insert("settings".to_string(), default_settings());
        }

        if !seed.is_empty() {
            info!("Seeding default study data: {:?}", seed.keys().collect::<Vec<_>>());
            self.kv.set(seed).await?;
        }
        Ok(())
    }

    async fn object(&self, key: &str) -> Result<Map<String, Value>, StorageError> {
        let mut result = self.kv.get(&[key]).await?;
        Ok(match result.remove(key) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        })
    }

    async fn array(&self, key: &str) -> Result<Vec<Value>, StorageError> {
        let mut result = self.kv.get(&[key]).await?;
        Ok(match result.remove(key) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        })
    }

    // Flashcards

    /// Append a flashcard to a folder (created on demand); returns its id
    pub async fn save_flashcard(
        &self,
        flashcard: &Flashcard,
        folder: Option<&str>,
    ) -> Result<String, StorageError> {
        let folder = folder.unwrap_or(DEFAULT_FOLDER);
        let id = new_record_id();
        let now = now_rfc3339();
        let mut card = match serde_json::to_value(flashcard)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        card.insert("id".to_string(), json!(id));
        card.insert("folder".to_string(), json!(folder));
        card.insert("created".to_string(), json!(now));
        card.insert("lastModified".to_string(), json!(now));

        update_object(self.kv.as_ref(), "folders", |folders| {
            match folders
                .entry(folder.to_string())
                .or_insert_with(|| json!([]))
            {
                Value::Array(cards) => cards.push(Value::Object(card)),
                other => *other = json!([Value::Object(card)]),
            }
            Ok(())
        })
        .await?;
        debug!("Saved flashcard {} to {}", id, folder);
        Ok(id)
    }

    pub async fn get_folders(&self) -> Result<Map<String, Value>, StorageError> {
        self.object("folders").await
    }

    pub async fn get_all_flashcards(&self) -> Result<Vec<Value>, StorageError> {
        let folders = self.object("folders").await?;
        Ok(folders
            .into_iter()
            .filter_map(|(_, cards)| match cards {
                Value::Array(cards) => Some(cards),
                _ => None,
            })
            .flatten()
            .collect())
    }

    pub async fn get_flashcards_by_folder(&self, folder: &str) -> Result<Vec<Value>, StorageError> {
        let mut folders = self.object("folders").await?;
        Ok(match folders.remove(folder) {
            Some(Value::Array(cards)) => cards,
            _ => Vec::new(),
        })
    }

    /// Merge `updates` into the card with `card_id`
    pub async fn update_flashcard(
        &self,
        card_id: &str,
        updates: &Map<String, Value>,
    ) -> Result<Value, StorageError> {
        update_object(self.kv.as_ref(), "folders", |folders| {
            folders
                .values_mut()
                .filter_map(Value::as_array_mut)
                .flat_map(|cards| cards.iter_mut())
                .find(|card| card["id"] == card_id)
                .map(|card| {
                    if let Value::Object(fields) = card {
                        for (k, v) in updates {
                            fields.insert(k.clone(), v.clone());
                        }
                        fields.insert("lastModified".to_string(), json!(now_rfc3339()));
                    }
                    card.clone()
                })
                .ok_or(StorageError::NotFound("Flashcard"))
        })
        .await
    }

    /// Remove a card; `false` when no folder holds it
    pub async fn delete_flashcard(&self, card_id: &str) -> Result<bool, StorageError> {
        update_object(self.kv.as_ref(), "folders", |folders| {
            for cards in folders.values_mut().filter_map(Value::as_array_mut) {
                if let Some(index) = cards.iter().position(|card| card["id"] == card_id) {
                    cards.remove(index);
                    return Ok(true);
                }
            }
            Ok(false)
        })
        .await
    }

    // Quizzes

    /// Persist a quiz under a fresh id, even if identical questions exist
    pub async fn save_quiz(
        &self,
        questions: &[QuizQuestion],
        title: Option<&str>,
    ) -> Result<String, StorageError> {
        let quiz = StoredQuiz {
            id: new_record_id(),
            title: title.unwrap_or(DEFAULT_QUIZ_TITLE).to_string(),
            questions: questions.to_vec(),
            created: now_rfc3339(),
            question_count: questions.len(),
        };
        let id = quiz.id.clone();
        let quiz = serde_json::to_value(&quiz)?;

        update_array(self.kv.as_ref(), "quizzes", |quizzes| {
            quizzes.push(quiz);
            Ok(())
        })
        .await?;
        debug!("Saved quiz {} ({} questions)", id, questions.len());
        Ok(id)
    }

    pub async fn get_quizzes(&self) -> Result<Vec<Value>, StorageError> {
        self.array("quizzes").await
    }

    // Summaries

    /// Persist a summary; returns the stored record including its id
    pub async fn save_summary(&self, summary: &Summary) -> Result<Value, StorageError> {
        let mut record = match serde_json::to_value(summary)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        record.insert("id".to_string(), json!(new_record_id()));
        record.insert("created".to_string(), json!(now_rfc3339()));
        let record = Value::Object(record);

        let stored = record.clone();
        update_array(self.kv.as_ref(), "summaries", |summaries| {
            summaries.push(stored);
            Ok(())
        })
        .await?;
        Ok(record)
    }

    pub async fn get_summaries(&self) -> Result<Vec<Value>, StorageError> {
        self.array("summaries").await
    }

    // Settings

    pub async fn save_settings(&self, settings: Value) -> Result<(), StorageError> {
        self.kv.set(entry("settings", settings)).await
    }

    pub async fn get_settings(&self) -> Result<Value, StorageError> {
        Ok(Value::Object(self.object("settings").await?))
    }

    // Bulk

    pub async fn clear_all_data(&self) -> Result<(), StorageError> {
        let mut map = Map::new();
        map.insert("folders".to_string(), json!({}));
        map.insert("quizzes".to_string(), json!([]));
        map.insert("summaries".to_string(), json!([]));
        map.insert("settings".to_string(), json!({}));
        self.kv.set(map).await
    }

    pub async fn export_data(&self) -> Result<Value, StorageError> {
        let mut data = self
            .kv
            .get(&["folders", "quizzes", "summaries", "settings"])
            .await?;
        data.insert("exportedAt".to_string(), json!(now_rfc3339()));
        data.insert("version".to_string(), json!("1.0"));
        Ok(Value::Object(data))
    }

    /// Replace stored data with an export; `folders` and `settings` are required
    pub async fn import_data(&self, data: &Value) -> Result<(), StorageError> {
        let (Some(folders), Some(settings)) = (data.get("folders"), data.get("settings")) else {
            return Err(StorageError::InvalidImport);
        };

        let mut map = Map::new();
        map.insert("folders".to_string(), folders.clone());
        map.insert(
            "quizzes".to_string(),
            data.get("quizzes").cloned().unwrap_or_else(|| json!([])),
        );
        map.insert(
            "summaries".to_string(),
            data.get("summaries").cloned().unwrap_or_else(|| json!([])),
        );
        map.insert("settings".to_string(), settings.clone());
        self.kv.set(map).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn store() -> StudyStore {
        StudyStore::new(Arc::new(MemoryStore::new()))
    }

    fn card(question: &str) -> Flashcard {
        Flashcard {
            question: question.to_string(),
            answer: "answer".to_string(),
            original_text: "text".to_string(),
            timestamp: 0,
            method: "fallback".to_string(),
            note: None,
        }
    }

    #[tokio::test]
    async fn test_default_data_seeded_once() {
        let store = store();
        store.ensure_default_data().await.unwrap();

        let folders = store.get_folders().await.unwrap();
        assert_eq!(folders.len(), 5);
        assert!(folders.contains_key("Technology"));

        store.save_settings(json!({"language": "hindi"})).await.unwrap();
        store.ensure_default_data().await.unwrap();
        assert_eq!(store.get_settings().await.unwrap()["language"], "hindi");
    }

    #[tokio::test]
    async fn test_save_and_list_flashcards() {
        let store = store();
        let id = store.save_flashcard(&card("q1"), Some("Physics")).await.unwrap();
        store.save_flashcard(&card("q2"), None).await.unwrap();

        let physics = store.get_flashcards_by_folder("Physics").await.unwrap();
        assert_eq!(physics.len(), 1);
        assert_eq!(physics[0]["id"], id.as_str());
        assert_eq!(physics[0]["folder"], "Physics");

        let all = store.get_all_flashcards().await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_update_and_delete_flashcard() {
        let store = store();
        let id = store.save_flashcard(&card("q1"), None).await.unwrap();

        let mut updates = Map::new();
        updates.insert("answer".to_string(), json!("better"));
        let updated = store.update_flashcard(&id, &updates).await.unwrap();
        assert_eq!(updated["answer"], "better");
        assert_eq!(updated["question"], "q1");

        let missing = store.update_flashcard("nope", &updates).await;
        assert!(matches!(missing, Err(StorageError::NotFound(_))));

        assert!(store.delete_flashcard(&id).await.unwrap());
        assert!(!store.delete_flashcard(&id).await.unwrap());
        assert!(store.get_all_flashcards().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quiz_ids_are_fresh() {
        let store = store();
        let first = store.save_quiz(&[], Some("T")).await.unwrap();
        let second = store.save_quiz(&[], Some("T")).await.unwrap();
        assert_ne!(first, second);

        let quizzes = store.get_quizzes().await.unwrap();
        assert_eq!(quizzes.len(), 2);
        assert_eq!(quizzes[0]["title"], "T");
        assert_eq!(quizzes[0]["questionCount"], 0);
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let store = store();
        store.ensure_default_data().await.unwrap();
        store.save_flashcard(&card("q"), Some("Science")).await.unwrap();
        let exported = store.export_data().await.unwrap();
        assert_eq!(exported["version"], "1.0");

        store.clear_all_data().await.unwrap();
        assert!(store.get_all_flashcards().await.unwrap().is_empty());

        store.import_data(&exported).await.unwrap();
        assert_eq!(store.get_all_flashcards().await.unwrap().len(), 1);

        let invalid = store.import_data(&json!({"folders": {}})).await;
        assert!(matches!(invalid, Err(StorageError::InvalidImport)));
    }
}
