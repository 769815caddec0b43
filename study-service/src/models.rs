//! Records produced by the generators and kept in storage.
//!
//! Field names are camelCase on the wire because the extension UI reads them
//! directly.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub summary: String,
    pub original_text: String,
    /// Unix milliseconds
    pub timestamp: i64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flashcard {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub original_text: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub id: u32,
    pub question: String,
    pub options: Vec<String>,
    /// Index into `options`
    pub correct: usize,
    pub original_text: String,
    pub timestamp: i64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A quiz as persisted under the `quizzes` key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredQuiz {
    pub id: String,
    pub title: String,
    pub questions: Vec<QuizQuestion>,
    pub created: String,
    pub question_count: usize,
}

fn default_method() -> String {
    "manual".to_string()
}

/// Current time in Unix milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Current time as an RFC 3339 string
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flashcard_wire_names() {
        let card = Flashcard {
            question: "Q".to_string(),
            answer: "A".to_string(),
            original_text: "text".to_string(),
            timestamp: 1,
            method: "fallback".to_string(),
            note: None,
        };
        let value = serde_json::to_value(&card).unwrap();
        assert_eq!(value["originalText"], "text");
        assert!(value.get("note").is_none());
    }

    #[test]
    fn test_flashcard_accepts_partial_input() {
        let card: Flashcard =
            serde_json::from_str(r#"{"question":"Q","answer":"A"}"#).unwrap();
        assert_eq!(card.method, "manual");
        assert_eq!(card.timestamp, 0);
    }
}
