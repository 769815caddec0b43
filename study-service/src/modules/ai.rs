//! Text generators: summaries, flashcards and quizzes.
//!
//! The bundled implementations are extractive. They pick sentences out of the
//! input instead of running a model, which keeps results deterministic and
//! cheap enough to run inside the service.

use super::FeatureModule;
use crate::error::GenerationError;
use crate::models::{now_millis, Flashcard, QuizQuestion, Summary};
use async_trait::async_trait;
use tracing::debug;

pub const DEFAULT_QUESTION_COUNT: usize = 3;
pub const MAX_QUESTION_COUNT: usize = 10;

const EXTRACTIVE_METHOD: &str = "extractive";

#[async_trait]
pub trait Summarizer: FeatureModule {
    async fn generate_summary(&self, text: &str) -> Result<Summary, GenerationError>;
}

#[async_trait]
pub trait FlashcardGenerator: FeatureModule {
    async fn generate_flashcard(&self, text: &str) -> Result<Flashcard, GenerationError>;
}

#[async_trait]
pub trait QuizGenerator: FeatureModule {
    async fn generate_quiz(
        &self,
        text: &str,
        question_count: Option<usize>,
    ) -> Result<Vec<QuizQuestion>, GenerationError>;
}

/// Sentences of the text, trimmed, keeping those longer than `min_chars`
pub fn sentences(text: &str, min_chars: usize) -> Vec<&str> {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| s.chars().count() > min_chars)
        .collect()
}

/// First `max` characters of `text`
pub fn take_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// First `max` characters, with "..." appended when the text was longer
pub fn ellipsize(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", take_chars(text, max))
    } else {
        text.to_string()
    }
}

fn require_text(text: &str, message: &'static str) -> Result<(), GenerationError> {
    if text.trim().is_empty() {
        return Err(GenerationError::EmptyInput(message));
    }
    Ok(())
}

/// Extractive summary: the first three substantial sentences
pub fn extractive_summary(text: &str) -> String {
    let picked = sentences(text, 15);
    if picked.is_empty() {
        return format!("{}...", take_chars(text, 200));
    }

    let summary = format!("{}.", picked.iter().take(3).copied().collect::<Vec<_>>().join(". "));
    if summary.chars().count() > 50 {
        summary
    } else {
        format!("{}...", take_chars(text, 300))
    }
}

#[derive(Debug, Default)]
pub struct ExtractiveSummarizer;

impl ExtractiveSummarizer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeatureModule for ExtractiveSummarizer {
    fn name(&self) -> &'static str {
        "summarizer"
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn generate_summary(&self, text: &str) -> Result<Summary, GenerationError> {
        require_text(text, "No text provided for summarization")?;
        debug!("Summarizing {} chars", text.len());

        Ok(Summary {
            summary: extractive_summary(text),
            original_text: text.to_string(),
            timestamp: now_millis(),
            method: EXTRACTIVE_METHOD.to_string(),
            note: None,
        })
    }
}

#[derive(Debug, Default)]
pub struct ExtractiveFlashcards;

impl ExtractiveFlashcards {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeatureModule for ExtractiveFlashcards {
    fn name(&self) -> &'static str {
        "flashcard generator"
    }
}

#[async_trait]
impl FlashcardGenerator for ExtractiveFlashcards {
    async fn generate_flashcard(&self, text: &str) -> Result<Flashcard, GenerationError> {
        require_text(text, "No text provided for flashcard generation")?;

        let picked = sentences(text, 5);
        let topic = match picked.first() {
            Some(first) => first.to_string(),
            None => take_chars(text.trim(), 100),
        };
        let question = format!("What does the text say about \"{}\"?", ellipsize(&topic, 60));

        let mut answer = picked
            .iter()
            .skip(1)
            .take(2)
            .copied()
            .collect::<Vec<_>>()
            .join(". ");
        if answer.is_empty() {
            answer = "The text discusses this topic in detail".to_string();
        }
        if !answer.ends_with('.') {
            answer.push('.');
        }

        Ok(Flashcard {
            question,
            answer,
            original_text: text.to_string(),
            timestamp: now_millis(),
            method: EXTRACTIVE_METHOD.to_string(),
            note: None,
        })
    }
}

const FALLBACK_QUESTIONS: [(&str, [&str; 4]); 3] = [
    (
        "What is the main topic discussed?",
        ["The primary subject discussed", "An unrelated topic", "Something different", "Content not mentioned"],
    ),
    (
        "What are the key points covered?",
        ["Important details covered", "Irrelevant information", "Key concepts", "Background info"],
    ),
    (
        "What conclusions can be drawn?",
        ["Main conclusions drawn", "Supporting evidence", "Methodology used", "Future implications"],
    ),
];

const DISTRACTORS: [&str; 3] = [
    "An unrelated concept",
    "Something not mentioned in the text",
    "A different topic entirely",
];

#[derive(Debug, Default)]
pub struct ExtractiveQuiz;

impl ExtractiveQuiz {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeatureModule for ExtractiveQuiz {
    fn name(&self) -> &'static str {
        "quiz generator"
    }
}

#[async_trait]
impl QuizGenerator for ExtractiveQuiz {
    async fn generate_quiz(
        &self,
        text: &str,
        question_count: Option<usize>,
    ) -> Result<Vec<QuizQuestion>, GenerationError> {
        require_text(text, "No text provided for quiz generation")?;

        let count = question_count
            .unwrap_or(DEFAULT_QUESTION_COUNT)
            .clamp(1, MAX_QUESTION_COUNT);
        let timestamp = now_millis();
        let picked = sentences(text, 10);

        let question = |id: usize, question: String, options: Vec<String>| QuizQuestion {
            id: id as u32,
            question,
            options,
            correct: 0,
            original_text: text.to_string(),
            timestamp,
            method: EXTRACTIVE_METHOD.to_string(),
            note: None,
        };

        if picked.is_empty() {
            return Ok(FALLBACK_QUESTIONS
                .iter()
                .take(count)
                .enumerate()
                .map(|(i, (q, options))| {
                    question(i + 1, q.to_string(), options.iter().map(|o| o.to_string()).collect())
                })
                .collect());
        }

        let questions = picked
            .iter()
            .take(count)
            .enumerate()
            .map(|(i, sentence)| {
                // Distractors: the other sentences, padded with fixed phrases
                let mut options = vec![sentence.to_string()];
                options.extend(
                    picked
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| *j != i)
                        .map(|(_, s)| s.to_string())
                        .take(3),
                );
                for filler in DISTRACTORS {
                    if options.len() >= 4 {
                        break;
                    }
                    options.push(filler.to_string());
                }

                question(
                    i + 1,
                    format!("What does the text say about \"{}\"?", ellipsize(sentence, 40)),
                    options,
                )
            })
            .collect();

        Ok(questions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "Photosynthesis converts light into chemical energy. \
        It happens inside chloroplasts of plant cells. \
        Oxygen is released as a by-product of the reaction. \
        Glucose produced is used for growth.";

    #[test]
    fn test_sentences_filter_short_fragments() {
        let found = sentences("Hi. This one is long enough! Ok?", 5);
        assert_eq!(found, vec!["This one is long enough"]);
    }

    #[test]
    fn test_extractive_summary_takes_three_sentences() {
        let summary = extractive_summary(TEXT);
        assert!(summary.starts_with("Photosynthesis converts light into chemical energy. It happens"));
        assert!(!summary.contains("Glucose"));
        assert!(summary.ends_with('.'));
    }

    #[test]
    fn test_short_summary_falls_back_to_prefix() {
        let text = "The sun is a star. It is very hot.";
        assert_eq!(extractive_summary(text), format!("{}...", text));
    }

    #[tokio::test]
    async fn test_empty_text_is_rejected() {
        let err = ExtractiveSummarizer::new().generate_summary("   ").await.unwrap_err();
        assert_eq!(err.to_string(), "No text provided for summarization");

        assert!(ExtractiveFlashcards::new().generate_flashcard("").await.is_err());
        assert!(ExtractiveQuiz::new().generate_quiz("", None).await.is_err());
    }

    #[tokio::test]
    async fn test_flashcard_from_sentences() {
        let card = ExtractiveFlashcards::new().generate_flashcard(TEXT).await.unwrap();
        assert_eq!(
            card.question,
            "What does the text say about \"Photosynthesis converts light into chemical energy\"?"
        );
        assert!(card.answer.starts_with("It happens inside chloroplasts"));
        assert!(card.answer.ends_with('.'));
        assert_eq!(card.method, "extractive");
    }

    #[tokio::test]
    async fn test_quiz_question_count() {
        let quiz = ExtractiveQuiz::new().generate_quiz(TEXT, Some(2)).await.unwrap();
        assert_eq!(quiz.len(), 2);
        assert_eq!(quiz[0].id, 1);
        assert_eq!(quiz[0].options.len(), 4);
        assert_eq!(quiz[0].options[quiz[0].correct], "Photosynthesis converts light into chemical energy");

        let default = ExtractiveQuiz::new().generate_quiz(TEXT, None).await.unwrap();
        assert_eq!(default.len(), 3);
    }

    #[tokio::test]
    async fn test_quiz_without_sentences_uses_templates() {
        let quiz = ExtractiveQuiz::new().generate_quiz("tiny", Some(5)).await.unwrap();
        assert_eq!(quiz.len(), 3);
        assert_eq!(quiz[0].question, "What is the main topic discussed?");
    }
}
