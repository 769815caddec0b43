//! Feature modules the dispatcher loads on demand.
//!
//! Each group sits behind traits so the dispatcher never depends on a
//! particular inference, OCR or speech technology:
//! - `ai`: summaries, flashcards and quizzes
//! - `video`: saved videos and transcripts
//! - `advanced`: sync queue, study groups and analytics
//! - `ocr`: text from images
//! - `embedding`: semantic search over flashcards
//! - `speech`: text-to-speech, wired once at start-up

pub mod advanced;
pub mod ai;
pub mod embedding;
pub mod ocr;
pub mod speech;
pub mod video;

use async_trait::async_trait;

/// Lifecycle shared by every lazily constructed module
#[async_trait]
pub trait FeatureModule: Send + Sync {
    /// Human readable module name for logs and load errors
    fn name(&self) -> &'static str;

    /// One-time asynchronous setup, run right after construction
    async fn initialize(&self) -> Result<(), String> {
        Ok(())
    }
}
