//! Error types for the study service

use crate::registry::ModuleGroup;
use thiserror::Error;

/// A feature module group could not be constructed or initialized
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ModuleLoadError {
    pub group: ModuleGroup,
    pub message: String,
}

impl ModuleLoadError {
    pub fn new(group: ModuleGroup, message: impl Into<String>) -> Self {
        Self {
            group,
            message: message.into(),
        }
    }
}

/// Failure inside a generator, OCR, embedding or transcript collaborator
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("{0}")]
    EmptyInput(&'static str),

    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("Invalid image data: {0}")]
    InvalidImage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Transcript unavailable: {0}")]
    Transcript(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Invalid import data structure")]
    InvalidImport,
}

/// Everything that can end a dispatched request with an error envelope
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    ModuleLoad(#[from] ModuleLoadError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Unknown message type")]
    UnknownRequest,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("TTS not available")]
    SpeechUnavailable,

    #[error("TTS failed: {0}")]
    Speech(String),
}

impl From<serde_json::Error> for DispatchError {
    fn from(e: serde_json::Error) -> Self {
        DispatchError::Storage(StorageError::Serialization(e))
    }
}
