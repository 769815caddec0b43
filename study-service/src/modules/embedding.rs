//! Sentence embeddings and semantic search over flashcards.

use super::FeatureModule;
use crate::error::GenerationError;
use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use tracing::debug;

pub const EMBEDDING_DIMENSIONS: usize = 384;
pub const DEFAULT_TOP_K: usize = 5;

#[async_trait]
pub trait SentenceTransformer: FeatureModule {
    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, GenerationError>;

    /// Flashcards ranked by similarity to `query`, best first, each with a
    /// `similarityScore` field
    async fn semantic_search(
        &self,
        flashcards: &[Value],
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<Value>, GenerationError> {
        if query.trim().is_empty() {
            return Err(GenerationError::EmptyInput("No query provided for search"));
        }

        let query_vec = self.generate_embedding(query).await?;
        let mut scored = Vec::with_capacity(flashcards.len());
        for card in flashcards {
            let card_vec = self.generate_embedding(&card_text(card)).await?;
            scored.push((cosine_similarity(&query_vec, &card_vec), card));
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(top_k.unwrap_or(DEFAULT_TOP_K))
            .map(|(score, card)| {
                let mut card = card.clone();
                if let Value::Object(fields) = &mut card {
                    fields.insert("similarityScore".to_string(), json!(score));
                }
                card
            })
            .collect())
    }
}

fn card_text(card: &Value) -> String {
    match card {
        Value::Object(_) => ["question", "answer", "originalText"]
            .iter()
            .filter_map(|k| card[*k].as_str())
            .collect::<Vec<_>>()
            .join(" "),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Cosine similarity; 0 when either vector is all zeros
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Feature-hashed bag of words: each token lands in a SHA-256 derived bucket
/// with a derived sign, and the result is L2-normalised.
#[derive(Debug, Default)]
pub struct HashedEmbeddings;

impl HashedEmbeddings {
    pub fn new() -> Self {
        Self
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; EMBEDDING_DIMENSIONS];
        for token in tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % EMBEDDING_DIMENSIONS;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl FeatureModule for HashedEmbeddings {
    fn name(&self) -> &'static str {
        "sentence transformer"
    }
}

#[async_trait]
impl SentenceTransformer for HashedEmbeddings {
    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, GenerationError> {
        debug!("Embedding {} chars", text.len());
        Ok(self.embed(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_is_normalised_and_deterministic() {
        let engine = HashedEmbeddings::new();
        let a = engine.embed("Mitochondria is the powerhouse of the cell");
        let b = engine.embed("mitochondria IS the powerhouse, of the cell!");

        assert_eq!(a.len(), EMBEDDING_DIMENSIONS);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_embeds_to_zero() {
        let zero = HashedEmbeddings::new().embed("  ");
        assert!(zero.iter().all(|x| *x == 0.0));
        assert_eq!(cosine_similarity(&zero, &zero), 0.0);
    }

    #[tokio::test]
    async fn test_semantic_search_ranks_related_cards_first() {
        let cards = vec![
            json!({"id": "1", "question": "What year did World War II end?", "answer": "1945"}),
            json!({"id": "2", "question": "What is photosynthesis?", "answer": "Plants turning light into energy"}),
            json!({"id": "3", "question": "Who wrote Hamlet?", "answer": "Shakespeare"}),
        ];

        let results = HashedEmbeddings::new()
            .semantic_search(&cards, "how do plants use light energy", Some(2))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["id"], "2");
        assert!(results[0]["similarityScore"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_semantic_search_defaults_and_empty_query() {
        let cards: Vec<Value> = (0..8).map(|i| json!({"question": format!("card {}", i)})).collect();
        let engine = HashedEmbeddings::new();
        assert_eq!(engine.semantic_search(&cards, "card", None).await.unwrap().len(), DEFAULT_TOP_K);
        assert!(engine.semantic_search(&cards, " ", None).await.is_err());
    }
}
