// ============================================
// Embedding Store
// ============================================
//
// Read-only serving store for two-tower user/item vectors produced by an
// offline training job. Missing vectors degrade to a zero vector at call
// sites; similarity against a zero vector is 0, never an error.

use crate::models::{Embedding, SubjectKind};
use crate::utils::cosine_similarity;
use dashmap::DashMap;
use tracing::info;

/// Dimensionality of the offline-trained vectors.
pub const EMBEDDING_DIM: usize = 32;

pub struct EmbeddingStore {
    vectors: DashMap<(SubjectKind, String), Embedding>,
}

impl Default for EmbeddingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingStore {
    pub fn new() -> Self {
        Self {
            vectors: DashMap::new(),
        }
    }

    /// Bulk-load a batch of embeddings (startup or periodic refresh).
    /// Newer versions replace older ones; same-version rows overwrite.
    pub fn load_batch(&self, embeddings: Vec<Embedding>) {
        let count = embeddings.len();
        for embedding in embeddings {
            let key = (embedding.subject_kind, embedding.subject_id.clone());
            match self.vectors.get(&key) {
                Some(existing) if existing.version > embedding.version => continue,
                _ => {
                    self.vectors.insert(key, embedding);
                }
            }
        }
        info!(loaded = count, total = self.vectors.len(), "embedding batch loaded");
    }

    pub fn get(&self, subject_kind: SubjectKind, subject_id: &str) -> Option<Vec<f32>> {
        self.vectors
            .get(&(subject_kind, subject_id.to_string()))
            .map(|e| e.vector.clone())
    }

    /// Cosine similarity between a user and an item vector. Either side
    /// missing yields 0 (zero-vector degradation).
    pub fn user_item_similarity(&self, user_id: &str, item_id: &str) -> f64 {
        let user = self.get(SubjectKind::User, user_id);
        let item = self.get(SubjectKind::Item, item_id);
        match (user, item) {
            (Some(u), Some(i)) => cosine_similarity(&u, &i),
            _ => 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding(kind: SubjectKind, id: &str, vector: Vec<f32>, version: u32) -> Embedding {
        Embedding {
            subject_id: id.to_string(),
            subject_kind: kind,
            vector,
            version,
        }
    }

    #[test]
    fn test_similarity_of_identical_vectors() {
        let store = EmbeddingStore::new();
        let v: Vec<f32> = (0..EMBEDDING_DIM).map(|i| (i as f32) * 0.1 + 0.1).collect();
        store.load_batch(vec![
            embedding(SubjectKind::User, "u1", v.clone(), 1),
            embedding(SubjectKind::Item, "603", v, 1),
        ]);

        let sim = store.user_item_similarity("u1", "603");
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_missing_embedding_degrades_to_zero() {
        let store = EmbeddingStore::new();
        store.load_batch(vec![embedding(
            SubjectKind::User,
            "u1",
            vec![1.0; EMBEDDING_DIM],
            1,
        )]);

        assert_eq!(store.user_item_similarity("u1", "missing"), 0.0);
        assert_eq!(store.user_item_similarity("missing", "missing"), 0.0);
    }

    #[test]
    fn test_newer_version_wins() {
        let store = EmbeddingStore::new();
        store.load_batch(vec![embedding(SubjectKind::Item, "603", vec![1.0; 4], 2)]);
        store.load_batch(vec![embedding(SubjectKind::Item, "603", vec![0.0; 4], 1)]);

        let v = store.get(SubjectKind::Item, "603").unwrap();
        assert_eq!(v, vec![1.0; 4]);
    }
}
