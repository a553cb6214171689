/// Candidate Scoring
///
/// Assigns each candidate a relevance score in [0, 1] and records the
/// per-feature attribution that feeds the contribution log and the
/// explanation surface.
use crate::config::RankingConfig;
use crate::models::{CandidateRef, Feature, ItemMetadata, Strategy};
use crate::services::embeddings::EmbeddingStore;
use crate::services::features::FeatureStore;
use crate::utils::{exponential_decay, normalize_score};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Maximum candidates scored in one batch.
const MAX_BATCH_SIZE: usize = 500;

/// Normalized feature values for one candidate.
#[derive(Debug, Clone, Default)]
pub struct CandidateFeatures {
    pub embedding_similarity: f64,
    pub genre_match: f64,
    pub popularity: f64,
    pub recency: f64,
}

impl CandidateFeatures {
    pub fn value(&self, feature: Feature) -> f64 {
        match feature {
            Feature::EmbeddingSimilarity => self.embedding_similarity,
            Feature::GenreMatch => self.genre_match,
            Feature::Popularity => self.popularity,
            Feature::Recency => self.recency,
        }
    }
}

/// A scored candidate with its attribution breakdown.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub item: CandidateRef,
    pub genres: Vec<u32>,
    pub score: f64,
    pub features: CandidateFeatures,
    /// Per-feature share of the final score; sums to 1 when the score is
    /// non-zero.
    pub contributions: Vec<(Feature, f64)>,
}

pub struct CandidateRanker {
    feature_store: Arc<FeatureStore>,
    embeddings: Arc<EmbeddingStore>,
    config: RankingConfig,
}

impl CandidateRanker {
    pub fn new(
        feature_store: Arc<FeatureStore>,
        embeddings: Arc<EmbeddingStore>,
        config: RankingConfig,
    ) -> Self {
        Self {
            feature_store,
            embeddings,
            config,
        }
    }

    /// Score a batch of candidates for a user under the chosen strategy.
    /// Returns candidates sorted by score descending; NaN never enters the
    /// ordering because every feature value is normalized first.
    pub async fn score_candidates(
        &self,
        user_id: Uuid,
        candidates: &[ItemMetadata],
        preferred_genres: &HashSet<u32>,
        strategy: Strategy,
    ) -> Vec<ScoredCandidate> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let candidates = &candidates[..candidates.len().min(MAX_BATCH_SIZE)];

        // One weight lookup per feature, shared across the batch.
        let strategy_features = strategy.features();
        let mut weights = Vec::with_capacity(strategy_features.len());
        for &feature in strategy_features {
            weights.push(self.feature_store.get_weight(Some(user_id), feature).await);
        }

        let user_key = user_id.to_string();
        let mut scored: Vec<ScoredCandidate> = candidates
            .iter()
            .map(|item| self.score_one(&user_key, item, preferred_genres, strategy_features, &weights))
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        debug!(
            %user_id,
            strategy = strategy.as_str(),
            candidate_count = scored.len(),
            top_score = scored.first().map(|c| c.score),
            "candidates scored"
        );

        scored
    }

    fn score_one(
        &self,
        user_key: &str,
        item: &ItemMetadata,
        preferred_genres: &HashSet<u32>,
        strategy_features: &[Feature],
        weights: &[f64],
    ) -> ScoredCandidate {
        let features = self.extract_features(user_key, item, preferred_genres);

        // Weighted sum, normalized by total weight so the score stays in
        // [0, 1] no matter how the learned weights drift.
        let mut weighted: Vec<(Feature, f64)> = Vec::with_capacity(strategy_features.len());
        let mut weight_sum = 0.0;
        for (&feature, &weight) in strategy_features.iter().zip(weights.iter()) {
            weighted.push((feature, weight * features.value(feature)));
            weight_sum += weight;
        }

        let raw_sum: f64 = weighted.iter().map(|(_, v)| v).sum();
        let score = if weight_sum > 0.0 { raw_sum / weight_sum } else { 0.0 };

        // Renormalize contributions to sum to 1 for attribution.
        let contributions = if raw_sum > 0.0 {
            weighted.into_iter().map(|(f, v)| (f, v / raw_sum)).collect()
        } else {
            let uniform = 1.0 / strategy_features.len() as f64;
            weighted.into_iter().map(|(f, _)| (f, uniform)).collect()
        };

        ScoredCandidate {
            item: CandidateRef {
                item_id: item.item_id,
                media_type: item.media_type,
            },
            genres: item.genres.clone(),
            score,
            features,
            contributions,
        }
    }

    /// Normalized feature values. Every raw value passes through the
    /// defensive normalizer; a missing embedding or release date degrades to
    /// a neutral value rather than an error.
    fn extract_features(
        &self,
        user_key: &str,
        item: &ItemMetadata,
        preferred_genres: &HashSet<u32>,
    ) -> CandidateFeatures {
        let embedding_similarity = normalize_score(
            self.embeddings
                .user_item_similarity(user_key, &item.item_id.to_string()),
        );

        let genre_match = if item.genres.is_empty() {
            0.0
        } else {
            let matched = item
                .genres
                .iter()
                .filter(|g| preferred_genres.contains(g))
                .count();
            normalize_score(matched as f64 / item.genres.len() as f64)
        };

        let popularity = {
            let ceiling = (1.0 + self.config.popularity_vote_ceiling as f64).ln();
            let raw = if ceiling > 0.0 {
                (1.0 + item.vote_count as f64).ln() / ceiling
            } else {
                0.0
            };
            normalize_score(raw)
        };

        let recency = match item.release_date {
            Some(date) => {
                let age_days = (Utc::now().date_naive() - date).num_days().max(0) as f64;
                normalize_score(exponential_decay(
                    age_days,
                    self.config.recency_half_life_days,
                ))
            }
            None => 0.5,
        };

        CandidateFeatures {
            embedding_similarity,
            genre_match,
            popularity,
            recency,
        }
    }
}
