// ============================================
// Storage Seams
// ============================================
//
// Repository traits for everything the engine reads or writes. The
// surrounding application owns the actual persistence (relational store,
// metadata service); the engine only sees these contracts. In-memory
// implementations back the tests and small deployments.

use crate::models::{
    BanditExperiment, CandidateRef, DiversityMetricsSnapshot, Feature, FeatureContribution,
    FeatureWeight, ItemMetadata, OutcomeType, RatingEvent, Strategy, WeightScope,
};
use async_trait::async_trait;
use dashmap::DashMap;
#[cfg(test)]
use mockall::automock;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Ordered rating history for a user (oldest first).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RatingHistoryReader: Send + Sync {
    async fn get_ratings(&self, user_id: Uuid) -> Result<Vec<RatingEvent>>;
}

/// Catalog metadata lookup.
#[async_trait]
pub trait ItemMetadataReader: Send + Sync {
    async fn get_item_metadata(&self, item: CandidateRef) -> Result<Option<ItemMetadata>>;
}

/// Produces candidate items for a user under a given strategy, before
/// ranking. Counterpart of a recall layer; the host wires real queries in.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn candidates(
        &self,
        user_id: Uuid,
        strategy: Strategy,
        limit: usize,
    ) -> Result<Vec<CandidateRef>>;
}

/// Persistence for learned feature weights.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FeatureWeightRepository: Send + Sync {
    async fn get(&self, scope: WeightScope, feature: Feature) -> Result<Option<FeatureWeight>>;
    async fn put(&self, weight: FeatureWeight) -> Result<()>;
}

/// Append-only log of per-feature contributions; the outcome field is set
/// exactly once when feedback arrives.
#[async_trait]
pub trait ContributionRepository: Send + Sync {
    async fn append(&self, rows: Vec<FeatureContribution>) -> Result<()>;
    async fn for_recommendation(
        &self,
        recommendation_id: Uuid,
    ) -> Result<Vec<FeatureContribution>>;
    /// Set the outcome on all rows of a recommendation that do not have one
    /// yet. Rows with an outcome already set are left untouched.
    async fn resolve_outcome(&self, recommendation_id: Uuid, outcome: OutcomeType) -> Result<()>;
}

/// Bandit experiment audit log.
#[async_trait]
pub trait ExperimentRepository: Send + Sync {
    async fn create(&self, experiment: BanditExperiment) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<BanditExperiment>>;
    /// Set the reward exactly once. Returns false when the row is missing or
    /// the reward was already set.
    async fn set_reward_once(&self, id: Uuid, reward: f64) -> Result<bool>;
    /// Best-effort fallback log for feedback with no matching experiment.
    async fn log_unmatched(&self, correlation_id: Uuid, outcome: OutcomeType) -> Result<()>;
}

/// Write-once diversity metrics per recommendation batch.
#[async_trait]
pub trait MetricsRepository: Send + Sync {
    async fn record(&self, snapshot: DiversityMetricsSnapshot) -> Result<()>;
}

// ---------------------------------------------
// In-memory implementations
// ---------------------------------------------

/// In-memory rating history, keyed by user.
#[derive(Default)]
pub struct InMemoryRatingHistory {
    ratings: DashMap<Uuid, Vec<RatingEvent>>,
}

impl InMemoryRatingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rating(&self, user_id: Uuid, event: RatingEvent) {
        let mut entry = self.ratings.entry(user_id).or_default();
        entry.push(event);
        entry.sort_by_key(|e| e.timestamp);
    }
}

#[async_trait]
impl RatingHistoryReader for InMemoryRatingHistory {
    async fn get_ratings(&self, user_id: Uuid) -> Result<Vec<RatingEvent>> {
        Ok(self
            .ratings
            .get(&user_id)
            .map(|r| r.clone())
            .unwrap_or_default())
    }
}

/// In-memory catalog doubling as metadata reader and candidate source.
/// Candidates are served popularity-first regardless of strategy, which is
/// enough for tests and cold-start deployments.
#[derive(Default)]
pub struct InMemoryCatalog {
    items: DashMap<CandidateRef, ItemMetadata>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&self, metadata: ItemMetadata) {
        let key = CandidateRef {
            item_id: metadata.item_id,
            media_type: metadata.media_type,
        };
        self.items.insert(key, metadata);
    }
}

#[async_trait]
impl ItemMetadataReader for InMemoryCatalog {
    async fn get_item_metadata(&self, item: CandidateRef) -> Result<Option<ItemMetadata>> {
        Ok(self.items.get(&item).map(|m| m.clone()))
    }
}

#[async_trait]
impl CandidateSource for InMemoryCatalog {
    async fn candidates(
        &self,
        _user_id: Uuid,
        _strategy: Strategy,
        limit: usize,
    ) -> Result<Vec<CandidateRef>> {
        let mut items: Vec<ItemMetadata> = self.items.iter().map(|e| e.value().clone()).collect();
        items.sort_by(|a, b| {
            b.vote_count
                .cmp(&a.vote_count)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        Ok(items
            .into_iter()
            .take(limit)
            .map(|m| CandidateRef {
                item_id: m.item_id,
                media_type: m.media_type,
            })
            .collect())
    }
}

/// In-memory feature-weight store.
#[derive(Default)]
pub struct InMemoryFeatureWeights {
    weights: DashMap<(WeightScope, Feature), FeatureWeight>,
}

impl InMemoryFeatureWeights {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeatureWeightRepository for InMemoryFeatureWeights {
    async fn get(&self, scope: WeightScope, feature: Feature) -> Result<Option<FeatureWeight>> {
        Ok(self.weights.get(&(scope, feature)).map(|w| w.clone()))
    }

    async fn put(&self, weight: FeatureWeight) -> Result<()> {
        self.weights
            .insert((weight.scope, weight.feature), weight);
        Ok(())
    }
}

/// In-memory contribution log.
#[derive(Default)]
pub struct InMemoryContributions {
    rows: DashMap<Uuid, Vec<FeatureContribution>>,
}

impl InMemoryContributions {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContributionRepository for InMemoryContributions {
    async fn append(&self, rows: Vec<FeatureContribution>) -> Result<()> {
        for row in rows {
            self.rows.entry(row.recommendation_id).or_default().push(row);
        }
        Ok(())
    }

    async fn for_recommendation(
        &self,
        recommendation_id: Uuid,
    ) -> Result<Vec<FeatureContribution>> {
        Ok(self
            .rows
            .get(&recommendation_id)
            .map(|r| r.clone())
            .unwrap_or_default())
    }

    async fn resolve_outcome(&self, recommendation_id: Uuid, outcome: OutcomeType) -> Result<()> {
        if let Some(mut rows) = self.rows.get_mut(&recommendation_id) {
            for row in rows.iter_mut() {
                if row.outcome.is_none() {
                    row.outcome = Some(outcome);
                }
            }
        }
        Ok(())
    }
}

/// In-memory experiment log with an unmatched-feedback side channel.
#[derive(Default)]
pub struct InMemoryExperiments {
    experiments: DashMap<Uuid, BanditExperiment>,
    unmatched: Mutex<Vec<(Uuid, OutcomeType)>>,
}

impl InMemoryExperiments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unmatched feedback recorded so far (test observability).
    pub fn unmatched_count(&self) -> usize {
        self.unmatched.lock().map(|u| u.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ExperimentRepository for InMemoryExperiments {
    async fn create(&self, experiment: BanditExperiment) -> Result<()> {
        self.experiments.insert(experiment.id, experiment);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<BanditExperiment>> {
        Ok(self.experiments.get(&id).map(|e| e.clone()))
    }

    async fn set_reward_once(&self, id: Uuid, reward: f64) -> Result<bool> {
        match self.experiments.get_mut(&id) {
            Some(mut experiment) if experiment.reward.is_none() => {
                experiment.reward = Some(reward.clamp(0.0, 1.0));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn log_unmatched(&self, correlation_id: Uuid, outcome: OutcomeType) -> Result<()> {
        if let Ok(mut unmatched) = self.unmatched.lock() {
            unmatched.push((correlation_id, outcome));
        }
        Ok(())
    }
}

/// In-memory metrics sink.
#[derive(Default)]
pub struct InMemoryMetrics {
    snapshots: Mutex<Vec<DiversityMetricsSnapshot>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<DiversityMetricsSnapshot> {
        self.snapshots.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MetricsRepository for InMemoryMetrics {
    async fn record(&self, snapshot: DiversityMetricsSnapshot) -> Result<()> {
        if let Ok(mut snapshots) = self.snapshots.lock() {
            snapshots.push(snapshot);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_reward_set_exactly_once() {
        let repo = InMemoryExperiments::new();
        let id = Uuid::new_v4();
        repo.create(BanditExperiment {
            id,
            user_id: Uuid::new_v4(),
            experiment_type: "strategy_selection".to_string(),
            arm_chosen: Strategy::Trending,
            reward: None,
            context: serde_json::json!({}),
            exploration_rate: 0.1,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        assert!(repo.set_reward_once(id, 1.0).await.unwrap());
        assert!(!repo.set_reward_once(id, 0.0).await.unwrap());

        let row = repo.get(id).await.unwrap().unwrap();
        assert_eq!(row.reward, Some(1.0));
    }

    #[tokio::test]
    async fn test_contribution_outcome_resolution() {
        let repo = InMemoryContributions::new();
        let rec_id = Uuid::new_v4();
        repo.append(vec![FeatureContribution {
            recommendation_id: rec_id,
            user_id: Uuid::new_v4(),
            feature: Feature::GenreMatch,
            contribution_score: 0.4,
            feature_value: 0.8,
            outcome: None,
            created_at: Utc::now(),
        }])
        .await
        .unwrap();

        repo.resolve_outcome(rec_id, OutcomeType::Liked).await.unwrap();
        repo.resolve_outcome(rec_id, OutcomeType::Disliked).await.unwrap();

        let rows = repo.for_recommendation(rec_id).await.unwrap();
        // First resolution wins; the second is a no-op.
        assert_eq!(rows[0].outcome, Some(OutcomeType::Liked));
    }
}
