// ============================================
// Feature Store
// ============================================
//
// Serves and learns scalar feature weights per (scope, feature).
// Per-user weights fall back to the global aggregate; anything missing
// falls back to the 0.5 default. Writes are best-effort: a storage
// failure is logged and swallowed so the serve path never blocks on
// the learner.

use crate::models::{Feature, FeatureContribution, FeatureWeight, OutcomeType, WeightScope};
use crate::storage::{ContributionRepository, FeatureWeightRepository};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone)]
struct CachedWeight {
    weight: f64,
    cached_at: Instant,
}

/// Online feature-weight learner with a small read-through cache.
pub struct FeatureStore {
    repo: Arc<dyn FeatureWeightRepository>,
    contributions: Arc<dyn ContributionRepository>,
    learning_rate: f64,
    cache: RwLock<HashMap<(WeightScope, Feature), CachedWeight>>,
    cache_ttl_secs: u64,
}

impl FeatureStore {
    pub fn new(
        repo: Arc<dyn FeatureWeightRepository>,
        contributions: Arc<dyn ContributionRepository>,
        learning_rate: f64,
    ) -> Self {
        Self {
            repo,
            contributions,
            learning_rate,
            cache: RwLock::new(HashMap::new()),
            cache_ttl_secs: 60,
        }
    }

    /// Current weight for a user, falling back to the global weight and then
    /// to the 0.5 default. Storage errors degrade to the default.
    pub async fn get_weight(&self, user_id: Option<Uuid>, feature: Feature) -> f64 {
        if let Some(uid) = user_id {
            if let Some(w) = self.lookup(WeightScope::User(uid), feature).await {
                return w;
            }
        }
        self.lookup(WeightScope::Global, feature)
            .await
            .unwrap_or(FeatureWeight::DEFAULT_WEIGHT)
    }

    /// Apply the incremental update rule for one scope:
    /// `w ← w + lr * (target - w)` with target 1 on success, 0 on failure,
    /// clamped to [0, 1]. Failures to persist are logged and swallowed.
    pub async fn update(&self, scope: WeightScope, feature: Feature, success: bool) {
        let mut weight = match self.repo.get(scope, feature).await {
            Ok(Some(w)) => w,
            Ok(None) => FeatureWeight::new(scope, feature, self.learning_rate),
            Err(e) => {
                warn!(feature = feature.as_str(), error = %e, "weight read failed, starting from default");
                FeatureWeight::new(scope, feature, self.learning_rate)
            }
        };

        let target = if success { 1.0 } else { 0.0 };
        weight.weight = (weight.weight + weight.learning_rate * (target - weight.weight))
            .clamp(0.0, 1.0);
        weight.total_count += 1;
        if success {
            weight.success_count += 1;
        }

        debug!(
            feature = feature.as_str(),
            weight = weight.weight,
            success_rate = weight.success_rate(),
            "feature weight updated"
        );

        let cached = CachedWeight {
            weight: weight.weight,
            cached_at: Instant::now(),
        };
        self.cache.write().await.insert((scope, feature), cached);

        if let Err(e) = self.repo.put(weight).await {
            warn!(feature = feature.as_str(), error = %e, "weight update dropped");
        }
    }

    /// Update both the user-scoped and global weights for every feature
    /// implicated by an outcome.
    pub async fn apply_outcome(&self, user_id: Uuid, features: &[Feature], success: bool) {
        for &feature in features {
            self.update(WeightScope::User(user_id), feature, success).await;
            self.update(WeightScope::Global, feature, success).await;
        }
    }

    /// Append contribution rows for a generated recommendation; best-effort.
    pub async fn record_contributions(&self, rows: Vec<FeatureContribution>) {
        if rows.is_empty() {
            return;
        }
        if let Err(e) = self.contributions.append(rows).await {
            warn!(error = %e, "contribution log dropped");
        }
    }

    /// Fill in the outcome on a recommendation's contribution rows, exactly
    /// once; best-effort.
    pub async fn resolve_contributions(&self, recommendation_id: Uuid, outcome: OutcomeType) {
        if let Err(e) = self
            .contributions
            .resolve_outcome(recommendation_id, outcome)
            .await
        {
            warn!(error = %e, "contribution outcome resolution dropped");
        }
    }

    async fn lookup(&self, scope: WeightScope, feature: Feature) -> Option<f64> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&(scope, feature)) {
                if cached.cached_at.elapsed().as_secs() < self.cache_ttl_secs {
                    return Some(cached.weight);
                }
            }
        }

        match self.repo.get(scope, feature).await {
            Ok(Some(w)) => {
                let mut cache = self.cache.write().await;
                cache.insert(
                    (scope, feature),
                    CachedWeight {
                        weight: w.weight,
                        cached_at: Instant::now(),
                    },
                );
                Some(w.weight)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(feature = feature.as_str(), error = %e, "weight lookup failed, using default");
                None
            }
        }
    }
}
