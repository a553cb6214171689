// ============================================
// Recommendation Engine
// ============================================
//
// Orchestrates one request as a sequential pipeline with explicit data
// dependencies: select arm -> rank -> diversify -> explain. The only hot-path
// writes (experiment row, contribution log, metrics snapshot, weight/reward
// updates on feedback) are detached best-effort tasks; no stage ever fails a
// recommendation request. The worst outcome is a popularity-flavored default
// list.

use crate::config::Config;
use crate::models::{
    CandidateRef, FeatureContribution, ItemMetadata, MediaType, OutcomeType, PatternAnalysis,
    PatternPrediction, Recommendation, SessionType, DiversityMetricsSnapshot,
};
use crate::services::{
    BanditArmSelector, CandidateRanker, DiversityReranker, EmbeddingStore, EnrichedRating,
    Explanation, ExplanationGenerator, FeatureStore, SequencePredictor,
};
use crate::storage::{
    CandidateSource, ContributionRepository, ExperimentRepository, FeatureWeightRepository,
    ItemMetadataReader, MetricsRepository, RatingHistoryReader,
};
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Options for one `generate_recommendations` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationOptions {
    pub limit: usize,
    /// 0 = pure relevance order, 1 = maximum diversity. Falls back to the
    /// configured default when absent.
    pub diversity_level: Option<f64>,
    /// Attach human-readable reasons to each item.
    pub explainability: bool,
}

impl Default for RecommendationOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            diversity_level: None,
            explainability: false,
        }
    }
}

/// Session-aware recommendation hints for other surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecommendations {
    pub recommended_genres: Vec<u32>,
    pub predicted_rating: f64,
    pub session_type: SessionType,
    pub confidence: f64,
}

/// Acknowledgement for interaction feedback; always returned, even when the
/// correlation id did not match any experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackAck {
    pub correlation_id: Uuid,
    /// Whether the feedback matched a recorded experiment. Unmatched
    /// feedback is still kept as a generic interaction log.
    pub matched: bool,
}

/// External collaborators and repositories the engine is wired with.
pub struct EngineDeps {
    pub ratings: Arc<dyn RatingHistoryReader>,
    pub metadata: Arc<dyn ItemMetadataReader>,
    pub candidates: Arc<dyn CandidateSource>,
    pub weights: Arc<dyn FeatureWeightRepository>,
    pub contributions: Arc<dyn ContributionRepository>,
    pub experiments: Arc<dyn ExperimentRepository>,
    pub metrics: Arc<dyn MetricsRepository>,
}

pub struct RecommendationEngine {
    config: Config,
    ratings: Arc<dyn RatingHistoryReader>,
    metadata: Arc<dyn ItemMetadataReader>,
    candidates: Arc<dyn CandidateSource>,
    metrics: Arc<dyn MetricsRepository>,
    feature_store: Arc<FeatureStore>,
    embeddings: Arc<EmbeddingStore>,
    predictor: Arc<SequencePredictor>,
    ranker: CandidateRanker,
    reranker: DiversityReranker,
    bandit: Arc<BanditArmSelector>,
    explainer: ExplanationGenerator,
}

impl RecommendationEngine {
    pub fn new(config: Config, deps: EngineDeps, embeddings: Arc<EmbeddingStore>) -> Self {
        let feature_store = Arc::new(FeatureStore::new(
            deps.weights,
            deps.contributions,
            config.ranking.learning_rate,
        ));
        let predictor = Arc::new(SequencePredictor::from_config(config.sequence.clone()));
        let ranker = CandidateRanker::new(
            feature_store.clone(),
            embeddings.clone(),
            config.ranking.clone(),
        );
        let reranker = DiversityReranker::new(config.diversity.skip_threshold);
        let bandit = Arc::new(BanditArmSelector::new(
            deps.experiments,
            config.bandit.exploration_rate,
            config.bandit.experiment_type.clone(),
        ));

        Self {
            config,
            ratings: deps.ratings,
            metadata: deps.metadata,
            candidates: deps.candidates,
            metrics: deps.metrics,
            feature_store,
            embeddings,
            predictor,
            ranker,
            reranker,
            bandit,
            explainer: ExplanationGenerator::new(),
        }
    }

    /// Handle to the sequence predictor, e.g. for swapping in a retrained
    /// model.
    pub fn predictor(&self) -> Arc<SequencePredictor> {
        self.predictor.clone()
    }

    /// Handle to the embedding store, for batch vector loads.
    pub fn embeddings(&self) -> Arc<EmbeddingStore> {
        self.embeddings.clone()
    }

    /// Predict the user's next viewing action. Never fails; short histories
    /// get the documented defaults.
    pub async fn predict_next_action(&self, user_id: Uuid) -> PatternPrediction {
        let history = self.enriched_history(user_id).await;
        self.predictor.predict_next(user_id, &history).await
    }

    /// Aggregate viewing-habit report for a user.
    pub async fn analyze_patterns(&self, user_id: Uuid) -> PatternAnalysis {
        let history = self.enriched_history(user_id).await;
        self.predictor.analyze(user_id, &history).await
    }

    /// Session-aware hints: which genres to surface next and with what
    /// confidence.
    pub async fn get_session_recommendations(
        &self,
        user_id: Uuid,
        _session_context: serde_json::Value,
    ) -> SessionRecommendations {
        let history = self.enriched_history(user_id).await;
        let prediction = self.predictor.predict_next(user_id, &history).await;
        let analysis = self.predictor.analyze(user_id, &history).await;

        // Lead with the predicted next genre, then the stable preferences.
        let mut recommended_genres = vec![prediction.next_genre_id];
        for genre in analysis.preferred_genres {
            if !recommended_genres.contains(&genre) && recommended_genres.len() < 3 {
                recommended_genres.push(genre);
            }
        }

        SessionRecommendations {
            recommended_genres,
            predicted_rating: prediction.next_rating,
            session_type: prediction.session_type,
            confidence: prediction.probability,
        }
    }

    /// Generate a ranked, diversity-adjusted recommendation list.
    ///
    /// The pipeline is pure function composition once inputs are fetched;
    /// all persistence along the way is detached and best-effort.
    pub async fn generate_recommendations(
        &self,
        user_id: Uuid,
        context: serde_json::Value,
        options: RecommendationOptions,
    ) -> Vec<Recommendation> {
        let limit = options.limit.max(1);
        let diversity_level = options
            .diversity_level
            .unwrap_or(self.config.diversity.default_level)
            .clamp(0.0, 1.0);

        // 1. Strategy selection.
        let experiment = self.bandit.select_arm(user_id, context).await;
        let strategy = experiment.arm_chosen;

        // 2. Candidate generation under the chosen strategy.
        let refs = match self
            .candidates
            .candidates(user_id, strategy, self.config.ranking.candidate_limit)
            .await
        {
            Ok(refs) => refs,
            Err(e) => {
                warn!(%user_id, error = %e, "candidate source failed, returning empty list");
                return Vec::new();
            }
        };

        let history = self.enriched_history(user_id).await;
        let seen: HashSet<(u64, MediaType)> = history
            .iter()
            .map(|r| (r.event.item_id, r.event.media_type))
            .collect();

        let unseen: Vec<CandidateRef> = refs
            .into_iter()
            .filter(|c| !seen.contains(&(c.item_id, c.media_type)))
            .collect();
        let fetched =
            join_all(unseen.iter().map(|&c| self.metadata.get_item_metadata(c))).await;

        let mut items: Vec<ItemMetadata> = Vec::with_capacity(unseen.len());
        for (candidate, result) in unseen.iter().zip(fetched) {
            match result {
                Ok(Some(metadata)) => items.push(metadata),
                Ok(None) => {}
                Err(e) => {
                    warn!(item_id = candidate.item_id, error = %e, "metadata fetch failed, candidate skipped");
                }
            }
        }

        // 3. Scoring.
        let preferred = self.preferred_genres(&history);
        let scored = self
            .ranker
            .score_candidates(user_id, &items, &preferred, strategy)
            .await;

        // 4. Diversity reranking.
        let selected = self.reranker.rerank(scored, limit, diversity_level);
        let item_diversity = self.reranker.per_item_diversity(&selected);

        // 5. Observability + contribution log, detached from the response.
        self.spawn_batch_writes(user_id, &selected, experiment.id);

        info!(
            %user_id,
            strategy = strategy.as_str(),
            experiment_id = %experiment.id,
            returned = selected.len(),
            diversity_level,
            "recommendations generated"
        );

        selected
            .iter()
            .zip(item_diversity)
            .map(|(candidate, diversity_score)| Recommendation {
                item_id: candidate.item.item_id,
                media_type: candidate.item.media_type,
                score: candidate.score,
                diversity_score,
                strategy,
                reasons: if options.explainability {
                    self.explainer.reasons(&candidate.contributions)
                } else {
                    Vec::new()
                },
                experiment_id: experiment.id,
            })
            .collect()
    }

    /// Record recommendation feedback. Always acknowledges; an unknown
    /// correlation id degrades to a generic interaction log.
    pub async fn record_interaction_feedback(
        &self,
        correlation_id: Uuid,
        outcome: OutcomeType,
    ) -> FeedbackAck {
        let matched = match self.bandit.update_reward(correlation_id, outcome).await {
            Some(experiment) => {
                let feature_store = self.feature_store.clone();
                let features = experiment.arm_chosen.features();
                let user_id = experiment.user_id;
                tokio::spawn(async move {
                    feature_store
                        .apply_outcome(user_id, features, outcome.is_success())
                        .await;
                    feature_store
                        .resolve_contributions(correlation_id, outcome)
                        .await;
                });
                self.predictor.invalidate(user_id).await;
                true
            }
            None => false,
        };

        FeedbackAck {
            correlation_id,
            matched,
        }
    }

    /// Explain why an item would be recommended to a user right now, from
    /// the same feature contributions the ranker produces.
    pub async fn explain(
        &self,
        user_id: Uuid,
        item_id: u64,
        media_type: MediaType,
    ) -> Explanation {
        let item = CandidateRef { item_id, media_type };
        let metadata = match self.metadata.get_item_metadata(item).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) | Err(_) => {
                warn!(%user_id, item_id, "no metadata for explanation, returning generic attribution");
                return self.explainer.explain(&[], None);
            }
        };

        let history = self.enriched_history(user_id).await;
        let preferred = self.preferred_genres(&history);
        let context = serde_json::json!({});
        let strategy = self.bandit.preview_best_arm(user_id, &context);

        let scored = self
            .ranker
            .score_candidates(user_id, std::slice::from_ref(&metadata), &preferred, strategy)
            .await;

        let arm_reward = self.bandit.estimated_reward(user_id, &context, strategy);
        match scored.first() {
            Some(candidate) => self
                .explainer
                .explain(&candidate.contributions, Some(arm_reward)),
            None => self.explainer.explain(&[], Some(arm_reward)),
        }
    }

    /// Rating history joined with item genres. Any storage failure degrades
    /// to an empty history, which downstream resolves with defaults.
    async fn enriched_history(&self, user_id: Uuid) -> Vec<EnrichedRating> {
        let events = match self.ratings.get_ratings(user_id).await {
            Ok(events) => events,
            Err(e) => {
                warn!(%user_id, error = %e, "rating history unavailable, treating as empty");
                return Vec::new();
            }
        };

        let lookups = join_all(events.iter().map(|event| {
            self.metadata.get_item_metadata(CandidateRef {
                item_id: event.item_id,
                media_type: event.media_type,
            })
        }))
        .await;

        events
            .into_iter()
            .zip(lookups)
            .map(|(event, result)| {
                let genres = match result {
                    Ok(Some(metadata)) => metadata.genres,
                    _ => Vec::new(),
                };
                EnrichedRating { event, genres }
            })
            .collect()
    }

    fn preferred_genres(&self, history: &[EnrichedRating]) -> HashSet<u32> {
        let affinity = self.predictor.genre_affinity(history);
        let mut ranked: Vec<(u32, f64)> = self
            .config
            .sequence
            .genre_vocab
            .iter()
            .zip(affinity.iter())
            .filter(|(_, &a)| a > 0.0)
            .map(|(&g, &a)| (g, a))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.into_iter().take(5).map(|(g, _)| g).collect()
    }

    fn spawn_batch_writes(
        &self,
        user_id: Uuid,
        selected: &[crate::services::ScoredCandidate],
        experiment_id: Uuid,
    ) {
        let metrics_repo = self.metrics.clone();
        let feature_store = self.feature_store.clone();
        let diversity_metrics = self
            .reranker
            .metrics(selected, self.config.sequence.genre_vocab.len());
        let exploration_rate = self.config.bandit.exploration_rate;
        let count = selected.len() as u32;

        let contribution_rows: Vec<FeatureContribution> = selected
            .iter()
            .flat_map(|candidate| {
                candidate
                    .contributions
                    .iter()
                    .map(move |&(feature, contribution)| FeatureContribution {
                        recommendation_id: experiment_id,
                        user_id,
                        feature,
                        contribution_score: contribution,
                        feature_value: candidate.features.value(feature),
                        outcome: None,
                        created_at: Utc::now(),
                    })
            })
            .collect();

        tokio::spawn(async move {
            feature_store.record_contributions(contribution_rows).await;
            let snapshot = DiversityMetricsSnapshot {
                user_id,
                session_id: None,
                recommendation_type: "personalized".to_string(),
                intra_diversity: diversity_metrics.intra_diversity,
                genre_balance: diversity_metrics.genre_balance,
                serendipity_score: diversity_metrics.serendipity_score,
                exploration_rate,
                coverage_score: diversity_metrics.coverage_score,
                recommendation_count: count,
            };
            if let Err(e) = metrics_repo.record(snapshot).await {
                warn!(error = %e, "diversity metrics snapshot dropped");
            }
        });
    }
}
