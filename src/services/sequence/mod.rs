// ============================================
// Sequence Prediction Module
// ============================================
//
// Predicts a user's near-term viewing pattern from their ordered rating
// history:
// 1. Next-genre distribution over a fixed vocabulary
// 2. Next-rating estimate on [0, 10]
// 3. Session-type classification (binge / casual / explorer)
//
// A user with too little history always gets a documented default
// prediction; prediction never fails for lack of data or a missing
// model artifact.

pub mod model;
pub mod windows;

pub use model::{ModelInput, ModelOutput, SequenceModel};
pub use windows::{build_window, gap_stats, is_binge};

use crate::config::SequenceConfig;
use crate::models::{PatternAnalysis, PatternPrediction, RatingEvent, SessionType};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("invalid window: {0}")]
    InvalidWindow(String),

    #[error("inference failed: {0}")]
    Inference(String),
}

pub type Result<T> = std::result::Result<T, SequenceError>;

/// A rating event joined with the item's genres from catalog metadata.
#[derive(Debug, Clone)]
pub struct EnrichedRating {
    pub event: RatingEvent,
    pub genres: Vec<u32>,
}

struct CachedPrediction {
    prediction: PatternPrediction,
    cached_at: Instant,
}

/// Serving-side predictor: owns the model handle (swapped atomically on
/// retrain) and a short-lived per-user prediction cache.
pub struct SequencePredictor {
    model: RwLock<Arc<SequenceModel>>,
    config: SequenceConfig,
    cache: RwLock<HashMap<Uuid, CachedPrediction>>,
    cache_ttl_secs: u64,
}

impl SequencePredictor {
    pub fn new(model: SequenceModel, config: SequenceConfig) -> Self {
        Self {
            model: RwLock::new(Arc::new(model)),
            config,
            cache: RwLock::new(HashMap::new()),
            cache_ttl_secs: 60,
        }
    }

    /// Build a predictor from config alone, loading the artifact when a path
    /// is configured and falling back to the heuristic forward pass.
    pub fn from_config(config: SequenceConfig) -> Self {
        let model = match &config.model_path {
            Some(path) => SequenceModel::load(
                path,
                config.sequence_length,
                config.genre_vocab.len(),
                config.rating_scale,
                config.binge_gap_minutes,
                config.binge_min_gaps,
            ),
            None => SequenceModel::heuristic(
                config.sequence_length,
                config.genre_vocab.len(),
                config.rating_scale,
                config.binge_gap_minutes,
                config.binge_min_gaps,
            ),
        };
        Self::new(model, config)
    }

    /// Swap in a freshly trained model; in-flight predictions keep the old
    /// handle until they finish.
    pub async fn reload(&self, model: SequenceModel) {
        *self.model.write().await = Arc::new(model);
        self.cache.write().await.clear();
    }

    /// Predict the user's next viewing action. Users with fewer than
    /// `sequence_length + 1` ratings get the default prediction.
    pub async fn predict_next(
        &self,
        user_id: Uuid,
        history: &[EnrichedRating],
    ) -> PatternPrediction {
        if let Some(cached) = self.cached(user_id).await {
            return cached;
        }

        let prediction = if history.len() < self.config.sequence_length + 1 {
            debug!(%user_id, ratings = history.len(), "insufficient history, default prediction");
            self.default_prediction(user_id)
        } else {
            self.run_model(user_id, history).await
        };

        self.cache_prediction(user_id, prediction.clone()).await;
        prediction
    }

    /// Aggregate the user's full windowed history into a habits report.
    pub async fn analyze(&self, user_id: Uuid, history: &[EnrichedRating]) -> PatternAnalysis {
        let timestamps: Vec<DateTime<Utc>> =
            history.iter().map(|r| r.event.timestamp).collect();
        let binge_watcher = is_binge(
            &timestamps,
            self.config.binge_gap_minutes,
            self.config.binge_min_gaps,
        );

        let affinity = self.genre_affinity(history);
        let mut ranked: Vec<(u32, f64)> = self
            .config
            .genre_vocab
            .iter()
            .zip(affinity.iter())
            .filter(|(_, &a)| a > 0.0)
            .map(|(&g, &a)| (g, a))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let preferred_genres: Vec<u32> = ranked.into_iter().take(5).map(|(g, _)| g).collect();

        let avg_rating = if history.is_empty() {
            0.0
        } else {
            let mean_normalized: f64 = history
                .iter()
                .map(|r| (r.event.rating / self.config.rating_scale).clamp(0.0, 1.0))
                .sum::<f64>()
                / history.len() as f64;
            mean_normalized * self.config.rating_scale
        };

        let predicted_next_genre = self.predict_next(user_id, history).await.next_genre_id;

        PatternAnalysis {
            user_id,
            binge_watcher,
            preferred_genres,
            avg_rating,
            predicted_next_genre,
        }
    }

    /// Training-label derivation for session type. The timing heuristic only
    /// ever distinguishes binge from casual; no explorer label is derived.
    pub fn derive_session_label(&self, timestamps: &[DateTime<Utc>]) -> SessionType {
        if is_binge(
            timestamps,
            self.config.binge_gap_minutes,
            self.config.binge_min_gaps,
        ) {
            SessionType::Binge
        } else {
            SessionType::Casual
        }
    }

    /// Recency-weighted genre counts aligned with the vocabulary. The newest
    /// rating carries the most weight; items rated poorly contribute less.
    pub fn genre_affinity(&self, history: &[EnrichedRating]) -> Vec<f64> {
        let mut affinity = vec![0.0; self.config.genre_vocab.len()];
        let index: HashMap<u32, usize> = self
            .config
            .genre_vocab
            .iter()
            .enumerate()
            .map(|(i, &g)| (g, i))
            .collect();

        let n = history.len();
        for (pos, rated) in history.iter().enumerate() {
            let recency = (pos + 1) as f64 / n as f64;
            let quality = (rated.event.rating / self.config.rating_scale).clamp(0.0, 1.0);
            for genre in &rated.genres {
                if let Some(&i) = index.get(genre) {
                    affinity[i] += recency * (0.5 + quality);
                }
            }
        }

        affinity
    }

    async fn run_model(&self, user_id: Uuid, history: &[EnrichedRating]) -> PatternPrediction {
        let events: Vec<RatingEvent> = history.iter().map(|r| r.event.clone()).collect();
        let timestamps: Vec<DateTime<Utc>> = events.iter().map(|e| e.timestamp).collect();
        let gap = gap_stats(&timestamps);

        let input = ModelInput {
            window: build_window(
                &events,
                self.config.sequence_length,
                self.config.rating_scale,
            ),
            genre_affinity: self.genre_affinity(history),
            avg_gap_minutes: gap.map(|(avg, _)| avg),
            gap_count: gap.map(|(_, n)| n).unwrap_or(0),
        };

        let model = self.model.read().await.clone();
        match model.predict(&input) {
            Ok(output) => {
                let (genre_idx, probability) = argmax(&output.genre_probs);
                let session_idx = argmax(&output.session_probs).0;
                PatternPrediction {
                    user_id,
                    next_genre_id: self
                        .config
                        .genre_vocab
                        .get(genre_idx)
                        .copied()
                        .unwrap_or(self.config.default_genre_id),
                    next_rating: output.rating,
                    probability,
                    session_type: match session_idx {
                        0 => SessionType::Binge,
                        2 => SessionType::Explorer,
                        _ => SessionType::Casual,
                    },
                }
            }
            Err(e) => {
                // Degraded model path: fall back to the documented defaults.
                tracing::warn!(%user_id, error = %e, "sequence inference failed, using defaults");
                self.default_prediction(user_id)
            }
        }
    }

    fn default_prediction(&self, user_id: Uuid) -> PatternPrediction {
        PatternPrediction {
            user_id,
            next_genre_id: self.config.default_genre_id,
            next_rating: 0.75 * self.config.rating_scale,
            probability: 0.5,
            session_type: SessionType::Casual,
        }
    }

    async fn cached(&self, user_id: Uuid) -> Option<PatternPrediction> {
        let cache = self.cache.read().await;
        cache.get(&user_id).and_then(|c| {
            if c.cached_at.elapsed().as_secs() < self.cache_ttl_secs {
                Some(c.prediction.clone())
            } else {
                None
            }
        })
    }

    async fn cache_prediction(&self, user_id: Uuid, prediction: PatternPrediction) {
        let mut cache = self.cache.write().await;
        cache.insert(
            user_id,
            CachedPrediction {
                prediction,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop the cached prediction after new feedback for a user arrives.
    pub async fn invalidate(&self, user_id: Uuid) {
        self.cache.write().await.remove(&user_id);
    }
}

fn argmax(values: &[f64]) -> (usize, f64) {
    let mut best = (0, f64::NEG_INFINITY);
    for (i, &v) in values.iter().enumerate() {
        if v > best.1 {
            best = (i, v);
        }
    }
    if best.1.is_finite() {
        best
    } else {
        (0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaType;
    use chrono::Duration;

    fn config() -> SequenceConfig {
        SequenceConfig {
            sequence_length: 10,
            rating_scale: 10.0,
            genre_vocab: vec![28, 35, 18, 27, 878],
            default_genre_id: 18,
            model_path: None,
            binge_gap_minutes: 60.0,
            binge_min_gaps: 5,
        }
    }

    fn predictor() -> SequencePredictor {
        SequencePredictor::from_config(config())
    }

    fn rated(genres: Vec<u32>, rating: f64, minutes_ago: i64) -> EnrichedRating {
        EnrichedRating {
            event: RatingEvent {
                item_id: 1,
                media_type: MediaType::Movie,
                rating,
                timestamp: Utc::now() - Duration::minutes(minutes_ago),
            },
            genres,
        }
    }

    #[tokio::test]
    async fn test_no_history_yields_default_prediction() {
        let predictor = predictor();
        let p = predictor.predict_next(Uuid::new_v4(), &[]).await;

        assert_eq!(p.next_genre_id, 18);
        assert!((p.next_rating - 7.5).abs() < 1e-9);
        assert!((p.probability - 0.5).abs() < 1e-9);
        assert_eq!(p.session_type, SessionType::Casual);
    }

    #[tokio::test]
    async fn test_short_history_yields_default_prediction() {
        let predictor = predictor();
        let history: Vec<EnrichedRating> =
            (0..5).map(|i| rated(vec![28], 8.0, 100 - i * 10)).collect();
        let p = predictor.predict_next(Uuid::new_v4(), &history).await;
        assert_eq!(p.session_type, SessionType::Casual);
        assert!((p.next_rating - 7.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_prediction_follows_dominant_genre() {
        let predictor = predictor();
        // 12 ratings, comedy-heavy and recent.
        let history: Vec<EnrichedRating> = (0..12)
            .map(|i| rated(vec![35], 9.0, (12 - i) * 200))
            .collect();
        let p = predictor.predict_next(Uuid::new_v4(), &history).await;

        assert_eq!(p.next_genre_id, 35);
        assert!(p.probability > 0.0 && p.probability <= 1.0);
        assert!((0.0..=10.0).contains(&p.next_rating));
    }

    #[tokio::test]
    async fn test_binge_session_detected() {
        let predictor = predictor();
        let history: Vec<EnrichedRating> = (0..12)
            .map(|i| rated(vec![18], 8.0, (12 - i) * 10))
            .collect();
        let p = predictor.predict_next(Uuid::new_v4(), &history).await;
        assert_eq!(p.session_type, SessionType::Binge);
    }

    #[tokio::test]
    async fn test_analyze_binge_watcher_scenarios() {
        let predictor = predictor();
        let user = Uuid::new_v4();

        // 8 ratings spaced 10 minutes apart.
        let tight: Vec<EnrichedRating> = (0..8)
            .map(|i| rated(vec![18], 7.0, (8 - i) * 10))
            .collect();
        let analysis = predictor.analyze(user, &tight).await;
        assert!(analysis.binge_watcher);

        // 8 ratings spaced 3 hours apart.
        let loose: Vec<EnrichedRating> = (0..8)
            .map(|i| rated(vec![18], 7.0, (8 - i) * 180))
            .collect();
        let analysis = predictor.analyze(Uuid::new_v4(), &loose).await;
        assert!(!analysis.binge_watcher);
    }

    #[tokio::test]
    async fn test_analyze_preferred_genres_and_avg_rating() {
        let predictor = predictor();
        let mut history = Vec::new();
        for i in 0..6 {
            history.push(rated(vec![27], 9.0, (20 - i) * 100));
        }
        history.push(rated(vec![878], 5.0, 100));

        let analysis = predictor.analyze(Uuid::new_v4(), &history).await;
        assert_eq!(analysis.preferred_genres.first(), Some(&27));
        let expected = (9.0 * 6.0 + 5.0) / 7.0;
        assert!((analysis.avg_rating - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_session_label_never_explorer() {
        let predictor = predictor();
        let base = Utc::now();
        for spacing in [5i64, 30, 90, 600] {
            let timestamps: Vec<DateTime<Utc>> = (0..10)
                .map(|i| base + Duration::minutes(i * spacing))
                .collect();
            let label = predictor.derive_session_label(&timestamps);
            assert_ne!(label, SessionType::Explorer);
        }
    }
}
