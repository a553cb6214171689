use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Media kind for catalog items. The engine treats item ids as opaque keys
/// scoped by media type (movie ids and tv ids can collide).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Tv => "tv",
        }
    }
}

/// Recommendation strategy selectable by the bandit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Embedding,
    Collaborative,
    ContentBased,
    Trending,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::Embedding,
        Strategy::Collaborative,
        Strategy::ContentBased,
        Strategy::Trending,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Embedding => "embedding",
            Strategy::Collaborative => "collaborative",
            Strategy::ContentBased => "content_based",
            Strategy::Trending => "trending",
        }
    }

    /// Scoring features implicated by this strategy. These are the features
    /// the ranker combines when the arm is chosen, and the ones credited or
    /// penalized when its reward arrives.
    pub fn features(&self) -> &'static [Feature] {
        match self {
            Strategy::Embedding => &[
                Feature::EmbeddingSimilarity,
                Feature::GenreMatch,
                Feature::Recency,
            ],
            Strategy::Collaborative => &[
                Feature::EmbeddingSimilarity,
                Feature::Popularity,
                Feature::Recency,
            ],
            Strategy::ContentBased => &[
                Feature::GenreMatch,
                Feature::Recency,
                Feature::Popularity,
            ],
            Strategy::Trending => &[Feature::Popularity, Feature::Recency],
        }
    }
}

/// Scoring features used by the ranker. Weights for each are learned online
/// per user with a global fallback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    EmbeddingSimilarity,
    GenreMatch,
    Popularity,
    Recency,
}

impl Feature {
    pub const ALL: [Feature; 4] = [
        Feature::EmbeddingSimilarity,
        Feature::GenreMatch,
        Feature::Popularity,
        Feature::Recency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::EmbeddingSimilarity => "embedding_similarity",
            Feature::GenreMatch => "genre_match",
            Feature::Popularity => "popularity",
            Feature::Recency => "recency",
        }
    }

    /// Human-readable label for explanation surfaces.
    pub fn label(&self) -> &'static str {
        match self {
            Feature::EmbeddingSimilarity => "similar to titles you enjoyed",
            Feature::GenreMatch => "matches your favorite genres",
            Feature::Popularity => "popular with other viewers",
            Feature::Recency => "recently released",
        }
    }
}

/// Scope of a learned feature weight: one per user, plus a global aggregate
/// that per-user lookups fall back to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WeightScope {
    Global,
    User(Uuid),
}

/// Learned scalar weight for one `(scope, feature)` pair.
///
/// Mutated only by the online update rule; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureWeight {
    pub scope: WeightScope,
    pub feature: Feature,
    pub weight: f64,
    pub success_count: u32,
    pub total_count: u32,
    pub learning_rate: f64,
}

impl FeatureWeight {
    pub const DEFAULT_WEIGHT: f64 = 0.5;

    pub fn new(scope: WeightScope, feature: Feature, learning_rate: f64) -> Self {
        Self {
            scope,
            feature,
            weight: Self::DEFAULT_WEIGHT,
            success_count: 0,
            total_count: 0,
            learning_rate,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_count > 0 {
            self.success_count as f64 / self.total_count as f64
        } else {
            0.0
        }
    }
}

/// Outcome of a recommendation, reported back by the surrounding app.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeType {
    Liked,
    Disliked,
    Watched,
    RatedHighly,
    Dismissed,
}

impl OutcomeType {
    /// Map an outcome to a bandit reward in [0, 1].
    pub fn reward(&self) -> f64 {
        match self {
            OutcomeType::Liked | OutcomeType::RatedHighly => 1.0,
            OutcomeType::Watched => 0.7,
            OutcomeType::Disliked | OutcomeType::Dismissed => 0.0,
        }
    }

    /// Whether this outcome counts as a success for feature-weight learning.
    pub fn is_success(&self) -> bool {
        self.reward() >= 0.5
    }
}

/// Immutable attribution record created at recommendation-generation time.
/// `outcome` is filled in exactly once when feedback arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub recommendation_id: Uuid,
    pub user_id: Uuid,
    pub feature: Feature,
    /// Normalized share of the final score, in [0, 1]; sums to 1 across the
    /// features of one recommendation.
    pub contribution_score: f64,
    /// Raw normalized feature value before weighting.
    pub feature_value: f64,
    pub outcome: Option<OutcomeType>,
    pub created_at: DateTime<Utc>,
}

/// Subject of a dense embedding vector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    User,
    Item,
}

/// Two-tower style embedding produced by an offline job; read-only at
/// serving time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub subject_id: String,
    pub subject_kind: SubjectKind,
    pub vector: Vec<f32>,
    pub version: u32,
}

/// One rating event from the user's history (external reader contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingEvent {
    pub item_id: u64,
    pub media_type: MediaType,
    /// Raw rating on the app's 0-10 scale.
    pub rating: f64,
    pub timestamp: DateTime<Utc>,
}

/// Catalog metadata for an item (external reader contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub item_id: u64,
    pub media_type: MediaType,
    pub title: String,
    pub genres: Vec<u32>,
    pub vote_average: f64,
    pub vote_count: u64,
    pub release_date: Option<NaiveDate>,
}

/// A candidate item before ranking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CandidateRef {
    pub item_id: u64,
    pub media_type: MediaType,
}

/// Coarse classification of current viewing behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Binge,
    Casual,
    Explorer,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Binge => "binge",
            SessionType::Casual => "casual",
            SessionType::Explorer => "explorer",
        }
    }
}

/// Ephemeral per-request output of the sequence model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternPrediction {
    pub user_id: Uuid,
    pub next_genre_id: u32,
    /// Predicted next rating on [0, 10].
    pub next_rating: f64,
    /// Confidence of the genre prediction, in [0, 1].
    pub probability: f64,
    pub session_type: SessionType,
}

/// Aggregate view of a user's viewing habits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternAnalysis {
    pub user_id: Uuid,
    pub binge_watcher: bool,
    /// Top genres by recency-weighted frequency, most preferred first.
    pub preferred_genres: Vec<u32>,
    /// Mean rating scaled back to [0, 10].
    pub avg_rating: f64,
    pub predicted_next_genre: u32,
}

/// Bandit audit record; one row per arm selection, reward set exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditExperiment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub experiment_type: String,
    pub arm_chosen: Strategy,
    pub reward: Option<f64>,
    pub context: serde_json::Value,
    pub exploration_rate: f64,
    pub created_at: DateTime<Utc>,
}

/// Write-once observability snapshot for one recommendation batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiversityMetricsSnapshot {
    pub user_id: Uuid,
    pub session_id: Option<String>,
    pub recommendation_type: String,
    /// Average pairwise genre dissimilarity of the final set.
    pub intra_diversity: f64,
    /// Shannon entropy of the genre distribution, normalized to [0, 1].
    pub genre_balance: f64,
    pub serendipity_score: f64,
    pub exploration_rate: f64,
    /// Distinct genres present / genre vocabulary size.
    pub coverage_score: f64,
    pub recommendation_count: u32,
}

/// A single ranked recommendation returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub item_id: u64,
    pub media_type: MediaType,
    pub score: f64,
    pub diversity_score: f64,
    pub strategy: Strategy,
    pub reasons: Vec<String>,
    pub experiment_id: Uuid,
}
