/// Ranking Module
///
/// Combines learned feature weights, two-tower embeddings and catalog
/// metadata into one relevance score per candidate, under the feature set of
/// the strategy the bandit chose.
///
/// # Workflow
/// 1. Extract normalized feature values per candidate
/// 2. Weight them with FeatureStore weights (user → global fallback)
/// 3. Renormalize per-feature contributions to sum to 1 for attribution
/// 4. Sort by score descending
pub mod scorer;

pub use scorer::{CandidateFeatures, CandidateRanker, ScoredCandidate};
