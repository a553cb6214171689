pub mod bandit;
pub mod diversity;
pub mod embeddings;
pub mod explanation;
pub mod features;
pub mod ranking;
pub mod sequence;

pub use bandit::BanditArmSelector;
pub use diversity::{DiversityMetrics, DiversityReranker};
pub use embeddings::EmbeddingStore;
pub use explanation::{Explanation, ExplanationFactor, ExplanationGenerator};
pub use features::FeatureStore;
pub use ranking::{CandidateRanker, ScoredCandidate};
pub use sequence::{EnrichedRating, SequenceModel, SequencePredictor};
