pub mod config;
pub mod engine;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use config::Config;
pub use engine::{EngineDeps, FeedbackAck, RecommendationEngine, RecommendationOptions, SessionRecommendations};
pub use services::{
    BanditArmSelector, CandidateRanker, DiversityReranker, EmbeddingStore, ExplanationGenerator,
    FeatureStore, SequencePredictor,
};

/// Initialize tracing for binaries and examples embedding the engine.
/// Filter via `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();
}
