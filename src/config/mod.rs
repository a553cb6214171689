use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub sequence: SequenceConfig,
    pub bandit: BanditConfig,
    pub ranking: RankingConfig,
    pub diversity: DiversityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SequenceConfig {
    /// Window length fed to the sequence model.
    pub sequence_length: usize,
    /// Rating scale used for normalization (ratings divided by this).
    pub rating_scale: f64,
    /// Fixed genre vocabulary the genre head predicts over.
    pub genre_vocab: Vec<u32>,
    /// Genre returned when history is too short to predict.
    pub default_genre_id: u32,
    /// Optional path to a trained ONNX sequence model artifact.
    pub model_path: Option<String>,
    /// Average inter-rating gap (minutes) below which a run of ratings
    /// counts as a binge session.
    pub binge_gap_minutes: f64,
    /// Minimum observed gaps before the binge heuristic applies.
    pub binge_min_gaps: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BanditConfig {
    /// Probability of picking a uniformly random arm.
    pub exploration_rate: f64,
    pub experiment_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RankingConfig {
    /// Learning rate applied to online feature-weight updates.
    pub learning_rate: f64,
    /// Half-life in days for the recency feature.
    pub recency_half_life_days: f64,
    /// Vote count at which log-scaled popularity saturates.
    pub popularity_vote_ceiling: u64,
    /// Candidates fetched per request before ranking.
    pub candidate_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiversityConfig {
    /// Default diversity level when the caller does not supply one.
    pub default_level: f64,
    /// Below this level diversity reranking is skipped entirely.
    pub skip_threshold: f64,
}

/// TMDB-style genre id vocabulary shared by movies and tv.
const DEFAULT_GENRE_VOCAB: [u32; 19] = [
    28, 12, 16, 35, 80, 99, 18, 10751, 14, 36, 27, 10402, 9648, 10749, 878, 10770, 53, 10752, 37,
];

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Config {
            sequence: SequenceConfig {
                sequence_length: env_parse("SEQUENCE_LENGTH", 10),
                rating_scale: env_parse("RATING_SCALE", 10.0),
                genre_vocab: DEFAULT_GENRE_VOCAB.to_vec(),
                default_genre_id: env_parse("DEFAULT_GENRE_ID", 18), // drama
                model_path: env::var("SEQUENCE_MODEL_PATH").ok(),
                binge_gap_minutes: env_parse("BINGE_GAP_MINUTES", 60.0),
                binge_min_gaps: env_parse("BINGE_MIN_GAPS", 5),
            },
            bandit: BanditConfig {
                exploration_rate: env_parse("BANDIT_EXPLORATION_RATE", 0.1),
                experiment_type: env::var("BANDIT_EXPERIMENT_TYPE")
                    .unwrap_or_else(|_| "strategy_selection".to_string()),
            },
            ranking: RankingConfig {
                learning_rate: env_parse("FEATURE_LEARNING_RATE", 0.1),
                recency_half_life_days: env_parse("RECENCY_HALF_LIFE_DAYS", 180.0),
                popularity_vote_ceiling: env_parse("POPULARITY_VOTE_CEILING", 100_000),
                candidate_limit: env_parse("CANDIDATE_LIMIT", 100),
            },
            diversity: DiversityConfig {
                default_level: env_parse("DIVERSITY_DEFAULT_LEVEL", 0.3),
                skip_threshold: env_parse("DIVERSITY_SKIP_THRESHOLD", 0.2),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sequence: SequenceConfig {
                sequence_length: 10,
                rating_scale: 10.0,
                genre_vocab: DEFAULT_GENRE_VOCAB.to_vec(),
                default_genre_id: 18,
                model_path: None,
                binge_gap_minutes: 60.0,
                binge_min_gaps: 5,
            },
            bandit: BanditConfig {
                exploration_rate: 0.1,
                experiment_type: "strategy_selection".to_string(),
            },
            ranking: RankingConfig {
                learning_rate: 0.1,
                recency_half_life_days: 180.0,
                popularity_vote_ceiling: 100_000,
                candidate_limit: 100,
            },
            diversity: DiversityConfig {
                default_level: 0.3,
                skip_threshold: 0.2,
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sequence.sequence_length, 10);
        assert_eq!(config.sequence.genre_vocab.len(), 19);
        assert!(config.bandit.exploration_rate > 0.0);
        assert!(config.diversity.skip_threshold < config.diversity.default_level + 1.0);
    }
}
