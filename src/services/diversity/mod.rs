// ============================================
// Diversity Reranking
// ============================================
//
// MMR-style greedy reranking of a score-ordered candidate list, trading
// relevance against topical (genre) diversity under a caller-supplied
// diversity level. Also computes the observability metrics for each final
// batch; the metrics never feed back into the ranking decision.

use crate::services::ranking::ScoredCandidate;
use crate::utils::normalized_entropy;
use std::collections::{HashMap, HashSet};

/// Batch-level diversity metrics (observability only).
#[derive(Debug, Clone, Default)]
pub struct DiversityMetrics {
    /// Average pairwise genre dissimilarity of the final set.
    pub intra_diversity: f64,
    /// Normalized Shannon entropy of the genre distribution.
    pub genre_balance: f64,
    /// Distinct genres present / genre vocabulary size.
    pub coverage_score: f64,
    /// Mean unexpectedness (1 - popularity) of the final set.
    pub serendipity_score: f64,
}

pub struct DiversityReranker {
    /// Below this diversity level the reranking pass is skipped entirely.
    skip_threshold: f64,
}

impl DiversityReranker {
    pub fn new(skip_threshold: f64) -> Self {
        Self { skip_threshold }
    }

    /// Select the final top-k list.
    ///
    /// `diversity_level` 0 keeps pure relevance order; 1 is maximum
    /// diversity. Greedy MMR: repeatedly pick the item maximizing
    /// `lambda * relevance + (1 - lambda) * min_dissimilarity(item, selected)`
    /// with `lambda = 1 - diversity_level`.
    pub fn rerank(
        &self,
        candidates: Vec<ScoredCandidate>,
        top_k: usize,
        diversity_level: f64,
    ) -> Vec<ScoredCandidate> {
        let diversity_level = diversity_level.clamp(0.0, 1.0);
        if candidates.is_empty() || top_k == 0 {
            return Vec::new();
        }

        if diversity_level < self.skip_threshold {
            let mut out = candidates;
            out.truncate(top_k);
            return out;
        }

        let lambda = 1.0 - diversity_level;
        let mut selected: Vec<ScoredCandidate> = Vec::with_capacity(top_k);
        let mut remaining = candidates;

        while selected.len() < top_k && !remaining.is_empty() {
            let mut best_idx = 0;
            let mut best_mmr = f64::MIN;

            for (i, candidate) in remaining.iter().enumerate() {
                let min_dissimilarity = selected
                    .iter()
                    .map(|s| dissimilarity(&candidate.genres, &s.genres))
                    .fold(1.0_f64, f64::min);

                let mmr = lambda * candidate.score + (1.0 - lambda) * min_dissimilarity;
                if mmr > best_mmr {
                    best_mmr = mmr;
                    best_idx = i;
                }
            }

            selected.push(remaining.remove(best_idx));
        }

        selected
    }

    /// Per-item diversity: each item's average dissimilarity to the rest of
    /// the final set. A single item scores 1.0.
    pub fn per_item_diversity(&self, selected: &[ScoredCandidate]) -> Vec<f64> {
        if selected.len() <= 1 {
            return vec![1.0; selected.len()];
        }
        selected
            .iter()
            .enumerate()
            .map(|(i, candidate)| {
                let sum: f64 = selected
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, other)| dissimilarity(&candidate.genres, &other.genres))
                    .sum();
                sum / (selected.len() - 1) as f64
            })
            .collect()
    }

    /// Metrics over the final set.
    pub fn metrics(&self, selected: &[ScoredCandidate], genre_vocab_size: usize) -> DiversityMetrics {
        if selected.is_empty() {
            return DiversityMetrics::default();
        }

        // Average pairwise dissimilarity.
        let mut pair_sum = 0.0;
        let mut pairs = 0usize;
        for i in 0..selected.len() {
            for j in (i + 1)..selected.len() {
                pair_sum += dissimilarity(&selected[i].genres, &selected[j].genres);
                pairs += 1;
            }
        }
        let intra_diversity = if pairs > 0 { pair_sum / pairs as f64 } else { 0.0 };

        // Genre distribution entropy.
        let mut genre_counts: HashMap<u32, usize> = HashMap::new();
        for candidate in selected {
            for &genre in &candidate.genres {
                *genre_counts.entry(genre).or_insert(0) += 1;
            }
        }
        let counts: Vec<usize> = genre_counts.values().copied().collect();
        let genre_balance = normalized_entropy(&counts);

        let coverage_score = if genre_vocab_size > 0 {
            genre_counts.len() as f64 / genre_vocab_size as f64
        } else {
            0.0
        };

        let serendipity_score = selected
            .iter()
            .map(|c| 1.0 - c.features.popularity)
            .sum::<f64>()
            / selected.len() as f64;

        DiversityMetrics {
            intra_diversity,
            genre_balance,
            coverage_score,
            serendipity_score,
        }
    }
}

/// 1 - genre overlap ratio (Jaccard). Two items with no genres at all are
/// treated as identical.
fn dissimilarity(a: &[u32], b: &[u32]) -> f64 {
    let set_a: HashSet<u32> = a.iter().copied().collect();
    let set_b: HashSet<u32> = b.iter().copied().collect();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    1.0 - intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateRef, MediaType};
    use crate::services::ranking::CandidateFeatures;

    fn candidate(id: u64, score: f64, genres: Vec<u32>) -> ScoredCandidate {
        ScoredCandidate {
            item: CandidateRef {
                item_id: id,
                media_type: MediaType::Movie,
            },
            genres,
            score,
            features: CandidateFeatures::default(),
            contributions: Vec::new(),
        }
    }

    fn pool() -> Vec<ScoredCandidate> {
        vec![
            candidate(1, 0.95, vec![18]),
            candidate(2, 0.90, vec![18]),
            candidate(3, 0.85, vec![18]),
            candidate(4, 0.60, vec![35]),
            candidate(5, 0.55, vec![27, 53]),
            candidate(6, 0.50, vec![878]),
        ]
    }

    #[test]
    fn test_low_level_keeps_relevance_order() {
        let reranker = DiversityReranker::new(0.2);
        let out = reranker.rerank(pool(), 4, 0.0);
        let ids: Vec<u64> = out.iter().map(|c| c.item.item_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_full_count_and_no_duplicates() {
        let reranker = DiversityReranker::new(0.2);
        for level in [0.0, 0.3, 0.7, 1.0] {
            let out = reranker.rerank(pool(), 4, level);
            assert_eq!(out.len(), 4, "level {}", level);
            let ids: HashSet<u64> = out.iter().map(|c| c.item.item_id).collect();
            assert_eq!(ids.len(), 4, "duplicates at level {}", level);
        }
    }

    #[test]
    fn test_high_diversity_beats_pure_relevance() {
        let reranker = DiversityReranker::new(0.2);

        let relevant = reranker.rerank(pool(), 4, 0.0);
        let diverse = reranker.rerank(pool(), 4, 1.0);

        let m_rel = reranker.metrics(&relevant, 19);
        let m_div = reranker.metrics(&diverse, 19);
        assert!(m_div.intra_diversity >= m_rel.intra_diversity);
    }

    #[test]
    fn test_rerank_deterministic() {
        let reranker = DiversityReranker::new(0.2);
        let a = reranker.rerank(pool(), 5, 0.8);
        let b = reranker.rerank(pool(), 5, 0.8);
        let ids_a: Vec<u64> = a.iter().map(|c| c.item.item_id).collect();
        let ids_b: Vec<u64> = b.iter().map(|c| c.item.item_id).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_genre_balance_zero_for_single_genre() {
        let reranker = DiversityReranker::new(0.2);
        let uniform = vec![
            candidate(1, 0.9, vec![18]),
            candidate(2, 0.8, vec![18]),
            candidate(3, 0.7, vec![18]),
        ];
        let m = reranker.metrics(&uniform, 19);
        assert_eq!(m.genre_balance, 0.0);

        // More genre variety at the same set size raises the balance.
        let varied = vec![
            candidate(1, 0.9, vec![18]),
            candidate(2, 0.8, vec![35]),
            candidate(3, 0.7, vec![27]),
        ];
        let m_varied = reranker.metrics(&varied, 19);
        assert!(m_varied.genre_balance > m.genre_balance);
        assert!((m_varied.coverage_score - 3.0 / 19.0).abs() < 1e-9);
    }

    #[test]
    fn test_requesting_more_than_available() {
        let reranker = DiversityReranker::new(0.2);
        let out = reranker.rerank(pool(), 50, 0.9);
        assert_eq!(out.len(), 6);
    }
}
