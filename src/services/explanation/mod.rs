// ============================================
// Explanation Generation
// ============================================
//
// Turns the feature contributions recorded at ranking time into a
// human-interpretable attribution: ranked contributing factors, a
// percentage breakdown for visualization, and a confidence score.
// Deterministic for a given contribution set; no randomness here.

use crate::models::Feature;
use serde::{Deserialize, Serialize};

/// One contributing factor, largest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplanationFactor {
    pub feature: Feature,
    pub text: String,
    /// Share of the final score, as a percentage.
    pub percent: f64,
}

/// Full explanation for one recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    /// Text of the largest contributing factor.
    pub primary_reason: String,
    pub factors: Vec<ExplanationFactor>,
    /// (label, percent) pairs suitable for a pie-chart style breakdown;
    /// percentages sum to ~100.
    pub breakdown: Vec<(String, f64)>,
    /// Max contribution percentage or the chosen arm's estimated reward,
    /// whichever is larger; in [0, 1].
    pub confidence: f64,
}

#[derive(Default)]
pub struct ExplanationGenerator;

impl ExplanationGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Build an explanation from normalized per-feature contribution scores.
    /// `arm_estimated_reward` is the bandit's current estimate for the
    /// strategy that produced the recommendation, when one applies.
    pub fn explain(
        &self,
        contributions: &[(Feature, f64)],
        arm_estimated_reward: Option<f64>,
    ) -> Explanation {
        let total: f64 = contributions.iter().map(|(_, c)| c.max(0.0)).sum();

        let mut factors: Vec<ExplanationFactor> = contributions
            .iter()
            .map(|&(feature, contribution)| {
                let share = if total > 0.0 {
                    contribution.max(0.0) / total
                } else {
                    1.0 / contributions.len().max(1) as f64
                };
                ExplanationFactor {
                    feature,
                    text: feature.label().to_string(),
                    percent: share * 100.0,
                }
            })
            .collect();

        factors.sort_by(|a, b| {
            b.percent
                .partial_cmp(&a.percent)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.feature.as_str().cmp(b.feature.as_str()))
        });

        let primary_reason = factors
            .first()
            .map(|f| f.text.clone())
            .unwrap_or_else(|| "popular with other viewers".to_string());

        let breakdown: Vec<(String, f64)> = factors
            .iter()
            .map(|f| (f.feature.as_str().to_string(), f.percent))
            .collect();

        let max_share = factors.first().map(|f| f.percent / 100.0).unwrap_or(0.0);
        let confidence = match arm_estimated_reward {
            Some(reward) => max_share.max(reward).clamp(0.0, 1.0),
            None => max_share.clamp(0.0, 1.0),
        };

        Explanation {
            primary_reason,
            factors,
            breakdown,
            confidence,
        }
    }

    /// Short reason strings attached to each recommendation when the caller
    /// asks for explainability (top two factors).
    pub fn reasons(&self, contributions: &[(Feature, f64)]) -> Vec<String> {
        let explanation = self.explain(contributions, None);
        explanation
            .factors
            .into_iter()
            .take(2)
            .filter(|f| f.percent > 0.0)
            .map(|f| f.text)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contributions() -> Vec<(Feature, f64)> {
        vec![
            (Feature::EmbeddingSimilarity, 0.5),
            (Feature::GenreMatch, 0.3),
            (Feature::Popularity, 0.15),
            (Feature::Recency, 0.05),
        ]
    }

    #[test]
    fn test_factors_ranked_and_sum_to_100() {
        let explanation = ExplanationGenerator::new().explain(&contributions(), None);

        assert_eq!(explanation.factors[0].feature, Feature::EmbeddingSimilarity);
        assert_eq!(explanation.primary_reason, "similar to titles you enjoyed");

        let total: f64 = explanation.breakdown.iter().map(|(_, p)| p).sum();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_uses_max_of_share_and_reward() {
        let generator = ExplanationGenerator::new();

        let without_arm = generator.explain(&contributions(), None);
        assert!((without_arm.confidence - 0.5).abs() < 1e-9);

        let with_better_arm = generator.explain(&contributions(), Some(0.9));
        assert!((with_better_arm.confidence - 0.9).abs() < 1e-9);

        let with_worse_arm = generator.explain(&contributions(), Some(0.2));
        assert!((with_worse_arm.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_deterministic() {
        let generator = ExplanationGenerator::new();
        let a = generator.explain(&contributions(), Some(0.7));
        let b = generator.explain(&contributions(), Some(0.7));
        assert_eq!(a.primary_reason, b.primary_reason);
        assert_eq!(a.breakdown, b.breakdown);
        assert_eq!(a.confidence, b.confidence);
    }

    #[test]
    fn test_empty_contributions() {
        let explanation = ExplanationGenerator::new().explain(&[], None);
        assert!(explanation.factors.is_empty());
        assert_eq!(explanation.confidence, 0.0);
        assert!(!explanation.primary_reason.is_empty());
    }

    #[test]
    fn test_reasons_top_two() {
        let reasons = ExplanationGenerator::new().reasons(&contributions());
        assert_eq!(reasons.len(), 2);
        assert_eq!(reasons[0], "similar to titles you enjoyed");
        assert_eq!(reasons[1], "matches your favorite genres");
    }
}
