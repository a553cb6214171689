// Numeric helpers shared by the ranking, diversity and sequence layers.

/// Defensively normalize a raw feature score into [0, 1].
///
/// Raw inputs are not trusted to already be normalized:
/// - values in [0, 1] pass through
/// - values in (1, 100] are treated as percentages and divided by 100
/// - values above 100 clamp to 1.0
/// - negative values clamp to 0.0
pub fn normalize_score(raw: f64) -> f64 {
    if raw < 0.0 {
        0.0
    } else if raw <= 1.0 {
        raw
    } else if raw <= 100.0 {
        raw / 100.0
    } else {
        1.0
    }
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 when either norm is zero or lengths differ; never divides by
/// zero and never panics.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x as f64 * *y as f64;
        norm_a += *x as f64 * *x as f64;
        norm_b += *y as f64 * *y as f64;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Shannon entropy of a count distribution, normalized by `ln(distinct)` so
/// the result lies in [0, 1]. Zero when everything falls in one bucket.
pub fn normalized_entropy(counts: &[usize]) -> f64 {
    let total: usize = counts.iter().sum();
    let distinct = counts.iter().filter(|&&c| c > 0).count();
    if total == 0 || distinct <= 1 {
        return 0.0;
    }

    let total = total as f64;
    let entropy: f64 = counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.ln()
        })
        .sum();

    entropy / (distinct as f64).ln()
}

/// Exponential decay for time-based scoring; ~0.5 at one half-life.
pub fn exponential_decay(age_days: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 1.0;
    }
    (-age_days / half_life_days * std::f64::consts::LN_2).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_score_ranges() {
        // Property: output always in [0, 1] across input regimes.
        for raw in [-50.0, -0.001, 0.0, 0.3, 1.0, 1.5, 42.0, 100.0, 101.0, 1e9] {
            let n = normalize_score(raw);
            assert!((0.0..=1.0).contains(&n), "raw {} gave {}", raw, n);
        }
        assert_eq!(normalize_score(-5.0), 0.0);
        assert!((normalize_score(0.42) - 0.42).abs() < 1e-12);
        assert!((normalize_score(42.0) - 0.42).abs() < 1e-12);
        assert_eq!(normalize_score(5000.0), 1.0);
    }

    #[test]
    fn test_cosine_identity() {
        let a = vec![0.5f32, -1.0, 2.0, 0.25];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        let a = vec![0.0f32; 4];
        let b = vec![1.0f32, 2.0, 3.0, 4.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&b, &a), 0.0);
        assert_eq!(cosine_similarity(&a, &a), 0.0);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        let a = vec![1.0f32, 2.0];
        let b = vec![1.0f32, 2.0, 3.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_entropy_single_genre_is_zero() {
        assert_eq!(normalized_entropy(&[5]), 0.0);
        assert_eq!(normalized_entropy(&[5, 0, 0]), 0.0);
    }

    #[test]
    fn test_entropy_increases_with_variety() {
        // Fixed set size of 6, growing genre variety.
        let one = normalized_entropy(&[6]);
        let two = normalized_entropy(&[3, 3]);
        let three = normalized_entropy(&[2, 2, 2]);
        assert!(one < two);
        // Both uniform distributions normalize to 1.0; skewed stays below.
        assert!((two - 1.0).abs() < 1e-9);
        assert!((three - 1.0).abs() < 1e-9);
        let skewed = normalized_entropy(&[4, 1, 1]);
        assert!(skewed < three);
        assert!(skewed > one);
    }

    #[test]
    fn test_exponential_decay() {
        let half = exponential_decay(30.0, 30.0);
        assert!((half - 0.5).abs() < 1e-9);
        assert!((exponential_decay(0.0, 30.0) - 1.0).abs() < 1e-9);
    }
}
