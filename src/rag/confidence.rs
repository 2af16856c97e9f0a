/// Heuristic confidence scoring
///
/// Not a probability: a monotonic blend of retrieval quality and response
/// shape, clamped to [0, 1]. More similar sources, more high-similarity
/// sources and longer responses never lower the score.

/// Confidence reported when the answer had no retrieved sources
pub const NO_SOURCE_CONFIDENCE: f32 = 0.3;

/// Words at which the length factor saturates
const LENGTH_SATURATION_WORDS: f32 = 50.0;

/// Score an answer from its source similarities and response text.
/// `high_threshold` is the similarity at which a source counts toward the
/// quality boost.
pub fn confidence_score(source_scores: &[f32], response: &str, high_threshold: f32) -> f32 {
    if source_scores.is_empty() {
        return NO_SOURCE_CONFIDENCE;
    }

    let mean_similarity = source_scores.iter().sum::<f32>() / source_scores.len() as f32;

    let high_count = source_scores.iter().filter(|&&s| s >= high_threshold).count();
    let quality_boost = (0.1 * high_count as f32).min(0.3);

    let words = response.split_whitespace().count() as f32;
    let length_factor = (words / LENGTH_SATURATION_WORDS).min(1.0);

    (0.6 * mean_similarity + quality_boost + 0.1 * length_factor).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HIGH: f32 = 0.75;

    #[test]
    fn test_no_sources_yields_fixed_low_constant() {
        assert_eq!(confidence_score(&[], "a long detailed answer", HIGH), NO_SOURCE_CONFIDENCE);
    }

    #[test]
    fn test_always_within_unit_interval() {
        let cases: Vec<(Vec<f32>, String)> = vec![
            (vec![0.0], String::new()),
            (vec![1.0; 10], "word ".repeat(1000)),
            (vec![0.5, 0.9, 0.2], "short".to_string()),
            (vec![100.0], "oversized similarity input".to_string()),
        ];
        for (scores, response) in cases {
            let c = confidence_score(&scores, &response, HIGH);
            assert!((0.0..=1.0).contains(&c), "confidence {} out of range", c);
        }
    }

    #[test]
    fn test_monotonic_in_mean_similarity() {
        let low = confidence_score(&[0.2, 0.2], "answer", HIGH);
        let high = confidence_score(&[0.6, 0.6], "answer", HIGH);
        assert!(high > low);
    }

    #[test]
    fn test_quality_boost_counts_high_similarity_sources() {
        let none = confidence_score(&[0.5, 0.5], "answer", HIGH);
        let one = confidence_score(&[0.5, 0.8], "answer", HIGH);
        assert!(one > none);
    }

    #[test]
    fn test_quality_boost_capped() {
        // Four high-similarity sources vs three: boost is capped at 0.3,
        // only the mean moves
        let three = confidence_score(&[0.8; 3], "answer", HIGH);
        let four = confidence_score(&[0.8; 4], "answer", HIGH);
        assert!((three - four).abs() < 1e-6);
    }

    #[test]
    fn test_length_factor_saturates_at_fifty_words() {
        let short = confidence_score(&[0.5], &"word ".repeat(10), HIGH);
        let at_cap = confidence_score(&[0.5], &"word ".repeat(50), HIGH);
        let beyond = confidence_score(&[0.5], &"word ".repeat(500), HIGH);
        assert!(at_cap > short);
        assert!((at_cap - beyond).abs() < 1e-6);
    }
}
