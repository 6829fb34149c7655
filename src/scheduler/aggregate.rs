//! Pure score-folding arithmetic: sample → member → iteration.
//!
//! Grounded on the teacher's `CostTracker::merge`/`record` style —
//! small, composable accumulation functions over owned data, no hidden
//! mutable global state. All arithmetic here is exact-integer except for
//! the single float-weight multiply, which is floored once per linear
//! combination and never mid-sum (§4.4.5).

use crate::model::ScoreVector;

/// A member's per-iteration vector: the coordinate-wise floor mean of
/// its successful samples (including parsing-error fallbacks). Returns
/// `None` if `samples` is empty — the caller substitutes the uniform
/// fallback in that case (§4.4.2 step 5).
pub fn floor_mean(samples: &[ScoreVector]) -> Option<ScoreVector> {
    let first = samples.first()?;
    let k = first.len();
    let n = samples.len() as u64;

    let mut totals = vec![0u64; k];
    for sample in samples {
        debug_assert_eq!(sample.len(), k, "all samples in one fold must share outcome count");
        for (i, v) in sample.0.iter().enumerate() {
            totals[i] += v;
        }
    }

    let means: Vec<u64> = totals.iter().map(|t| t / n).collect();
    Some(ScoreVector::raw(means))
}

/// The iteration's aggregate: `floor(Σⱼ weightⱼ · v_{t,j})`, normalized
/// by adding any deficit to the argmax coordinate (never multiplicative
/// rescaling).
///
/// `member_vectors` and `weights` must have the same length, one entry
/// per panel member that contributed a vector this iteration (members
/// that failed entirely and fall back to the uniform vector are
/// expected to already be present with `ScoreVector::uniform(k)`).
pub fn weighted_floor_sum(member_vectors: &[ScoreVector], weights: &[f64]) -> Option<ScoreVector> {
    if member_vectors.len() != weights.len() || member_vectors.is_empty() {
        return None;
    }
    let k = member_vectors[0].len();

    let mut totals = vec![0u64; k];
    for (vector, weight) in member_vectors.iter().zip(weights) {
        debug_assert_eq!(vector.len(), k, "all member vectors must share outcome count");
        for (i, v) in vector.0.iter().enumerate() {
            // Float weight multiplies the integer coordinate; floor once
            // per coordinate contribution, accumulated as exact integers
            // from then on.
            let contribution = (*v as f64) * weight;
            totals[i] += contribution.floor().max(0.0) as u64;
        }
    }

    ScoreVector::raw(totals).normalize().ok()
}

/// The minimum integer count of successful members required to meet
/// `min_fraction` of `total_members`, rounded up (§9 Open Question ii).
pub fn required_successes(total_members: usize, min_fraction: f64) -> usize {
    if total_members == 0 {
        return 0;
    }
    (min_fraction * total_members as f64).ceil() as usize
}

/// Whether the success threshold holds for this iteration.
pub fn threshold_met(successful_members: usize, total_members: usize, min_fraction: f64) -> bool {
    successful_members >= required_successes(total_members, min_fraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn floor_mean_of_single_sample_is_identity() {
        let v = ScoreVector::raw(vec![600_000, 400_000]);
        let mean = floor_mean(&[v.clone()]).unwrap();
        assert_eq!(mean, v);
    }

    #[test]
    fn floor_mean_floors_uneven_division() {
        let samples = vec![
            ScoreVector::raw(vec![650_000, 350_000]),
            ScoreVector::raw(vec![550_000, 450_000]),
        ];
        let mean = floor_mean(&samples).unwrap();
        // (650000+550000)/2 = 600000 exactly; (350000+450000)/2 = 400000 exactly
        assert_eq!(mean.0, vec![600_000, 400_000]);
    }

    #[test]
    fn floor_mean_empty_returns_none() {
        assert!(floor_mean(&[]).is_none());
    }

    #[test]
    fn weighted_sum_matches_s1_scenario() {
        let vectors = vec![
            ScoreVector::raw(vec![400_000, 300_000, 200_000, 100_000]),
            ScoreVector::raw(vec![350_000, 250_000, 200_000, 200_000]),
            ScoreVector::raw(vec![300_000, 300_000, 200_000, 200_000]),
        ];
        let weights = vec![0.5, 0.3, 0.2];
        let result = weighted_floor_sum(&vectors, &weights).unwrap();
        assert_eq!(result.0, vec![365_000, 285_000, 200_000, 150_000]);
        assert_eq!(result.sum(), 1_000_000);
    }

    #[test]
    fn weighted_sum_matches_s2_final_iteration() {
        let vectors = vec![
            ScoreVector::raw(vec![700_000, 300_000]),
            ScoreVector::raw(vec![650_000, 350_000]),
        ];
        let weights = vec![0.6, 0.4];
        let result = weighted_floor_sum(&vectors, &weights).unwrap();
        assert_eq!(result.0, vec![680_000, 320_000]);
    }

    #[test]
    fn weighted_sum_rejects_mismatched_lengths() {
        let vectors = vec![ScoreVector::raw(vec![1_000_000])];
        let weights = vec![0.5, 0.5];
        assert!(weighted_floor_sum(&vectors, &weights).is_none());
    }

    #[test]
    fn required_successes_rounds_up() {
        assert_eq!(required_successes(4, 0.5), 2);
        assert_eq!(required_successes(3, 0.5), 2);
        assert_eq!(required_successes(1, 0.5), 1);
    }

    #[test]
    fn threshold_met_boundary() {
        assert!(threshold_met(2, 4, 0.5));
        assert!(!threshold_met(1, 4, 0.5));
        assert!(threshold_met(2, 3, 0.5));
    }
}
