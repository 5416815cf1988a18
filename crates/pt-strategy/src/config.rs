//! Config-tuple scoring shared by every strategy (C3.4.3.1): given measured
//! TPR/FPR per configuration, score each config by closeness to the best
//! observed TPR and FPR, penalise expensive configs, and select a winner.

use std::collections::BTreeMap;

/// Epsilon used whenever two rates or scores are compared for equality, per
/// the floating-point ordering design note: ties are real, not just
/// rounding noise, so comparisons must not rely on bit-exact equality.
pub const RATE_EPS: f64 = 1e-9;

/// Base of the logarithmic reward: `ln(1 + REWARD_BASE)` is the score of a
/// config that exactly matches the best observed rate.
const REWARD_BASE: f64 = 100.0;

/// Default weight `w` balancing the FPR term against the TPR term in the
/// combined score.
pub const DEFAULT_SCORE_WEIGHT: f64 = 0.5;

/// One configuration's measured outcome on the labelled corpora.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunResult {
    pub tpr: f64,
    pub fpr: f64,
}

/// `ln(1+100) - ln(1+100*|best-value|)`: maximal at `value == best`,
/// monotonically non-increasing as `value` moves away from `best`.
pub fn reward(best: f64, value: f64) -> f64 {
    let distance = (best - value).abs();
    (1.0 + REWARD_BASE).ln() - (1.0 + REWARD_BASE * distance).ln()
}

/// Score every config in `results`: `(1-w)*score_tp + w*score_fp - penalty`.
pub fn score_configs<C: Clone + Ord>(
    results: &BTreeMap<C, RunResult>,
    penalisation: impl Fn(&C) -> f64,
    w: f64,
) -> BTreeMap<C, f64> {
    if results.is_empty() {
        return BTreeMap::new();
    }
    let best_tpr = results
        .values()
        .map(|r| r.tpr)
        .fold(f64::NEG_INFINITY, f64::max);
    let best_fpr = results
        .values()
        .map(|r| r.fpr)
        .fold(f64::INFINITY, f64::min);
    results
        .iter()
        .map(|(config, result)| {
            let score_tp = reward(best_tpr, result.tpr);
            let score_fp = reward(best_fpr, result.fpr);
            let score = (1.0 - w) * score_tp + w * score_fp - penalisation(config);
            (config.clone(), score)
        })
        .collect()
}

/// Select the config maximising `scores`, breaking ties by lower FPR and
/// then by natural config-tuple order (`C`'s `Ord` impl encodes the
/// hyperparameter order a strategy declares its config fields in).
pub fn select_best_config<C: Clone + Ord>(
    results: &BTreeMap<C, RunResult>,
    scores: &BTreeMap<C, f64>,
) -> Option<C> {
    let mut configs: Vec<&C> = results.keys().collect();
    configs.sort();

    configs.into_iter().fold(None::<&C>, |best, candidate| {
        let Some(current_best) = best else {
            return Some(candidate);
        };
        let current_score = scores[current_best];
        let candidate_score = scores[candidate];
        if candidate_score > current_score + RATE_EPS {
            Some(candidate)
        } else if (candidate_score - current_score).abs() <= RATE_EPS
            && results[candidate].fpr + RATE_EPS < results[current_best].fpr
        {
            Some(candidate)
        } else {
            Some(current_best)
        }
    }).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reward_is_maximal_at_best() {
        assert!(reward(0.9, 0.9) > reward(0.9, 0.5));
        assert!(reward(0.9, 0.5) > reward(0.9, 0.1));
    }

    #[test]
    fn reward_is_monotonic_non_increasing_in_distance() {
        let best = 0.8;
        let mut prev = reward(best, best);
        for value in [0.7, 0.6, 0.5, 0.4, 0.0] {
            let current = reward(best, value);
            assert!(current <= prev + RATE_EPS);
            prev = current;
        }
    }

    #[test]
    fn best_config_maximises_score() {
        let mut results = BTreeMap::new();
        results.insert(1u32, RunResult { tpr: 0.9, fpr: 0.1 });
        results.insert(2u32, RunResult { tpr: 0.95, fpr: 0.05 });
        results.insert(3u32, RunResult { tpr: 0.5, fpr: 0.5 });
        let scores = score_configs(&results, |_| 0.0, DEFAULT_SCORE_WEIGHT);
        assert_eq!(select_best_config(&results, &scores), Some(2));
    }

    #[test]
    fn ties_break_by_lower_fpr_then_natural_order() {
        let mut results = BTreeMap::new();
        results.insert(1u32, RunResult { tpr: 0.9, fpr: 0.2 });
        results.insert(2u32, RunResult { tpr: 0.9, fpr: 0.1 });
        let scores = score_configs(&results, |_| 0.0, DEFAULT_SCORE_WEIGHT);
        // Both share the same (best) TPR, so the FPR term decides.
        assert_eq!(select_best_config(&results, &scores), Some(2));
    }
}
