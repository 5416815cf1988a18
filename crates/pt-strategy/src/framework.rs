//! Strategy lifecycle: the abstract `parse -> filter -> load -> split ->
//! positive-run -> negative-run -> score` pipeline shared by every
//! detection strategy (C3).

use std::collections::BTreeSet;
use std::net::IpAddr;

use pt_traffic::{Packet, Subnet};
use rand::seq::SliceRandom;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha12Rng;

use crate::collaborators::TraceFilter;
use crate::config::{score_configs, select_best_config, RunResult};

/// A detection strategy: a name, a strategic packet filter, a hyperparameter
/// grid, and the `positive_run`/`negative_run` operations each config is
/// measured by.
///
/// `Config` is the strategy's configuration tuple; its `Ord` impl must order
/// fields in the same sequence the strategy documents its hyperparameter
/// grid in, since that order is the tie-break of last resort (§4.3.1, §9).
pub trait Strategy {
    type Config: Clone + Ord + std::fmt::Debug;

    fn name(&self) -> &'static str;
    fn debug_tag(&self) -> &'static str;

    /// The per-packet predicate narrowing loaded traces before analysis.
    fn set_strategic_filter(&self) -> TraceFilter;

    /// The hyperparameter grid this strategy sweeps.
    fn configs(&self) -> Vec<Self::Config>;

    fn interpret_config(&self, config: &Self::Config) -> String;

    /// Scalar penalty in `[0,1]` added (subtracted, as a cost) to an
    /// expensive config's score.
    fn config_specific_penalisation(&self, config: &Self::Config) -> f64;

    /// Run one configuration over the positive corpus: returns its TPR and
    /// the peer IPs of the packets classified as PT traffic.
    fn positive_run(
        &self,
        config: &Self::Config,
        positive: &[Packet],
    ) -> (f64, BTreeSet<IpAddr>);

    /// Run one configuration over the negative corpus: returns its FPR.
    /// `negative_total` is the full negative collection count from the
    /// loader, which may exceed `negative.len()` if a strategic filter
    /// narrowed what was actually analysed (§4.4).
    fn negative_run(&self, config: &Self::Config, negative: &[Packet], negative_total: usize) -> f64;
}

/// Everything a strategy run reports (§4.3, §6 Outputs).
#[derive(Debug, Clone)]
pub struct StrategyReport<C> {
    pub best_config: Option<C>,
    pub tpr: f64,
    pub fpr: f64,
    pub blocked_ips: BTreeSet<IpAddr>,
    pub wireshark_filter: String,
    pub rows: Vec<CsvRow>,
}

/// One `(config, TPR, FPR, score)` row of the strategy's CSV export.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CsvRow {
    pub config: String,
    pub tpr: f64,
    pub fpr: f64,
    pub score: f64,
}

/// Sweep every config in `strategy.configs()` over the positive/negative
/// corpora, score the results, and pick the best config by §4.3.1's rule.
/// Each config is independent given read-only packet slices, so the sweep
/// runs in parallel (§5).
pub fn run_sweep<S>(
    strategy: &S,
    positive: &[Packet],
    negative: &[Packet],
    negative_total: usize,
    score_weight: f64,
) -> StrategyReport<S::Config>
where
    S: Strategy + Sync,
    S::Config: Send + Sync,
{
    use rayon::prelude::*;

    let configs = strategy.configs();
    log::info!(
        "{}: sweeping {} configs over {} positive / {} negative packets",
        strategy.debug_tag(),
        configs.len(),
        positive.len(),
        negative.len()
    );

    let measured: Vec<(S::Config, RunResult, BTreeSet<IpAddr>)> = configs
        .par_iter()
        .map(|config| {
            let (tpr, blocked) = strategy.positive_run(config, positive);
            let fpr = strategy.negative_run(config, negative, negative_total);
            log::debug!(
                "{}: {} -> TPR={tpr:.4} FPR={fpr:.4}",
                strategy.debug_tag(),
                strategy.interpret_config(config)
            );
            (config.clone(), RunResult { tpr, fpr }, blocked)
        })
        .collect();

    let mut results = std::collections::BTreeMap::new();
    let mut blocked_by_config = std::collections::BTreeMap::new();
    for (config, result, blocked) in measured {
        results.insert(config.clone(), result);
        blocked_by_config.insert(config, blocked);
    }

    let scores = score_configs(
        &results,
        |config| strategy.config_specific_penalisation(config),
        score_weight,
    );
    let best = select_best_config(&results, &scores);

    let mut rows: Vec<CsvRow> = results
        .iter()
        .map(|(config, result)| CsvRow {
            config: strategy.interpret_config(config),
            tpr: result.tpr,
            fpr: result.fpr,
            score: scores[config],
        })
        .collect();
    rows.sort_by(|a, b| a.config.cmp(&b.config));

    match best {
        Some(config) => {
            let result = results[&config];
            let blocked_ips = blocked_by_config[&config].clone();
            log::info!(
                "{}: best config {} -> TPR={:.4} FPR={:.4}, blocking {} host(s)",
                strategy.debug_tag(),
                strategy.interpret_config(&config),
                result.tpr,
                result.fpr,
                blocked_ips.len()
            );
            StrategyReport {
                best_config: Some(config),
                tpr: result.tpr,
                fpr: result.fpr,
                wireshark_filter: wireshark_filter_for_ips(&blocked_ips),
                blocked_ips,
                rows,
            }
        }
        None => {
            log::warn!("{}: no configuration produced a result", strategy.debug_tag());
            StrategyReport {
                best_config: None,
                tpr: 0.0,
                fpr: 0.0,
                blocked_ips: BTreeSet::new(),
                wireshark_filter: String::new(),
                rows,
            }
        }
    }
}

/// Write a strategy's `(config, TPR, FPR, score)` rows to `path` (§6
/// Outputs' CSV export contract).
pub fn write_csv(path: &std::path::Path, rows: &[CsvRow]) -> Result<(), crate::error::PtError> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| {
        crate::error::PtError::CollaboratorFailure(format!("opening CSV export {path:?}: {e}"))
    })?;
    for row in rows {
        writer.serialize(row).map_err(|e| {
            crate::error::PtError::CollaboratorFailure(format!("writing CSV row: {e}"))
        })?;
    }
    writer
        .flush()
        .map_err(|e| crate::error::PtError::CollaboratorFailure(format!("flushing CSV export: {e}")))
}

/// The peer IP of `packet` relative to `client_ips`: the endpoint that is
/// *not* a client subnet member. `None` if neither or both endpoints match
/// (§4.2.7's upstream/downstream split uses the same convention).
pub fn peer_ip(packet: &Packet, client_ips: &[Subnet]) -> Option<IpAddr> {
    let src_is_client = client_ips.iter().any(|c| c.overlaps_ip(&packet.src));
    let dst_is_client = client_ips.iter().any(|c| c.overlaps_ip(&packet.dst));
    match (src_is_client, dst_is_client) {
        (true, false) => Some(packet.dst),
        (false, true) => Some(packet.src),
        _ => None,
    }
}

/// Render a Wireshark-compatible display filter blocking exactly `ips`, e.g.
/// `ip.dst_host == "a.b.c.d" || ip.dst_host == "e.f.g.h"`. Returns an empty
/// string for an empty set.
pub fn wireshark_filter_for_ips(ips: &BTreeSet<IpAddr>) -> String {
    ips.iter()
        .map(|ip| format!("ip.dst_host == \"{ip}\""))
        .collect::<Vec<_>>()
        .join(" || ")
}

/// Shuffle-split `items` into `(train, validation)` by `ratio` (fraction
/// kept for training), deterministic under `seed`. Order-preserving within
/// each half after the shuffle. `ratio` must lie in `[0,1]`.
pub fn shuffle_split<T: Clone>(items: &[T], ratio: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    log::info!("shuffle_split: seed={seed} ratio={ratio}");
    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut rng = ChaCha12Rng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    let split_at = ((items.len() as f64) * ratio).round() as usize;
    let (train_idx, val_idx) = order.split_at(split_at.min(order.len()));
    (
        train_idx.iter().map(|&i| items[i].clone()).collect(),
        val_idx.iter().map(|&i| items[i].clone()).collect(),
    )
}

/// Downsample `items` (without replacement) to `target_len`, deterministic
/// under `seed`. No-op if `items` is already at or below `target_len`.
pub fn downsample<T: Clone>(items: &[T], target_len: usize, seed: u64) -> Vec<T> {
    if items.len() <= target_len {
        return items.to_vec();
    }
    log::info!(
        "downsample: seed={seed} {} -> {target_len}",
        items.len()
    );
    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut rng = ChaCha12Rng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    order.truncate(target_len);
    order.sort_unstable();
    order.into_iter().map(|i| items[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wireshark_filter_joins_hosts() {
        let mut ips = BTreeSet::new();
        ips.insert("10.0.0.1".parse().unwrap());
        ips.insert("10.0.0.2".parse().unwrap());
        let filter = wireshark_filter_for_ips(&ips);
        assert_eq!(
            filter,
            "ip.dst_host == \"10.0.0.1\" || ip.dst_host == \"10.0.0.2\""
        );
    }

    #[test]
    fn wireshark_filter_empty_set_is_empty_string() {
        assert_eq!(wireshark_filter_for_ips(&BTreeSet::new()), "");
    }

    #[test]
    fn shuffle_split_preserves_total_count() {
        let items: Vec<u32> = (0..100).collect();
        let (train, val) = shuffle_split(&items, 0.7, 42);
        assert_eq!(train.len() + val.len(), 100);
        assert_eq!(train.len(), 70);
    }

    #[test]
    fn shuffle_split_is_deterministic() {
        let items: Vec<u32> = (0..50).collect();
        let (a_train, a_val) = shuffle_split(&items, 0.5, 7);
        let (b_train, b_val) = shuffle_split(&items, 0.5, 7);
        assert_eq!(a_train, b_train);
        assert_eq!(a_val, b_val);
    }

    #[test]
    fn downsample_no_op_below_target() {
        let items = vec![1, 2, 3];
        assert_eq!(downsample(&items, 10, 1), items);
    }

    #[test]
    fn downsample_reduces_to_target_len() {
        let items: Vec<u32> = (0..20).collect();
        let sampled = downsample(&items, 5, 1);
        assert_eq!(sampled.len(), 5);
    }
}
