//! SDG strategy (C6): windowed feature extraction, a linear hinge-loss
//! classifier, and the dynamic per-host occurrence-threshold loop that
//! turns row-level predictions into IP-level block decisions.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use pt_classifier::{Classifier, LinearSgdClassifier, Loss};
use pt_traffic::{group_by_client_fixed, synchronise, window_features, window_time};
use pt_traffic::{FeatureSelection, Packet, Subnet};

use crate::config::{score_configs, select_best_config, RunResult, DEFAULT_SCORE_WEIGHT};
use crate::error::PtError;
use crate::framework::{downsample, shuffle_split, wireshark_filter_for_ips};

const TIME_WINDOW_DELTA_US: i64 = 60_000_000;
const NUM_RUNS: usize = 5;
const PERCENTILES: [u8; 6] = [0, 50, 75, 80, 85, 90];
const TPR_STOP_FLOOR: f64 = 0.75;
const FPR_STOP_CEILING: f64 = 0.001;

pub const DEFAULT_WINDOW_SIZE: usize = 25;
pub const MIN_WINDOW_SIZE: usize = 10;
pub const DEFAULT_PT_SPLIT_RATIO: f64 = 0.5;

/// Percentile of the per-IP occurrence-count distribution used to set the
/// block threshold `theta`. The config tuple is a single scalar, so its
/// natural `Ord` already matches the ascending sweep order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SdgConfig {
    pub percentile: u8,
}

pub struct SdgStrategy {
    pub client_ips: Vec<Subnet>,
    pub window_size: usize,
    pub pt_split_ratio: f64,
    pub seed: u64,
}

impl SdgStrategy {
    pub fn new(client_ips: Vec<Subnet>, seed: u64) -> Self {
        SdgStrategy {
            client_ips,
            window_size: DEFAULT_WINDOW_SIZE,
            pt_split_ratio: DEFAULT_PT_SPLIT_RATIO,
            seed,
        }
    }

    pub fn with_window_size(mut self, window_size: usize) -> Result<Self, PtError> {
        if window_size < MIN_WINDOW_SIZE {
            return Err(PtError::InvalidArgument(format!(
                "window_size must be >= {MIN_WINDOW_SIZE}, got {window_size}"
            )));
        }
        self.window_size = window_size;
        Ok(self)
    }

    fn feature_selection() -> FeatureSelection {
        let mut selection = FeatureSelection::none();
        selection.entropy = true;
        selection.tcp_len = true;
        selection.psh = true;
        selection
    }

    pub fn name(&self) -> &'static str {
        "sdg"
    }

    pub fn debug_tag(&self) -> &'static str {
        "C6/sdg"
    }

    /// Run the full pipeline: synchronise, time-window, group, extract
    /// features, balance/standardise, then sweep percentiles (§4.6 steps
    /// 1-10), stopping early per the stop rule.
    pub fn run(&self, positive: &[Packet], negative: &[Packet]) -> Result<SdgReport, PtError> {
        let (positive, negative) = synchronise_corpora(positive, negative)?;

        let selection = Self::feature_selection();
        let mut positive_rows =
            extract_labeled_windows(&positive, &self.client_ips, self.window_size, 1, &selection)?;
        let mut negative_rows =
            extract_labeled_windows(&negative, &self.client_ips, self.window_size, 0, &selection)?;
        log::info!(
            "{}: extracted {} positive / {} negative feature windows",
            self.debug_tag(),
            positive_rows.len(),
            negative_rows.len()
        );

        balance_classes(&mut positive_rows, &mut negative_rows, self.seed);

        let mut all_rows = positive_rows;
        all_rows.extend(negative_rows);
        if all_rows.is_empty() {
            return Err(PtError::InsufficientData(
                "no classifiable feature windows after extraction".to_string(),
            ));
        }

        let columns = all_rows[0].0.keys().cloned().collect::<Vec<_>>();
        let matrix: Vec<Vec<f64>> = all_rows
            .iter()
            .map(|(row, ..)| columns.iter().map(|c| row[c]).collect())
            .collect();
        let labels: Vec<i8> = all_rows.iter().map(|(_, _, label)| *label).collect();
        let peer_ips: Vec<IpAddr> = all_rows.iter().map(|(_, ip, _)| *ip).collect();

        let standardizer = Standardizer::fit(&matrix);
        let standardized = standardizer.transform(&matrix);

        let mut results: BTreeMap<SdgConfig, RunResult> = BTreeMap::new();
        let mut outcomes: BTreeMap<SdgConfig, PercentileOutcome> = BTreeMap::new();

        for &percentile in &PERCENTILES {
            let config = SdgConfig { percentile };
            let outcome = self.best_of_runs(&standardized, &labels, &peer_ips, percentile);
            log::info!(
                "{}: percentile={percentile} theta={} TPR={:.4} FPR={:.4} (best of {NUM_RUNS} runs)",
                self.debug_tag(),
                outcome.theta,
                outcome.tpr,
                outcome.fpr
            );
            results.insert(
                config,
                RunResult {
                    tpr: outcome.tpr,
                    fpr: outcome.fpr,
                },
            );
            let stop = outcome.tpr < TPR_STOP_FLOOR || outcome.fpr < FPR_STOP_CEILING;
            outcomes.insert(config, outcome);
            if stop {
                log::info!(
                    "{}: stopping percentile sweep at {percentile} (TPR/FPR stop rule)",
                    self.debug_tag()
                );
                break;
            }
        }

        let scores = score_configs(&results, |_| 0.0, DEFAULT_SCORE_WEIGHT);
        let best_config = select_best_config(&results, &scores);

        let mut rows: Vec<crate::framework::CsvRow> = results
            .iter()
            .map(|(config, result)| crate::framework::CsvRow {
                config: format!("percentile={}", config.percentile),
                tpr: result.tpr,
                fpr: result.fpr,
                score: scores[config],
            })
            .collect();
        rows.sort_by(|a, b| a.config.cmp(&b.config));

        let (tpr, fpr, blocked_ips) = match best_config {
            Some(config) => {
                let result = results[&config];
                let outcome = &outcomes[&config];
                (result.tpr, result.fpr, outcome.blocked_ips.clone())
            }
            None => (0.0, 0.0, BTreeSet::new()),
        };

        Ok(SdgReport {
            best_config,
            tpr,
            fpr,
            wireshark_filter: wireshark_filter_for_ips(&blocked_ips),
            blocked_ips,
            columns,
            standardizer,
            outcomes,
            rows,
        })
    }

    /// Run `NUM_RUNS` independent shuffle-splits for one percentile and
    /// keep the run with the lowest FPR (§4.6 step 9).
    fn best_of_runs(
        &self,
        features: &[Vec<f64>],
        labels: &[i8],
        peer_ips: &[IpAddr],
        percentile: u8,
    ) -> PercentileOutcome {
        (0..NUM_RUNS)
            .map(|run_idx| {
                let run_seed = self.seed.wrapping_add(run_idx as u64 * 1_000_003 + percentile as u64);
                self.single_run(features, labels, peer_ips, percentile, run_seed)
            })
            .min_by(|a, b| a.fpr.partial_cmp(&b.fpr).unwrap())
            .expect("NUM_RUNS > 0")
    }

    fn single_run(
        &self,
        features: &[Vec<f64>],
        labels: &[i8],
        peer_ips: &[IpAddr],
        percentile: u8,
        seed: u64,
    ) -> PercentileOutcome {
        let indices: Vec<usize> = (0..features.len()).collect();
        let (train_idx, val_idx) = shuffle_split(&indices, self.pt_split_ratio, seed);

        let train_x: Vec<Vec<f64>> = train_idx.iter().map(|&i| features[i].clone()).collect();
        let train_y: Vec<i8> = train_idx.iter().map(|&i| labels[i]).collect();

        let mut classifier = LinearSgdClassifier::new(Loss::Hinge, seed);
        classifier.train(&train_x, &train_y);

        let val_x: Vec<Vec<f64>> = val_idx.iter().map(|&i| features[i].clone()).collect();
        let predictions = classifier.predict(&val_x);

        let mut counts: BTreeMap<IpAddr, u32> = BTreeMap::new();
        for (&i, &pred) in val_idx.iter().zip(predictions.iter()) {
            if pred > 0 {
                *counts.entry(peer_ips[i]).or_insert(0) += 1;
            }
        }
        // IPs present in validation but with zero positive predictions still
        // anchor the occurrence-count distribution at zero.
        let mut all_counts: Vec<f64> = val_idx
            .iter()
            .map(|&i| peer_ips[i])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|ip| *counts.get(&ip).unwrap_or(&0) as f64)
            .collect();
        all_counts.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let theta = percentile_of(&all_counts, percentile as f64).floor() as i64;
        let blocked_ips: BTreeSet<IpAddr> = counts
            .iter()
            .filter(|&(_, &count)| count as i64 > theta)
            .map(|(&ip, _)| ip)
            .collect();

        let mut true_positive = 0u32;
        let mut false_positive = 0u32;
        let mut actual_positive = 0u32;
        let mut actual_negative = 0u32;
        for (&i, &pred) in val_idx.iter().zip(predictions.iter()) {
            let decide_to_block = pred > 0 && blocked_ips.contains(&peer_ips[i]);
            if labels[i] > 0 {
                actual_positive += 1;
                if decide_to_block {
                    true_positive += 1;
                }
            } else {
                actual_negative += 1;
                if decide_to_block {
                    false_positive += 1;
                }
            }
        }

        PercentileOutcome {
            tpr: if actual_positive == 0 {
                0.0
            } else {
                true_positive as f64 / actual_positive as f64
            },
            fpr: if actual_negative == 0 {
                0.0
            } else {
                false_positive as f64 / actual_negative as f64
            },
            theta,
            blocked_ips,
            run_seed: seed,
            classifier,
        }
    }

    /// Recall phase (§4.6, optional): apply the same feature extraction to
    /// an all-positive corpus and report, for each retained percentile's
    /// winning classifier, the fraction of that corpus's windows whose peer
    /// IP would end up blocked (reusing that percentile's learned `theta`).
    pub fn recall(&self, report: &SdgReport, recall_corpus: &[Packet]) -> Result<BTreeMap<u8, f64>, PtError> {
        let selection = Self::feature_selection();
        let rows = extract_labeled_windows(recall_corpus, &self.client_ips, self.window_size, 1, &selection)?;
        if rows.is_empty() {
            return Ok(BTreeMap::new());
        }
        let matrix: Vec<Vec<f64>> = rows
            .iter()
            .map(|(row, ..)| report.columns.iter().map(|c| row[c]).collect())
            .collect();
        let peer_ips: Vec<IpAddr> = rows.iter().map(|(_, ip, _)| *ip).collect();
        let standardized = report.standardizer.transform(&matrix);

        let mut recall_by_percentile = BTreeMap::new();
        for (config, outcome) in &report.outcomes {
            let predictions = outcome.classifier.predict(&standardized);
            let mut counts: BTreeMap<IpAddr, u32> = BTreeMap::new();
            for (&ip, &pred) in peer_ips.iter().zip(predictions.iter()) {
                if pred > 0 {
                    *counts.entry(ip).or_insert(0) += 1;
                }
            }
            let blocked_rows = peer_ips
                .iter()
                .filter(|ip| counts.get(ip).copied().unwrap_or(0) as i64 > outcome.theta)
                .count();
            let recall = blocked_rows as f64 / peer_ips.len() as f64;
            recall_by_percentile.insert(config.percentile, recall);
        }
        Ok(recall_by_percentile)
    }
}

pub struct SdgReport {
    pub best_config: Option<SdgConfig>,
    pub tpr: f64,
    pub fpr: f64,
    pub blocked_ips: BTreeSet<IpAddr>,
    pub wireshark_filter: String,
    pub columns: Vec<String>,
    pub standardizer: Standardizer,
    pub outcomes: BTreeMap<SdgConfig, PercentileOutcome>,
    pub rows: Vec<crate::framework::CsvRow>,
}

pub struct PercentileOutcome {
    pub tpr: f64,
    pub fpr: f64,
    pub theta: i64,
    pub blocked_ips: BTreeSet<IpAddr>,
    pub run_seed: u64,
    pub classifier: LinearSgdClassifier,
}

/// Zero-mean, unit-variance standardiser fit on a combined feature matrix.
/// Columns with zero variance are left unscaled (dividing by zero would
/// produce `NaN`, which the pipeline explicitly excludes upstream).
#[derive(Debug, Clone)]
pub struct Standardizer {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl Standardizer {
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        if rows.is_empty() {
            return Standardizer {
                means: Vec::new(),
                stds: Vec::new(),
            };
        }
        let dim = rows[0].len();
        let n = rows.len() as f64;
        let mut means = vec![0.0; dim];
        for row in rows {
            for (m, &v) in means.iter_mut().zip(row.iter()) {
                *m += v / n;
            }
        }
        let mut variances = vec![0.0; dim];
        for row in rows {
            for (var, (&v, &mean)) in variances.iter_mut().zip(row.iter().zip(means.iter())) {
                *var += (v - mean).powi(2) / n;
            }
        }
        let stds = variances.into_iter().map(f64::sqrt).collect();
        Standardizer { means, stds }
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter()
            .map(|row| {
                row.iter()
                    .zip(self.means.iter().zip(self.stds.iter()))
                    .map(|(&v, (&mean, &std))| if std > 0.0 { (v - mean) / std } else { 0.0 })
                    .collect()
            })
            .collect()
    }
}

/// A window's feature row (as a plain map for column lookups), its peer IP,
/// and its class label.
type LabeledRow = (BTreeMap<String, f64>, IpAddr, i8);

fn extract_labeled_windows(
    packets: &[Packet],
    client_ips: &[Subnet],
    window_size: usize,
    label: i8,
    selection: &FeatureSelection,
) -> Result<Vec<LabeledRow>, PtError> {
    let time_windows = window_time(packets, TIME_WINDOW_DELTA_US, true)?;
    let mut out = Vec::new();
    for time_window in time_windows {
        if time_window.is_empty() {
            continue;
        }
        let groups = group_by_client_fixed(&time_window, client_ips, window_size)?;
        for windows in groups.into_values() {
            for window in windows {
                let (row, peer_ips, _) = window_features(&window, client_ips, selection);
                if row.values().any(|v| !v.is_finite()) {
                    continue;
                }
                let Some(&peer_ip) = peer_ips.iter().next() else {
                    continue;
                };
                out.push((row, peer_ip, label));
            }
        }
    }
    Ok(out)
}

fn corpus_span(packets: &[Packet]) -> f64 {
    if packets.len() < 2 {
        return 0.0;
    }
    let min = packets.iter().map(|p| p.time).fold(f64::INFINITY, f64::min);
    let max = packets.iter().map(|p| p.time).fold(f64::NEG_INFINITY, f64::max);
    max - min
}

/// Synchronise the shorter-duration corpus to the start time of the longer
/// one (§4.6 step 1), putting both on a common time axis for time-windowing.
fn synchronise_corpora(
    positive: &[Packet],
    negative: &[Packet],
) -> Result<(Vec<Packet>, Vec<Packet>), PtError> {
    if positive.is_empty() || negative.is_empty() {
        return Ok((positive.to_vec(), negative.to_vec()));
    }
    let mut sorted_positive = positive.to_vec();
    sorted_positive.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap());
    let mut sorted_negative = negative.to_vec();
    sorted_negative.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap());

    if corpus_span(&sorted_positive) >= corpus_span(&sorted_negative) {
        let target = sorted_positive[0].time;
        let negative_synced = synchronise(&sorted_negative, target, false)?;
        Ok((sorted_positive, negative_synced))
    } else {
        let target = sorted_negative[0].time;
        let positive_synced = synchronise(&sorted_positive, target, false)?;
        Ok((positive_synced, sorted_negative))
    }
}

/// Downsample whichever class is larger so positive/negative windows are
/// equinumerous (§4.6 step 5), deterministic under `seed`.
fn balance_classes(positive: &mut Vec<LabeledRow>, negative: &mut Vec<LabeledRow>, seed: u64) {
    let target = positive.len().min(negative.len());
    if positive.len() > target {
        let indices: Vec<usize> = (0..positive.len()).collect();
        let kept = downsample(&indices, target, seed);
        let mut new_positive = Vec::with_capacity(kept.len());
        for i in kept {
            new_positive.push(positive[i].clone());
        }
        *positive = new_positive;
    }
    if negative.len() > target {
        let indices: Vec<usize> = (0..negative.len()).collect();
        let kept = downsample(&indices, target, seed.wrapping_add(1));
        let mut new_negative = Vec::with_capacity(kept.len());
        for i in kept {
            new_negative.push(negative[i].clone());
        }
        *negative = new_negative;
    }
}

/// "Lower" percentile (numpy's `interpolation="lower"`): the fractional rank
/// is truncated down to its enclosing sample rather than interpolated, so
/// the result is always one of the observed counts. Scenario 6's worked
/// example (`percentile([2, 15], 50) == 2`) only holds under this
/// convention -- linear interpolation would give `8.5`.
fn percentile_of(sorted_ascending: &[f64], p: f64) -> f64 {
    if sorted_ascending.is_empty() {
        return 0.0;
    }
    let rank = (p / 100.0) * (sorted_ascending.len() - 1) as f64;
    let idx = (rank.floor() as usize).min(sorted_ascending.len() - 1);
    sorted_ascending[idx]
}
