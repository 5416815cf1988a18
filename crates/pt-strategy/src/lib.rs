//! The strategy framework (C3) and its three concrete detectors: the
//! entropy-distribution strategy (C4), the length-clustering strategy (C5),
//! and the SDG strategy (C6). Ties together the statistical-test kit
//! (`pt-stats`), the traffic-statistics library (`pt-traffic`), and the
//! classifier collaborator (`pt-classifier`) into labelled classification
//! runs over a positive and negative packet corpus.

pub mod cli;
pub mod collaborators;
pub mod config;
pub mod entropy_strategy;
pub mod error;
pub mod framework;
pub mod length_strategy;
pub mod sdg_strategy;

pub use config::{score_configs, select_best_config, RunResult, DEFAULT_SCORE_WEIGHT};
pub use entropy_strategy::{EntropyConfig, EntropyDistributionStrategy, InclusionPolicy};
pub use error::PtError;
pub use framework::{
    downsample, peer_ip, run_sweep, shuffle_split, wireshark_filter_for_ips, write_csv, CsvRow,
    Strategy, StrategyReport,
};
pub use length_strategy::{run_length_clustering_sweep, LengthClusteringStrategy, LengthConfig, TlsMode};
pub use sdg_strategy::{PercentileOutcome, SdgConfig, SdgReport, SdgStrategy};
