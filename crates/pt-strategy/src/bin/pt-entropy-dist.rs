//! CLI entry point for the entropy-distribution strategy (C4).

#![deny(unused_import_braces, unused_qualifications)]

use std::path::PathBuf;

use color_eyre::eyre::Result;
use pt_strategy::cli::load_corpora;
use pt_strategy::{
    run_sweep, write_csv, EntropyDistributionStrategy, InclusionPolicy, Strategy,
    DEFAULT_SCORE_WEIGHT,
};

/// Sweep the entropy-distribution strategy's block-size/p-threshold/criterion
/// grid over a positive and negative packet corpus.
#[derive(Debug, clap::Parser)]
struct CliArgs {
    pt_pcap: PathBuf,
    neg_pcap: PathBuf,
    pt_src: String,
    pt_dst: String,
    neg_src: String,
    pt_collection: String,
    neg_collection: String,
    /// Minimum payload length (bytes) a packet must have to be classifiable.
    strategy_param: usize,
    #[clap(long = "csv-out", default_value = "entropy-dist-report.csv")]
    csv_out: PathBuf,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();
    let args: CliArgs = clap::Parser::parse();

    let corpora = load_corpora(
        &args.pt_pcap,
        &args.neg_pcap,
        &args.pt_src,
        &args.pt_dst,
        &args.neg_src,
        &args.pt_collection,
        &args.neg_collection,
    )?;

    let policy = InclusionPolicy::decide(&corpora.positive);
    log::info!("inclusion policy: keep_tls={} keep_http={}", policy.keep_tls, policy.keep_http);
    let positive = policy.apply(&corpora.positive);
    let negative = policy.apply(&corpora.negative);

    let strategy = EntropyDistributionStrategy::new(args.strategy_param, corpora.client_ips);
    let report = run_sweep(
        &strategy,
        &positive,
        &negative,
        corpora.negative_total,
        DEFAULT_SCORE_WEIGHT,
    );

    match &report.best_config {
        Some(config) => println!("best config: {}", strategy.interpret_config(config)),
        None => println!("no configuration produced a result"),
    }
    println!("TPR={:.4} FPR={:.4}", report.tpr, report.fpr);
    println!("wireshark filter: {}", report.wireshark_filter);

    write_csv(&args.csv_out, &report.rows)?;
    log::info!("wrote CSV export to {:?}", args.csv_out);

    Ok(())
}
