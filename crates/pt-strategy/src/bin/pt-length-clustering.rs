//! CLI entry point for the length-clustering strategy (C5).

#![deny(unused_import_braces, unused_qualifications)]

use std::path::PathBuf;

use color_eyre::eyre::{bail, Result};
use pt_strategy::cli::load_corpora;
use pt_strategy::{run_length_clustering_sweep, write_csv, LengthClusteringStrategy, TlsMode};

/// Sweep the length-clustering strategy's bandwidth/top-k grid over a
/// positive and negative packet corpus.
#[derive(Debug, clap::Parser)]
struct CliArgs {
    pt_pcap: PathBuf,
    neg_pcap: PathBuf,
    pt_src: String,
    pt_dst: String,
    neg_src: String,
    pt_collection: String,
    neg_collection: String,
    /// TLS handling: "all", "only", "none", or "guess".
    strategy_param: String,
    #[clap(long = "csv-out", default_value = "length-clustering-report.csv")]
    csv_out: PathBuf,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();
    let args: CliArgs = clap::Parser::parse();

    let tls_mode = match args.strategy_param.as_str() {
        "all" => TlsMode::All,
        "only" => TlsMode::Only,
        "none" => TlsMode::None,
        "guess" => TlsMode::Guess,
        other => bail!("unknown TLS mode {other:?}, expected all/only/none/guess"),
    };

    let corpora = load_corpora(
        &args.pt_pcap,
        &args.neg_pcap,
        &args.pt_src,
        &args.pt_dst,
        &args.neg_src,
        &args.pt_collection,
        &args.neg_collection,
    )?;

    let strategy = LengthClusteringStrategy::new(corpora.client_ips, tls_mode);
    let report = run_length_clustering_sweep(
        &strategy,
        &corpora.positive,
        &corpora.negative,
        corpora.negative_total,
    );

    match &report.best_config {
        Some(config) => println!("best config: {}", strategy.interpret_config(config)),
        None => println!("no configuration reached the detection floor"),
    }
    println!("TPR={:.4} FPR={:.4}", report.tpr, report.fpr);
    println!("wireshark filter: {}", report.wireshark_filter);

    write_csv(&args.csv_out, &report.rows)?;
    log::info!("wrote CSV export to {:?}", args.csv_out);

    Ok(())
}
