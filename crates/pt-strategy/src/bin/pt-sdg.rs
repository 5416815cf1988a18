//! CLI entry point for the SDG strategy (C6).

#![deny(unused_import_braces, unused_qualifications)]

use std::path::PathBuf;

use color_eyre::eyre::Result;
use pt_strategy::cli::load_corpora;
use pt_strategy::{write_csv, SdgStrategy};

/// Run the SDG strategy's full windowed-feature/classifier/threshold
/// pipeline over a positive and negative packet corpus.
#[derive(Debug, clap::Parser)]
struct CliArgs {
    pt_pcap: PathBuf,
    neg_pcap: PathBuf,
    pt_src: String,
    pt_dst: String,
    neg_src: String,
    pt_collection: String,
    neg_collection: String,
    /// Feature-window size, in packets, per client/peer group.
    strategy_param: usize,
    #[clap(long = "seed", default_value_t = 0)]
    seed: u64,
    #[clap(long = "csv-out", default_value = "sdg-report.csv")]
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

    let strategy =
        SdgStrategy::new(corpora.client_ips, args.seed).with_window_size(args.strategy_param)?;
    let report = strategy.run(&corpora.positive, &corpora.negative)?;

    match &report.best_config {
        Some(config) => println!("best config: percentile={}", config.percentile),
        None => println!("no configuration produced a result"),
    }
    println!("TPR={:.4} FPR={:.4}", report.tpr, report.fpr);
    println!("wireshark filter: {}", report.wireshark_filter);

    write_csv(&args.csv_out, &report.rows)?;
    log::info!("wrote CSV export to {:?}", args.csv_out);

    Ok(())
}
