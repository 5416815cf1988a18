//! End-to-end exercise of the C3 lifecycle (parse -> filter -> load -> split
//! -> positive-run -> negative-run -> score) over `FixturePacketSource` data,
//! one scenario per strategy. `pt-strategy` is the only crate where every
//! collaborator composes, so this is where the full pipeline gets a
//! scenario-level check rather than only unit-level ones.

use std::net::IpAddr;

use pt_strategy::collaborators::{FixturePacketSource, InMemoryTraceStore, PacketSource, TraceStore};
use pt_strategy::entropy_strategy::EntropyDistributionStrategy;
use pt_strategy::framework::{run_sweep, Strategy};
use pt_strategy::length_strategy::{run_length_clustering_sweep, LengthClusteringStrategy, TlsMode};
use pt_strategy::sdg_strategy::SdgStrategy;
use pt_strategy::DEFAULT_SCORE_WEIGHT;
use pt_traffic::{Packet, Proto, Subnet, TcpFlags, TcpInfo};

const CLIENT: &str = "10.0.0.5";
const PT_SERVER: &str = "8.8.8.8";
const PLAIN_SERVER: &str = "1.1.1.1";

fn client_ips() -> Vec<Subnet> {
    vec![Subnet::parse("10.0.0.0/24").unwrap()]
}

fn tcp_packet(time: f64, src: &str, dst: &str, payload: Vec<u8>) -> Packet {
    Packet {
        time,
        src: src.parse().unwrap(),
        dst: dst.parse().unwrap(),
        proto: Proto::Tcp,
        len: payload.len() as u32 + 40,
        tcp_info: Some(TcpInfo {
            payload,
            seq: 0,
            flags: TcpFlags::default(),
        }),
        tls_info: None,
        http_info: None,
    }
}

/// Loads a fixture through `FixturePacketSource` + `InMemoryTraceStore`,
/// mirroring what the CLI binaries do, and returns the retrieved packets plus
/// the collection's full count.
fn load_via_collaborators(packets: Vec<Packet>) -> (Vec<Packet>, usize) {
    let mut source = FixturePacketSource::new(packets);
    let mut store = InMemoryTraceStore::new();
    let id = source.load_and_insert_new("fixture", &mut store).unwrap();
    let total = store.count(id);
    let retrieved = store.retrieve(id, &Default::default());
    (retrieved, total)
}

#[test]
fn entropy_distribution_lifecycle_detects_noise_like_payloads() {
    let mut rng_state = 0x2545F4914F6CDD1Du64;
    let mut next_byte = || {
        rng_state ^= rng_state << 13;
        rng_state ^= rng_state >> 7;
        rng_state ^= rng_state << 17;
        (rng_state & 0xff) as u8
    };

    let positive: Vec<Packet> = (0..40)
        .map(|i| {
            let payload: Vec<u8> = (0..256).map(|_| next_byte()).collect();
            tcp_packet(i as f64, CLIENT, PT_SERVER, payload)
        })
        .collect();
    let negative: Vec<Packet> = (0..40)
        .map(|i| tcp_packet(i as f64, CLIENT, PLAIN_SERVER, vec![0x41; 256]))
        .collect();

    let (positive, _) = load_via_collaborators(positive);
    let (negative, negative_total) = load_via_collaborators(negative);

    let strategy = EntropyDistributionStrategy::new(20, client_ips());
    let filter = strategy.set_strategic_filter();
    let positive: Vec<Packet> = positive.into_iter().filter(|p| filter.matches(p)).collect();
    let negative: Vec<Packet> = negative.into_iter().filter(|p| filter.matches(p)).collect();

    let report = run_sweep(&strategy, &positive, &negative, negative_total, DEFAULT_SCORE_WEIGHT);

    assert!(report.best_config.is_some(), "a config should win the sweep");
    assert!(report.tpr > report.fpr, "TPR={} FPR={}", report.tpr, report.fpr);
    assert!(report.wireshark_filter.contains(PT_SERVER));
    assert!(!report.rows.is_empty());
}

#[test]
fn length_clustering_lifecycle_blocks_the_narrow_band_server() {
    let mut positive = Vec::new();
    positive.extend((0..80).map(|i| tcp_packet(i as f64, CLIENT, PT_SERVER, vec![0; 54])));
    positive.extend((0..80).map(|i| tcp_packet(i as f64, CLIENT, PT_SERVER, vec![0; 55])));
    let negative: Vec<Packet> = (0..80)
        .map(|i| tcp_packet(i as f64, CLIENT, PLAIN_SERVER, vec![0; 1200]))
        .collect();

    let (positive, _) = load_via_collaborators(positive);
    let (negative, negative_total) = load_via_collaborators(negative);

    let strategy = LengthClusteringStrategy::new(client_ips(), TlsMode::All);
    let report = run_length_clustering_sweep(&strategy, &positive, &negative, negative_total);

    let server_ip: IpAddr = PT_SERVER.parse().unwrap();
    assert!(report.blocked_ips.contains(&server_ip));
    assert_eq!(report.fpr, 0.0);
}

#[test]
fn sdg_lifecycle_runs_end_to_end_over_synthetic_traffic() {
    // Spaced 0.25s apart so the corpus spans ~75s, comfortably past the
    // strategy's 60s time-window delta -- a tighter spacing would collapse
    // the whole corpus into a single (empty, per `window_time`) window.
    let positive: Vec<Packet> = (0..300)
        .map(|i| {
            let payload = if i % 2 == 0 { vec![0x00; 64] } else { vec![0xff; 64] };
            tcp_packet(i as f64 * 0.25, CLIENT, PT_SERVER, payload)
        })
        .collect();
    let negative: Vec<Packet> = (0..300)
        .map(|i| tcp_packet(i as f64 * 0.25, CLIENT, PLAIN_SERVER, vec![0x20; 64]))
        .collect();

    let (positive, _) = load_via_collaborators(positive);
    let (negative, _) = load_via_collaborators(negative);

    let strategy = SdgStrategy::new(client_ips(), 1234)
        .with_window_size(10)
        .unwrap();
    let report = strategy.run(&positive, &negative).expect("pipeline should produce a report");

    assert!(!report.columns.is_empty());
    assert!(!report.outcomes.is_empty());
    assert!((0.0..=1.0).contains(&report.tpr));
    assert!((0.0..=1.0).contains(&report.fpr));

    // The recall phase should run over the same corpus without error and
    // report one fraction per retained percentile outcome.
    let recall = strategy.recall(&report, &positive).unwrap();
    assert_eq!(recall.len(), report.outcomes.len());
    for fraction in recall.values() {
        assert!((0.0..=1.0).contains(fraction));
    }
}

#[test]
fn invalid_window_size_is_rejected_before_any_run() {
    let err = SdgStrategy::new(client_ips(), 1).with_window_size(1).unwrap_err();
    assert!(matches!(err, pt_strategy::PtError::InvalidArgument(_)));
}
