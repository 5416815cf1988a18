//! Bidirectional feature extraction over a window of packets (C2.7).

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use pt_stats::byte_entropy;

use crate::packet::{Packet, Subnet};

pub type FeatureRow = BTreeMap<String, f64>;

/// Payloads exceeding this length are apportioned across bins as if they
/// were segmented by the NIC (large-segmentation offload). Distinct from
/// the 1400 B clustering-exclusion threshold in `cluster.rs` -- the two
/// must not be unified.
const MTU_AVOIDANCE_THRESHOLD_BINNING: u32 = 1500;
const TCP_LEN_BIN_WIDTH: u32 = 100;

const INTERVAL_BIN_EDGES: [f64; 4] = [0.0, 1_000.0, 10_000.0, 100_000.0];
const INTERVAL_CEILING_US: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum FeatureTag {
    #[strum(serialize = "ENTROPY")]
    Entropy,
    #[strum(serialize = "INTERVAL")]
    Interval,
    #[strum(serialize = "INTERVAL_BINS")]
    IntervalBins,
    #[strum(serialize = "TCP_LEN")]
    TcpLen,
    #[strum(serialize = "TCP_LEN_BINS")]
    TcpLenBins,
    #[strum(serialize = "PSH")]
    Psh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSelection {
    pub entropy: bool,
    pub interval: bool,
    pub interval_bins: bool,
    pub tcp_len: bool,
    pub tcp_len_bins: bool,
    pub psh: bool,
}

impl FeatureSelection {
    pub fn all() -> Self {
        FeatureSelection {
            entropy: true,
            interval: true,
            interval_bins: true,
            tcp_len: true,
            tcp_len_bins: true,
            psh: true,
        }
    }

    pub fn none() -> Self {
        FeatureSelection {
            entropy: false,
            interval: false,
            interval_bins: false,
            tcp_len: false,
            tcp_len_bins: false,
            psh: false,
        }
    }

    /// An empty selection means "all features enabled".
    pub fn from_tags(tags: &[FeatureTag]) -> Self {
        if tags.is_empty() {
            return Self::all();
        }
        let mut sel = Self::none();
        for tag in tags {
            match tag {
                FeatureTag::Entropy => sel.entropy = true,
                FeatureTag::Interval => sel.interval = true,
                FeatureTag::IntervalBins => sel.interval_bins = true,
                FeatureTag::TcpLen => sel.tcp_len = true,
                FeatureTag::TcpLenBins => sel.tcp_len_bins = true,
                FeatureTag::Psh => sel.psh = true,
            }
        }
        sel
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Upstream,
    Downstream,
}

impl Direction {
    fn suffix(self) -> &'static str {
        match self {
            Direction::Upstream => "upstream",
            Direction::Downstream => "downstream",
        }
    }
}

/// Partition `window` into upstream/downstream subsets, compute the
/// bidirectional feature row, and report which peer and client IPs were
/// seen. Non-TCP packets never contribute a feature value (all defined
/// features are TCP-payload features) but do count towards direction
/// packet totals used to normalise bin counts.
pub fn window_features(
    window: &[Packet],
    client_ips: &[Subnet],
    selection: &FeatureSelection,
) -> (FeatureRow, BTreeSet<IpAddr>, BTreeSet<IpAddr>) {
    let mut upstream = Vec::new();
    let mut downstream = Vec::new();
    let mut peer_ips_seen = BTreeSet::new();
    let mut client_ips_seen = BTreeSet::new();

    for packet in window {
        let src_is_client = client_ips.iter().any(|c| c.overlaps_ip(&packet.src));
        let dst_is_client = client_ips.iter().any(|c| c.overlaps_ip(&packet.dst));
        if src_is_client {
            upstream.push(packet);
            peer_ips_seen.insert(packet.dst);
            client_ips_seen.insert(packet.src);
        } else if dst_is_client {
            downstream.push(packet);
            peer_ips_seen.insert(packet.src);
            client_ips_seen.insert(packet.dst);
        }
    }

    let mut row = FeatureRow::new();
    let up_down_ratio = if !upstream.is_empty() && !downstream.is_empty() {
        upstream.len() as f64 / downstream.len() as f64
    } else {
        0.0
    };
    row.insert("up_down_ratio".to_string(), up_down_ratio);

    for (direction, packets) in [
        (Direction::Upstream, &upstream),
        (Direction::Downstream, &downstream),
    ] {
        extend_direction_features(&mut row, direction, packets, selection);
    }

    (row, peer_ips_seen, client_ips_seen)
}

/// Insert the documented zero defaults (§4.2.7) for every feature selected,
/// used when a direction has at most one packet to analyse.
fn insert_direction_defaults(row: &mut FeatureRow, suffix: &str, selection: &FeatureSelection) {
    if selection.entropy {
        row.insert(format!("mean_entropy_{suffix}"), 0.0);
        row.insert(format!("max_entropy_{suffix}"), 0.0);
        row.insert(format!("min_entropy_{suffix}"), 0.0);
    }
    if selection.interval {
        row.insert(format!("mean_interval_{suffix}"), INTERVAL_CEILING_US);
    }
    if selection.interval_bins {
        for &lo in &INTERVAL_BIN_EDGES {
            let lo_int = lo as i64;
            row.insert(format!("bin_{lo_int}_interval_{suffix}"), 0.0);
        }
    }
    if selection.tcp_len {
        row.insert(format!("top1_tcp_len_{suffix}"), 0.0);
        row.insert(format!("top2_tcp_len_{suffix}"), 0.0);
        row.insert(format!("most_frequent_tcp_len_{suffix}"), 0.0);
        row.insert(format!("mean_tcp_len_{suffix}"), 0.0);
    }
    if selection.tcp_len_bins {
        let num_bins = (MTU_AVOIDANCE_THRESHOLD_BINNING / TCP_LEN_BIN_WIDTH) as usize;
        for i in 0..num_bins {
            let lo = i as u32 * TCP_LEN_BIN_WIDTH;
            row.insert(format!("bin_{lo}_tcplen_{suffix}"), 0.0);
        }
    }
    if selection.psh {
        row.insert(format!("push_ratio_{suffix}"), 0.0);
    }
}

fn extend_direction_features(
    row: &mut FeatureRow,
    direction: Direction,
    packets: &[&Packet],
    selection: &FeatureSelection,
) {
    let suffix = direction.suffix();
    let direction_packet_count = packets.len().max(1) as f64;

    // A direction with at most one packet has no meaningful intervals,
    // distributions, or ratios; every selected feature defaults to zero
    // (interval's ceiling instead) rather than being computed from the lone
    // packet (§4.2.7).
    if packets.len() <= 1 {
        insert_direction_defaults(row, suffix, selection);
        return;
    }

    let tcp_packets: Vec<&Packet> = packets.iter().copied().filter(|p| p.is_tcp()).collect();

    if selection.entropy {
        let (mean_e, max_e, min_e) = if tcp_packets.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let entropies: Vec<f64> = tcp_packets
                .iter()
                .filter_map(|p| p.tcp_info.as_ref())
                .map(|info| byte_entropy(&info.payload))
                .collect();
            let mean = entropies.iter().sum::<f64>() / entropies.len() as f64;
            let max = entropies.iter().cloned().fold(f64::MIN, f64::max);
            let min = entropies.iter().cloned().fold(f64::MAX, f64::min);
            (mean, max, min)
        };
        row.insert(format!("mean_entropy_{suffix}"), mean_e);
        row.insert(format!("max_entropy_{suffix}"), max_e);
        row.insert(format!("min_entropy_{suffix}"), min_e);
    }

    // First-occurrence deduplicated inter-arrival intervals, shared by
    // INTERVAL and INTERVAL_BINS.
    let intervals_us: Vec<f64> = if selection.interval || selection.interval_bins {
        first_occurrence_intervals_us(&tcp_packets)
    } else {
        Vec::new()
    };

    if selection.interval {
        let value = if intervals_us.is_empty() {
            INTERVAL_CEILING_US
        } else {
            intervals_us.iter().sum::<f64>() / intervals_us.len() as f64
        };
        row.insert(format!("mean_interval_{suffix}"), value);
    }

    if selection.interval_bins {
        let mut counts = vec![0u64; INTERVAL_BIN_EDGES.len()];
        for &delta in &intervals_us {
            if delta >= INTERVAL_CEILING_US {
                continue;
            }
            for (i, &lo) in INTERVAL_BIN_EDGES.iter().enumerate().rev() {
                if delta >= lo {
                    counts[i] += 1;
                    break;
                }
            }
        }
        for (&lo, &count) in INTERVAL_BIN_EDGES.iter().zip(counts.iter()) {
            let lo_int = lo as i64;
            row.insert(
                format!("bin_{lo_int}_interval_{suffix}"),
                count as f64 / direction_packet_count,
            );
        }
    }

    if selection.tcp_len {
        let lengths: Vec<u32> = tcp_packets
            .iter()
            .filter_map(|p| p.tcp_info.as_ref())
            .map(|info| info.payload.len() as u32)
            .collect();
        let mut counts: BTreeMap<u32, u64> = BTreeMap::new();
        for &len in &lengths {
            *counts.entry(len).or_insert(0) += 1;
        }

        // Historical quirk, preserved deliberately: the reference
        // implementation sorts the length/count pairs ASCENDING by count
        // before taking indices 0 and 1, so `top1`/`top2` are actually the
        // two RAREST lengths despite their name. Downstream strategies
        // depend on this exact behaviour for reproducible detection
        // results; do not "fix" it here.
        let mut by_count_ascending: Vec<(u32, u64)> =
            counts.iter().map(|(&len, &c)| (len, c)).collect();
        by_count_ascending.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let top1 = by_count_ascending.first().map(|&(len, _)| len as f64).unwrap_or(0.0);
        let top2 = by_count_ascending
            .get(1)
            .map(|&(len, _)| len as f64)
            .unwrap_or(top1);
        row.insert(format!("top1_tcp_len_{suffix}"), top1);
        row.insert(format!("top2_tcp_len_{suffix}"), top2);

        // Additive, correctly-named counterpart: the actual mode.
        let mut by_count_descending = by_count_ascending.clone();
        by_count_descending.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let most_frequent = by_count_descending
            .first()
            .map(|&(len, _)| len as f64)
            .unwrap_or(0.0);
        row.insert(format!("most_frequent_tcp_len_{suffix}"), most_frequent);

        let mean_len = if lengths.is_empty() {
            0.0
        } else {
            lengths.iter().map(|&l| l as f64).sum::<f64>() / lengths.len() as f64
        };
        row.insert(format!("mean_tcp_len_{suffix}"), mean_len);
    }

    if selection.tcp_len_bins {
        let num_bins = (MTU_AVOIDANCE_THRESHOLD_BINNING / TCP_LEN_BIN_WIDTH) as usize;
        let mut counts = vec![0u64; num_bins];
        for p in &tcp_packets {
            let Some(info) = p.tcp_info.as_ref() else { continue };
            let len = info.payload.len() as u32;
            if len > MTU_AVOIDANCE_THRESHOLD_BINNING {
                let full_segments = len / MTU_AVOIDANCE_THRESHOLD_BINNING;
                counts[num_bins - 1] += full_segments as u64;
                let remainder = len % MTU_AVOIDANCE_THRESHOLD_BINNING;
                let idx = ((remainder / TCP_LEN_BIN_WIDTH) as usize).min(num_bins - 1);
                counts[idx] += 1;
            } else {
                // A payload of exactly 1500 bytes falls in neither the
                // overflow branch above nor any half-open `[lo, hi)` bin
                // (the last bin is `[1400, 1500)`), so it is left uncounted
                // rather than clamped into the top bin.
                let idx = (len / TCP_LEN_BIN_WIDTH) as usize;
                if idx < num_bins {
                    counts[idx] += 1;
                }
            }
        }
        for (i, &count) in counts.iter().enumerate() {
            let lo = i as u32 * TCP_LEN_BIN_WIDTH;
            row.insert(
                format!("bin_{lo}_tcplen_{suffix}"),
                count as f64 / direction_packet_count,
            );
        }
    }

    if selection.psh {
        let ack_count = tcp_packets
            .iter()
            .filter(|p| p.tcp_info.as_ref().is_some_and(|i| i.flags.ack))
            .count();
        let ack_psh_count = tcp_packets
            .iter()
            .filter(|p| {
                p.tcp_info
                    .as_ref()
                    .is_some_and(|i| i.flags.ack && i.flags.psh)
            })
            .count();
        let ratio = if ack_count == 0 {
            0.0
        } else {
            ack_psh_count as f64 / ack_count as f64
        };
        row.insert(format!("push_ratio_{suffix}"), ratio);
    }
}

fn first_occurrence_intervals_us(tcp_packets: &[&Packet]) -> Vec<f64> {
    let mut seen_seqs = BTreeSet::new();
    let mut times_us = Vec::new();
    for p in tcp_packets {
        let Some(info) = p.tcp_info.as_ref() else { continue };
        if seen_seqs.insert(info.seq) {
            times_us.push(p.time_micros() as f64);
        }
    }
    times_us.windows(2).map(|w| w[1] - w[0]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Proto, TcpFlags, TcpInfo};

    fn client() -> Vec<Subnet> {
        vec![Subnet::parse("10.0.0.0/24").unwrap()]
    }

    fn packet(time: f64, src: &str, dst: &str, payload_len: usize, seq: u32) -> Packet {
        Packet {
            time,
            src: src.parse().unwrap(),
            dst: dst.parse().unwrap(),
            proto: Proto::Tcp,
            len: 40 + payload_len as u32,
            tcp_info: Some(TcpInfo {
                payload: vec![0xAB; payload_len],
                seq,
                flags: TcpFlags {
                    ack: true,
                    ..Default::default()
                },
            }),
            tls_info: None,
            http_info: None,
        }
    }

    #[test]
    fn direction_counts_never_exceed_window_size() {
        let window = vec![
            packet(0.0, "10.0.0.5", "8.8.8.8", 50, 1),
            packet(0.1, "8.8.8.8", "10.0.0.5", 60, 2),
        ];
        let (row, peers, clients) = window_features(&window, &client(), &FeatureSelection::all());
        assert_eq!(peers.len(), 1);
        assert_eq!(clients.len(), 1);
        for (_, &bin_value) in row.iter().filter(|(k, _)| k.starts_with("bin_")) {
            assert!(bin_value <= 1.0 + 1e-9);
        }
    }

    #[test]
    fn sparse_direction_defaults() {
        let window = vec![packet(0.0, "10.0.0.5", "8.8.8.8", 50, 1)];
        let (row, _, _) = window_features(&window, &client(), &FeatureSelection::all());
        assert_eq!(row["mean_entropy_downstream"], 0.0);
        assert_eq!(row["mean_interval_downstream"], INTERVAL_CEILING_US);
    }

    #[test]
    fn single_packet_direction_defaults_tcp_len_and_psh_to_zero() {
        // Upstream holds exactly one TCP packet; downstream is empty.
        let window = vec![packet(0.0, "10.0.0.5", "8.8.8.8", 50, 1)];
        let (row, _, _) = window_features(&window, &client(), &FeatureSelection::all());
        assert_eq!(row["top1_tcp_len_upstream"], 0.0);
        assert_eq!(row["top2_tcp_len_upstream"], 0.0);
        assert_eq!(row["most_frequent_tcp_len_upstream"], 0.0);
        assert_eq!(row["mean_tcp_len_upstream"], 0.0);
        assert_eq!(row["push_ratio_upstream"], 0.0);
        for (key, &value) in row.iter().filter(|(k, _)| k.starts_with("bin_") && k.ends_with("_tcplen_upstream")) {
            assert_eq!(value, 0.0, "{key} should default to zero");
        }
    }

    #[test]
    fn payload_of_exactly_mtu_threshold_is_bucketed_into_no_bin() {
        let mut window = Vec::new();
        for i in 0..3 {
            window.push(packet(i as f64, "10.0.0.5", "8.8.8.8", 1500, i));
        }
        window.push(packet(3.0, "8.8.8.8", "10.0.0.5", 10, 99));
        let (row, _, _) = window_features(&window, &client(), &FeatureSelection::all());
        let total: f64 = row
            .iter()
            .filter(|(k, _)| k.starts_with("bin_") && k.ends_with("_tcplen_upstream"))
            .map(|(_, &v)| v)
            .sum();
        assert_eq!(total, 0.0);
    }

    #[test]
    fn top1_top2_are_the_rarest_lengths_not_the_most_frequent() {
        // Three packets of length 10 (common), one of length 99 (rare).
        let mut window = Vec::new();
        for i in 0..3 {
            window.push(packet(i as f64, "10.0.0.5", "8.8.8.8", 10, i));
        }
        window.push(packet(3.0, "10.0.0.5", "8.8.8.8", 99, 99));
        let (row, _, _) = window_features(&window, &client(), &FeatureSelection::all());
        assert_eq!(row["top1_tcp_len_upstream"], 99.0);
        assert_eq!(row["most_frequent_tcp_len_upstream"], 10.0);
    }
}
