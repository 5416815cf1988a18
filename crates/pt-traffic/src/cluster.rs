//! Mean-shift clustering of 1-D packet-length populations (C2.1/C2.2).
//!
//! The clustering-based length strategy (C5) only cares about which lengths
//! fall in the same cluster and how large each cluster is, so we cluster the
//! distinct lengths weighted by their multiplicity rather than the raw
//! multiset, then report clusters as sets of distinct lengths ordered by
//! total (weighted) population.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::packet::Packet;

/// MTU-class packets are excluded from clustering to avoid hardware
/// segmentation-offload bias. Distinct from the 1500 B threshold used by
/// the feature-binning logic in `features.rs` -- the two must not be
/// unified (see design notes).
pub const MTU_AVOIDANCE_THRESHOLD_CLUSTERING: u32 = 1400;

const MAX_ITERS: usize = 200;
const CONVERGENCE_EPS: f64 = 1e-6;

/// Cluster the payload length of every TCP packet whose payload length is
/// below the MTU-avoidance threshold. If `tls_only`, additionally require a
/// recognised TLS header.
pub fn cluster_tcp_payload_lengths(
    packets: &[Packet],
    tls_only: bool,
    bandwidth: f64,
) -> Vec<BTreeSet<u32>> {
    let lengths: Vec<u32> = packets
        .iter()
        .filter(|p| p.is_tcp())
        .filter(|p| !tls_only || p.tls_info.is_some())
        .filter_map(|p| p.tcp_info.as_ref())
        .map(|info| info.payload.len() as u32)
        .filter(|&len| len < MTU_AVOIDANCE_THRESHOLD_CLUSTERING)
        .collect();
    mean_shift_cluster(&lengths, bandwidth)
}

/// Cluster the frame length of every UDP packet whose frame length is below
/// the same MTU-avoidance threshold.
pub fn cluster_udp_lengths(packets: &[Packet], bandwidth: f64) -> Vec<BTreeSet<u32>> {
    let lengths: Vec<u32> = packets
        .iter()
        .filter(|p| p.is_udp())
        .map(|p| p.len)
        .filter(|&len| len < MTU_AVOIDANCE_THRESHOLD_CLUSTERING)
        .collect();
    mean_shift_cluster(&lengths, bandwidth)
}

/// 1-D mean-shift over the distinct values of `values`, weighted by
/// multiplicity: repeatedly shift every distinct value to the weighted mean
/// of points within `bandwidth` of its current position until positions
/// stop moving (or `MAX_ITERS` is hit), then merge converged positions
/// within `bandwidth` of one another.
///
/// Returns clusters ordered by total population descending, ties broken by
/// the lowest member value.
fn mean_shift_cluster(values: &[u32], bandwidth: f64) -> Vec<BTreeSet<u32>> {
    if values.is_empty() {
        return Vec::new();
    }
    let mut counts: BTreeMap<u32, u64> = BTreeMap::new();
    for &v in values {
        *counts.entry(v).or_insert(0) += 1;
    }
    let uniques: Vec<(f64, u64)> = counts.iter().map(|(&v, &c)| (v as f64, c)).collect();

    let mut positions: Vec<f64> = uniques.iter().map(|&(v, _)| v).collect();
    for _ in 0..MAX_ITERS {
        let mut max_move = 0.0_f64;
        let next: Vec<f64> = positions
            .iter()
            .map(|&pos| {
                let mut weight_sum = 0.0;
                let mut weight = 0.0;
                for &(v, c) in &uniques {
                    if (v - pos).abs() <= bandwidth {
                        weight_sum += v * c as f64;
                        weight += c as f64;
                    }
                }
                if weight > 0.0 {
                    weight_sum / weight
                } else {
                    pos
                }
            })
            .collect();
        for (old, new) in positions.iter().zip(next.iter()) {
            max_move = max_move.max((old - new).abs());
        }
        positions = next;
        if max_move < CONVERGENCE_EPS {
            break;
        }
    }

    // Merge converged positions within `bandwidth` by sweeping in sorted
    // order and starting a new cluster whenever the gap exceeds bandwidth.
    let mut order: Vec<usize> = (0..uniques.len()).collect();
    order.sort_by(|&a, &b| positions[a].partial_cmp(&positions[b]).unwrap());

    let mut cluster_of = vec![0usize; uniques.len()];
    let mut current = 0usize;
    for (k, &i) in order.iter().enumerate() {
        if k > 0 {
            let prev = order[k - 1];
            if (positions[i] - positions[prev]).abs() > bandwidth {
                current += 1;
            }
        }
        cluster_of[i] = current;
    }

    let mut clusters: BTreeMap<usize, (BTreeSet<u32>, u64)> = BTreeMap::new();
    for (i, &(v, c)) in uniques.iter().enumerate() {
        let entry = clusters
            .entry(cluster_of[i])
            .or_insert_with(|| (BTreeSet::new(), 0));
        entry.0.insert(v as u32);
        entry.1 += c;
    }

    let mut result: Vec<(BTreeSet<u32>, u64)> = clusters.into_values().collect();
    result.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| a.0.iter().next().cmp(&b.0.iter().next()))
    });
    result.into_iter().map(|(set, _)| set).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Proto, TcpFlags, TcpInfo};
    use std::net::IpAddr;

    fn tcp_packet(len: u32) -> Packet {
        Packet {
            time: 0.0,
            src: IpAddr::from([10, 0, 0, 1]),
            dst: IpAddr::from([10, 0, 0, 2]),
            proto: Proto::Tcp,
            len,
            tcp_info: Some(TcpInfo {
                payload: vec![0; len as usize],
                seq: 0,
                flags: TcpFlags::default(),
            }),
            tls_info: None,
            http_info: None,
        }
    }

    #[test]
    fn clusters_are_disjoint() {
        let mut packets = Vec::new();
        packets.extend((0..100).map(|_| tcp_packet(54)));
        packets.extend((0..100).map(|_| tcp_packet(55)));
        packets.extend((0..30).map(|_| tcp_packet(900)));
        let clusters = cluster_tcp_payload_lengths(&packets, false, 3.0);
        for i in 0..clusters.len() {
            for j in (i + 1)..clusters.len() {
                assert!(clusters[i].is_disjoint(&clusters[j]));
            }
        }
    }

    #[test]
    fn most_populous_cluster_first() {
        let mut packets = Vec::new();
        packets.extend((0..100).map(|_| tcp_packet(54)));
        packets.extend((0..100).map(|_| tcp_packet(55)));
        packets.extend((0..30).map(|_| tcp_packet(900)));
        let clusters = cluster_tcp_payload_lengths(&packets, false, 3.0);
        assert_eq!(clusters[0], BTreeSet::from([54, 55]));
    }

    #[test]
    fn mtu_class_packets_excluded() {
        let packets: Vec<Packet> = (0..10).map(|_| tcp_packet(1400)).collect();
        let clusters = cluster_tcp_payload_lengths(&packets, false, 3.0);
        assert!(clusters.is_empty());
    }

    #[test]
    fn empty_input_yields_empty_clusters() {
        assert!(cluster_tcp_payload_lengths(&[], false, 3.0).is_empty());
    }
}
