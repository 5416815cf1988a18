//! Fixed-size and time-based windowing, client/peer grouping, and timestamp
//! synchronisation over packet sequences (C2.3-C2.6).

use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::error::TrafficError;
use crate::packet::{Packet, Subnet};

pub type Window = Vec<Packet>;

/// `⌊len/n⌋` consecutive windows of exactly `n` packets; any remainder is
/// discarded.
pub fn window_fixed(packets: &[Packet], n: usize) -> Result<Vec<Window>, TrafficError> {
    if n < 1 {
        return Err(TrafficError::InvalidArgument(format!(
            "window size must be >= 1, got {n}"
        )));
    }
    Ok(packets.chunks(n).filter(|c| c.len() == n).map(|c| c.to_vec()).collect())
}

/// Time-bounded windows of span `delta_us` microseconds. Packets are
/// optionally sorted by time ascending first. Returns an empty list if the
/// whole span is shorter than `delta_us`.
pub fn window_time(
    packets: &[Packet],
    delta_us: i64,
    sort: bool,
) -> Result<Vec<Window>, TrafficError> {
    if delta_us <= 0 {
        return Err(TrafficError::InvalidArgument(format!(
            "delta must be > 0, got {delta_us}"
        )));
    }
    if packets.is_empty() {
        return Ok(Vec::new());
    }
    let mut ordered: Vec<Packet> = packets.to_vec();
    if sort {
        ordered.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap());
    }
    let t0 = ordered.iter().map(Packet::time_micros).min().unwrap();
    let t1 = ordered.iter().map(Packet::time_micros).max().unwrap();
    if t1 - t0 < delta_us {
        return Ok(Vec::new());
    }
    let num_windows = (((t1 - t0) as f64) / (delta_us as f64)).ceil() as usize;
    let mut windows: Vec<Window> = vec![Vec::new(); num_windows];
    for packet in ordered {
        let offset = packet.time_micros() - t0;
        let k = ((offset / delta_us) as usize).min(num_windows - 1);
        windows[k].push(packet);
    }
    Ok(windows)
}

/// Group packets by `(client subnet, peer IP)`, preserving chronological
/// order within each group, then split each group into fixed-size windows
/// of `n`, discarding the trailing partial window.
pub fn group_by_client_fixed(
    packets: &[Packet],
    clients: &[Subnet],
    n: usize,
) -> Result<BTreeMap<(String, String), Vec<Window>>, TrafficError> {
    if n < 1 {
        return Err(TrafficError::InvalidArgument(format!(
            "window size must be >= 1, got {n}"
        )));
    }
    let mut groups: BTreeMap<(String, String), Vec<Packet>> = BTreeMap::new();
    for packet in packets {
        let Some(client) = clients.iter().find(|c| {
            c.overlaps_ip(&packet.src) || c.overlaps_ip(&packet.dst)
        }) else {
            continue;
        };
        let peer: IpAddr = if client.overlaps_ip(&packet.src) {
            packet.dst
        } else {
            packet.src
        };
        groups
            .entry((client.to_string(), peer.to_string()))
            .or_default()
            .push(packet.clone());
    }
    let mut result = BTreeMap::new();
    for (key, group_packets) in groups {
        result.insert(key, window_fixed(&group_packets, n)?);
    }
    Ok(result)
}

/// Shift every packet's timestamp by `target_time - packets[0].time` (after
/// optional sort). `synchronise(synchronise(p, t), t') == synchronise(p, t')`.
pub fn synchronise(
    packets: &[Packet],
    target_time: f64,
    sort: bool,
) -> Result<Vec<Packet>, TrafficError> {
    if !target_time.is_finite() {
        return Err(TrafficError::InvalidArgument(format!(
            "target_time must be finite, got {target_time}"
        )));
    }
    if packets.is_empty() {
        return Ok(Vec::new());
    }
    let mut ordered: Vec<Packet> = packets.to_vec();
    if sort {
        ordered.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap());
    }
    let shift = target_time - ordered[0].time;
    for packet in &mut ordered {
        packet.time += shift;
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Proto;

    fn packet_at(time: f64) -> Packet {
        Packet {
            time,
            src: IpAddr::from([10, 0, 0, 1]),
            dst: IpAddr::from([10, 0, 0, 2]),
            proto: Proto::Tcp,
            len: 60,
            tcp_info: None,
            tls_info: None,
            http_info: None,
        }
    }

    #[test]
    fn fixed_windowing_drops_remainder() {
        let packets: Vec<Packet> = (0..10).map(|i| packet_at(i as f64)).collect();
        let windows = window_fixed(&packets, 3).unwrap();
        assert_eq!(windows.len(), 3);
        assert!(windows.iter().all(|w| w.len() == 3));
    }

    #[test]
    fn fixed_windowing_rejects_zero() {
        assert!(window_fixed(&[], 0).is_err());
    }

    #[test]
    fn time_windowing_scenario() {
        let times_us = [0i64, 250, 500, 1200, 2500];
        let packets: Vec<Packet> = times_us
            .iter()
            .map(|&us| packet_at(us as f64 / 1_000_000.0))
            .collect();
        let windows = window_time(&packets, 1000, true).unwrap();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].len(), 3);
        assert_eq!(windows[1].len(), 1);
        assert_eq!(windows[2].len(), 1);
    }

    #[test]
    fn time_windowing_concatenation_is_permutation() {
        let packets: Vec<Packet> = vec![
            packet_at(0.0005),
            packet_at(0.0001),
            packet_at(0.0025),
            packet_at(0.0012),
        ];
        let windows = window_time(&packets, 1000, true).unwrap();
        let total: usize = windows.iter().map(|w| w.len()).sum();
        assert_eq!(total, packets.len());
    }

    #[test]
    fn synchronise_is_idempotent_under_reanchoring() {
        let packets: Vec<Packet> = vec![packet_at(10.0), packet_at(11.0), packet_at(12.5)];
        let once = synchronise(&packets, 100.0, true).unwrap();
        let twice = synchronise(&once, 200.0, true).unwrap();
        let direct = synchronise(&packets, 200.0, true).unwrap();
        for (a, b) in twice.iter().zip(direct.iter()) {
            assert!((a.time - b.time).abs() < 1e-9);
        }
    }

    #[test]
    fn synchronise_rejects_non_finite_target() {
        let packets = vec![packet_at(0.0)];
        assert!(synchronise(&packets, f64::NAN, false).is_err());
    }
}
