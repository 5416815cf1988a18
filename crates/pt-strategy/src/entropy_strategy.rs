//! Entropy-distribution strategy (C4): a hypothesis-voting detector over
//! per-packet TCP payloads, using the statistical-test battery of C1.

use std::collections::BTreeSet;
use std::net::IpAddr;

use ordered_float::OrderedFloat;
use pt_stats::{anderson_darling_block_test, ks_block_distribution_test, ks_uniform_test};
use pt_traffic::{Packet, Subnet};

use crate::collaborators::{FilterOp, PacketField, TraceFilter};
use crate::framework::{peer_ip, Strategy};

/// First N payload bytes considered by the KS-uniform test; the other two
/// tests consume the whole payload via their block partitioning.
const KS_UNIFORM_PREFIX: usize = 2048;

/// Minimum of the three "signals non-uniformity" criteria (§4.4).
pub const MIN_CRITERION: u8 = 1;
pub const MAX_CRITERION: u8 = 3;

const BLOCK_SIZES: [usize; 4] = [16, 32, 64, 128];
const P_THRESHOLDS: [f64; 2] = [0.1, 0.2];
const CRITERIA: [u8; 3] = [1, 2, 3];

/// Ordered `(block_size, p_threshold, criterion)` tuple; field order is the
/// tie-break of last resort (§4.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntropyConfig {
    pub block_size: usize,
    pub p_threshold: OrderedFloat<f64>,
    pub criterion: u8,
}

/// Whether TLS/HTTP-tagged packets are retained for analysis, decided once
/// per run from the positive corpus's population and applied symmetrically
/// to the negative corpus (§4.4 pre-run policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InclusionPolicy {
    pub keep_tls: bool,
    pub keep_http: bool,
}

/// Population share above which a packet class (TLS/HTTP) is retained
/// rather than excluded.
const INCLUSION_THRESHOLD: f64 = 0.10;

impl InclusionPolicy {
    /// Decide inclusion from `positive`'s own population (§4.4).
    pub fn decide(positive: &[Packet]) -> Self {
        if positive.is_empty() {
            return InclusionPolicy {
                keep_tls: true,
                keep_http: true,
            };
        }
        let total = positive.len() as f64;
        let tls_share = positive.iter().filter(|p| p.tls_info.is_some()).count() as f64 / total;
        let http_share = positive.iter().filter(|p| p.http_info.is_some()).count() as f64 / total;
        InclusionPolicy {
            keep_tls: tls_share >= INCLUSION_THRESHOLD,
            keep_http: http_share >= INCLUSION_THRESHOLD,
        }
    }

    /// Apply the same policy to `packets` (positive or negative corpus).
    pub fn apply(self, packets: &[Packet]) -> Vec<Packet> {
        packets
            .iter()
            .filter(|p| self.keep_tls || p.tls_info.is_none())
            .filter(|p| self.keep_http || p.http_info.is_none())
            .cloned()
            .collect()
    }
}

pub struct EntropyDistributionStrategy {
    /// Per-protocol minimum payload length below which a packet is never
    /// classifiable (the "narrowest plausible PT frame" floor).
    pub protocol_min_length: usize,
    pub client_ips: Vec<Subnet>,
}

impl EntropyDistributionStrategy {
    pub fn new(protocol_min_length: usize, client_ips: Vec<Subnet>) -> Self {
        EntropyDistributionStrategy {
            protocol_min_length,
            client_ips,
        }
    }

    /// Classify one TCP payload under `config`: count how many of the three
    /// tests meet or exceed `p_threshold`, then compare against `criterion`.
    /// Packets shorter than the classification floor are never classified
    /// (treated as a miss, not an error -- `InsufficientData` is recovered
    /// locally per §7).
    fn classify(&self, payload: &[u8], config: &EntropyConfig) -> bool {
        let min_len = self.protocol_min_length.max(config.block_size);
        if payload.len() < min_len {
            return false;
        }
        let prefix = &payload[..payload.len().min(KS_UNIFORM_PREFIX)];
        let p_threshold = config.p_threshold.0;

        let mut hits = 0usize;
        if ks_uniform_test(prefix).map(|p| p >= p_threshold).unwrap_or(false) {
            hits += 1;
        }
        if ks_block_distribution_test(payload, config.block_size)
            .map(|p| p >= p_threshold)
            .unwrap_or(false)
        {
            hits += 1;
        }
        if anderson_darling_block_test(payload, config.block_size)
            .map(|ad| ad.min_threshold >= p_threshold)
            .unwrap_or(false)
        {
            hits += 1;
        }
        hits >= config.criterion as usize
    }

    fn run(&self, config: &EntropyConfig, packets: &[Packet]) -> (usize, usize, BTreeSet<IpAddr>) {
        let mut classified = 0usize;
        let mut total = 0usize;
        let mut blocked = BTreeSet::new();
        for packet in packets {
            let Some(info) = packet.tcp_info.as_ref() else {
                continue;
            };
            total += 1;
            if self.classify(&info.payload, config) {
                classified += 1;
                if let Some(ip) = peer_ip(packet, &self.client_ips) {
                    blocked.insert(ip);
                }
            }
        }
        (classified, total, blocked)
    }
}

impl Strategy for EntropyDistributionStrategy {
    type Config = EntropyConfig;

    fn name(&self) -> &'static str {
        "entropy-distribution"
    }

    fn debug_tag(&self) -> &'static str {
        "C4/entropy"
    }

    fn set_strategic_filter(&self) -> TraceFilter {
        // Narrow to TCP traffic up front; TLS/HTTP retention is a separate,
        // corpus-population-driven decision applied by the caller via
        // `InclusionPolicy` before the sweep (it needs the whole positive
        // corpus to decide, which a single-packet predicate cannot express).
        TraceFilter(vec![crate::collaborators::FieldPredicate {
            field: PacketField::HasTcpInfo,
            op: FilterOp::Present,
            value: None,
        }])
    }

    fn configs(&self) -> Vec<EntropyConfig> {
        let mut configs = Vec::with_capacity(BLOCK_SIZES.len() * P_THRESHOLDS.len() * CRITERIA.len());
        for &block_size in &BLOCK_SIZES {
            for &p_threshold in &P_THRESHOLDS {
                for &criterion in &CRITERIA {
                    configs.push(EntropyConfig {
                        block_size,
                        p_threshold: OrderedFloat(p_threshold),
                        criterion,
                    });
                }
            }
        }
        configs
    }

    fn interpret_config(&self, config: &EntropyConfig) -> String {
        format!(
            "block_size={} p_threshold={} criterion={}",
            config.block_size, config.p_threshold.0, config.criterion
        )
    }

    fn config_specific_penalisation(&self, config: &EntropyConfig) -> f64 {
        0.1 * (config.criterion.saturating_sub(MIN_CRITERION)) as f64
    }

    fn positive_run(&self, config: &EntropyConfig, positive: &[Packet]) -> (f64, BTreeSet<IpAddr>) {
        let (classified, total, blocked) = self.run(config, positive);
        let tpr = if total == 0 {
            0.0
        } else {
            classified as f64 / total as f64
        };
        (tpr, blocked)
    }

    fn negative_run(&self, config: &EntropyConfig, negative: &[Packet], negative_total: usize) -> f64 {
        let (classified, _, _) = self.run(config, negative);
        if negative_total == 0 {
            0.0
        } else {
            classified as f64 / negative_total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pt_traffic::{Proto, TcpFlags, TcpInfo};
    use rand::RngCore;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    fn tcp_packet(payload: Vec<u8>) -> Packet {
        Packet {
            time: 0.0,
            src: IpAddr::from([10, 0, 0, 1]),
            dst: IpAddr::from([8, 8, 8, 8]),
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

    fn client_ips() -> Vec<Subnet> {
        vec![Subnet::parse("10.0.0.0/24").unwrap()]
    }

    #[test]
    fn random_payload_classifies_positive_at_every_criterion() {
        let mut rng = ChaCha12Rng::seed_from_u64(99);
        let mut payload = vec![0u8; 2048];
        rng.fill_bytes(&mut payload);
        let strategy = EntropyDistributionStrategy::new(20, client_ips());
        for &criterion in &CRITERIA {
            let config = EntropyConfig {
                block_size: 32,
                p_threshold: OrderedFloat(0.1),
                criterion,
            };
            assert!(strategy.classify(&payload, &config), "criterion={criterion}");
        }
    }

    #[test]
    fn repeated_byte_payload_never_classifies_positive() {
        let payload = vec![0x41u8; 2048];
        let strategy = EntropyDistributionStrategy::new(20, client_ips());
        for &criterion in &CRITERIA {
            let config = EntropyConfig {
                block_size: 32,
                p_threshold: OrderedFloat(0.1),
                criterion,
            };
            assert!(!strategy.classify(&payload, &config), "criterion={criterion}");
        }
    }

    #[test]
    fn inclusion_policy_keeps_classes_above_ten_percent() {
        let mut packets = Vec::new();
        for _ in 0..20 {
            let mut p = tcp_packet(vec![1; 30]);
            p.tls_info = Some(pt_traffic::TlsInfo { content_type: 22 });
            packets.push(p);
        }
        for _ in 0..80 {
            packets.push(tcp_packet(vec![1; 30]));
        }
        let policy = InclusionPolicy::decide(&packets);
        assert!(policy.keep_tls);
        assert!(!policy.keep_http);
        let filtered = policy.apply(&packets);
        assert_eq!(filtered.len(), 100);
    }

    #[test]
    fn inclusion_policy_drops_classes_below_ten_percent() {
        let mut packets = Vec::new();
        for _ in 0..5 {
            let mut p = tcp_packet(vec![1; 30]);
            p.tls_info = Some(pt_traffic::TlsInfo { content_type: 22 });
            packets.push(p);
        }
        for _ in 0..95 {
            packets.push(tcp_packet(vec![1; 30]));
        }
        let policy = InclusionPolicy::decide(&packets);
        assert!(!policy.keep_tls);
        let filtered = policy.apply(&packets);
        assert_eq!(filtered.iter().filter(|p| p.tls_info.is_some()).count(), 0);
    }

    #[test]
    fn penalisation_grows_with_criterion() {
        let strategy = EntropyDistributionStrategy::new(20, client_ips());
        let low = EntropyConfig {
            block_size: 16,
            p_threshold: OrderedFloat(0.1),
            criterion: 1,
        };
        let high = EntropyConfig {
            block_size: 16,
            p_threshold: OrderedFloat(0.1),
            criterion: 3,
        };
        assert!(
            strategy.config_specific_penalisation(&high)
                > strategy.config_specific_penalisation(&low)
        );
    }
}
