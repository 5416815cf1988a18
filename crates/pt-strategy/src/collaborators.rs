//! Trace-store and packet-source collaborators (§6). Both are external
//! interfaces in the original design: the PCAP parser's internal structure
//! and the trace store's persistence backend are out of scope. What is
//! shipped here is the trait contract plus an in-memory default sufficient
//! to drive the engine end to end in tests and demo binaries.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use pt_traffic::{Packet, Subnet};

use crate::error::PtError;

pub type CollectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Direction {
    Src,
    Dst,
    Either,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum IpFilterTarget {
    Host(IpAddr),
    Cidr(String),
}

/// A restricted filter vocabulary: equality/inequality/presence predicates
/// over top-level and one-level-nested packet fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketField {
    Src,
    Dst,
    Proto,
    Len,
    HasTcpInfo,
    HasTlsInfo,
    HasHttpInfo,
    TcpSeq,
    TcpFlagAck,
    TcpFlagPsh,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum FieldValue {
    Ip(IpAddr),
    Str(String),
    U32(u32),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Present,
    Absent,
}

#[derive(Debug, Clone)]
pub struct FieldPredicate {
    pub field: PacketField,
    pub op: FilterOp,
    pub value: Option<FieldValue>,
}

/// Conjunction (AND) of field predicates.
#[derive(Debug, Clone, Default)]
pub struct TraceFilter(pub Vec<FieldPredicate>);

impl TraceFilter {
    pub fn matches(&self, packet: &Packet) -> bool {
        self.0.iter().all(|p| predicate_matches(p, packet))
    }
}

fn predicate_matches(predicate: &FieldPredicate, packet: &Packet) -> bool {
    let actual = field_value(predicate.field, packet);
    match predicate.op {
        FilterOp::Present => actual.is_some(),
        FilterOp::Absent => actual.is_none(),
        FilterOp::Eq => actual == predicate.value,
        FilterOp::Ne => actual != predicate.value,
    }
}

fn field_value(field: PacketField, packet: &Packet) -> Option<FieldValue> {
    match field {
        PacketField::Src => Some(FieldValue::Ip(packet.src)),
        PacketField::Dst => Some(FieldValue::Ip(packet.dst)),
        PacketField::Proto => Some(FieldValue::Str(packet.proto.to_string())),
        PacketField::Len => Some(FieldValue::U32(packet.len)),
        PacketField::HasTcpInfo => Some(FieldValue::Bool(packet.tcp_info.is_some())),
        PacketField::HasTlsInfo => Some(FieldValue::Bool(packet.tls_info.is_some())),
        PacketField::HasHttpInfo => Some(FieldValue::Bool(packet.http_info.is_some())),
        PacketField::TcpSeq => packet.tcp_info.as_ref().map(|t| FieldValue::U32(t.seq)),
        PacketField::TcpFlagAck => packet
            .tcp_info
            .as_ref()
            .map(|t| FieldValue::Bool(t.flags.ack)),
        PacketField::TcpFlagPsh => packet
            .tcp_info
            .as_ref()
            .map(|t| FieldValue::Bool(t.flags.psh)),
    }
}

pub trait TraceStore {
    fn insert(&mut self, description: &str, packets: Vec<Packet>) -> CollectionId;
    fn retrieve(&self, id: CollectionId, filter: &TraceFilter) -> Vec<Packet>;
    fn count(&self, id: CollectionId) -> usize;
    fn distinct(&self, id: CollectionId, field: PacketField) -> BTreeSet<FieldValue>;
}

#[derive(Debug, Default)]
pub struct InMemoryTraceStore {
    collections: BTreeMap<CollectionId, (String, Vec<Packet>)>,
    next_id: CollectionId,
}

impl InMemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TraceStore for InMemoryTraceStore {
    fn insert(&mut self, description: &str, packets: Vec<Packet>) -> CollectionId {
        let id = self.next_id;
        self.next_id += 1;
        log::debug!("trace-store: inserted collection {id} ({description}, {} packets)", packets.len());
        self.collections.insert(id, (description.to_owned(), packets));
        id
    }

    fn retrieve(&self, id: CollectionId, filter: &TraceFilter) -> Vec<Packet> {
        self.collections
            .get(&id)
            .map(|(_, packets)| {
                packets
                    .iter()
                    .filter(|p| filter.matches(p))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn count(&self, id: CollectionId) -> usize {
        self.collections.get(&id).map(|(_, p)| p.len()).unwrap_or(0)
    }

    fn distinct(&self, id: CollectionId, field: PacketField) -> BTreeSet<FieldValue> {
        self.collections
            .get(&id)
            .map(|(_, packets)| packets.iter().filter_map(|p| field_value(field, p)).collect())
            .unwrap_or_default()
    }
}

/// Mirrors the PCAP parser collaborator's contract. Real PCAP decoding is
/// out of scope; `FixturePacketSource` stands in for it, loading packets
/// already held in memory (or read from a newline-delimited JSON fixture).
pub trait PacketSource {
    fn set_ip_filter(&mut self, filters: Vec<(IpFilterTarget, Direction)>);
    fn load_and_insert_new(
        &mut self,
        description: &str,
        store: &mut dyn TraceStore,
    ) -> Result<CollectionId, PtError>;
}

pub struct FixturePacketSource {
    packets: Vec<Packet>,
    filters: Vec<(IpFilterTarget, Direction)>,
}

impl FixturePacketSource {
    pub fn new(packets: Vec<Packet>) -> Self {
        FixturePacketSource {
            packets,
            filters: Vec::new(),
        }
    }

    pub fn from_ndjson_str(contents: &str) -> Result<Self, PtError> {
        let mut packets = Vec::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            let packet: Packet = serde_json::from_str(line)
                .map_err(|e| PtError::CollaboratorFailure(format!("fixture parse error: {e}")))?;
            packets.push(packet);
        }
        Ok(Self::new(packets))
    }

    fn passes_filters(&self, packet: &Packet) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        self.filters.iter().any(|(target, direction)| {
            let matches_ip = |ip: &IpAddr| match target {
                IpFilterTarget::Host(h) => h == ip,
                IpFilterTarget::Cidr(cidr) => Subnet::parse(cidr)
                    .map(|s| s.overlaps_ip(ip))
                    .unwrap_or(false),
            };
            match direction {
                Direction::Src => matches_ip(&packet.src),
                Direction::Dst => matches_ip(&packet.dst),
                Direction::Either => matches_ip(&packet.src) || matches_ip(&packet.dst),
            }
        })
    }
}

impl PacketSource for FixturePacketSource {
    fn set_ip_filter(&mut self, filters: Vec<(IpFilterTarget, Direction)>) {
        self.filters = filters;
    }

    fn load_and_insert_new(
        &mut self,
        description: &str,
        store: &mut dyn TraceStore,
    ) -> Result<CollectionId, PtError> {
        let filtered: Vec<Packet> = self
            .packets
            .iter()
            .filter(|p| self.passes_filters(p))
            .cloned()
            .collect();
        log::info!(
            "fixture source: loaded {}/{} packets matching ip filter for '{description}'",
            filtered.len(),
            self.packets.len()
        );
        Ok(store.insert(description, filtered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pt_traffic::Proto;

    fn packet(src: &str, dst: &str) -> Packet {
        Packet {
            time: 0.0,
            src: src.parse().unwrap(),
            dst: dst.parse().unwrap(),
            proto: Proto::Tcp,
            len: 60,
            tcp_info: None,
            tls_info: None,
            http_info: None,
        }
    }

    #[test]
    fn trace_store_round_trip() {
        let mut store = InMemoryTraceStore::new();
        let id = store.insert("test", vec![packet("10.0.0.1", "8.8.8.8")]);
        assert_eq!(store.count(id), 1);
        let all = store.retrieve(id, &TraceFilter::default());
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn fixture_source_applies_ip_filter() {
        let mut source = FixturePacketSource::new(vec![
            packet("10.0.0.1", "8.8.8.8"),
            packet("192.168.1.1", "1.1.1.1"),
        ]);
        source.set_ip_filter(vec![(
            IpFilterTarget::Cidr("10.0.0.0/24".to_string()),
            Direction::Src,
        )]);
        let mut store = InMemoryTraceStore::new();
        let id = source.load_and_insert_new("pt", &mut store).unwrap();
        assert_eq!(store.count(id), 1);
    }
}
