//! Shared corpus-loading helper for the per-strategy CLI binaries (C9). Not
//! itself a `clap::Parser` struct -- each binary declares its own positional
//! arguments (§6: `pt_pcap neg_pcap pt_src pt_dst neg_src pt_collection
//! neg_collection strategy_param`) so that `strategy_param`'s type can match
//! what that strategy actually takes, then calls `load_corpora` with the
//! shared ones.

use std::fs;
use std::path::Path;

use pt_traffic::{Packet, Subnet};

use crate::collaborators::{
    Direction, FixturePacketSource, IpFilterTarget, InMemoryTraceStore, PacketSource, TraceFilter,
    TraceStore,
};
use crate::error::PtError;

pub struct LoadedCorpora {
    pub positive: Vec<Packet>,
    pub negative: Vec<Packet>,
    /// The negative collection's full count before any strategic filter is
    /// applied downstream, per §4.4's FPR-denominator convention.
    pub negative_total: usize,
    pub client_ips: Vec<Subnet>,
}

/// Load the positive/negative NDJSON fixtures, apply the `pt_src`/`pt_dst`/
/// `neg_src` IP filters through `FixturePacketSource`, and insert both into a
/// fresh in-memory trace store.
#[allow(clippy::too_many_arguments)]
pub fn load_corpora(
    pt_pcap: &Path,
    neg_pcap: &Path,
    pt_src: &str,
    pt_dst: &str,
    neg_src: &str,
    pt_collection: &str,
    neg_collection: &str,
) -> Result<LoadedCorpora, PtError> {
    let pt_contents = fs::read_to_string(pt_pcap)
        .map_err(|e| PtError::CollaboratorFailure(format!("reading {pt_pcap:?}: {e}")))?;
    let neg_contents = fs::read_to_string(neg_pcap)
        .map_err(|e| PtError::CollaboratorFailure(format!("reading {neg_pcap:?}: {e}")))?;

    let pt_src_subnet =
        Subnet::parse(pt_src).map_err(|e| PtError::InvalidArgument(format!("pt_src: {e}")))?;
    let pt_dst_subnet =
        Subnet::parse(pt_dst).map_err(|e| PtError::InvalidArgument(format!("pt_dst: {e}")))?;
    let neg_src_subnet =
        Subnet::parse(neg_src).map_err(|e| PtError::InvalidArgument(format!("neg_src: {e}")))?;

    let mut store = InMemoryTraceStore::new();

    let mut pt_source = FixturePacketSource::from_ndjson_str(&pt_contents)?;
    pt_source.set_ip_filter(vec![
        (IpFilterTarget::Cidr(pt_src_subnet.to_string()), Direction::Src),
        (IpFilterTarget::Cidr(pt_dst_subnet.to_string()), Direction::Dst),
    ]);
    let pt_id = pt_source.load_and_insert_new(pt_collection, &mut store)?;

    let mut neg_source = FixturePacketSource::from_ndjson_str(&neg_contents)?;
    neg_source.set_ip_filter(vec![(
        IpFilterTarget::Cidr(neg_src_subnet.to_string()),
        Direction::Src,
    )]);
    let neg_id = neg_source.load_and_insert_new(neg_collection, &mut store)?;

    let positive = store.retrieve(pt_id, &TraceFilter::default());
    let negative = store.retrieve(neg_id, &TraceFilter::default());
    let negative_total = store.count(neg_id);

    Ok(LoadedCorpora {
        positive,
        negative,
        negative_total,
        client_ips: vec![pt_src_subnet, neg_src_subnet],
    })
}
