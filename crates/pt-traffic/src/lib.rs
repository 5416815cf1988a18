//! Packet model, windowing, grouping, synchronisation, clustering, and
//! bidirectional feature extraction -- the traffic-statistics library
//! consumed by every detection strategy.

pub mod cluster;
pub mod error;
pub mod features;
pub mod packet;
pub mod window;

pub use cluster::{cluster_tcp_payload_lengths, cluster_udp_lengths};
pub use error::TrafficError;
pub use features::{window_features, FeatureRow, FeatureSelection, FeatureTag};
pub use packet::{HttpInfo, Packet, Proto, Subnet, TcpFlags, TcpInfo, TlsInfo};
pub use window::{group_by_client_fixed, synchronise, window_fixed, window_time, Window};
