// Network module
//
// Peer discovery by liveness probing and the HTTP client used to exchange
// chains and transactions with sibling nodes

pub mod client;
pub mod peers;

pub use client::{HttpPeerClient, NetworkError, PeerClient};
pub use peers::{detect_host, DiscoveryRange, PeerDirectory, PeerProbe, TcpProbe};
