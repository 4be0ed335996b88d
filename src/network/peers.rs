use std::collections::BTreeSet;
use std::net::{Ipv4Addr, UdpSocket};
use std::ops::RangeInclusive;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Liveness check for a candidate peer
#[async_trait]
pub trait PeerProbe: Send + Sync {
    async fn is_reachable(&self, host: &str, port: u16) -> bool;
}

/// Probes by opening a TCP connection with a short timeout
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        TcpProbe { timeout }
    }
}

#[async_trait]
impl PeerProbe for TcpProbe {
    async fn is_reachable(&self, host: &str, port: u16) -> bool {
        let target = format!("{}:{}", host, port);

        match timeout(self.timeout, TcpStream::connect(&target)).await {
            Ok(Ok(_)) => true,
            Ok(Err(err)) => {
                debug!("Probe of {} failed: {}", target, err);
                false
            }
            Err(_) => {
                debug!("Probe of {} timed out", target);
                false
            }
        }
    }
}

/// Finds the address this host uses for outbound traffic.
///
/// No packet is sent; connecting a UDP socket only selects a route.
pub fn detect_host() -> String {
    let local = UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("1.1.1.1:80")?;
            socket.local_addr()
        });

    match local {
        Ok(address) => address.ip().to_string(),
        Err(err) => {
            warn!("Could not detect host address, using loopback: {}", err);
            Ipv4Addr::LOCALHOST.to_string()
        }
    }
}

/// Which neighbouring addresses are worth probing
#[derive(Debug, Clone)]
pub struct DiscoveryRange {
    /// Added to the last octet of this host's IPv4 address
    pub host_offsets: RangeInclusive<u8>,
    pub ports: RangeInclusive<u16>,
}

impl Default for DiscoveryRange {
    fn default() -> Self {
        DiscoveryRange {
            host_offsets: 0..=3,
            ports: 3333..=3336,
        }
    }
}

/// Every `(host, port)` in range except this node's own address
pub fn candidate_addresses(host: &str, own_port: u16, range: &DiscoveryRange) -> Vec<(String, u16)> {
    let Ok(ip) = host.parse::<Ipv4Addr>() else {
        return Vec::new();
    };
    let [a, b, c, d] = ip.octets();

    let mut candidates = Vec::new();
    for port in range.ports.clone() {
        for offset in range.host_offsets.clone() {
            let Some(last) = d.checked_add(offset) else {
                continue;
            };
            let guess = Ipv4Addr::new(a, b, c, last).to_string();
            if guess == host && port == own_port {
                continue;
            }
            candidates.push((guess, port));
        }
    }
    candidates
}

/// The set of sibling nodes that answered the last discovery cycle
#[derive(Debug, Clone)]
pub struct PeerDirectory {
    host: String,
    port: u16,
    range: DiscoveryRange,
    peers: Arc<RwLock<Vec<String>>>,
}

impl PeerDirectory {
    pub fn new(host: impl Into<String>, port: u16, range: DiscoveryRange) -> Self {
        PeerDirectory {
            host: host.into(),
            port,
            range,
            peers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// This node's own `host:port`
    pub fn own_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Snapshot of the current peer set
    pub fn peers(&self) -> Vec<String> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Probes every candidate concurrently and replaces the peer set with the ones that
    /// answered. Nothing from earlier cycles is kept.
    pub async fn discover(&self, probe: &dyn PeerProbe) -> Vec<String> {
        let candidates = candidate_addresses(&self.host, self.port, &self.range);

        let checks = candidates.iter().map(|(host, port)| async move {
            if probe.is_reachable(host, *port).await {
                Some(format!("{}:{}", host, port))
            } else {
                None
            }
        });

        let found: BTreeSet<String> = join_all(checks).await.into_iter().flatten().collect();
        let peers: Vec<String> = found.into_iter().collect();

        if peers.is_empty() {
            info!("This node could not find neighbors");
        } else {
            info!("This node's neighbors are {:?}", peers);
        }

        *self.peers.write().unwrap_or_else(PoisonError::into_inner) = peers.clone();
        peers
    }
}
