//! A ledger node: the blockchain plus its view of sibling nodes.
//!
//! One `Node` is built in `main` and shared with the HTTP handlers and the
//! background mining and sync loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info, warn};
use thiserror::Error;

use crate::blockchain::{Block, Blockchain, BlockchainError, TransactionRequest};
use crate::network::{PeerClient, PeerDirectory, PeerProbe};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Blockchain(#[from] BlockchainError),

    #[error("Mining task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub struct Node {
    ledger: Blockchain,
    peers: PeerDirectory,
    client: Arc<dyn PeerClient>,
    probe: Arc<dyn PeerProbe>,
    mining_interval: Duration,
    sync_interval: Duration,
    mining_started: AtomicBool,
    sync_started: AtomicBool,
}

impl Node {
    pub fn new(
        ledger: Blockchain,
        peers: PeerDirectory,
        client: Arc<dyn PeerClient>,
        probe: Arc<dyn PeerProbe>,
        mining_interval: Duration,
        sync_interval: Duration,
    ) -> Self {
        Node {
            ledger,
            peers,
            client,
            probe,
            mining_interval,
            sync_interval,
            mining_started: AtomicBool::new(false),
            sync_started: AtomicBool::new(false),
        }
    }

    pub fn ledger(&self) -> &Blockchain {
        &self.ledger
    }

    pub fn peers(&self) -> &PeerDirectory {
        &self.peers
    }

    fn pool_request(&self, request: &TransactionRequest) -> Result<(), BlockchainError> {
        let (transaction, public_key, signature) = request.validate()?;
        self.ledger.add_transaction(
            &transaction.sender_address,
            &transaction.recipient_address,
            transaction.value,
            Some(&public_key),
            Some(&signature),
        )
    }

    /// Pools a client transaction and forwards it to every known peer
    pub async fn submit_transaction(&self, request: TransactionRequest) -> Result<(), BlockchainError> {
        self.pool_request(&request)?;
        self.broadcast_transaction(&request).await;
        Ok(())
    }

    /// Pools a transaction forwarded by a peer. It is not forwarded again.
    pub fn receive_relayed_transaction(&self, request: &TransactionRequest) -> Result<(), BlockchainError> {
        self.pool_request(request)
    }

    async fn broadcast_transaction(&self, request: &TransactionRequest) {
        let peers = self.peers.peers();
        let relays = peers.iter().map(|peer| async move {
            if let Err(err) = self.client.relay_transaction(peer, request).await {
                debug!("Could not relay transaction to {}: {}", peer, err);
            }
        });
        join_all(relays).await;
    }

    /// Runs one mining attempt on the blocking pool
    pub async fn mine(&self) -> Result<Block, NodeError> {
        let ledger = self.ledger.clone();
        let block = tokio::task::spawn_blocking(move || ledger.mine()).await??;
        Ok(block)
    }

    /// Rebuilds the peer set from a fresh probe of the neighbourhood
    pub async fn sync_peers(&self) -> Vec<String> {
        self.peers.discover(self.probe.as_ref()).await
    }

    /// Fetches every peer's chain and adopts the longest valid one if it beats ours
    pub async fn resolve_conflicts(&self) -> bool {
        let peers = self.peers.peers();
        let fetches = peers.iter().map(|peer| async move {
            match self.client.fetch_chain(peer).await {
                Ok(chain) => Some(chain),
                Err(err) => {
                    debug!("Skipping peer {}: {}", peer, err);
                    None
                }
            }
        });
        let candidates: Vec<Vec<Block>> = join_all(fetches).await.into_iter().flatten().collect();

        let replaced = self.ledger.resolve_conflicts(candidates);
        if replaced {
            info!("Chain replaced by a longer peer chain, length now {}", self.ledger.len());
        }
        replaced
    }

    /// Starts the periodic mining loop once. Returns false if it was already running.
    pub fn start_mining(self: &Arc<Self>) -> bool {
        if self.mining_started.swap(true, Ordering::SeqCst) {
            return false;
        }

        let node = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(node.mining_interval);
            loop {
                ticker.tick().await;
                match node.mine().await {
                    Ok(_) | Err(NodeError::Blockchain(BlockchainError::EmptyPool)) => {}
                    Err(err) => warn!("Scheduled mining failed: {}", err),
                }
            }
        });

        info!("Started mining every {:?}", self.mining_interval);
        true
    }

    /// Starts the periodic discover-then-reconcile loop once
    pub fn start_sync(self: &Arc<Self>) -> bool {
        if self.sync_started.swap(true, Ordering::SeqCst) {
            return false;
        }

        let node = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(node.sync_interval);
            loop {
                ticker.tick().await;
                node.sync_peers().await;
                node.resolve_conflicts().await;
            }
        });

        true
    }
}
