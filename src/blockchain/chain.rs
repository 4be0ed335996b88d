use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::block::{Block, Hash};
use super::crypto::{DigitalSignature, PublicKeyHex};
use super::pow::{self, MINING_DIFFICULTY, MINING_REWARD};
use super::transaction::{Transaction, TransactionError};

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Rejected transaction: {0}")]
    RejectedTransaction(#[from] TransactionError),

    #[error("Transaction pool is empty, nothing to mine")]
    EmptyPool,

    #[error("Chain changed while mining, result discarded")]
    StaleMiningSnapshot,

    #[error("Invalid chain: {0}")]
    InvalidForeignChain(String),
}

/// Wire envelope for a full chain
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    pub chain: Vec<Block>,
}

/// Ledger policy knobs
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Address credited with mining rewards
    pub miner_address: String,

    /// Mining difficulty (number of leading zero hex digits required in the proof hash)
    pub difficulty: usize,

    /// Mining reward
    pub mining_reward: f64,

    /// Worker threads used by the proof-of-work search
    pub mining_threads: usize,

    /// Reject transfers exceeding the sender's committed balance
    pub enforce_balance_check: bool,
}

impl LedgerConfig {
    pub fn new(miner_address: impl Into<String>) -> Self {
        LedgerConfig {
            miner_address: miner_address.into(),
            difficulty: MINING_DIFFICULTY,
            mining_reward: MINING_REWARD,
            mining_threads: 1,
            enforce_balance_check: false,
        }
    }
}

#[derive(Debug)]
struct LedgerState {
    chain: Vec<Block>,
    pool: Vec<Transaction>,
}

impl LedgerState {
    fn last_block(&self) -> &Block {
        // The chain always holds at least the genesis block
        &self.chain[self.chain.len() - 1]
    }
}

/// Everything a proof-of-work search needs, captured under the lock
#[derive(Debug)]
struct MiningJob {
    previous_hash: Hash,
    transactions: Vec<Transaction>,
    pooled: usize,
    cancel: Arc<AtomicBool>,
}

/// The ledger: canonical chain plus pending-transaction pool
#[derive(Debug, Clone)]
pub struct Blockchain {
    /// Chain and pool; every mutation goes through the write lock
    state: Arc<RwLock<LedgerState>>,

    /// Held for the whole of `mine` so one search runs at a time
    mining: Arc<Mutex<()>>,

    /// Cancel flag of the search in flight, raised when the chain is replaced
    cancel: Arc<Mutex<Arc<AtomicBool>>>,

    config: Arc<LedgerConfig>,
}

impl Blockchain {
    /// Creates a new blockchain holding only the genesis block
    pub fn new(config: LedgerConfig) -> Self {
        Blockchain {
            state: Arc::new(RwLock::new(LedgerState {
                chain: vec![Block::genesis()],
                pool: Vec::new(),
            })),
            mining: Arc::new(Mutex::new(())),
            cancel: Arc::new(Mutex::new(Arc::new(AtomicBool::new(false)))),
            config: Arc::new(config),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_slot(&self) -> MutexGuard<'_, Arc<AtomicBool>> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn difficulty(&self) -> usize {
        self.config.difficulty
    }

    /// Gets the last block in the chain
    pub fn last_block(&self) -> Block {
        self.read().last_block().clone()
    }

    /// Gets the entire blockchain
    pub fn chain(&self) -> Vec<Block> {
        self.read().chain.clone()
    }

    pub fn len(&self) -> usize {
        self.read().chain.len()
    }

    /// Always false: the genesis block is never removed
    pub fn is_empty(&self) -> bool {
        self.read().chain.is_empty()
    }

    /// Gets all pending transactions
    pub fn pool(&self) -> Vec<Transaction> {
        self.read().pool.clone()
    }

    /// Validates and pools a transaction.
    ///
    /// Reward-sender transactions skip signature checks. Everything else needs a public
    /// key and a signature over the transaction digest.
    pub fn add_transaction(
        &self,
        sender: &str,
        recipient: &str,
        value: f64,
        public_key: Option<&PublicKeyHex>,
        signature: Option<&DigitalSignature>,
    ) -> Result<(), BlockchainError> {
        let transaction = Transaction::new(sender, recipient, value);

        if !transaction.is_reward() {
            let (public_key, signature) = match (public_key, signature) {
                (Some(public_key), Some(signature)) => (public_key, signature),
                _ => {
                    return Err(TransactionError::MissingFields(
                        "sender_public_key, signature".to_string(),
                    )
                    .into())
                }
            };

            if !transaction.verify(public_key, signature) {
                warn!("Could not verify transaction from {}", sender);
                return Err(TransactionError::InvalidSignature.into());
            }
        }

        let mut state = self.write();

        if self.config.enforce_balance_check && !transaction.is_reward() {
            let available = balance_of(&state.chain, sender);
            if available < value {
                warn!("Not enough balance in wallet {}", sender);
                return Err(TransactionError::InsufficientFunds {
                    required: value,
                    available,
                }
                .into());
            }
        }

        state.pool.push(transaction);
        Ok(())
    }

    /// Net amount received by `address` over the committed chain. The pool is not counted.
    pub fn calculate_balance(&self, address: &str) -> f64 {
        balance_of(&self.read().chain, address)
    }

    /// Seals the current pool into a new block and empties the pool
    pub fn create_block(&self, nonce: u64, previous_hash: Hash) -> Block {
        let mut state = self.write();
        let transactions = std::mem::take(&mut state.pool);
        let block = Block::new(nonce, previous_hash, transactions);
        state.chain.push(block.clone());
        block
    }

    /// Mines the pooled transactions plus a reward for this node into a new block.
    ///
    /// The search runs without the ledger lock. If the chain moved on in the meantime the
    /// result is discarded with `StaleMiningSnapshot` and the pool is left untouched.
    pub fn mine(&self) -> Result<Block, BlockchainError> {
        let _mining = self.mining.lock().unwrap_or_else(PoisonError::into_inner);

        let job = self.prepare_mining()?;
        let nonce = pow::parallel_proof_of_work(
            &job.previous_hash,
            &job.transactions,
            self.config.difficulty,
            self.config.mining_threads,
            &job.cancel,
        );

        let block = self.commit_mined(job, nonce)?;
        info!(
            "action=mining, status=success, nonce={}, transactions={}",
            block.nonce,
            block.transactions.len()
        );
        Ok(block)
    }

    fn prepare_mining(&self) -> Result<MiningJob, BlockchainError> {
        let state = self.read();
        if state.pool.is_empty() {
            return Err(BlockchainError::EmptyPool);
        }

        // Installed under the read lock so a chain replacement cannot slip in between
        let cancel = Arc::new(AtomicBool::new(false));
        *self.cancel_slot() = cancel.clone();

        let mut transactions = state.pool.clone();
        let pooled = transactions.len();
        transactions.push(Transaction::reward(
            self.config.miner_address.clone(),
            self.config.mining_reward,
        ));

        Ok(MiningJob {
            previous_hash: state.last_block().hash(),
            transactions,
            pooled,
            cancel,
        })
    }

    fn commit_mined(&self, job: MiningJob, nonce: Option<u64>) -> Result<Block, BlockchainError> {
        let mut state = self.write();

        let nonce = match nonce {
            Some(nonce) if state.last_block().hash() == job.previous_hash => nonce,
            _ => {
                warn!("Chain was replaced during mining, discarding mined block");
                return Err(BlockchainError::StaleMiningSnapshot);
            }
        };

        let block = Block::new(nonce, job.previous_hash, job.transactions);
        state.chain.push(block.clone());

        // Anything pooled after the snapshot was taken stays for the next block
        let pooled = job.pooled.min(state.pool.len());
        state.pool.drain(..pooled);

        Ok(block)
    }

    /// Checks genesis, hash linkage and proof of work for every block of `chain`
    pub fn valid_chain(chain: &[Block], difficulty: usize) -> Result<(), BlockchainError> {
        let genesis = chain
            .first()
            .ok_or_else(|| BlockchainError::InvalidForeignChain("chain is empty".to_string()))?;

        if *genesis != Block::genesis() {
            return Err(BlockchainError::InvalidForeignChain(
                "genesis block does not match".to_string(),
            ));
        }

        for (index, pair) in chain.windows(2).enumerate() {
            let (previous, current) = (&pair[0], &pair[1]);

            if current.previous_hash != previous.hash() {
                return Err(BlockchainError::InvalidForeignChain(format!(
                    "block {} does not link to its predecessor",
                    index + 1
                )));
            }

            if !pow::valid_proof(
                current.nonce,
                &current.previous_hash,
                &current.transactions,
                difficulty,
            ) {
                return Err(BlockchainError::InvalidForeignChain(format!(
                    "block {} fails proof of work",
                    index + 1
                )));
            }
        }

        Ok(())
    }

    /// Validates the local chain
    pub fn is_valid(&self) -> bool {
        Self::valid_chain(&self.read().chain, self.config.difficulty).is_ok()
    }

    /// Adopts the longest valid candidate chain if it is strictly longer than ours.
    ///
    /// Invalid candidates are discarded whole. Returns whether the chain was replaced.
    pub fn resolve_conflicts(&self, candidates: Vec<Vec<Block>>) -> bool {
        let mut best: Option<Vec<Block>> = None;
        let local_len = self.len();

        for candidate in candidates {
            let to_beat = best.as_ref().map_or(local_len, Vec::len);
            if candidate.len() <= to_beat {
                continue;
            }

            match Self::valid_chain(&candidate, self.config.difficulty) {
                Ok(()) => best = Some(candidate),
                Err(err) => warn!("Discarding peer chain of length {}: {}", candidate.len(), err),
            }
        }

        let Some(best) = best else {
            return false;
        };

        let mut state = self.write();
        if best.len() <= state.chain.len() {
            return false;
        }

        let fork = state
            .chain
            .iter()
            .zip(best.iter())
            .take_while(|(ours, theirs)| ours.hash() == theirs.hash())
            .count();

        // Drop pooled transactions that the adopted chain already committed
        let mut committed: Vec<&Transaction> =
            best[fork..].iter().flat_map(|block| block.transactions.iter()).collect();
        state.pool.retain(|pending| {
            match committed.iter().position(|included| *included == pending) {
                Some(position) => {
                    committed.swap_remove(position);
                    false
                }
                None => true,
            }
        });

        info!(
            "Replacing chain of length {} with peer chain of length {} (fork at block {})",
            state.chain.len(),
            best.len(),
            fork
        );
        state.chain = best;
        self.cancel_slot().store(true, Ordering::Relaxed);

        true
    }
}

fn balance_of(chain: &[Block], address: &str) -> f64 {
    let mut total = 0.0;
    for transaction in chain.iter().flat_map(|block| block.transactions.iter()) {
        if transaction.recipient_address == address {
            total += transaction.value;
        }
        if transaction.sender_address == address {
            total -= transaction.value;
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;
    use crate::blockchain::transaction::REWARD_SENDER;
    use std::collections::HashSet;

    fn ledger(miner: &str) -> Blockchain {
        Blockchain::new(LedgerConfig::new(miner))
    }

    fn signed_transfer(ledger: &Blockchain, from: &Wallet, to: &str, value: f64) {
        let transaction = Transaction::new(from.address().as_str(), to, value);
        let signature = from.sign_transaction(&transaction);
        ledger
            .add_transaction(
                from.address().as_str(),
                to,
                value,
                Some(&from.public_key_hex()),
                Some(&signature),
            )
            .unwrap();
    }

    /// Mines until the chain has `length` blocks
    fn grow_to(ledger: &Blockchain, length: usize) {
        let payer = Wallet::new();
        while ledger.len() < length {
            signed_transfer(ledger, &payer, "sink", 1.0);
            ledger.mine().unwrap();
        }
    }

    #[test]
    fn test_new_blockchain() {
        let blockchain = ledger("miner");
        let chain = blockchain.chain();

        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0], Block::genesis());
        assert!(blockchain.pool().is_empty());
        assert!(blockchain.is_valid());
    }

    #[test]
    fn test_mine_empty_pool_fails() {
        let blockchain = ledger("miner");

        assert!(matches!(blockchain.mine(), Err(BlockchainError::EmptyPool)));
        assert_eq!(blockchain.len(), 1);
    }

    #[test]
    fn test_transfer_scenario() {
        let blockchain = ledger("miner");
        let alice = Wallet::new();
        let bob = Wallet::new();

        signed_transfer(&blockchain, &alice, bob.address().as_str(), 10.0);
        assert_eq!(blockchain.pool().len(), 1);

        let block = blockchain.mine().unwrap();
        assert_eq!(block.transactions.len(), 2);
        assert!(block.transactions[1].is_reward());

        assert_eq!(blockchain.len(), 2);
        assert!(blockchain.pool().is_empty());
        assert_eq!(blockchain.calculate_balance(bob.address().as_str()), 10.0);
        assert_eq!(blockchain.calculate_balance(alice.address().as_str()), -10.0);
        assert_eq!(blockchain.calculate_balance("miner"), MINING_REWARD);
        assert!(blockchain.is_valid());
    }

    #[test]
    fn test_rejects_signature_from_other_key_pair() {
        let blockchain = ledger("miner");
        let alice = Wallet::new();
        let mallory = Wallet::new();

        let transaction = Transaction::new(alice.address().as_str(), "bob", 10.0);
        let signature = mallory.sign_transaction(&transaction);

        let result = blockchain.add_transaction(
            alice.address().as_str(),
            "bob",
            10.0,
            Some(&alice.public_key_hex()),
            Some(&signature),
        );

        assert!(matches!(
            result,
            Err(BlockchainError::RejectedTransaction(TransactionError::InvalidSignature))
        ));
        assert!(blockchain.pool().is_empty());
    }

    #[test]
    fn test_rejects_unsigned_transaction() {
        let blockchain = ledger("miner");

        let result = blockchain.add_transaction("alice", "bob", 1.0, None, None);
        assert!(matches!(
            result,
            Err(BlockchainError::RejectedTransaction(TransactionError::MissingFields(_)))
        ));
    }

    #[test]
    fn test_reward_sender_needs_no_signature() {
        let blockchain = ledger("miner");

        blockchain.add_transaction(REWARD_SENDER, "bob", 5.0, None, None).unwrap();
        assert_eq!(blockchain.pool().len(), 1);
    }

    #[test]
    fn test_pool_is_fifo_without_dedup() {
        let blockchain = ledger("miner");
        let alice = Wallet::new();

        signed_transfer(&blockchain, &alice, "bob", 1.0);
        signed_transfer(&blockchain, &alice, "carol", 2.0);
        signed_transfer(&blockchain, &alice, "bob", 1.0);

        let recipients: Vec<_> = blockchain
            .pool()
            .into_iter()
            .map(|t| t.recipient_address)
            .collect();
        assert_eq!(recipients, vec!["bob", "carol", "bob"]);
    }

    #[test]
    fn test_overdraft_allowed_by_default() {
        let blockchain = ledger("miner");
        let alice = Wallet::new();

        signed_transfer(&blockchain, &alice, "bob", 1_000.0);
        assert_eq!(blockchain.pool().len(), 1);
    }

    #[test]
    fn test_balance_check_when_enforced() {
        let alice = Wallet::new();
        let blockchain = Blockchain::new(LedgerConfig {
            enforce_balance_check: true,
            ..LedgerConfig::new(alice.address().as_str())
        });

        let transaction = Transaction::new(alice.address().as_str(), "bob", 1.0);
        let signature = alice.sign_transaction(&transaction);
        let result = blockchain.add_transaction(
            alice.address().as_str(),
            "bob",
            1.0,
            Some(&alice.public_key_hex()),
            Some(&signature),
        );
        assert!(matches!(
            result,
            Err(BlockchainError::RejectedTransaction(TransactionError::InsufficientFunds { .. }))
        ));

        // Earn a reward as the miner, then a 1.0 transfer is covered
        blockchain.add_transaction(REWARD_SENDER, "carol", 0.5, None, None).unwrap();
        blockchain.mine().unwrap();
        assert_eq!(blockchain.calculate_balance(alice.address().as_str()), MINING_REWARD);

        signed_transfer(&blockchain, &alice, "bob", 1.0);
        assert_eq!(blockchain.pool().len(), 1);
    }

    #[test]
    fn test_balance_ignores_pool() {
        let blockchain = ledger("miner");
        let alice = Wallet::new();

        signed_transfer(&blockchain, &alice, "bob", 3.0);
        assert_eq!(blockchain.calculate_balance("bob"), 0.0);
    }

    #[test]
    fn test_create_block_seals_pool() {
        let blockchain = ledger("miner");
        let alice = Wallet::new();
        signed_transfer(&blockchain, &alice, "bob", 3.0);

        let previous = blockchain.last_block().hash();
        let block = blockchain.create_block(42, previous);

        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.previous_hash, previous);
        assert!(blockchain.pool().is_empty());
        assert_eq!(blockchain.last_block(), block);
    }

    #[test]
    fn test_mined_block_satisfies_proof() {
        let blockchain = ledger("miner");
        grow_to(&blockchain, 2);

        let block = blockchain.last_block();
        assert!(pow::valid_proof(
            block.nonce,
            &block.previous_hash,
            &block.transactions,
            blockchain.difficulty()
        ));
        assert!(hex::encode(block.proof_hash()).starts_with("000"));
    }

    #[test]
    fn test_parallel_mining_produces_valid_chain() {
        let blockchain = Blockchain::new(LedgerConfig {
            mining_threads: 4,
            ..LedgerConfig::new("miner")
        });
        grow_to(&blockchain, 3);

        assert!(blockchain.is_valid());
        assert_eq!(blockchain.calculate_balance("miner"), 2.0 * MINING_REWARD);
    }

    #[test]
    fn test_balance_conservation() {
        let blockchain = ledger("miner");
        let alice = Wallet::new();
        let bob = Wallet::new();

        signed_transfer(&blockchain, &alice, bob.address().as_str(), 10.0);
        blockchain.mine().unwrap();
        signed_transfer(&blockchain, &bob, alice.address().as_str(), 2.5);
        signed_transfer(&blockchain, &bob, "carol", 4.0);
        blockchain.mine().unwrap();

        let chain = blockchain.chain();
        let addresses: HashSet<String> = chain
            .iter()
            .flat_map(|b| b.transactions.iter())
            .flat_map(|t| [t.sender_address.clone(), t.recipient_address.clone()])
            .collect();
        let total: f64 = addresses.iter().map(|a| blockchain.calculate_balance(a)).sum();

        let rewards: f64 = chain
            .iter()
            .flat_map(|b| b.transactions.iter())
            .filter(|t| t.is_reward())
            .map(|t| t.value)
            .sum();

        // The reward identity is debited for every reward, so everything nets to zero
        // and the reward total shows up as the reward sender's negative balance
        assert!(total.abs() < 1e-9);
        assert_eq!(blockchain.calculate_balance(REWARD_SENDER), -rewards);
        let without_reward_sender: f64 = addresses
            .iter()
            .filter(|a| a.as_str() != REWARD_SENDER)
            .map(|a| blockchain.calculate_balance(a))
            .sum();
        assert!((without_reward_sender - rewards).abs() < 1e-9);
        assert_eq!(rewards, 2.0 * MINING_REWARD);
    }

    #[test]
    fn test_valid_chain_rejects_tampering() {
        let blockchain = ledger("miner");
        grow_to(&blockchain, 3);
        let chain = blockchain.chain();
        let difficulty = blockchain.difficulty();
        assert!(Blockchain::valid_chain(&chain, difficulty).is_ok());

        let mut tampered_value = chain.clone();
        tampered_value[1].transactions[0].value = 1_000.0;
        assert!(Blockchain::valid_chain(&tampered_value, difficulty).is_err());

        let mut tampered_link = chain.clone();
        tampered_link[2].previous_hash = [0xee; 32];
        assert!(Blockchain::valid_chain(&tampered_link, difficulty).is_err());

        let mut other_genesis = chain.clone();
        other_genesis[0].time_stamp = 1;
        assert!(Blockchain::valid_chain(&other_genesis, difficulty).is_err());

        assert!(Blockchain::valid_chain(&[], difficulty).is_err());
    }

    #[test]
    fn test_longer_peer_chain_is_adopted() {
        let short = ledger("short-miner");
        let long = ledger("long-miner");
        grow_to(&short, 3);
        grow_to(&long, 5);

        assert!(short.resolve_conflicts(vec![long.chain()]));
        assert_eq!(short.chain(), long.chain());

        // Reconciling the longer node against the shorter one changes nothing
        let before = long.chain();
        assert!(!long.resolve_conflicts(vec![short_chain_of(3)]));
        assert_eq!(long.chain(), before);
    }

    fn short_chain_of(length: usize) -> Vec<Block> {
        let other = ledger("other");
        grow_to(&other, length);
        other.chain()
    }

    #[test]
    fn test_resolve_conflicts_is_idempotent() {
        let local = ledger("local");
        let peer = ledger("peer");
        grow_to(&peer, 4);

        assert!(local.resolve_conflicts(vec![peer.chain()]));
        let adopted = local.chain();

        assert!(!local.resolve_conflicts(vec![peer.chain()]));
        assert_eq!(local.chain(), adopted);
    }

    #[test]
    fn test_equal_length_keeps_local_chain() {
        let local = ledger("local");
        let peer = ledger("peer");
        grow_to(&local, 3);
        grow_to(&peer, 3);

        let before = local.chain();
        assert!(!local.resolve_conflicts(vec![peer.chain()]));
        assert_eq!(local.chain(), before);
    }

    #[test]
    fn test_invalid_longer_chain_is_discarded() {
        let local = ledger("local");
        grow_to(&local, 2);
        let peer = ledger("peer");
        grow_to(&peer, 4);

        let mut forged = peer.chain();
        forged[1].transactions[0].recipient_address = "thief".to_string();

        let before = local.chain();
        assert!(!local.resolve_conflicts(vec![forged]));
        assert_eq!(local.chain(), before);
    }

    #[test]
    fn test_longest_of_several_candidates_wins() {
        let local = ledger("local");
        let three = short_chain_of(3);
        let five = short_chain_of(5);
        let four = short_chain_of(4);

        assert!(local.resolve_conflicts(vec![three, five.clone(), four]));
        assert_eq!(local.chain(), five);
    }

    #[test]
    fn test_adoption_drops_committed_pool_transactions() {
        let alice = Wallet::new();
        let local = ledger("local");
        let peer = ledger("peer");

        signed_transfer(&local, &alice, "bob", 7.0);
        signed_transfer(&local, &alice, "carol", 8.0);
        signed_transfer(&peer, &alice, "bob", 7.0);
        peer.mine().unwrap();

        assert!(local.resolve_conflicts(vec![peer.chain()]));
        let pool = local.pool();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].recipient_address, "carol");
    }

    #[test]
    fn test_stale_snapshot_is_rejected() {
        let blockchain = ledger("miner");
        let alice = Wallet::new();
        signed_transfer(&blockchain, &alice, "bob", 1.0);

        let job = blockchain.prepare_mining().unwrap();
        let nonce = pow::proof_of_work(
            &job.previous_hash,
            &job.transactions,
            blockchain.difficulty(),
            &job.cancel,
        );

        // Another block lands before the mined one is committed
        let previous = blockchain.last_block().hash();
        blockchain.create_block(0, previous);
        let length = blockchain.len();

        assert!(matches!(
            blockchain.commit_mined(job, nonce),
            Err(BlockchainError::StaleMiningSnapshot)
        ));
        assert_eq!(blockchain.len(), length);
    }

    #[test]
    fn test_chain_replacement_cancels_search() {
        let local = ledger("local");
        let alice = Wallet::new();
        signed_transfer(&local, &alice, "bob", 1.0);

        let job = local.prepare_mining().unwrap();
        assert!(!job.cancel.load(Ordering::Relaxed));

        assert!(local.resolve_conflicts(vec![short_chain_of(3)]));
        assert!(job.cancel.load(Ordering::Relaxed));
        assert!(matches!(
            local.commit_mined(job, None),
            Err(BlockchainError::StaleMiningSnapshot)
        ));
        assert_eq!(local.pool().len(), 1);
    }

    #[test]
    fn test_transaction_arriving_mid_mine_stays_pooled() {
        let blockchain = ledger("miner");
        let alice = Wallet::new();
        signed_transfer(&blockchain, &alice, "bob", 1.0);

        let job = blockchain.prepare_mining().unwrap();
        signed_transfer(&blockchain, &alice, "carol", 2.0);

        let nonce = pow::proof_of_work(
            &job.previous_hash,
            &job.transactions,
            blockchain.difficulty(),
            &job.cancel,
        );
        let block = blockchain.commit_mined(job, nonce).unwrap();

        assert_eq!(block.transactions.len(), 2);
        let pool = blockchain.pool();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].recipient_address, "carol");
        assert!(blockchain.is_valid());
    }

    #[test]
    fn test_concurrent_submissions_are_committed_exactly_once() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 25;

        let blockchain = Blockchain::new(LedgerConfig {
            difficulty: 1,
            ..LedgerConfig::new("miner")
        });
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            let producers: Vec<_> = (0..PRODUCERS)
                .map(|producer| {
                    let blockchain = &blockchain;
                    scope.spawn(move || {
                        for i in 0..PER_PRODUCER {
                            let recipient = format!("user-{}-{}", producer, i);
                            blockchain
                                .add_transaction(REWARD_SENDER, &recipient, 1.0, None, None)
                                .unwrap();
                        }
                    })
                })
                .collect();

            scope.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    match blockchain.mine() {
                        Ok(_) | Err(BlockchainError::StaleMiningSnapshot) => {}
                        Err(BlockchainError::EmptyPool) => std::thread::yield_now(),
                        Err(err) => panic!("unexpected mining error: {}", err),
                    }
                }
            });

            scope.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    if blockchain.pool().is_empty() {
                        std::thread::yield_now();
                    } else {
                        blockchain.create_block(0, blockchain.last_block().hash());
                    }
                }
            });

            for producer in producers {
                producer.join().unwrap();
            }
            done.store(true, Ordering::SeqCst);
        });

        blockchain.create_block(0, blockchain.last_block().hash());
        assert!(blockchain.pool().is_empty());

        let committed: Vec<String> = blockchain
            .chain()
            .iter()
            .flat_map(|block| block.transactions.iter())
            .filter(|tx| tx.recipient_address.starts_with("user-"))
            .map(|tx| tx.recipient_address.clone())
            .collect();
        let unique: HashSet<&String> = committed.iter().collect();

        assert_eq!(committed.len(), PRODUCERS * PER_PRODUCER);
        assert_eq!(unique.len(), PRODUCERS * PER_PRODUCER);
    }

    #[test]
    fn test_chain_response_roundtrip() {
        let blockchain = ledger("miner");
        grow_to(&blockchain, 2);

        let body = serde_json::to_vec(&ChainResponse { chain: blockchain.chain() }).unwrap();
        let decoded: ChainResponse = serde_json::from_slice(&body).unwrap();

        assert_eq!(decoded.chain, blockchain.chain());
        assert!(Blockchain::valid_chain(&decoded.chain, blockchain.difficulty()).is_ok());
    }
}
