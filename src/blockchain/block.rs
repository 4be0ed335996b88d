use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use super::transaction::Transaction;

/// A 256-bit block digest
pub type Hash = [u8; 32];

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Proof of work (nonce)
    pub nonce: u64,

    /// Hash of the previous block, hex encoded on the wire
    #[serde(with = "hex_hash")]
    #[schema(value_type = String, example = "000a3f...")]
    pub previous_hash: Hash,

    /// Creation time in nanoseconds since the unix epoch
    pub time_stamp: i64,

    /// List of transactions included in this block
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Creates a new block stamped with the current time
    pub fn new(nonce: u64, previous_hash: Hash, transactions: Vec<Transaction>) -> Self {
        Block {
            nonce,
            previous_hash,
            time_stamp: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            transactions,
        }
    }

    /// The first block of every chain. It is fixed so that all nodes share it.
    pub fn genesis() -> Self {
        Block {
            nonce: 0,
            previous_hash: [0u8; 32],
            time_stamp: 0,
            transactions: Vec::new(),
        }
    }

    /// SHA-256 of the canonical serialization, including the real timestamp.
    /// This is the value the next block links to.
    pub fn hash(&self) -> Hash {
        canonical_hash(self.nonce, &self.previous_hash, self.time_stamp, &self.transactions)
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }

    /// Hash with the timestamp pinned to zero, as checked by proof of work
    pub fn proof_hash(&self) -> Hash {
        canonical_hash(self.nonce, &self.previous_hash, 0, &self.transactions)
    }
}

/// Borrowed mirror of the `Block` wire form, so proof hashing can pin the timestamp
#[derive(Serialize)]
struct HashedBlock<'a> {
    nonce: u64,
    previous_hash: String,
    time_stamp: i64,
    transactions: &'a [Transaction],
}

/// Hashes `{nonce, previous_hash, time_stamp, transactions}` in wire form
pub(crate) fn canonical_hash(
    nonce: u64,
    previous_hash: &Hash,
    time_stamp: i64,
    transactions: &[Transaction],
) -> Hash {
    let block_data = HashedBlock {
        nonce,
        previous_hash: hex::encode(previous_hash),
        time_stamp,
        transactions,
    };

    // Integers, strings and floats always serialize
    let bytes = serde_json::to_vec(&block_data).unwrap_or_default();
    Sha256::digest(&bytes).into()
}

mod hex_hash {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use super::Hash;

    pub fn serialize<S: Serializer>(hash: &Hash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;

        bytes
            .try_into()
            .map_err(|_| D::Error::custom("previous_hash must be 32 bytes"))
    }
}
