use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::{verify_signature, DigitalSignature, PublicKeyHex};

/// Sender identity of the synthetic mining-reward transaction
pub const REWARD_SENDER: &str = "BLOCKCHAIN REWARD SYSTEM";

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Missing fields: {0}")]
    MissingFields(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: f64, available: f64 },
}

/// A value transfer between two addresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Sender's address
    pub sender_address: String,

    /// Recipient's address
    pub recipient_address: String,

    /// Amount being transferred
    pub value: f64,
}

impl Transaction {
    /// Creates a new transaction. The amount is not range-checked.
    pub fn new(sender: impl Into<String>, recipient: impl Into<String>, value: f64) -> Self {
        Transaction {
            sender_address: sender.into(),
            recipient_address: recipient.into(),
            value,
        }
    }

    /// Creates a mining reward transaction
    pub fn reward(recipient: impl Into<String>, amount: f64) -> Self {
        Transaction::new(REWARD_SENDER, recipient, amount)
    }

    pub fn is_reward(&self) -> bool {
        self.sender_address == REWARD_SENDER
    }

    /// The wire JSON `{sender_address, recipient_address, value}`, used for signing and
    /// for block hashing
    pub fn canonical_bytes(&self) -> Vec<u8> {
        // Strings and floats always serialize
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// SHA-256 of the canonical bytes; this is what wallets sign
    pub fn digest(&self) -> [u8; 32] {
        Sha256::digest(self.canonical_bytes()).into()
    }

    /// Checks `signature` over this transaction's digest with `public_key`.
    ///
    /// Reward transactions are never signed and always verify.
    pub fn verify(&self, public_key: &PublicKeyHex, signature: &DigitalSignature) -> bool {
        if self.is_reward() {
            return true;
        }

        verify_signature(&self.digest(), signature, public_key).unwrap_or(false)
    }
}

/// Wire form of a signed transaction submission
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    pub sender_blockchain_address: Option<String>,
    pub recipient_blockchain_address: Option<String>,
    pub sender_public_key: Option<String>,
    pub value: Option<f64>,
    pub signature: Option<String>,
}

impl TransactionRequest {
    /// Builds a request from a transaction signed by its sender
    pub fn signed(
        transaction: &Transaction,
        public_key: &PublicKeyHex,
        signature: &DigitalSignature,
    ) -> Self {
        TransactionRequest {
            sender_blockchain_address: Some(transaction.sender_address.clone()),
            recipient_blockchain_address: Some(transaction.recipient_address.clone()),
            sender_public_key: Some(public_key.0.clone()),
            value: Some(transaction.value),
            signature: Some(signature.0.clone()),
        }
    }

    /// Splits the request into a transaction and its signing material
    pub fn validate(
        &self,
    ) -> Result<(Transaction, PublicKeyHex, DigitalSignature), TransactionError> {
        let mut missing = Vec::new();
        if self.sender_blockchain_address.is_none() {
            missing.push("sender_blockchain_address");
        }
        if self.recipient_blockchain_address.is_none() {
            missing.push("recipient_blockchain_address");
        }
        if self.sender_public_key.is_none() {
            missing.push("sender_public_key");
        }
        if self.value.is_none() {
            missing.push("value");
        }
        if self.signature.is_none() {
            missing.push("signature");
        }

        match (
            &self.sender_blockchain_address,
            &self.recipient_blockchain_address,
            &self.sender_public_key,
            self.value,
            &self.signature,
        ) {
            (Some(sender), Some(recipient), Some(public_key), Some(value), Some(signature)) => Ok((
                Transaction::new(sender.clone(), recipient.clone(), value),
                PublicKeyHex(public_key.clone()),
                DigitalSignature(signature.clone()),
            )),
            _ => Err(TransactionError::MissingFields(missing.join(", "))),
        }
    }
}
