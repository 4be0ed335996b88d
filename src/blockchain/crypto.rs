use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;

use super::transaction::Transaction;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// A blockchain address: the base58 form of an ed25519 public key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    /// Derives the address belonging to a public key
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        Address(bs58::encode(public_key.as_bytes()).into_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A hex-encoded ed25519 public key as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PublicKeyHex(pub String);

impl PublicKeyHex {
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        PublicKeyHex(hex::encode(key.as_bytes()))
    }

    pub fn to_verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        let bytes = hex::decode(&self.0).map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let key_bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidPublicKey("Invalid public key length".to_string())
        })?;

        VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }
}

/// A hex-encoded ed25519 signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    pub fn from_signature(signature: &Signature) -> Self {
        DigitalSignature(hex::encode(signature.to_bytes()))
    }

    pub fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes = hex::decode(&self.0).map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let signature_bytes: [u8; 64] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidSignature("Invalid signature length".to_string())
        })?;

        Ok(Signature::from_bytes(&signature_bytes))
    }
}

/// Represents a wallet with a keypair
#[derive(Debug, Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    address: Address,
}

impl Wallet {
    /// Creates a new wallet with a random keypair
    pub fn new() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    /// Creates a wallet from an existing 32-byte secret key
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_array: [u8; 32] = secret_key_bytes.try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey("Invalid private key length".to_string())
        })?;

        Ok(Self::from_signing_key(SigningKey::from_bytes(&bytes_array)))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = VerifyingKey::from(&signing_key);
        let address = Address::from_public_key(&verifying_key);

        Wallet {
            signing_key,
            verifying_key,
            address,
        }
    }

    /// Gets the wallet's address
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn public_key_hex(&self) -> PublicKeyHex {
        PublicKeyHex::from_verifying_key(&self.verifying_key)
    }

    /// Signs a message with the wallet's private key
    pub fn sign(&self, message: &[u8]) -> DigitalSignature {
        DigitalSignature::from_signature(&self.signing_key.sign(message))
    }

    /// Signs the digest of a transaction's canonical bytes
    pub fn sign_transaction(&self, transaction: &Transaction) -> DigitalSignature {
        self.sign(&transaction.digest())
    }

    /// Exports the wallet's secret key as hex
    pub fn export_secret_key(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Verifies a signature against a message and public key.
///
/// A well-formed signature that does not match yields `Ok(false)`; malformed key or
/// signature material is an error.
pub fn verify_signature(
    message: &[u8],
    signature: &DigitalSignature,
    public_key: &PublicKeyHex,
) -> Result<bool, CryptoError> {
    let signature = signature.to_signature()?;
    let public_key = public_key.to_verifying_key()?;

    Ok(public_key.verify(message, &signature).is_ok())
}
