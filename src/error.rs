//! Error types for meshchain

use crate::digest::Digest;
use crate::transaction::Amount;
use thiserror::Error;

/// Why the mempool refused a transaction. Reported to the submitter, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("Mempool is full ({capacity} pending transactions)")]
    PoolFull { capacity: usize },
    #[error("Transaction is not signed")]
    Unsigned,
    #[error("Transaction signature does not match its contents")]
    BadSignature,
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Malformed transaction: {0}")]
    Malformed(String),
    #[error("Unknown sender: {0}")]
    UnknownSender(String),
    #[error("Insufficient funds for {sender}: balance {balance}, amount {amount}")]
    InsufficientFunds {
        sender: String,
        balance: Amount,
        amount: Amount,
    },
    #[error("Transaction {0} is already pending")]
    Duplicate(Digest),
    #[error("Mempool is closed")]
    Closed,
}

/// Why a block was refused by a chain. The block is discarded; the node keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Previous digest mismatch: expected {expected}, got {actual}")]
    PrevHashMismatch { expected: Digest, actual: Digest },
    #[error("Index mismatch: expected {expected}, got {actual}")]
    IndexMismatch { expected: u64, actual: u64 },
    #[error("Block {index} does not satisfy the consensus rule")]
    ConsensusFailed { index: u64 },
    #[error("Merkle root mismatch: expected {expected}, got {actual}")]
    MerkleRootMismatch { expected: String, actual: String },
    #[error("Digest mismatch: recomputed {expected}, stored {actual}")]
    DigestMismatch { expected: Digest, actual: Digest },
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
}

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Unknown node: {0}")]
    UnknownNode(usize),
    #[error("Network is not running")]
    NetworkStopped,
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Io(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for ChainError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::Config(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
