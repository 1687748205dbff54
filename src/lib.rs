//! meshchain - A simulated peer network that agrees on a proof-of-work ledger
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Blocks, per-node chains, account ledger and block validation
//! - [`transaction`] - Transaction types, signing and checks
//! - [`mempool`] - Shared pending-transaction pool
//!
//! ## Commitments
//! - [`digest`] - Checksum functions (SHA-256, DJB2)
//! - [`merkle`] - Merkle root over a block's transactions
//!
//! ## Consensus & Mining
//! - [`consensus`] - Proof predicates, search and verification
//! - [`miner`] - Per-node mining actor
//!
//! ## Networking
//! - [`node`] - Chain replica and actor state of one participant
//! - [`propagation`] - Delayed, lossy block delivery between nodes
//! - [`network`] - Lifecycle and read-only views of the whole network
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod mempool;
pub mod transaction;

// ============================================================================
// Commitments
// ============================================================================
pub mod digest;
pub mod merkle;

// ============================================================================
// Consensus & Mining
// ============================================================================
pub mod consensus;
pub mod miner;

// ============================================================================
// Networking
// ============================================================================
pub mod network;
pub mod node;
pub mod propagation;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;

pub use error::{ChainError, Result};
pub use network::Network;
