//! Transaction types for meshchain
use crate::digest::{Digest, HashAlgorithm};
use fixed::types::I64F64;
use serde::{Deserialize, Serialize};

/// Fixed-point amount type for deterministic balance arithmetic.
pub type Amount = I64F64;

/// Sender allowed to mint value without an account (genesis allocations).
pub const SYSTEM_SENDER: &str = "SYSTEM";

/// A value transfer between two accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: String,
    pub receiver: String,
    pub amount: Amount,
    /// Creation time in Unix milliseconds.
    pub timestamp: i64,
    /// Digest over the other four fields.
    pub signature: Option<Digest>,
}

impl Transaction {
    /// Create an unsigned transaction stamped with the current time.
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>, amount: Amount) -> Self {
        Self::with_timestamp(sender, receiver, amount, chrono::Utc::now().timestamp_millis())
    }

    pub fn with_timestamp(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        amount: Amount,
        timestamp: i64,
    ) -> Self {
        Transaction {
            sender: sender.into(),
            receiver: receiver.into(),
            amount,
            timestamp,
            signature: None,
        }
    }

    /// Length-prefixed encoding of the signable fields.
    pub fn signable_message(&self) -> Vec<u8> {
        let mut message = Vec::with_capacity(self.sender.len() + self.receiver.len() + 32);
        message.extend_from_slice(&(self.sender.len() as u32).to_le_bytes());
        message.extend_from_slice(self.sender.as_bytes());
        message.extend_from_slice(&(self.receiver.len() as u32).to_le_bytes());
        message.extend_from_slice(self.receiver.as_bytes());
        message.extend_from_slice(&self.amount.to_le_bytes());
        message.extend_from_slice(&self.timestamp.to_le_bytes());
        message
    }

    /// Digest of the signable fields. This is also the Merkle leaf.
    pub fn digest(&self, algo: HashAlgorithm) -> Digest {
        algo.digest(&self.signable_message())
    }

    pub fn sign(&mut self, algo: HashAlgorithm) {
        self.signature = Some(self.digest(algo));
    }

    /// Builder-style signing.
    pub fn signed(mut self, algo: HashAlgorithm) -> Self {
        self.sign(algo);
        self
    }

    pub fn is_system(&self) -> bool {
        self.sender == SYSTEM_SENDER
    }

    /// Signable fields followed by the signature, as committed by flat block digests.
    pub fn commitment_bytes(&self) -> Vec<u8> {
        let mut bytes = self.signable_message();
        bytes.extend_from_slice(self.signature_bytes());
        bytes
    }

    /// Signature as committed by block digests; `unsigned` when absent.
    pub fn signature_bytes(&self) -> &[u8] {
        match &self.signature {
            Some(sig) => sig.as_bytes(),
            None => b"unsigned",
        }
    }
}
