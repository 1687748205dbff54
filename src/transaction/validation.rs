//! Validation logic for transactions separated from type definitions
use crate::digest::HashAlgorithm;
use crate::error::AdmissionError;
use crate::transaction::types::{Amount, Transaction};

impl Transaction {
    /// Stateless checks: identifiers, amount, and signature.
    ///
    /// Balance coverage needs the ledger and is checked by the mempool and the
    /// block validator.
    pub fn validate(&self, algo: HashAlgorithm) -> Result<(), AdmissionError> {
        if self.sender.is_empty() {
            return Err(AdmissionError::Malformed(
                "Sender cannot be empty".to_string(),
            ));
        }
        if self.receiver.is_empty() {
            return Err(AdmissionError::Malformed(
                "Receiver cannot be empty".to_string(),
            ));
        }
        if self.sender == self.receiver {
            return Err(AdmissionError::Malformed(
                "Sender and receiver cannot be the same".to_string(),
            ));
        }

        if self.amount < Amount::ZERO {
            return Err(AdmissionError::InvalidAmount(
                "Amount cannot be negative".to_string(),
            ));
        }
        if self.amount == Amount::ZERO {
            return Err(AdmissionError::InvalidAmount(
                "Amount cannot be zero".to_string(),
            ));
        }

        self.validate_signature(algo)
    }

    /// Recompute the digest over the signable fields and compare with the stored signature.
    pub fn validate_signature(&self, algo: HashAlgorithm) -> Result<(), AdmissionError> {
        let signature = self.signature.as_ref().ok_or(AdmissionError::Unsigned)?;
        if *signature != self.digest(algo) {
            return Err(AdmissionError::BadSignature);
        }
        Ok(())
    }

    /// True when the stored signature matches the recomputed digest.
    pub fn is_well_formed(&self, algo: HashAlgorithm) -> bool {
        self.validate(algo).is_ok()
    }
}
