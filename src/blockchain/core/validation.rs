use crate::blockchain::core::chain::{Block, Commitment};
use crate::blockchain::core::state::BalanceView;
use crate::consensus::{verify, ChainParams};
use crate::digest::Digest;
use crate::error::ValidationError;
use crate::merkle::{MerkleTree, EMPTY_ROOT};
use std::collections::HashMap;
use crate::transaction::Amount;

/// Check a candidate block against a chain tip. Pure: no side effects.
///
/// Order of checks: previous digest, consensus rule, Merkle root (Merkle
/// commitment only), digest recomputation, then every transaction.
/// Index continuity needs the chain length and is checked by `Chain::append`.
pub fn validate_block(
    block: &Block,
    tip_digest: &Digest,
    params: &ChainParams,
    balances: &dyn BalanceView,
) -> Result<(), ValidationError> {
    if block.previous_digest != *tip_digest {
        return Err(ValidationError::PrevHashMismatch {
            expected: tip_digest.clone(),
            actual: block.previous_digest.clone(),
        });
    }

    if !verify(block, params) {
        return Err(ValidationError::ConsensusFailed { index: block.index });
    }

    if params.commitment == Commitment::Merkle {
        validate_merkle_root(block, params)?;
    }

    let recomputed = block.compute_digest(params);
    if recomputed != block.digest {
        return Err(ValidationError::DigestMismatch {
            expected: recomputed,
            actual: block.digest.clone(),
        });
    }

    validate_transactions(block, params, balances)
}

pub fn validate_merkle_root(block: &Block, params: &ChainParams) -> Result<(), ValidationError> {
    let render = |root: Option<&Digest>| root.map_or_else(|| EMPTY_ROOT.to_string(), |d| d.to_string());

    let recomputed = MerkleTree::build_root(params.hash, &block.transactions);
    if recomputed != block.merkle_root {
        return Err(ValidationError::MerkleRootMismatch {
            expected: render(recomputed.as_ref()),
            actual: render(block.merkle_root.as_ref()),
        });
    }
    Ok(())
}

/// Every transaction must be well formed, and each non-system sender's balance
/// must cover what the block spends from it.
pub fn validate_transactions(
    block: &Block,
    params: &ChainParams,
    balances: &dyn BalanceView,
) -> Result<(), ValidationError> {
    let mut spent: HashMap<&str, Amount> = HashMap::new();

    for (position, tx) in block.transactions.iter().enumerate() {
        if block.is_genesis() {
            // Genesis mints through SYSTEM only.
            if !tx.is_system() {
                return Err(ValidationError::InvalidTransaction(format!(
                    "Genesis transaction {} is not a SYSTEM allocation",
                    position
                )));
            }
            tx.validate_signature(params.hash).map_err(|e| {
                ValidationError::InvalidTransaction(format!("Transaction {}: {}", position, e))
            })?;
            continue;
        }

        tx.validate(params.hash).map_err(|e| {
            ValidationError::InvalidTransaction(format!("Transaction {}: {}", position, e))
        })?;

        if tx.is_system() {
            continue;
        }

        let balance = balances.balance_of(&tx.sender).ok_or_else(|| {
            ValidationError::InvalidTransaction(format!(
                "Transaction {}: unknown sender {}",
                position, tx.sender
            ))
        })?;

        let total = spent.entry(tx.sender.as_str()).or_insert(Amount::ZERO);
        *total += tx.amount;
        if *total > balance {
            return Err(ValidationError::InvalidTransaction(format!(
                "Transaction {}: {} spends {} with balance {}",
                position, tx.sender, total, balance
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{search, ConsensusRule};
    use crate::transaction::Transaction;
    use std::collections::BTreeMap;

    fn amount(v: i64) -> Amount {
        Amount::from_num(v)
    }

    fn balances() -> BTreeMap<String, Amount> {
        let mut map = BTreeMap::new();
        map.insert("alice".to_string(), amount(100));
        map.insert("bob".to_string(), amount(100));
        map
    }

    fn mined(params: &ChainParams, txs: Vec<Transaction>) -> Block {
        let mut block = Block::draft_at(1, 1_700_000_000_000, Digest::zero(), txs, None, params);
        search(&mut block, params, &|| false).unwrap();
        block
    }

    fn transfer(from: &str, to: &str, value: i64, params: &ChainParams) -> Transaction {
        Transaction::with_timestamp(from, to, amount(value), 1_700_000_000_000).signed(params.hash)
    }

    fn merkle_params() -> ChainParams {
        ChainParams {
            difficulty: 1,
            ..ChainParams::default()
        }
    }

    fn flat_params() -> ChainParams {
        ChainParams {
            commitment: Commitment::Flat,
            difficulty: 1,
            ..ChainParams::default()
        }
    }

    #[test]
    fn test_valid_block_passes() {
        for params in [merkle_params(), flat_params()] {
            let block = mined(&params, vec![transfer("alice", "bob", 30, &params)]);
            assert!(validate_block(&block, &Digest::zero(), &params, &balances()).is_ok());
        }
    }

    #[test]
    fn test_prev_hash_mismatch() {
        let params = merkle_params();
        let block = mined(&params, vec![transfer("alice", "bob", 30, &params)]);
        let other_tip = params.hash.digest(b"somewhere else");
        assert!(matches!(
            validate_block(&block, &other_tip, &params, &balances()),
            Err(ValidationError::PrevHashMismatch { .. })
        ));
    }

    #[test]
    fn test_consensus_failed_for_unsolved_block() {
        let params = ChainParams {
            difficulty: 3,
            ..merkle_params()
        };
        let mut block = Block::draft_at(
            1,
            1_700_000_000_000,
            Digest::zero(),
            vec![transfer("alice", "bob", 30, &params)],
            None,
            &params,
        );
        while block.digest.leading_zeros() >= 3 {
            block.proof += 1;
            block.seal(&params);
        }
        assert_eq!(
            validate_block(&block, &Digest::zero(), &params, &balances()),
            Err(ValidationError::ConsensusFailed { index: 1 })
        );
    }

    #[test]
    fn test_numeric_rule_rejects_bad_proof() {
        let params = ChainParams {
            rule: ConsensusRule::Numeric,
            ..flat_params()
        };
        let mut block = mined(&params, vec![transfer("alice", "bob", 30, &params)]);
        block.proof += 2; // odd + 2 is odd, but no longer a multiple of 3
        block.seal(&params);
        assert_eq!(
            validate_block(&block, &Digest::zero(), &params, &balances()),
            Err(ValidationError::ConsensusFailed { index: 1 })
        );
    }

    #[test]
    fn test_tampered_transaction_detected() {
        type Edit = fn(&mut Transaction, &ChainParams);
        let edits: [(&str, Edit, bool); 6] = [
            ("sender", |tx, _| tx.sender = "bob".to_string(), true),
            ("receiver", |tx, _| tx.receiver = "mallory".to_string(), true),
            ("amount", |tx, _| tx.amount = amount(99), true),
            ("timestamp", |tx, _| tx.timestamp += 1, true),
            ("signature", |tx, p| tx.signature = Some(p.hash.digest(b"forged")), false),
            ("signature removed", |tx, _| tx.signature = None, false),
        ];

        for params in [merkle_params(), flat_params()] {
            let block = mined(&params, vec![transfer("alice", "bob", 30, &params)]);
            for (field, edit, in_leaf) in edits {
                let mut tampered = block.clone();
                edit(&mut tampered.transactions[0], &params);
                let result = validate_block(&tampered, &Digest::zero(), &params, &balances());
                match params.commitment {
                    Commitment::Merkle if in_leaf => assert!(
                        matches!(result, Err(ValidationError::MerkleRootMismatch { .. })),
                        "{field}: {result:?}"
                    ),
                    _ => assert!(
                        matches!(result, Err(ValidationError::DigestMismatch { .. })),
                        "{:?} {field}: {result:?}",
                        params.commitment
                    ),
                }
            }
        }
    }

    #[test]
    fn test_tampered_header_detected() {
        let params = merkle_params();
        let mut block = mined(&params, vec![transfer("alice", "bob", 30, &params)]);
        block.timestamp += 1;
        assert!(matches!(
            validate_block(&block, &Digest::zero(), &params, &balances()),
            Err(ValidationError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let params = flat_params();
        let mut tx = transfer("alice", "bob", 30, &params);
        tx.signature = Some(params.hash.digest(b"forged"));
        let block = mined(&params, vec![tx]);
        assert!(matches!(
            validate_block(&block, &Digest::zero(), &params, &balances()),
            Err(ValidationError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_overspend_rejected() {
        let params = merkle_params();
        let block = mined(&params, vec![transfer("alice", "bob", 150, &params)]);
        assert!(matches!(
            validate_block(&block, &Digest::zero(), &params, &balances()),
            Err(ValidationError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_cumulative_overspend_rejected() {
        let params = merkle_params();
        let block = mined(
            &params,
            vec![
                transfer("alice", "bob", 60, &params),
                Transaction::with_timestamp("alice", "bob", amount(60), 1_700_000_000_001)
                    .signed(params.hash),
            ],
        );
        assert!(matches!(
            validate_block(&block, &Digest::zero(), &params, &balances()),
            Err(ValidationError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_unknown_sender_rejected() {
        let params = merkle_params();
        let block = mined(&params, vec![transfer("mallory", "bob", 1, &params)]);
        assert!(matches!(
            validate_block(&block, &Digest::zero(), &params, &balances()),
            Err(ValidationError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_genesis_validates_against_empty_balances() {
        let params = merkle_params();
        let genesis = Block::genesis(&[("alice".to_string(), amount(100))], &params);
        let empty: BTreeMap<String, Amount> = BTreeMap::new();
        assert!(validate_block(&genesis, &Digest::zero(), &params, &empty).is_ok());
    }
}
