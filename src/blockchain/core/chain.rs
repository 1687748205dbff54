use crate::blockchain::core::state::BalanceView;
use crate::blockchain::core::validation::validate_block;
use crate::consensus::{describe, search, verify, ChainParams};
use crate::digest::Digest;
use crate::error::{ChainError, ValidationError};
use crate::merkle::{MerkleTree, EMPTY_ROOT};
use crate::transaction::{Amount, Transaction, SYSTEM_SENDER};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Timestamp shared by every node's genesis block (2023-01-01T00:00:00Z).
pub const GENESIS_TIMESTAMP: i64 = 1_672_531_200_000;

/// How a block's digest binds its transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Commitment {
    /// Every transaction's fields and signature are concatenated into the preimage.
    Flat,
    /// The Merkle root of the transactions enters the preimage, followed by
    /// each transaction's signature.
    #[default]
    Merkle,
}

/// Block preimage split around the proof so that search only rewrites eight bytes.
pub struct Preimage {
    buffer: Vec<u8>,
    proof_offset: usize,
}

impl Preimage {
    pub fn with_proof(&mut self, proof: u64) -> &[u8] {
        self.buffer[self.proof_offset..self.proof_offset + 8].copy_from_slice(&proof.to_le_bytes());
        &self.buffer
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    /// Creation time in Unix milliseconds.
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    pub previous_digest: Digest,
    pub digest: Digest,
    pub proof: u64,
    pub merkle_root: Option<Digest>,
    pub miner: Option<String>,
}

impl Block {
    /// Draft an unsealed candidate: proof 0, digest computed for that proof.
    pub fn draft(
        index: u64,
        previous_digest: Digest,
        transactions: Vec<Transaction>,
        miner: Option<String>,
        params: &ChainParams,
    ) -> Self {
        Self::draft_at(
            index,
            chrono::Utc::now().timestamp_millis(),
            previous_digest,
            transactions,
            miner,
            params,
        )
    }

    pub fn draft_at(
        index: u64,
        timestamp: i64,
        previous_digest: Digest,
        transactions: Vec<Transaction>,
        miner: Option<String>,
        params: &ChainParams,
    ) -> Self {
        let merkle_root = match params.commitment {
            Commitment::Merkle => MerkleTree::build_root(params.hash, &transactions),
            Commitment::Flat => None,
        };

        let mut block = Block {
            index,
            timestamp,
            transactions,
            previous_digest,
            digest: Digest::zero(),
            proof: 0,
            merkle_root,
            miner,
        };
        block.seal(params);
        block
    }

    /// Build the genesis block: one `SYSTEM` transfer per allocation and a proof
    /// satisfying the configured rule. Identical inputs yield identical blocks.
    pub fn genesis(allocations: &[(String, Amount)], params: &ChainParams) -> Self {
        let transactions = allocations
            .iter()
            .map(|(account, balance)| {
                Transaction::with_timestamp(SYSTEM_SENDER, account.clone(), *balance, GENESIS_TIMESTAMP)
                    .signed(params.hash)
            })
            .collect();

        let mut genesis = Block::draft_at(0, GENESIS_TIMESTAMP, Digest::zero(), transactions, None, params);
        if search(&mut genesis, params, &|| false).is_none() {
            warn!("Genesis proof search exhausted without meeting {}", describe(params));
        }
        genesis
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// Committed preimage: index, timestamp, previous digest, proof, then the
    /// transaction commitment for the strategy in effect.
    pub fn preimage(&self, params: &ChainParams) -> Preimage {
        let mut buffer = Vec::with_capacity(256);
        buffer.extend_from_slice(&self.index.to_le_bytes());
        buffer.extend_from_slice(&self.timestamp.to_le_bytes());
        buffer.extend_from_slice(self.previous_digest.as_bytes());
        let proof_offset = buffer.len();
        buffer.extend_from_slice(&self.proof.to_le_bytes());

        match params.commitment {
            Commitment::Flat => {
                for tx in &self.transactions {
                    buffer.extend_from_slice(&tx.commitment_bytes());
                }
            }
            Commitment::Merkle => {
                match MerkleTree::build_root(params.hash, &self.transactions) {
                    Some(root) => buffer.extend_from_slice(root.as_bytes()),
                    None => buffer.extend_from_slice(EMPTY_ROOT.as_bytes()),
                }
                // Leaves cover only the signable fields.
                for tx in &self.transactions {
                    buffer.extend_from_slice(tx.signature_bytes());
                }
            }
        }

        Preimage { buffer, proof_offset }
    }

    /// Recompute the commitment from the block's current contents.
    pub fn compute_digest(&self, params: &ChainParams) -> Digest {
        let mut preimage = self.preimage(params);
        params.hash.digest(preimage.with_proof(self.proof))
    }

    /// Store the recomputed commitment in `digest`.
    pub fn seal(&mut self, params: &ChainParams) {
        self.digest = self.compute_digest(params);
    }

    pub fn total_transferred(&self) -> Amount {
        self.transactions.iter().map(|tx| tx.amount).sum()
    }

    /// Binary wire form used by the propagation layer.
    pub fn to_wire(&self) -> Result<Vec<u8>, ChainError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self, ChainError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// JSON form for reports and external tooling.
    pub fn to_json(&self) -> Result<String, ChainError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// One node's replica of the ledger history. Never empty: starts at genesis.
#[derive(Debug, Clone)]
pub struct Chain {
    blocks: Vec<Block>,
}

impl Chain {
    pub fn new(genesis: Block) -> Self {
        Chain {
            blocks: vec![genesis],
        }
    }

    pub fn tip(&self) -> &Block {
        // Invariant: a chain always holds at least its genesis block.
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn get(&self, index: u64) -> Option<&Block> {
        self.blocks.get(index as usize)
    }

    pub fn genesis(&self) -> &Block {
        &self.blocks[0]
    }

    /// Validate `block` against this chain's own tip and append it.
    ///
    /// Whoever produced the block, the checks are re-run here.
    pub fn append(
        &mut self,
        block: Block,
        params: &ChainParams,
        balances: &dyn BalanceView,
    ) -> Result<(), ValidationError> {
        let tip = self.tip();
        if block.previous_digest != tip.digest {
            return Err(ValidationError::PrevHashMismatch {
                expected: tip.digest.clone(),
                actual: block.previous_digest,
            });
        }

        let expected_index = self.blocks.len() as u64;
        if block.index != expected_index {
            return Err(ValidationError::IndexMismatch {
                expected: expected_index,
                actual: block.index,
            });
        }

        validate_block(&block, &tip.digest, params, balances)?;
        self.blocks.push(block);
        Ok(())
    }

    /// Audit the stored history: links, indices, consensus and commitments.
    /// Balances are not replayed.
    pub fn verify_integrity(&self, params: &ChainParams) -> Result<(), ValidationError> {
        for (position, pair) in self.blocks.windows(2).enumerate() {
            let (previous, block) = (&pair[0], &pair[1]);
            if block.previous_digest != previous.digest {
                return Err(ValidationError::PrevHashMismatch {
                    expected: previous.digest.clone(),
                    actual: block.previous_digest.clone(),
                });
            }
            if block.index != position as u64 + 1 {
                return Err(ValidationError::IndexMismatch {
                    expected: position as u64 + 1,
                    actual: block.index,
                });
            }
        }

        for block in &self.blocks {
            if !verify(block, params) {
                return Err(ValidationError::ConsensusFailed { index: block.index });
            }
            let recomputed = block.compute_digest(params);
            if recomputed != block.digest {
                return Err(ValidationError::DigestMismatch {
                    expected: recomputed,
                    actual: block.digest.clone(),
                });
            }
        }
        Ok(())
    }
}
