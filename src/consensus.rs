//! Proof-of-work predicates shared by mining and validation.
//!
//! Two interchangeable rules:
//! - **HashPrefix**: the block digest starts with `difficulty` zero hex characters.
//! - **Numeric**: the proof is odd, divisible by 3 and strictly greater than
//!   `difficulty + index`.
//!
//! `search` finds a proof by incrementing a trial value; `verify` checks a
//! finished block without searching and agrees with `search` by construction.

use crate::blockchain::core::chain::{Block, Commitment};
use crate::digest::{Digest, HashAlgorithm};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How often `search` consults its abort predicate, in trials.
pub const SEARCH_POLL_INTERVAL: u64 = 1024;

/// Highest hash-prefix difficulty a deployment may configure. Genesis is
/// mined without an abort predicate, so the search must stay finite in practice.
pub const MAX_HASH_PREFIX_DIFFICULTY: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusRule {
    #[default]
    HashPrefix,
    Numeric,
}

/// Deployment-wide parameters every node must agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    #[serde(default)]
    pub hash: HashAlgorithm,
    #[serde(default)]
    pub commitment: Commitment,
    #[serde(default)]
    pub rule: ConsensusRule,
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,
}

fn default_difficulty() -> u32 {
    2
}

impl Default for ChainParams {
    fn default() -> Self {
        ChainParams {
            hash: HashAlgorithm::default(),
            commitment: Commitment::default(),
            rule: ConsensusRule::default(),
            difficulty: default_difficulty(),
        }
    }
}

/// Hash-prefix form: the first `difficulty` hex characters are all `'0'`.
pub fn digest_meets_target(digest: &Digest, difficulty: u32) -> bool {
    digest.leading_zeros() >= difficulty as usize
}

/// Numeric form: odd, divisible by 3, and above the difficulty floor.
pub fn numeric_satisfies(proof: u64, difficulty: u32, index: u64) -> bool {
    let floor = (difficulty as u64).saturating_add(index);
    proof % 2 == 1 && proof % 3 == 0 && proof > floor
}

/// Check a finished block against the rule, without search.
///
/// The hash-prefix form inspects the stored digest. Whether that digest really
/// commits to the block's contents is the validator's separate concern.
pub fn verify(block: &Block, params: &ChainParams) -> bool {
    match params.rule {
        ConsensusRule::HashPrefix => digest_meets_target(&block.digest, params.difficulty),
        ConsensusRule::Numeric => numeric_satisfies(block.proof, params.difficulty, block.index),
    }
}

/// Search for a proof, store it and the matching digest in `block`.
///
/// `abort` is polled every `SEARCH_POLL_INTERVAL` trials; returns `None` if it
/// fired (the block is left with whatever trial it had reached).
pub fn search(block: &mut Block, params: &ChainParams, abort: &dyn Fn() -> bool) -> Option<u64> {
    let proof = match params.rule {
        ConsensusRule::HashPrefix => search_hash_prefix(block, params, abort)?,
        ConsensusRule::Numeric => search_numeric(block, params, abort)?,
    };

    block.proof = proof;
    block.seal(params);
    debug!(
        "Block {} solved: proof={} digest={}",
        block.index,
        proof,
        block.digest.short()
    );
    Some(proof)
}

fn search_hash_prefix(block: &Block, params: &ChainParams, abort: &dyn Fn() -> bool) -> Option<u64> {
    let mut preimage = block.preimage(params);
    let mut proof: u64 = 0;
    loop {
        if proof % SEARCH_POLL_INTERVAL == 0 && proof != 0 && abort() {
            return None;
        }
        let digest = params.hash.digest(preimage.with_proof(proof));
        if digest_meets_target(&digest, params.difficulty) {
            return Some(proof);
        }
        proof = proof.checked_add(1)?;
    }
}

fn search_numeric(block: &Block, params: &ChainParams, abort: &dyn Fn() -> bool) -> Option<u64> {
    let mut proof: u64 = 0;
    loop {
        if proof % SEARCH_POLL_INTERVAL == 0 && proof != 0 && abort() {
            return None;
        }
        if numeric_satisfies(proof, params.difficulty, block.index) {
            return Some(proof);
        }
        proof = proof.checked_add(1)?;
    }
}

/// Human-readable description of the rule in effect, for logs and reports.
pub fn describe(params: &ChainParams) -> String {
    let rule = match params.rule {
        ConsensusRule::HashPrefix => format!("{} leading zero hex digits", params.difficulty),
        ConsensusRule::Numeric => format!("odd multiple of 3 above {} + index", params.difficulty),
    };
    let hash = match params.hash {
        HashAlgorithm::Sha256 => "sha256",
        HashAlgorithm::Djb2 => "djb2",
    };
    let commitment = match params.commitment {
        Commitment::Flat => "flat",
        Commitment::Merkle => "merkle",
    };
    format!("{rule} ({hash}, {commitment} commitment)")
}
