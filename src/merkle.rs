//! Merkle commitment over a block's transactions.
//!
//! - Leaves are the transaction digests, in block order.
//! - A level with an odd count pairs its last node with a copy of itself.
//! - The root is always an interior node, so a lone leaf is also paired with
//!   itself and `[tx]` commits to the same root as `[tx, tx]`.
//! - An empty sequence has no root.

use crate::digest::{Digest, HashAlgorithm};
use crate::transaction::Transaction;

/// Literal committed in place of a root for an empty block.
pub const EMPTY_ROOT: &str = "null";

pub struct MerkleTree;

impl MerkleTree {
    /// Digest of the concatenated child digests.
    pub fn hash_pair(algo: HashAlgorithm, left: &Digest, right: &Digest) -> Digest {
        let mut buffer = Vec::with_capacity(left.as_bytes().len() + right.as_bytes().len());
        buffer.extend_from_slice(left.as_bytes());
        buffer.extend_from_slice(right.as_bytes());
        algo.digest(&buffer)
    }

    /// Reduce leaf digests to a root, in place.
    pub fn from_leaves(algo: HashAlgorithm, mut nodes: Vec<Digest>) -> Option<Digest> {
        if nodes.is_empty() {
            return None;
        }

        let mut len = nodes.len();
        loop {
            let mut write = 0;
            let mut read = 0;
            while read < len {
                let left = &nodes[read];
                let right = if read + 1 < len { &nodes[read + 1] } else { left };
                let parent = Self::hash_pair(algo, left, right);
                nodes[write] = parent;
                write += 1;
                read += 2;
            }
            len = write;
            if len == 1 {
                break;
            }
        }

        nodes.truncate(1);
        nodes.pop()
    }

    /// Root over the transactions' signable-field digests.
    pub fn build_root(algo: HashAlgorithm, transactions: &[Transaction]) -> Option<Digest> {
        let leaves = transactions.iter().map(|tx| tx.digest(algo)).collect();
        Self::from_leaves(algo, leaves)
    }
}
