//! Shared pool of admitted, not-yet-mined transactions.
//!
//! One mutex guards the queue; a condition variable wakes mining actors once a
//! full block's worth of transactions is pending, or when the pool closes.

use crate::blockchain::core::state::{BalanceView, Ledger};
use crate::consensus::ChainParams;
use crate::digest::Digest;
use crate::error::AdmissionError;
use crate::transaction::Transaction;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct PoolInner {
    queue: VecDeque<Transaction>,
    pending: HashSet<Digest>,
    closed: bool,
}

#[derive(Debug)]
pub struct Mempool {
    inner: Mutex<PoolInner>,
    ready: Condvar,
    capacity: usize,
    block_capacity: usize,
    params: ChainParams,
    ledger: Arc<Ledger>,
}

impl Mempool {
    pub fn new(capacity: usize, block_capacity: usize, params: ChainParams, ledger: Arc<Ledger>) -> Self {
        Mempool {
            inner: Mutex::new(PoolInner::default()),
            ready: Condvar::new(),
            capacity: capacity.max(1),
            block_capacity: block_capacity.max(1),
            params,
            ledger,
        }
    }

    /// Admit a transaction, or say why not.
    ///
    /// The balance check only reads the ledger; nothing is reserved, so two
    /// admitted transactions may together overspend an account.
    pub fn submit(&self, tx: Transaction) -> Result<(), AdmissionError> {
        if let Err(e) = tx.validate(self.params.hash).and_then(|_| self.ledger.check_funds(&tx)) {
            warn!("Rejected transaction {} -> {}: {}", tx.sender, tx.receiver, e);
            return Err(e);
        }

        let key = tx.digest(self.params.hash);
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(AdmissionError::Closed);
        }
        if inner.queue.len() >= self.capacity {
            warn!("Mempool full, rejecting transaction from {}", tx.sender);
            return Err(AdmissionError::PoolFull {
                capacity: self.capacity,
            });
        }
        if !inner.pending.insert(key.clone()) {
            return Err(AdmissionError::Duplicate(key));
        }

        debug!(
            "Admitted {} -> {} ({}), {} pending",
            tx.sender,
            tx.receiver,
            tx.amount,
            inner.queue.len() + 1
        );
        inner.queue.push_back(tx);

        if inner.queue.len() >= self.block_capacity {
            self.ready.notify_all();
        }
        Ok(())
    }

    /// Remove up to `n` of the oldest transactions.
    pub fn drain(&self, n: usize) -> Vec<Transaction> {
        let mut inner = self.inner.lock();
        Self::take(&mut inner, n, self.params)
    }

    fn take(inner: &mut PoolInner, n: usize, params: ChainParams) -> Vec<Transaction> {
        let count = n.min(inner.queue.len());
        let batch: Vec<Transaction> = inner.queue.drain(..count).collect();
        for tx in &batch {
            inner.pending.remove(&tx.digest(params.hash));
        }
        batch
    }

    /// Block until `n` transactions are pending, then drain them.
    ///
    /// With `poll` set, gives up waiting after that long and drains whatever is
    /// pending (possibly nothing). Returns `None` once the pool is closed.
    pub fn wait_for_draft(&self, n: usize, poll: Option<Duration>) -> Option<Vec<Transaction>> {
        let n = n.max(1);
        let mut inner = self.inner.lock();
        while !inner.closed && inner.queue.len() < n {
            match poll {
                Some(timeout) => {
                    if self.ready.wait_for(&mut inner, timeout).timed_out() {
                        break;
                    }
                }
                None => self.ready.wait(&mut inner),
            }
        }
        if inner.closed {
            return None;
        }
        Some(Self::take(&mut inner, n, self.params))
    }

    /// Refuse further submissions and wake every waiter.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// Copy of the pending queue, oldest first.
    pub fn pending(&self) -> Vec<Transaction> {
        self.inner.lock().queue.iter().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn block_capacity(&self) -> usize {
        self.block_capacity
    }
}
