use crate::blockchain::core::chain::Block;
use crate::error::AdmissionError;
use crate::transaction::{Amount, Transaction};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Read access to account balances, as needed by admission and validation.
pub trait BalanceView {
    /// `None` for accounts the ledger has never seen.
    fn balance_of(&self, account: &str) -> Option<Amount>;

    /// Check that `tx.sender` can cover `tx.amount`. System transfers always pass.
    fn check_funds(&self, tx: &Transaction) -> Result<(), AdmissionError> {
        if tx.is_system() {
            return Ok(());
        }
        let balance = self
            .balance_of(&tx.sender)
            .ok_or_else(|| AdmissionError::UnknownSender(tx.sender.clone()))?;
        if balance < tx.amount {
            return Err(AdmissionError::InsufficientFunds {
                sender: tx.sender.clone(),
                balance,
                amount: tx.amount,
            });
        }
        Ok(())
    }
}

impl BalanceView for BTreeMap<String, Amount> {
    fn balance_of(&self, account: &str) -> Option<Amount> {
        self.get(account).copied()
    }
}

impl BalanceView for HashMap<String, Amount> {
    fn balance_of(&self, account: &str) -> Option<Amount> {
        self.get(account).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub balance: Amount,
}

impl Account {
    pub fn new(id: impl Into<String>, balance: Amount) -> Self {
        Account {
            id: id.into(),
            balance,
        }
    }
}

/// Process-wide account balances. Mutated only when a block is committed by its miner.
#[derive(Debug, Default)]
pub struct Ledger {
    accounts: Mutex<HashMap<String, Account>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialise balances by applying the genesis block (no reward).
    pub fn from_genesis(genesis: &Block) -> Self {
        let ledger = Ledger::new();
        ledger.apply_block(genesis, Amount::ZERO);
        ledger
    }

    /// Create or overwrite an account.
    pub fn open_account(&self, id: impl Into<String>, balance: Amount) {
        let account = Account::new(id, balance);
        self.accounts.lock().insert(account.id.clone(), account);
    }

    pub fn balance(&self, id: &str) -> Option<Amount> {
        self.accounts.lock().get(id).map(|a| a.balance)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.accounts.lock().contains_key(id)
    }

    /// Debit senders, credit receivers and pay `reward` to the block's miner,
    /// all under one lock acquisition.
    ///
    /// A debit that would go below zero (funds spent by a concurrently
    /// committed block) is clamped at zero.
    pub fn apply_block(&self, block: &Block, reward: Amount) {
        let mut accounts = self.accounts.lock();

        for tx in &block.transactions {
            if !tx.is_system() {
                let sender = accounts
                    .entry(tx.sender.clone())
                    .or_insert_with(|| Account::new(tx.sender.clone(), Amount::ZERO));
                if sender.balance < tx.amount {
                    warn!(
                        "Block {}: {} overdrawn ({} < {}), clamping at zero",
                        block.index, tx.sender, sender.balance, tx.amount
                    );
                    sender.balance = Amount::ZERO;
                } else {
                    sender.balance -= tx.amount;
                }
            }

            accounts
                .entry(tx.receiver.clone())
                .or_insert_with(|| Account::new(tx.receiver.clone(), Amount::ZERO))
                .balance += tx.amount;
        }

        if let Some(miner) = &block.miner {
            if reward > Amount::ZERO {
                accounts
                    .entry(miner.clone())
                    .or_insert_with(|| Account::new(miner.clone(), Amount::ZERO))
                    .balance += reward;
            }
        }

        debug!(
            "Applied block {} ({} transactions) to ledger",
            block.index,
            block.transactions.len()
        );
    }

    /// Ordered copy of every balance.
    pub fn snapshot(&self) -> BTreeMap<String, Amount> {
        self.accounts
            .lock()
            .values()
            .map(|a| (a.id.clone(), a.balance))
            .collect()
    }

    pub fn accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self.accounts.lock().values().cloned().collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        accounts
    }

    /// Sum of all balances.
    pub fn total_supply(&self) -> Amount {
        self.accounts.lock().values().map(|a| a.balance).sum()
    }
}

impl BalanceView for Ledger {
    fn balance_of(&self, account: &str) -> Option<Amount> {
        self.balance(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ChainParams;
    use crate::digest::Digest;
    use crate::transaction::SYSTEM_SENDER;

    fn amount(v: i64) -> Amount {
        Amount::from_num(v)
    }

    fn params() -> ChainParams {
        ChainParams {
            difficulty: 1,
            ..ChainParams::default()
        }
    }

    fn genesis() -> Block {
        Block::genesis(
            &[
                ("alice".to_string(), amount(100)),
                ("bob".to_string(), amount(100)),
                ("carol".to_string(), amount(100)),
            ],
            &params(),
        )
    }

    #[test]
    fn test_ledger_from_genesis() {
        let ledger = Ledger::from_genesis(&genesis());
        assert_eq!(ledger.balance("alice"), Some(amount(100)));
        assert_eq!(ledger.balance("bob"), Some(amount(100)));
        assert_eq!(ledger.balance("carol"), Some(amount(100)));
        assert_eq!(ledger.balance(SYSTEM_SENDER), None);
        assert_eq!(ledger.total_supply(), amount(300));
    }

    #[test]
    fn test_apply_block_moves_funds_and_pays_miner() {
        let params = params();
        let ledger = Ledger::from_genesis(&genesis());
        let tx = Transaction::new("alice", "bob", amount(30)).signed(params.hash);
        let block = Block::draft(1, Digest::zero(), vec![tx], Some("node-0".to_string()), &params);

        ledger.apply_block(&block, amount(10));

        assert_eq!(ledger.balance("alice"), Some(amount(70)));
        assert_eq!(ledger.balance("bob"), Some(amount(130)));
        assert_eq!(ledger.balance("carol"), Some(amount(100)));
        assert_eq!(ledger.balance("node-0"), Some(amount(10)));
    }

    #[test]
    fn test_unseen_receiver_gets_implicit_account() {
        let params = params();
        let ledger = Ledger::from_genesis(&genesis());
        let tx = Transaction::new("alice", "dave", amount(5)).signed(params.hash);
        let block = Block::draft(1, Digest::zero(), vec![tx], None, &params);

        assert!(!ledger.contains("dave"));
        ledger.apply_block(&block, amount(10));
        assert_eq!(ledger.balance("dave"), Some(amount(5)));
    }

    #[test]
    fn test_overdraft_clamps_at_zero() {
        let params = params();
        let ledger = Ledger::from_genesis(&genesis());
        let tx = Transaction::new("alice", "bob", amount(150)).signed(params.hash);
        let block = Block::draft(1, Digest::zero(), vec![tx], None, &params);

        ledger.apply_block(&block, Amount::ZERO);
        assert_eq!(ledger.balance("alice"), Some(Amount::ZERO));
    }

    #[test]
    fn test_check_funds() {
        let ledger = Ledger::from_genesis(&genesis());

        let ok = Transaction::new("alice", "bob", amount(100));
        assert!(ledger.check_funds(&ok).is_ok());

        let too_much = Transaction::new("alice", "bob", amount(101));
        assert!(matches!(
            ledger.check_funds(&too_much),
            Err(AdmissionError::InsufficientFunds { .. })
        ));

        let unknown = Transaction::new("mallory", "bob", amount(1));
        assert_eq!(
            ledger.check_funds(&unknown),
            Err(AdmissionError::UnknownSender("mallory".to_string()))
        );

        let mint = Transaction::new(SYSTEM_SENDER, "bob", amount(1_000_000));
        assert!(ledger.check_funds(&mint).is_ok());
    }

    #[test]
    fn test_snapshot_is_ordered() {
        let ledger = Ledger::from_genesis(&genesis());
        let keys: Vec<String> = ledger.snapshot().into_keys().collect();
        assert_eq!(keys, vec!["alice", "bob", "carol"]);
    }
}
