// Thin re-export module: implementation is in `blockchain/core.rs`, split by
// responsibility (chain replica, account ledger, block validation).

pub mod core;
pub use self::core::*;
