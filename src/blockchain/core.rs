// Chain replica, account ledger and block validation, one submodule each.
pub mod chain;
pub mod state;
pub mod validation;

pub use chain::*;
pub use state::*;
pub use validation::*;
