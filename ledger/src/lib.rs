//! SwapSettle Ledger
//!
//! Port to the external per-account balance store, with an in-memory
//! implementation, an optional PostgreSQL implementation and the
//! compare-and-swap [`LedgerEngine`] used by order escrow and settlement.

pub mod balance;
pub mod engine;
pub mod journal;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod store;

pub use balance::{AccountBalances, BalanceChange, BalanceChangeType};
pub use engine::LedgerEngine;
pub use journal::{EntryPurpose, Journal, JournalEntry};
pub use memory::MemoryLedger;
#[cfg(feature = "postgres")]
pub use postgres::PgLedger;
pub use store::LedgerStore;
