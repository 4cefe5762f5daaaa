//! Durable state for autoexit.
//!
//! - `ExitedLedger`: identities that have been fully exited, so they are
//!   never monitored again, even across restarts
//! - `ExitJournal`: daily JSON Lines log of confirmed exits for downstream
//!   accounting

pub mod error;
pub mod journal;
pub mod ledger;

pub use error::{PersistenceError, PersistenceResult};
pub use journal::ExitJournal;
pub use ledger::{ExitedLedger, ExitedLedgerEntry, JsonlExitedLedger, MemoryExitedLedger};
