//! Append-only audit ledger. Integrity is a structural property of the hash
//! chain, not a trust assumption on write access.

mod chain;
mod ledger;

pub use chain::{event_hash, verify_slice, ChainStatus, GENESIS_HASH};
pub use ledger::{AuditLedger, LedgerError};
