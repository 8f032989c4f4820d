//! Engine-level error taxonomy.
//!
//! Validation and policy outcomes go back to the immediate caller; integrity
//! faults additionally latch the gate's disclosure halt before they surface.

use reunite_dispatch::DispatchError;
use reunite_gate::GateError;
use reunite_index::IndexError;
use reunite_ledger::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input, rejected synchronously. Not a security event.
    #[error("invalid input: {0}")]
    Validation(String),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// Chain break or decrypt failure. Disclosures stay halted until an
    /// operator clears the hold.
    #[error("integrity fault: {0}")]
    Integrity(String),
}
