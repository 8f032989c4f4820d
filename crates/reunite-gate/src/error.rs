use reunite_ledger::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    /// The audit append failed, so the result was never released.
    #[error("audit append failed, disclosure withheld: {0}")]
    Ledger(#[from] LedgerError),
}
