//! Delivery transport seam. Production wires push/SMS providers here; tests
//! wire scripted fakes.

use async_trait::async_trait;
use reunite_core::geo::GeoPoint;
use reunite_core::types::{AlertMode, CaseId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("recipient rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Whether the dispatcher should retry this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Unavailable(_))
    }
}

/// Alert content delivered to each recipient.
#[derive(Debug, Clone)]
pub struct CaseAlert {
    pub case_id: CaseId,
    pub center: GeoPoint,
    pub mode: AlertMode,
}

/// External delivery channel. Implementations must tolerate concurrent calls.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, subscriber_id: &str, alert: &CaseAlert) -> Result<(), TransportError>;
}
