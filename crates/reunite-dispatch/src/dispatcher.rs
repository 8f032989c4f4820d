//! Dispatch cycles: recipient selection, suppression, retry with backoff,
//! and paced disaster broadcast.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use reunite_core::config::DispatchParams;
use reunite_core::geo::GeoPoint;
use reunite_core::types::{AlertMode, AlertZone, AlertZoneStatus, CaseId};
use reunite_ledger::{AuditLedger, LedgerError};
use thiserror::Error;
use tracing::{info, warn};

use crate::subscribers::{Subscriber, SubscriberRegistry};
use crate::transport::{CaseAlert, Transport};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("audit append failed, dispatch not recorded: {0}")]
    Ledger(#[from] LedgerError),
}

pub struct AlertDispatcher {
    registry: Arc<SubscriberRegistry>,
    transport: Arc<dyn Transport>,
    ledger: Arc<AuditLedger>,
    params: DispatchParams,
    /// Last alert time per (subscriber, case), consulted in standard mode.
    suppression: Mutex<HashMap<(String, CaseId), Instant>>,
}

impl AlertDispatcher {
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        transport: Arc<dyn Transport>,
        ledger: Arc<AuditLedger>,
        params: DispatchParams,
    ) -> Self {
        Self {
            registry,
            transport,
            ledger,
            params,
            suppression: Mutex::new(HashMap::new()),
        }
    }

    /// Run one dispatch cycle and return its terminal zone record.
    ///
    /// Standard mode caps fan-out and suppresses repeat alerts for the same
    /// case inside the cool-down window. Disaster mode lifts the cap but
    /// emits in paced batches so the downstream transport is never flooded.
    /// Recipients that exhaust retries are surfaced in `undelivered`.
    pub async fn dispatch(
        &self,
        case_id: &CaseId,
        center: GeoPoint,
        radius_meters: f64,
        mode: AlertMode,
    ) -> Result<AlertZone, DispatchError> {
        let mut recipients = self.registry.within(&center, radius_meters);
        if mode == AlertMode::Standard {
            recipients = self.unsuppressed(case_id, recipients);
            recipients.truncate(self.params.fanout_cap);
        }

        let alert = CaseAlert {
            case_id: case_id.clone(),
            center,
            mode,
        };

        let undelivered = match mode {
            AlertMode::Standard => self.deliver_batch(&recipients, &alert).await,
            AlertMode::DisasterBroadcast => {
                let mut failed = Vec::new();
                let batch_size = self.params.disaster_batch_size.max(1);
                let mut batches = recipients.chunks(batch_size).peekable();
                while let Some(batch) = batches.next() {
                    failed.extend(self.deliver_batch(batch, &alert).await);
                    if batches.peek().is_some() {
                        tokio::time::sleep(Duration::from_millis(
                            self.params.disaster_batch_pause_ms,
                        ))
                        .await;
                    }
                }
                failed
            }
        };

        let now = Instant::now();
        {
            let mut suppression = self.suppression.lock().expect("suppression lock poisoned");
            for recipient in &recipients {
                if !undelivered.contains(&recipient.id) {
                    suppression.insert((recipient.id.clone(), case_id.clone()), now);
                }
            }
        }

        let status = if undelivered.is_empty() {
            AlertZoneStatus::Dispatched
        } else {
            AlertZoneStatus::PartiallyDispatched
        };
        let action = match status {
            AlertZoneStatus::Dispatched => "alert_dispatched",
            AlertZoneStatus::PartiallyDispatched => "alert_partially_dispatched",
        };
        self.ledger
            .append("dispatcher", action, &format!("case/{case_id}/alert"))?;

        if !undelivered.is_empty() {
            warn!(
                case_id = %case_id,
                undelivered = undelivered.len(),
                "dispatch cycle left recipients unreached"
            );
        }
        info!(
            case_id = %case_id,
            recipients = recipients.len(),
            ?mode,
            "dispatch cycle complete"
        );

        Ok(AlertZone {
            case_id: case_id.clone(),
            center,
            radius_meters,
            mode,
            recipient_count: recipients.len(),
            dispatched_at: Utc::now(),
            status,
            undelivered,
        })
    }

    fn unsuppressed(&self, case_id: &CaseId, recipients: Vec<Subscriber>) -> Vec<Subscriber> {
        let cooldown = Duration::from_secs(self.params.suppression_cooldown_secs);
        let suppression = self.suppression.lock().expect("suppression lock poisoned");
        recipients
            .into_iter()
            .filter(|r| {
                suppression
                    .get(&(r.id.clone(), case_id.clone()))
                    .map(|at| at.elapsed() >= cooldown)
                    .unwrap_or(true)
            })
            .collect()
    }

    /// Deliver to one batch concurrently; returns the ids that failed.
    async fn deliver_batch(&self, batch: &[Subscriber], alert: &CaseAlert) -> Vec<String> {
        let attempts = join_all(
            batch
                .iter()
                .map(|recipient| self.deliver_with_retry(&recipient.id, alert)),
        )
        .await;

        batch
            .iter()
            .zip(attempts)
            .filter(|(_, delivered)| !delivered)
            .map(|(recipient, _)| recipient.id.clone())
            .collect()
    }

    /// Bounded retries with exponential backoff; a timeout is a retryable
    /// failure, never an implicit success.
    async fn deliver_with_retry(&self, subscriber_id: &str, alert: &CaseAlert) -> bool {
        let deadline = Duration::from_millis(self.params.transport_deadline_ms);
        for attempt in 0..self.params.max_attempts {
            let outcome =
                tokio::time::timeout(deadline, self.transport.deliver(subscriber_id, alert)).await;
            match outcome {
                Ok(Ok(())) => return true,
                Ok(Err(e)) if !e.is_retryable() => {
                    warn!(subscriber_id, error = %e, "delivery rejected");
                    return false;
                }
                Ok(Err(_)) | Err(_) => {}
            }
            if attempt + 1 < self.params.max_attempts {
                tokio::time::sleep(backoff_delay(self.params.backoff_base_ms, attempt)).await;
            }
        }
        false
    }
}

/// Exponential backoff delay. The exponent is capped so oversized attempt
/// budgets cannot overflow the shift; the product saturates instead of
/// wrapping.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.min(16);
    Duration::from_millis(base_ms.saturating_mul(factor))
}
