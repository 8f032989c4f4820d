//! The gate proper: policy evaluation, log-then-release, redaction, and the
//! integrity halt latch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use reunite_core::types::{
    AccessDecision, CaseId, ConsentRecord, Decision, MatchCandidate, ReasonCategory,
};
use reunite_ledger::AuditLedger;
use tracing::{info, warn};

use crate::consent::ConsentStore;
use crate::error::GateError;
use crate::policy::{self, AccessRequest};

pub struct PrivacyGate {
    ledger: Arc<AuditLedger>,
    consent: ConsentStore,
    halted: AtomicBool,
}

impl PrivacyGate {
    pub fn new(ledger: Arc<AuditLedger>) -> Self {
        Self {
            ledger,
            consent: ConsentStore::new(),
            halted: AtomicBool::new(false),
        }
    }

    pub fn record_consent(&self, consent: ConsentRecord) {
        self.consent.record(consent);
    }

    pub fn consent_for(&self, case_id: &CaseId) -> Option<ConsentRecord> {
        self.consent.get(case_id)
    }

    /// Evaluate one request and durably log the decision.
    ///
    /// The audit append is acknowledged before the decision is returned, so a
    /// crash between decision and disclosure can lose the disclosure but never
    /// the trail. A ledger failure withholds the result entirely.
    pub fn authorize(
        &self,
        request: &AccessRequest<'_>,
        subject: Option<&CaseId>,
    ) -> Result<AccessDecision, GateError> {
        let (decision, reason) = if self.halted.load(Ordering::SeqCst) {
            (Decision::Deny, ReasonCategory::IntegrityHold)
        } else {
            let consent = subject.and_then(|id| self.consent.get(id));
            policy::evaluate(request, consent.as_ref())
        };

        let access = AccessDecision {
            requester_id: request.requester_id.to_string(),
            requester_role: request.requester_role,
            resource_ref: request.resource_ref.to_string(),
            decision,
            reason,
            timestamp: Utc::now(),
        };

        self.ledger.append(
            &access.requester_id,
            &format!("access_{}", decision_slug(decision)),
            &access.resource_ref,
        )?;

        info!(
            requester = %access.requester_id,
            resource = %access.resource_ref,
            decision = decision_slug(decision),
            "access decision"
        );
        Ok(access)
    }

    /// Apply an already-logged decision to a candidate list.
    ///
    /// Denied requests release nothing. Redacted requests confirm match
    /// existence but withhold the biometric vector and region attributions.
    pub fn release(
        &self,
        access: &AccessDecision,
        mut candidates: Vec<MatchCandidate>,
    ) -> Vec<MatchCandidate> {
        match access.decision {
            Decision::Allow => candidates,
            Decision::AllowRedacted => {
                for candidate in &mut candidates {
                    redact(candidate);
                }
                candidates
            }
            Decision::Deny => Vec::new(),
        }
    }

    /// Latch the halt: every subsequent request is denied with
    /// `IntegrityHold` until an operator clears it.
    pub fn halt_disclosures(&self, cause: &str) {
        warn!(cause, "disclosures halted");
        self.halted.store(true, Ordering::SeqCst);
    }

    /// Manual operator action after the underlying fault is resolved.
    pub fn clear_integrity_halt(&self) {
        info!("integrity halt cleared");
        self.halted.store(false, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

fn redact(candidate: &mut MatchCandidate) {
    candidate.vector = None;
    candidate.explanation.contributing_regions.clear();
}

fn decision_slug(decision: Decision) -> &'static str {
    match decision {
        Decision::Allow => "allow",
        Decision::AllowRedacted => "allow_redacted",
        Decision::Deny => "deny",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reunite_core::config::LedgerParams;
    use reunite_core::types::{Explanation, RequesterRole, SignalName};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn gate() -> PrivacyGate {
        PrivacyGate::new(Arc::new(AuditLedger::in_memory(LedgerParams::default())))
    }

    fn minor_consent(case: &str) -> ConsentRecord {
        ConsentRecord {
            case_id: CaseId::new(case),
            subject_is_minor: true,
            guardian_approved: false,
            police_approval_ref: None,
            court_order_ref: None,
        }
    }

    fn candidate(case: &str) -> MatchCandidate {
        MatchCandidate {
            query_id: Uuid::new_v4(),
            candidate_case_id: CaseId::new(case),
            similarity_score: 0.9,
            secondary_signals: BTreeMap::new(),
            composite_confidence: 0.9,
            explanation: Explanation {
                contributing_regions: vec!["jawline".into()],
                contributing_signals: vec![SignalName::FacialSimilarity],
            },
            vector: Some(vec![0.1, 0.2]),
        }
    }

    fn citizen_request(resource: &str) -> AccessRequest<'_> {
        AccessRequest {
            requester_id: "citizen-7",
            requester_role: RequesterRole::Citizen,
            resource_ref: resource,
            deep_search: false,
            court_order_ref: None,
        }
    }

    #[test]
    fn decision_logged_before_release() {
        let gate = gate();
        let before = gate.ledger.next_event_id();
        let access = gate
            .authorize(&citizen_request("case/C1/matches"), None)
            .unwrap();
        assert_eq!(access.decision, Decision::Allow);
        assert_eq!(gate.ledger.next_event_id(), before + 1);
    }

    #[test]
    fn redacted_release_withholds_vector_and_regions() {
        let gate = gate();
        let case_id = CaseId::new("C1");
        gate.record_consent(minor_consent("C1"));

        let access = gate
            .authorize(&citizen_request("case/C1/matches"), Some(&case_id))
            .unwrap();
        assert_eq!(access.decision, Decision::AllowRedacted);
        assert_eq!(access.reason, ReasonCategory::MinorProtected);

        let released = gate.release(&access, vec![candidate("C1")]);
        assert_eq!(released.len(), 1);
        assert!(released[0].vector.is_none());
        assert!(released[0].explanation.contributing_regions.is_empty());
        // Match existence is still confirmed.
        assert_eq!(released[0].candidate_case_id, case_id);
    }

    #[test]
    fn denied_release_returns_nothing() {
        let gate = gate();
        let case_id = CaseId::new("C1");
        gate.record_consent(minor_consent("C1"));

        let request = AccessRequest {
            requester_id: "police-3",
            requester_role: RequesterRole::VerifiedPolice,
            resource_ref: "case/C1/deep",
            deep_search: true,
            court_order_ref: Some("CO-1"),
        };
        let access = gate.authorize(&request, Some(&case_id)).unwrap();
        assert_eq!(access.decision, Decision::Deny);
        assert!(gate.release(&access, vec![candidate("C1")]).is_empty());
    }

    #[test]
    fn halt_denies_everything_until_cleared() {
        let gate = gate();
        gate.halt_disclosures("decrypt failure");

        let access = gate
            .authorize(&citizen_request("case/C2/matches"), None)
            .unwrap();
        assert_eq!(access.decision, Decision::Deny);
        assert_eq!(access.reason, ReasonCategory::IntegrityHold);
        // Denials during a halt are still part of the trail.
        assert_eq!(gate.ledger.len(), 1);

        gate.clear_integrity_halt();
        let access = gate
            .authorize(&citizen_request("case/C2/matches"), None)
            .unwrap();
        assert_eq!(access.decision, Decision::Allow);
    }

    #[test]
    fn every_evaluation_appends_exactly_one_event() {
        let gate = gate();
        for i in 0..5 {
            let resource = format!("case/C{i}/matches");
            gate.authorize(&citizen_request(&resource), None).unwrap();
        }
        assert_eq!(gate.ledger.len(), 5);
    }
}
