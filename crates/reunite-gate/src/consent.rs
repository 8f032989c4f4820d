//! In-memory consent directory.
//!
//! Consent is owned by the external approval workflow; the gate holds a
//! read-mostly mirror updated through `record`.

use std::collections::HashMap;
use std::sync::RwLock;

use reunite_core::types::{CaseId, ConsentRecord};

#[derive(Default)]
pub struct ConsentStore {
    records: RwLock<HashMap<CaseId, ConsentRecord>>,
}

impl ConsentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any prior record for the same case.
    pub fn record(&self, consent: ConsentRecord) {
        let mut records = self.records.write().expect("consent lock poisoned");
        records.insert(consent.case_id.clone(), consent);
    }

    pub fn get(&self, case_id: &CaseId) -> Option<ConsentRecord> {
        let records = self.records.read().expect("consent lock poisoned");
        records.get(case_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_replaces_prior_state() {
        let store = ConsentStore::new();
        let case_id = CaseId::new("C1");
        store.record(ConsentRecord {
            case_id: case_id.clone(),
            subject_is_minor: true,
            guardian_approved: false,
            police_approval_ref: None,
            court_order_ref: None,
        });
        assert!(!store.get(&case_id).unwrap().has_any_approval());

        store.record(ConsentRecord {
            case_id: case_id.clone(),
            subject_is_minor: true,
            guardian_approved: true,
            police_approval_ref: None,
            court_order_ref: None,
        });
        assert!(store.get(&case_id).unwrap().has_any_approval());
    }
}
