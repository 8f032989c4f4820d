//! Read-mostly mirror of case metadata owned by the external case-lifecycle
//! collaborator.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use reunite_core::geo::GeoPoint;
use reunite_core::types::{CaseId, CaseRecord};
use reunite_resolve::CaseLookup;

#[derive(Default)]
pub struct CaseDirectory {
    records: RwLock<HashMap<CaseId, CaseRecord>>,
}

impl CaseDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, record: CaseRecord) {
        let mut records = self.records.write().expect("case lock poisoned");
        records.insert(record.case_id.clone(), record);
    }

    pub fn update_last_seen(
        &self,
        case_id: &CaseId,
        location: GeoPoint,
        at: DateTime<Utc>,
    ) -> bool {
        let mut records = self.records.write().expect("case lock poisoned");
        match records.get_mut(case_id) {
            Some(record) => {
                record.last_seen = Some(location);
                record.last_seen_at = Some(at);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("case lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CaseLookup for CaseDirectory {
    fn case(&self, id: &CaseId) -> Option<CaseRecord> {
        self.records
            .read()
            .expect("case lock poisoned")
            .get(id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> CaseRecord {
        CaseRecord {
            case_id: CaseId::new(id),
            created_at: Utc::now(),
            last_seen: None,
            last_seen_at: None,
            demographic_bucket: None,
        }
    }

    #[test]
    fn register_and_lookup() {
        let directory = CaseDirectory::new();
        directory.register(record("C1"));
        assert!(directory.case(&CaseId::new("C1")).is_some());
        assert!(directory.case(&CaseId::new("C2")).is_none());
    }

    #[test]
    fn last_seen_update_requires_known_case() {
        let directory = CaseDirectory::new();
        directory.register(record("C1"));

        let delhi = GeoPoint::new(28.6139, 77.2090);
        assert!(directory.update_last_seen(&CaseId::new("C1"), delhi, Utc::now()));
        assert!(!directory.update_last_seen(&CaseId::new("C2"), delhi, Utc::now()));

        let updated = directory.case(&CaseId::new("C1")).unwrap();
        assert_eq!(updated.last_seen, Some(delhi));
    }
}
