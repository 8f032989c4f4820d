//! Duplicate-case screening for new case drafts.
//!
//! Runs before a draft is accepted into the index. A suspected duplicate is
//! advisory: the engine surfaces the pointers and lets the case-lifecycle
//! owner decide whether to merge.

use reunite_core::geo::GeoPoint;
use reunite_core::types::CaseId;
use reunite_index::SearchHit;
use tracing::info;

use crate::resolver::{CaseLookup, MatchResolver};

/// The parts of an unaccepted case submission the duplicate check inspects.
#[derive(Debug, Clone)]
pub struct CaseDraft {
    pub vector: Vec<f32>,
    pub location: Option<GeoPoint>,
    pub demographic_bucket: Option<String>,
}

/// Outcome of screening one draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateCheck {
    Clear,
    /// Existing cases the draft likely duplicates, strongest first.
    DuplicateSuspected(Vec<CaseId>),
}

impl MatchResolver {
    /// Screen a draft against existing cases it matched in the index.
    ///
    /// A candidate is suspect when its similarity clears the duplicate floor
    /// and neither demographic bucket nor last-seen location contradicts the
    /// draft. Contradiction requires both sides to be present: a missing
    /// bucket or location corroborates by default, since sparse intake forms
    /// are the common case.
    pub fn check_duplicate(
        &self,
        draft: &CaseDraft,
        hits: &[SearchHit],
        cases: &dyn CaseLookup,
    ) -> DuplicateCheck {
        let floor = self.params().duplicate_similarity_floor;
        let max_distance = self.params().duplicate_max_distance_meters;

        let mut suspects: Vec<(CaseId, f32)> = Vec::new();
        for hit in hits {
            if hit.similarity < floor {
                continue;
            }
            let record = cases.case(&hit.case_id);

            if let (Some(draft_bucket), Some(case_bucket)) = (
                draft.demographic_bucket.as_deref(),
                record.as_ref().and_then(|c| c.demographic_bucket.as_deref()),
            ) {
                if draft_bucket != case_bucket {
                    continue;
                }
            }
            if let (Some(draft_loc), Some(case_loc)) =
                (draft.location, record.as_ref().and_then(|c| c.last_seen))
            {
                if draft_loc.distance_meters(&case_loc) > max_distance {
                    continue;
                }
            }

            match suspects.iter_mut().find(|(id, _)| *id == hit.case_id) {
                Some((_, best)) => *best = best.max(hit.similarity),
                None => suspects.push((hit.case_id.clone(), hit.similarity)),
            }
        }

        if suspects.is_empty() {
            return DuplicateCheck::Clear;
        }

        suspects.sort_by(|a, b| b.1.total_cmp(&a.1));
        info!(suspects = suspects.len(), "draft flagged as likely duplicate");
        DuplicateCheck::DuplicateSuspected(suspects.into_iter().map(|(id, _)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use reunite_core::config::{ResolverParams, ResolverWeights};
    use reunite_core::types::CaseRecord;
    use std::collections::HashMap;
    use uuid::Uuid;

    struct Directory(HashMap<CaseId, CaseRecord>);

    impl CaseLookup for Directory {
        fn case(&self, id: &CaseId) -> Option<CaseRecord> {
            self.0.get(id).cloned()
        }
    }

    fn directory(cases: Vec<CaseRecord>) -> Directory {
        Directory(cases.into_iter().map(|c| (c.case_id.clone(), c)).collect())
    }

    fn case(
        id: &str,
        bucket: Option<&str>,
        last_seen: Option<GeoPoint>,
    ) -> CaseRecord {
        CaseRecord {
            case_id: CaseId::new(id),
            created_at: Utc::now() - Duration::days(30),
            last_seen,
            last_seen_at: last_seen.map(|_| Utc::now() - Duration::days(30)),
            demographic_bucket: bucket.map(str::to_owned),
        }
    }

    fn hit(case_id: &str, similarity: f32) -> SearchHit {
        SearchHit {
            record_id: Uuid::new_v4(),
            case_id: CaseId::new(case_id),
            created_at: Utc::now(),
            similarity,
            region_scores: Vec::new(),
        }
    }

    fn draft(bucket: Option<&str>, location: Option<GeoPoint>) -> CaseDraft {
        CaseDraft {
            vector: vec![0.0; 512],
            location,
            demographic_bucket: bucket.map(str::to_owned),
        }
    }

    fn resolver() -> MatchResolver {
        MatchResolver::new(ResolverWeights::default(), ResolverParams::default())
    }

    #[test]
    fn near_identical_vector_flags_existing_case() {
        let cases = directory(vec![case("C1", None, None)]);
        let out = resolver().check_duplicate(&draft(None, None), &[hit("C1", 0.97)], &cases);
        assert_eq!(
            out,
            DuplicateCheck::DuplicateSuspected(vec![CaseId::new("C1")])
        );
    }

    #[test]
    fn below_duplicate_floor_is_clear() {
        let cases = directory(vec![case("C1", None, None)]);
        let out = resolver().check_duplicate(&draft(None, None), &[hit("C1", 0.8)], &cases);
        assert_eq!(out, DuplicateCheck::Clear);
    }

    #[test]
    fn demographic_mismatch_clears() {
        let cases = directory(vec![case("C1", Some("male_5_10"), None)]);
        let out = resolver().check_duplicate(
            &draft(Some("female_10_15"), None),
            &[hit("C1", 0.95)],
            &cases,
        );
        assert_eq!(out, DuplicateCheck::Clear);
    }

    #[test]
    fn distant_last_seen_clears() {
        let delhi = GeoPoint::new(28.6139, 77.2090);
        let chennai = GeoPoint::new(13.0827, 80.2707);
        let cases = directory(vec![case("C1", None, Some(delhi))]);
        let out = resolver().check_duplicate(
            &draft(None, Some(chennai)),
            &[hit("C1", 0.95)],
            &cases,
        );
        assert_eq!(out, DuplicateCheck::Clear);
    }

    #[test]
    fn nearby_last_seen_corroborates() {
        let delhi = GeoPoint::new(28.6139, 77.2090);
        let noida = GeoPoint::new(28.5355, 77.3910);
        let cases = directory(vec![case("C1", Some("male_5_10"), Some(delhi))]);
        let out = resolver().check_duplicate(
            &draft(Some("male_5_10"), Some(noida)),
            &[hit("C1", 0.95)],
            &cases,
        );
        assert_eq!(
            out,
            DuplicateCheck::DuplicateSuspected(vec![CaseId::new("C1")])
        );
    }

    #[test]
    fn suspects_ordered_strongest_first() {
        let cases = directory(vec![case("C1", None, None), case("C2", None, None)]);
        let hits = vec![hit("C1", 0.92), hit("C2", 0.97)];
        let out = resolver().check_duplicate(&draft(None, None), &hits, &cases);
        assert_eq!(
            out,
            DuplicateCheck::DuplicateSuspected(vec![CaseId::new("C2"), CaseId::new("C1")])
        );
    }
}
