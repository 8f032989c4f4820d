//! Ordered access-policy rules, first match wins.
//!
//! Roles form a closed set; a new role only gains access through an explicit
//! new rule here, never by falling through an existing one.

use reunite_core::types::{ConsentRecord, Decision, ReasonCategory, RequesterRole};

/// One access request as seen by the policy, before any disclosure happens.
#[derive(Debug, Clone)]
pub struct AccessRequest<'a> {
    pub requester_id: &'a str,
    pub requester_role: RequesterRole,
    /// What is being disclosed, recorded verbatim in the audit trail.
    pub resource_ref: &'a str,
    /// Biometric cross-match beyond the publicly visible case data.
    pub deep_search: bool,
    pub court_order_ref: Option<&'a str>,
}

/// Evaluate the ordered rule list for one request.
///
/// Rule order is load-bearing:
/// 1. minor subject with no approval on file: redacted for citizen and NGO
///    callers, denied outright for deep search by anyone but a legal
///    authority;
/// 2. deep search without a court-order reference: denied;
/// 3. otherwise: allowed.
pub fn evaluate(
    request: &AccessRequest<'_>,
    consent: Option<&ConsentRecord>,
) -> (Decision, ReasonCategory) {
    let unapproved_minor = consent
        .map(|c| c.subject_is_minor && !c.has_any_approval())
        .unwrap_or(false);

    if unapproved_minor {
        if request.deep_search && request.requester_role != RequesterRole::LegalAuthority {
            return (Decision::Deny, ReasonCategory::MinorProtected);
        }
        if matches!(
            request.requester_role,
            RequesterRole::Citizen | RequesterRole::Ngo
        ) {
            return (Decision::AllowRedacted, ReasonCategory::MinorProtected);
        }
    }

    if request.deep_search && request.court_order_ref.is_none() {
        return (Decision::Deny, ReasonCategory::CourtOrderRequired);
    }

    (Decision::Allow, ReasonCategory::Granted)
}
