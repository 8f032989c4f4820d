//! Shared domain types crossing subsystem boundaries.
//!
//! Embedding vectors are treated as immutable value data everywhere: no
//! component retains a working copy beyond the scope of its current operation.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

/// 32-byte SHA-256 hash.
pub type Hash256 = [u8; 32];

/// Opaque case identifier, assigned by the external case-lifecycle owner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(pub String);

impl CaseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A biometric embedding as persisted by the embedding store.
///
/// Immutable once written. Re-embedding a subject under a newer model writes a
/// fresh record with a new `model_version`; the old record is superseded, never
/// mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: Uuid,
    pub subject_case_id: CaseId,
    /// Fixed-length vector produced by an external face/scene model.
    pub vector: Vec<f32>,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
    /// Reference resolvable by the key-management collaborator; never key bytes.
    pub encryption_key_ref: String,
}

/// Corroborating signal families feeding composite confidence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SignalName {
    FacialSimilarity,
    GeoTemporalProximity,
    OsintHit,
    TipReport,
}

impl fmt::Display for SignalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalName::FacialSimilarity => "facial_similarity",
            SignalName::GeoTemporalProximity => "geo_temporal_proximity",
            SignalName::OsintHit => "osint_hit",
            SignalName::TipReport => "tip_report",
        };
        f.write_str(s)
    }
}

/// Feature-attribution explanation attached to every surfaced candidate.
///
/// References the image regions and signal families that drove the score, not
/// merely the score itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub contributing_regions: Vec<String>,
    pub contributing_signals: Vec<SignalName>,
}

/// One ranked candidate produced by the match resolver.
///
/// Never persisted beyond the query's audit trail unless promoted to a
/// confirmed match by the external verification collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub query_id: Uuid,
    pub candidate_case_id: CaseId,
    /// Raw cosine similarity in `[0, 1]`.
    pub similarity_score: f32,
    pub secondary_signals: BTreeMap<SignalName, f32>,
    /// Weighted combination of similarity and secondary signals, in `[0, 1]`.
    pub composite_confidence: f32,
    pub explanation: Explanation,
    /// The matched embedding vector. `None` whenever the access gate redacts.
    pub vector: Option<Vec<f32>>,
}

/// Caller-supplied context accompanying a match query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryContext {
    pub location: Option<GeoPoint>,
    pub observed_at: Option<DateTime<Utc>>,
    /// Reliability weight in `[0, 1]` for the non-facial source of this query
    /// (OSINT scraper, citizen tip). `None` for first-party case photos.
    pub source_reliability: Option<f32>,
    pub source_signal: Option<SignalName>,
    pub demographic_bucket: Option<String>,
}

/// Consent state for one case, mutated only through the approval workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub case_id: CaseId,
    pub subject_is_minor: bool,
    pub guardian_approved: bool,
    pub police_approval_ref: Option<String>,
    pub court_order_ref: Option<String>,
}

impl ConsentRecord {
    /// Whether any guardian, police, or court approval is on file.
    pub fn has_any_approval(&self) -> bool {
        self.guardian_approved
            || self.police_approval_ref.is_some()
            || self.court_order_ref.is_some()
    }
}

/// Closed requester role set evaluated by the access gate's ordered rules.
///
/// New roles require an explicit new policy rule; there is no inheritance to
/// fall through silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequesterRole {
    Citizen,
    VerifiedPolice,
    Ngo,
    LegalAuthority,
}

/// Outcome of a single policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    AllowRedacted,
    Deny,
}

/// Human-readable reason category accompanying every decision.
///
/// Front-end collaborators render guidance from these; raw policy internals
/// are never exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCategory {
    Granted,
    MinorProtected,
    CourtOrderRequired,
    IntegrityHold,
}

impl fmt::Display for ReasonCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReasonCategory::Granted => "access granted",
            ReasonCategory::MinorProtected => {
                "subject is a minor; biometric detail requires guardian or police approval"
            }
            ReasonCategory::CourtOrderRequired => {
                "deep search requires an active court order reference"
            }
            ReasonCategory::IntegrityHold => {
                "disclosures are suspended pending an integrity review"
            }
        };
        f.write_str(s)
    }
}

/// Immutable record of one access-gate evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDecision {
    pub requester_id: String,
    pub requester_role: RequesterRole,
    pub resource_ref: String,
    pub decision: Decision,
    pub reason: ReasonCategory,
    pub timestamp: DateTime<Utc>,
}

/// Alert dispatch mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMode {
    Standard,
    DisasterBroadcast,
}

/// Terminal state of a completed dispatch cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertZoneStatus {
    Dispatched,
    /// Retries exhausted for the listed subscribers; surfaced for manual or
    /// alternate-channel follow-up, never silently dropped.
    PartiallyDispatched,
}

/// Result of one alert-dispatch cycle. Terminal once dispatch completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertZone {
    pub case_id: CaseId,
    pub center: GeoPoint,
    pub radius_meters: f64,
    pub mode: AlertMode,
    pub recipient_count: usize,
    pub dispatched_at: DateTime<Utc>,
    pub status: AlertZoneStatus,
    /// Subscribers that exhausted retries this cycle.
    pub undelivered: Vec<String>,
}

/// One append-only, hash-chained ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Monotonic, gap-free within one ledger.
    pub event_id: u64,
    pub actor: String,
    pub action: String,
    pub resource_ref: String,
    pub timestamp: DateTime<Utc>,
    pub prior_event_hash: Hash256,
    pub event_hash: Hash256,
}

/// Case metadata the engine references for ranking and corroboration.
///
/// Owned by the external case-lifecycle collaborator; the engine holds a
/// read-mostly directory of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    pub case_id: CaseId,
    pub created_at: DateTime<Utc>,
    pub last_seen: Option<GeoPoint>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub demographic_bucket: Option<String>,
}
