pub mod config;
pub mod geo;
pub mod types;

pub use config::EngineConfig;
pub use geo::GeoPoint;
pub use types::{
    AccessDecision, AlertMode, AlertZone, AlertZoneStatus, AuditEvent, CaseId, CaseRecord,
    ConsentRecord, Decision,
    EmbeddingRecord, Explanation, Hash256, MatchCandidate, QueryContext, ReasonCategory,
    RequesterRole, SignalName,
};
