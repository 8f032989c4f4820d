//! Wiring and the external operation surface.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use reunite_core::config::EngineConfig;
use reunite_core::geo::GeoPoint;
use reunite_core::types::{
    AccessDecision, AlertMode, AlertZone, AuditEvent, CaseId, CaseRecord, ConsentRecord,
    Decision, EmbeddingRecord, MatchCandidate, QueryContext, RequesterRole,
};
use reunite_dispatch::{AlertDispatcher, Subscriber, SubscriberRegistry, Transport};
use reunite_gate::{AccessRequest, PrivacyGate};
use reunite_index::{
    EmbeddingStore, IndexError, KeyManager, QueryFilters, SearchHit, SimilarityIndex,
};
use reunite_ledger::{AuditLedger, ChainStatus};
use reunite_resolve::{CaseDraft, CaseLookup, DuplicateCheck, MatchResolver};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cases::CaseDirectory;
use crate::error::EngineError;

/// Caller identity attached to every read-path operation.
#[derive(Debug, Clone)]
pub struct Requester {
    pub id: String,
    pub role: RequesterRole,
}

/// Result of a gated match query.
#[derive(Debug)]
pub struct MatchOutcome {
    /// Released candidates, after per-candidate gating and redaction.
    pub candidates: Vec<MatchCandidate>,
    /// One decision per candidate that reached the gate, denied ones
    /// included.
    pub decisions: Vec<AccessDecision>,
    /// True when the approximate index was down and the bounded exact scan
    /// served the query instead.
    pub degraded: bool,
}

pub struct Engine {
    config: EngineConfig,
    index: Arc<SimilarityIndex>,
    resolver: MatchResolver,
    gate: PrivacyGate,
    dispatcher: AlertDispatcher,
    cases: Arc<CaseDirectory>,
    subscribers: Arc<SubscriberRegistry>,
    ledger: Arc<AuditLedger>,
}

impl Engine {
    /// Ephemeral engine with no persistence, for tests and dry runs.
    pub fn in_memory(
        config: EngineConfig,
        key_manager: Arc<dyn KeyManager>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, EngineError> {
        config
            .validate()
            .map_err(|e| EngineError::Validation(e.to_string()))?;
        let store = Arc::new(EmbeddingStore::in_memory(config.index.dimension, key_manager));
        let ledger = Arc::new(AuditLedger::in_memory(config.ledger));
        Ok(Self::wire(config, store, ledger, transport))
    }

    /// Engine backed by on-disk embedding and ledger storage under `dir`.
    ///
    /// Replays both stores and rebuilds the similarity graph before serving.
    pub fn open(
        dir: &Path,
        config: EngineConfig,
        key_manager: Arc<dyn KeyManager>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, EngineError> {
        config
            .validate()
            .map_err(|e| EngineError::Validation(e.to_string()))?;
        let store = Arc::new(EmbeddingStore::open(
            &dir.join("embeddings"),
            config.index.dimension,
            key_manager,
        )?);
        let ledger = Arc::new(AuditLedger::open(&dir.join("ledger"), config.ledger)?);

        let engine = Self::wire(config, store, ledger, transport);
        let loaded = engine.index.load_from_store()?;
        info!(records = loaded, "engine opened");
        Ok(engine)
    }

    fn wire(
        config: EngineConfig,
        store: Arc<EmbeddingStore>,
        ledger: Arc<AuditLedger>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let index = Arc::new(SimilarityIndex::new(store, config.index));
        let subscribers = Arc::new(SubscriberRegistry::new());
        let dispatcher = AlertDispatcher::new(
            subscribers.clone(),
            transport,
            ledger.clone(),
            config.dispatch,
        );
        Self {
            resolver: MatchResolver::new(config.weights, config.resolver),
            gate: PrivacyGate::new(ledger.clone()),
            dispatcher,
            cases: Arc::new(CaseDirectory::new()),
            subscribers,
            ledger,
            index,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    pub fn register_case(&self, record: CaseRecord) {
        self.cases.register(record);
    }

    pub fn register_subscriber(&self, subscriber: Subscriber) {
        self.subscribers.upsert(subscriber);
    }

    /// Ingest one embedding from the external embedding-generation
    /// collaborator.
    pub fn submit_embedding(
        &self,
        subject_case_id: CaseId,
        vector: Vec<f32>,
        model_version: &str,
        encryption_key_ref: &str,
    ) -> Result<Uuid, EngineError> {
        let record = EmbeddingRecord {
            id: Uuid::new_v4(),
            subject_case_id,
            vector,
            model_version: model_version.to_string(),
            created_at: Utc::now(),
            encryption_key_ref: encryption_key_ref.to_string(),
        };
        self.index.upsert(&record)?;
        self.ledger.append(
            "ingest",
            "embedding_submitted",
            &format!("case/{}/embedding/{}", record.subject_case_id, record.id),
        )?;
        Ok(record.id)
    }

    /// Gated match query. Every candidate that survives resolution receives
    /// exactly one access decision before anything is released.
    pub fn find_matches(
        &self,
        requester: &Requester,
        vector: &[f32],
        context: &QueryContext,
        k: usize,
    ) -> Result<MatchOutcome, EngineError> {
        let query_id = Uuid::new_v4();

        // Demographic post-filter, resolved against the case directory. A
        // case with no recorded bucket is never excluded.
        let bucket = context.demographic_bucket.as_deref();
        let matches_bucket = |case: &CaseId| {
            match (bucket, self.cases.case(case).and_then(|c| c.demographic_bucket)) {
                (Some(want), Some(have)) => want == have,
                _ => true,
            }
        };
        let case_filter: Option<&(dyn Fn(&CaseId) -> bool + Sync)> = if bucket.is_some() {
            Some(&matches_bucket)
        } else {
            None
        };
        let filters = QueryFilters {
            time_window: None,
            case_filter,
        };

        let (hits, degraded) = self.raw_hits(vector, k, &filters)?;

        // Strongest record per case, for the authorized-disclosure path.
        // Hits arrive sorted by similarity, so first wins.
        let mut best_record: HashMap<CaseId, Uuid> = HashMap::new();
        for hit in &hits {
            best_record.entry(hit.case_id.clone()).or_insert(hit.record_id);
        }

        let ranked = self
            .resolver
            .resolve(query_id, &hits, context, self.cases.as_ref());

        let mut candidates = Vec::new();
        let mut decisions = Vec::new();
        for candidate in ranked {
            let case_id = candidate.candidate_case_id.clone();
            let resource_ref = format!("case/{case_id}/match");
            let request = AccessRequest {
                requester_id: &requester.id,
                requester_role: requester.role,
                resource_ref: &resource_ref,
                deep_search: false,
                court_order_ref: None,
            };
            let access = self.gate.authorize(&request, Some(&case_id))?;
            if access.decision != Decision::Deny {
                let mut released = self.gate.release(&access, vec![candidate]);
                if access.decision == Decision::Allow {
                    if let (Some(released), Some(&record_id)) =
                        (released.first_mut(), best_record.get(&case_id))
                    {
                        // Full disclosure carries the stored vector; the read
                        // is logged before the result leaves the engine.
                        let plaintext = self
                            .index
                            .store()
                            .decrypt_vector(&record_id)
                            .map_err(|e| self.escalate(e))?;
                        self.ledger.append(
                            &requester.id,
                            "vector_disclosed",
                            &format!("case/{case_id}/embedding/{record_id}"),
                        )?;
                        released.vector = Some(plaintext);
                    }
                }
                candidates.extend(released);
            }
            decisions.push(access);
        }

        if degraded {
            warn!(query_id = %query_id, "match query served from degraded fallback scan");
        }
        Ok(MatchOutcome {
            candidates,
            decisions,
            degraded,
        })
    }

    /// Screen a new case draft for likely duplicates of existing cases.
    pub fn check_duplicate(&self, draft: &CaseDraft) -> Result<DuplicateCheck, EngineError> {
        let (hits, _) = self.raw_hits(&draft.vector, 16, &QueryFilters::default())?;
        let outcome = self
            .resolver
            .check_duplicate(draft, &hits, self.cases.as_ref());
        self.ledger
            .append("intake", "duplicate_check", "case/draft")?;
        Ok(outcome)
    }

    /// Publication trigger from the verification collaborator: records the
    /// last-seen location and runs a standard-mode alert cycle around it.
    pub async fn on_case_published(
        &self,
        case_id: &CaseId,
        last_seen: GeoPoint,
    ) -> Result<AlertZone, EngineError> {
        self.cases.update_last_seen(case_id, last_seen, Utc::now());
        let zone = self
            .dispatcher
            .dispatch(
                case_id,
                last_seen,
                self.config.dispatch.publish_radius_meters,
                AlertMode::Standard,
            )
            .await?;
        Ok(zone)
    }

    /// Region-wide broadcast for a declared disaster; paced, not capped.
    pub async fn disaster_broadcast(
        &self,
        case_id: &CaseId,
        center: GeoPoint,
        radius_meters: f64,
    ) -> Result<AlertZone, EngineError> {
        let zone = self
            .dispatcher
            .dispatch(case_id, center, radius_meters, AlertMode::DisasterBroadcast)
            .await?;
        Ok(zone)
    }

    /// Consent update from the guardian/police approval workflow.
    pub fn record_consent(&self, consent: ConsentRecord) -> Result<(), EngineError> {
        let case_id = consent.case_id.clone();
        self.gate.record_consent(consent);
        self.ledger.append(
            "approval_workflow",
            "consent_recorded",
            &format!("case/{case_id}/consent"),
        )?;
        Ok(())
    }

    /// Legal escalation: evaluate a deep-search request against the gate.
    pub fn request_deep_search(
        &self,
        requester: &Requester,
        case_id: &CaseId,
        court_order_ref: Option<&str>,
    ) -> Result<AccessDecision, EngineError> {
        let resource_ref = format!("case/{case_id}/deep_search");
        let request = AccessRequest {
            requester_id: &requester.id,
            requester_role: requester.role,
            resource_ref: &resource_ref,
            deep_search: true,
            court_order_ref,
        };
        Ok(self.gate.authorize(&request, Some(case_id))?)
    }

    /// Read-only audit export of `[from, to)` for the compliance
    /// collaborator.
    pub fn export_audit_range(&self, from: u64, to: u64) -> Result<Vec<AuditEvent>, EngineError> {
        Ok(self.ledger.export_range(from, to)?)
    }

    /// Periodic integrity self-check. A broken chain halts all further
    /// disclosures until the hold is cleared manually.
    pub fn verify_audit_chain(&self) -> ChainStatus {
        let status = self.ledger.verify_full();
        if let ChainStatus::BrokenAt(id) = status {
            error!(event_id = id, "audit chain broken");
            self.gate.halt_disclosures("audit chain break");
        }
        status
    }

    /// Operator action after an integrity fault is investigated and resolved.
    pub fn clear_integrity_halt(&self) {
        self.gate.clear_integrity_halt();
    }

    pub fn is_halted(&self) -> bool {
        self.gate.is_halted()
    }

    /// Raw index hits, falling back to the bounded exact scan when the
    /// approximate structure is unavailable. A decrypt failure on either path
    /// is an integrity fault and latches the disclosure halt.
    fn raw_hits(
        &self,
        vector: &[f32],
        k: usize,
        filters: &QueryFilters<'_>,
    ) -> Result<(Vec<SearchHit>, bool), EngineError> {
        match self.index.query(vector, k, filters) {
            Ok(hits) => Ok((hits, false)),
            Err(IndexError::IndexUnavailable) => {
                let hits = self
                    .index
                    .fallback_scan(vector, k, filters)
                    .map_err(|e| self.escalate(e))?;
                Ok((hits, true))
            }
            Err(e) => Err(self.escalate(e)),
        }
    }

    fn escalate(&self, e: IndexError) -> EngineError {
        if matches!(e, IndexError::DecryptFailed(_)) {
            self.gate.halt_disclosures("embedding decrypt failure");
            return EngineError::Integrity(e.to_string());
        }
        EngineError::Index(e)
    }
}
