//! Demo walk-through: ingest, match, gate, publish, audit.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reunite_core::geo::GeoPoint;
use reunite_core::types::{CaseId, CaseRecord, ConsentRecord, RequesterRole};
use reunite_core::EngineConfig;
use reunite_dispatch::{CaseAlert, Subscriber, Transport, TransportError};
use reunite_engine::{Engine, Requester};
use reunite_index::{generate_key, StaticKeyManager};

const KEY_REF: &str = "kms:demo";

/// Prints each delivery instead of calling a real push/SMS provider.
struct StdoutTransport;

#[async_trait]
impl Transport for StdoutTransport {
    async fn deliver(&self, subscriber_id: &str, alert: &CaseAlert) -> Result<(), TransportError> {
        println!("  -> alert for case {} delivered to {subscriber_id}", alert.case_id);
        Ok(())
    }
}

fn sample_vector(seed: u64, dimension: usize) -> Vec<f32> {
    // Cheap deterministic pseudo-random unit vector.
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(1);
    let mut v: Vec<f32> = (0..dimension)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((state >> 33) as f32 / (1u64 << 31) as f32) - 0.5
        })
        .collect();
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    for x in &mut v {
        *x /= norm;
    }
    v
}

pub async fn run(config: EngineConfig) -> Result<()> {
    let dimension = config.index.dimension;
    let manager = Arc::new(StaticKeyManager::with_key(KEY_REF, generate_key()));
    let engine = Engine::in_memory(config, manager, Arc::new(StdoutTransport))?;

    let delhi = GeoPoint::new(28.6139, 77.2090);
    println!("seeding cases and subscribers");
    for (i, minor) in [(0u64, false), (1, true), (2, false)] {
        let case_id = CaseId::new(format!("CASE-{i}"));
        engine.register_case(CaseRecord {
            case_id: case_id.clone(),
            created_at: Utc::now() - Duration::days(30 + i as i64),
            last_seen: Some(delhi),
            last_seen_at: Some(Utc::now() - Duration::days(i as i64)),
            demographic_bucket: None,
        });
        engine.record_consent(ConsentRecord {
            case_id: case_id.clone(),
            subject_is_minor: minor,
            guardian_approved: false,
            police_approval_ref: None,
            court_order_ref: None,
        })?;
        engine.submit_embedding(case_id, sample_vector(i, dimension), "facenet-v3", KEY_REF)?;
    }
    for i in 0..5 {
        engine.register_subscriber(Subscriber {
            id: format!("volunteer-{i}"),
            location: GeoPoint::new(28.60 + i as f64 * 0.01, 77.21),
        });
    }

    println!("\ncitizen tip against the adult case");
    let citizen = Requester {
        id: "citizen-demo".into(),
        role: RequesterRole::Citizen,
    };
    let outcome = engine.find_matches(&citizen, &sample_vector(0, dimension), &Default::default(), 3)?;
    for candidate in &outcome.candidates {
        println!(
            "  case {} similarity {:.3} confidence {:.3}",
            candidate.candidate_case_id,
            candidate.similarity_score,
            candidate.composite_confidence
        );
    }

    println!("\ncitizen tip against the minor case (expect redaction)");
    let outcome = engine.find_matches(&citizen, &sample_vector(1, dimension), &Default::default(), 3)?;
    for decision in &outcome.decisions {
        println!("  {} -> {:?} ({})", decision.resource_ref, decision.decision, decision.reason);
    }

    println!("\npublishing CASE-0 triggers a geo alert");
    let zone = engine.on_case_published(&CaseId::new("CASE-0"), delhi).await?;
    println!(
        "  reached {} subscribers, status {:?}",
        zone.recipient_count, zone.status
    );

    let events = engine.export_audit_range(0, u64::MAX)?;
    println!("\naudit trail holds {} events, chain {:?}", events.len(), engine.verify_audit_chain());
    Ok(())
}
