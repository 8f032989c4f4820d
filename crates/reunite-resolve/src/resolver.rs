//! Ranking pipeline: composite confidence, floor suppression, per-case
//! deduplication, explanation attachment.

use std::collections::BTreeMap;

use chrono::Utc;
use reunite_core::config::{ResolverParams, ResolverWeights};
use reunite_core::types::{
    CaseId, CaseRecord, Explanation, MatchCandidate, QueryContext, SignalName,
};
use reunite_index::SearchHit;
use tracing::debug;
use uuid::Uuid;

/// Read access to case metadata, implemented by the engine's case directory.
pub trait CaseLookup: Send + Sync {
    fn case(&self, id: &CaseId) -> Option<CaseRecord>;
}

/// Stateless resolver; all tuning comes from configuration.
pub struct MatchResolver {
    weights: ResolverWeights,
    params: ResolverParams,
}

impl MatchResolver {
    pub fn new(weights: ResolverWeights, params: ResolverParams) -> Self {
        Self { weights, params }
    }

    pub fn params(&self) -> &ResolverParams {
        &self.params
    }

    /// Rank raw index hits into match candidates.
    ///
    /// Output is non-increasing in composite confidence, at most one candidate
    /// per case (highest-confidence explanation retained), ties broken by the
    /// earliest-created candidate case so longer-missing subjects surface
    /// first.
    pub fn resolve(
        &self,
        query_id: Uuid,
        hits: &[SearchHit],
        context: &QueryContext,
        cases: &dyn CaseLookup,
    ) -> Vec<MatchCandidate> {
        let mut best: BTreeMap<CaseId, MatchCandidate> = BTreeMap::new();
        let mut suppressed = 0usize;

        for hit in hits {
            // Reject clearly unrelated matches outright; a weak hit surfaced
            // to a caller risks a false accusation.
            if hit.similarity < self.params.similarity_floor {
                suppressed += 1;
                continue;
            }

            let candidate = self.score(query_id, hit, context, cases);
            match best.get(&hit.case_id) {
                Some(existing)
                    if existing.composite_confidence >= candidate.composite_confidence => {}
                _ => {
                    best.insert(hit.case_id.clone(), candidate);
                }
            }
        }

        let mut ranked: Vec<MatchCandidate> = best.into_values().collect();
        ranked.sort_by(|a, b| {
            b.composite_confidence
                .total_cmp(&a.composite_confidence)
                .then_with(|| {
                    let a_created = cases
                        .case(&a.candidate_case_id)
                        .map(|c| c.created_at)
                        .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);
                    let b_created = cases
                        .case(&b.candidate_case_id)
                        .map(|c| c.created_at)
                        .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);
                    a_created.cmp(&b_created)
                })
        });

        debug!(
            query_id = %query_id,
            candidates = ranked.len(),
            suppressed,
            "resolved match candidates"
        );
        ranked
    }

    fn score(
        &self,
        query_id: Uuid,
        hit: &SearchHit,
        context: &QueryContext,
        cases: &dyn CaseLookup,
    ) -> MatchCandidate {
        let mut signals: BTreeMap<SignalName, f32> = BTreeMap::new();
        signals.insert(SignalName::FacialSimilarity, hit.similarity);

        // Weighted combination over the signals that are actually present;
        // absent signals drop out of the normalization rather than counting
        // as zero evidence against the match.
        let mut weighted = self.weights.similarity * hit.similarity;
        let mut weight_sum = self.weights.similarity;

        if let Some(geo_temporal) = self.geo_temporal_score(hit, context, cases) {
            signals.insert(SignalName::GeoTemporalProximity, geo_temporal);
            weighted += self.weights.geo_temporal * geo_temporal;
            weight_sum += self.weights.geo_temporal;
        }

        if let Some(reliability) = context.source_reliability {
            let signal = context.source_signal.unwrap_or(SignalName::TipReport);
            signals.insert(signal, reliability.clamp(0.0, 1.0));
            weighted += self.weights.source_reliability * reliability.clamp(0.0, 1.0);
            weight_sum += self.weights.source_reliability;
        }

        let composite = if weight_sum > 0.0 {
            (weighted / weight_sum).clamp(0.0, 1.0)
        } else {
            hit.similarity
        };

        MatchCandidate {
            query_id,
            candidate_case_id: hit.case_id.clone(),
            similarity_score: hit.similarity,
            secondary_signals: signals.clone(),
            composite_confidence: composite,
            explanation: build_explanation(hit, &signals),
            vector: None,
        }
    }

    /// Proximity between the query context and the candidate case's last-seen
    /// context, linearly decayed to zero at the configured horizons. `None`
    /// when neither spatial nor temporal evidence is available.
    fn geo_temporal_score(
        &self,
        hit: &SearchHit,
        context: &QueryContext,
        cases: &dyn CaseLookup,
    ) -> Option<f32> {
        let case = cases.case(&hit.case_id)?;
        let mut components = Vec::with_capacity(2);

        if let (Some(query_loc), Some(last_seen)) = (context.location, case.last_seen) {
            let distance = query_loc.distance_meters(&last_seen);
            let score = 1.0 - (distance / self.params.geo_decay_meters).min(1.0);
            components.push(score as f32);
        }
        if let (Some(observed), Some(last_seen_at)) = (context.observed_at, case.last_seen_at) {
            let hours = (observed - last_seen_at).num_minutes().abs() as f64 / 60.0;
            let score = 1.0 - (hours / self.params.temporal_decay_hours).min(1.0);
            components.push(score as f32);
        }

        if components.is_empty() {
            return None;
        }
        Some(components.iter().sum::<f32>() / components.len() as f32)
    }
}

/// Feature-attribution explanation: the regions and signals that drove the
/// score, not merely the score itself.
fn build_explanation(hit: &SearchHit, signals: &BTreeMap<SignalName, f32>) -> Explanation {
    let mut regions: Vec<(String, f32)> = hit.region_scores.clone();
    regions.sort_by(|a, b| b.1.total_cmp(&a.1));

    // Regions covering the top half of the similarity mass.
    let total: f32 = regions.iter().map(|(_, s)| s.max(0.0)).sum();
    let mut contributing_regions = Vec::new();
    let mut covered = 0.0f32;
    for (name, score) in &regions {
        if *score <= 0.0 || covered >= total * 0.5 {
            break;
        }
        covered += score;
        contributing_regions.push(name.clone());
    }

    let contributing_signals = signals
        .iter()
        .filter(|(_, &v)| v > 0.0)
        .map(|(&name, _)| name)
        .collect();

    Explanation {
        contributing_regions,
        contributing_signals,
    }
}
