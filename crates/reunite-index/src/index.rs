//! Similarity index facade: incremental upsert, filtered top-K queries, and
//! the bounded exact-scan fallback for degraded mode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use reunite_core::config::IndexParams;
use reunite_core::types::{CaseId, EmbeddingRecord};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::IndexError;
use crate::hnsw::{HnswGraph, HnswParams};
use crate::store::EmbeddingStore;

/// Named facial/scene regions mapped onto contiguous vector segments.
///
/// The external embedding models emit region-aligned segment layouts; the
/// engine only needs stable names for attribution.
pub const REGION_NAMES: [&str; 8] = [
    "forehead",
    "periocular_left",
    "periocular_right",
    "nose_bridge",
    "cheek_left",
    "cheek_right",
    "mouth",
    "jawline",
];

/// One raw similarity hit, before resolver scoring.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub record_id: Uuid,
    pub case_id: CaseId,
    pub created_at: DateTime<Utc>,
    pub similarity: f32,
    /// Per-region contribution to the similarity, for feature attribution.
    pub region_scores: Vec<(String, f32)>,
}

/// Post-filters over the candidate set. Filtering never shapes the index
/// partitioning, so the same structure serves every query type.
#[derive(Default)]
pub struct QueryFilters<'a> {
    /// Keep only records created inside this window.
    pub time_window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Case-level predicate (geography, demographic bucket) resolved by the
    /// caller against its case directory.
    pub case_filter: Option<&'a (dyn Fn(&CaseId) -> bool + Sync)>,
}

impl QueryFilters<'_> {
    fn accepts(&self, hit: &SearchHit) -> bool {
        if let Some((from, to)) = self.time_window {
            if hit.created_at < from || hit.created_at > to {
                return false;
            }
        }
        if let Some(filter) = self.case_filter {
            if !filter(&hit.case_id) {
                return false;
            }
        }
        true
    }
}

struct SlotMeta {
    record_id: Uuid,
    case_id: CaseId,
    created_at: DateTime<Utc>,
}

struct Graph {
    hnsw: HnswGraph,
    slots: Vec<SlotMeta>,
}

/// Approximate similarity index over the embedding store.
///
/// Readers run in parallel; `upsert` is serialized against other writers and
/// links a record into the graph only after the store has durably persisted
/// it, so a query never sees a record that could be lost on crash.
pub struct SimilarityIndex {
    store: Arc<EmbeddingStore>,
    graph: RwLock<Graph>,
    params: IndexParams,
    available: AtomicBool,
}

impl SimilarityIndex {
    pub fn new(store: Arc<EmbeddingStore>, params: IndexParams) -> Self {
        Self {
            store,
            graph: RwLock::new(Graph {
                hnsw: HnswGraph::new(HnswParams::new(params.m, params.ef_construction)),
                slots: Vec::new(),
            }),
            params,
            available: AtomicBool::new(true),
        }
    }

    /// Rebuild the in-memory graph from every record already in the store.
    /// Used once at startup; steady-state inserts go through [`upsert`].
    ///
    /// [`upsert`]: SimilarityIndex::upsert
    pub fn load_from_store(&self) -> Result<usize, IndexError> {
        let ids = self.store.recent_ids(usize::MAX);
        let mut graph = self.graph.write().expect("index lock poisoned");
        for id in &ids {
            let meta = self.store.meta(id).ok_or(IndexError::UnknownRecord(*id))?;
            let vector = self.store.decrypt_vector(id)?;
            let slot = graph.hnsw.insert(&vector);
            debug_assert_eq!(slot, graph.slots.len());
            graph.slots.push(SlotMeta {
                record_id: meta.id,
                case_id: meta.subject_case_id,
                created_at: meta.created_at,
            });
        }
        debug!(records = ids.len(), "similarity index loaded from store");
        Ok(ids.len())
    }

    pub fn store(&self) -> &Arc<EmbeddingStore> {
        &self.store
    }

    pub fn len(&self) -> usize {
        let graph = self.graph.read().expect("index lock poisoned");
        debug_assert_eq!(graph.hnsw.len(), graph.slots.len());
        graph.hnsw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.read().expect("index lock poisoned").hnsw.is_empty()
    }

    /// Whether the approximate structure is serving queries.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Operational switch: take the approximate structure out of (or back
    /// into) service. Queries fail with `IndexUnavailable` while down.
    pub fn set_available(&self, available: bool) {
        if !available {
            warn!("similarity index marked unavailable");
        }
        self.available.store(available, Ordering::Release);
    }

    /// Persist a record and link it into the graph (persist-then-link).
    pub fn upsert(&self, record: &EmbeddingRecord) -> Result<(), IndexError> {
        self.store.insert(record)?;

        let mut graph = self.graph.write().expect("index lock poisoned");
        graph.hnsw.insert(&record.vector);
        graph.slots.push(SlotMeta {
            record_id: record.id,
            case_id: record.subject_case_id.clone(),
            created_at: record.created_at,
        });
        Ok(())
    }

    /// Top-`k` hits ordered by descending similarity, ties broken by the most
    /// recent `created_at`. Candidates are re-scored against exact similarity
    /// before ranking, bounding false negatives from the approximation.
    pub fn query(
        &self,
        vector: &[f32],
        k: usize,
        filters: &QueryFilters<'_>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        if vector.len() != self.store.dimension() {
            return Err(IndexError::InvalidVectorDimension {
                expected: self.store.dimension(),
                got: vector.len(),
            });
        }
        if !self.is_available() {
            return Err(IndexError::IndexUnavailable);
        }

        let graph = self.graph.read().expect("index lock poisoned");
        let ef = self.params.ef_search.max(k);
        let raw = graph.hnsw.search(vector, ef, ef);

        let query = normalized(vector);
        let mut hits: Vec<SearchHit> = raw
            .into_iter()
            .map(|(slot, _)| {
                // Exact re-validation of each surviving candidate.
                let exact = graph.hnsw.similarity(&query, slot);
                let contributions =
                    graph
                        .hnsw
                        .segment_contributions(&query, slot, REGION_NAMES.len());
                let meta = &graph.slots[slot];
                SearchHit {
                    record_id: meta.record_id,
                    case_id: meta.case_id.clone(),
                    created_at: meta.created_at,
                    similarity: exact.clamp(0.0, 1.0),
                    region_scores: name_regions(&contributions),
                }
            })
            .filter(|hit| filters.accepts(hit))
            .collect();

        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    /// Bounded-latency exact linear scan over the recent-activity subset.
    ///
    /// The degraded-mode path when the approximate structure is unavailable;
    /// callers flag results produced this way. Never silently empty: the scan
    /// runs over whatever the store holds, up to the configured window.
    pub fn fallback_scan(
        &self,
        vector: &[f32],
        k: usize,
        filters: &QueryFilters<'_>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        if vector.len() != self.store.dimension() {
            return Err(IndexError::InvalidVectorDimension {
                expected: self.store.dimension(),
                got: vector.len(),
            });
        }

        let query = normalized(vector);
        let mut hits = Vec::new();
        for id in self.store.recent_ids(self.params.fallback_scan_window) {
            let Some(meta) = self.store.meta(&id) else {
                continue;
            };
            // Transient decrypt for the similarity computation only.
            let candidate = normalized(&self.store.decrypt_vector(&id)?);
            let similarity = dot(&query, &candidate).clamp(0.0, 1.0);
            let contributions = crate::hnsw::segment_dots(&query, &candidate, REGION_NAMES.len());
            let hit = SearchHit {
                record_id: id,
                case_id: meta.subject_case_id,
                created_at: meta.created_at,
                similarity,
                region_scores: name_regions(&contributions),
            };
            if filters.accepts(&hit) {
                hits.push(hit);
            }
        }

        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }
}

fn name_regions(contributions: &[f32]) -> Vec<(String, f32)> {
    contributions
        .iter()
        .enumerate()
        .map(|(i, &score)| {
            let name = REGION_NAMES.get(i).copied().unwrap_or("tail");
            (name.to_string(), score)
        })
        .collect()
}

fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalized(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{generate_key, StaticKeyManager};
    use chrono::Duration;

    const DIM: usize = 8;

    fn test_index() -> SimilarityIndex {
        let manager = Arc::new(StaticKeyManager::with_key("kms:primary", generate_key()));
        let store = Arc::new(EmbeddingStore::in_memory(DIM, manager));
        let params = IndexParams {
            dimension: DIM,
            m: 8,
            ef_construction: 64,
            ef_search: 64,
            fallback_scan_window: 1_000,
        };
        SimilarityIndex::new(store, params)
    }

    fn record(case: &str, vector: [f32; DIM], age_hours: i64) -> EmbeddingRecord {
        EmbeddingRecord {
            id: Uuid::new_v4(),
            subject_case_id: CaseId::new(case),
            vector: vector.to_vec(),
            model_version: "facenet-v3".into(),
            created_at: Utc::now() - Duration::hours(age_hours),
            encryption_key_ref: "kms:primary".into(),
        }
    }

    fn basis(i: usize) -> [f32; DIM] {
        let mut v = [0.0; DIM];
        v[i] = 1.0;
        v
    }

    #[test]
    fn reinserted_identical_embedding_is_top1() {
        let index = test_index();
        for i in 0..DIM {
            index.upsert(&record(&format!("C{i}"), basis(i), 1)).unwrap();
        }
        let target = basis(3);
        index.upsert(&record("C3-re", target, 0)).unwrap();

        let hits = index.query(&target, 1, &QueryFilters::default()).unwrap();
        assert!(hits[0].similarity >= 0.99);
        assert_eq!(hits[0].case_id, CaseId::new("C3-re"));
    }

    #[test]
    fn similarity_ties_break_by_most_recent() {
        let index = test_index();
        let v = basis(0);
        index.upsert(&record("old", v, 48)).unwrap();
        index.upsert(&record("new", v, 1)).unwrap();

        let hits = index.query(&v, 2, &QueryFilters::default()).unwrap();
        assert_eq!(hits[0].case_id, CaseId::new("new"));
        assert_eq!(hits[1].case_id, CaseId::new("old"));
    }

    #[test]
    fn wrong_dimension_rejected() {
        let index = test_index();
        assert!(matches!(
            index.query(&[1.0, 0.0], 3, &QueryFilters::default()),
            Err(IndexError::InvalidVectorDimension { .. })
        ));
    }

    #[test]
    fn unavailable_index_errors_and_fallback_serves() {
        let index = test_index();
        index.upsert(&record("C1", basis(1), 1)).unwrap();
        index.set_available(false);

        assert!(matches!(
            index.query(&basis(1), 1, &QueryFilters::default()),
            Err(IndexError::IndexUnavailable)
        ));

        let hits = index
            .fallback_scan(&basis(1), 1, &QueryFilters::default())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].case_id, CaseId::new("C1"));
        assert!(hits[0].similarity >= 0.99);
    }

    #[test]
    fn time_window_post_filter() {
        let index = test_index();
        index.upsert(&record("recent", basis(0), 1)).unwrap();
        index.upsert(&record("stale", basis(0), 24 * 30)).unwrap();

        let filters = QueryFilters {
            time_window: Some((Utc::now() - Duration::days(7), Utc::now())),
            case_filter: None,
        };
        let hits = index.query(&basis(0), 10, &filters).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].case_id, CaseId::new("recent"));
    }

    #[test]
    fn case_filter_post_filter() {
        let index = test_index();
        index.upsert(&record("keep", basis(0), 1)).unwrap();
        index.upsert(&record("drop", basis(0), 1)).unwrap();

        let keep = CaseId::new("keep");
        let predicate = move |case: &CaseId| *case == keep;
        let filters = QueryFilters {
            time_window: None,
            case_filter: Some(&predicate),
        };
        let hits = index.query(&basis(0), 10, &filters).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].case_id, CaseId::new("keep"));
    }

    #[test]
    fn load_from_store_rebuilds_graph() {
        let manager = Arc::new(StaticKeyManager::with_key("kms:primary", generate_key()));
        let store = Arc::new(EmbeddingStore::in_memory(DIM, manager));
        let params = IndexParams {
            dimension: DIM,
            m: 8,
            ef_construction: 64,
            ef_search: 64,
            fallback_scan_window: 1_000,
        };

        for i in 0..4 {
            store.insert(&record(&format!("C{i}"), basis(i), 1)).unwrap();
        }

        let index = SimilarityIndex::new(store, params);
        assert!(index.is_empty());
        let loaded = index.load_from_store().unwrap();
        assert_eq!(loaded, 4);

        let hits = index.query(&basis(2), 1, &QueryFilters::default()).unwrap();
        assert_eq!(hits[0].case_id, CaseId::new("C2"));
    }
}
