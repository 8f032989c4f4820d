//! Hierarchical navigable small-world graph over unit-normalized vectors.
//!
//! Cosine similarity on unit vectors reduces to a dot product, so higher is
//! better throughout. Insertion is incremental (no rebuilds); the search-time
//! candidate width `ef` is the recall/latency knob surfaced in configuration.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use rand::Rng;

/// Graph construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// Max neighbors per node on layers above 0.
    pub m: usize,
    /// Max neighbors on layer 0 (conventionally `2 * m`).
    pub m_max0: usize,
    /// Candidate width during insertion.
    pub ef_construction: usize,
}

impl HnswParams {
    pub fn new(m: usize, ef_construction: usize) -> Self {
        Self {
            m,
            m_max0: m * 2,
            ef_construction,
        }
    }
}

/// Similarity wrapper with a total order (NaN-free by construction).
#[derive(Debug, Clone, Copy, PartialEq)]
struct Sim(f32);

impl Eq for Sim {}

impl PartialOrd for Sim {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Sim {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

struct Node {
    /// Adjacency per layer; `neighbors.len() - 1` is the node's top layer.
    neighbors: Vec<Vec<usize>>,
}

/// In-memory approximate-nearest-neighbor graph. Slots are dense indices
/// assigned at insert; the caller maps slots to record identities.
pub struct HnswGraph {
    params: HnswParams,
    level_norm: f64,
    nodes: Vec<Node>,
    vectors: Vec<Vec<f32>>,
    entry: Option<usize>,
    max_level: usize,
}

impl HnswGraph {
    pub fn new(params: HnswParams) -> Self {
        Self {
            params,
            level_norm: 1.0 / (params.m.max(2) as f64).ln(),
            nodes: Vec::new(),
            vectors: Vec::new(),
            entry: None,
            max_level: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Exact similarity between the query and a stored slot.
    pub fn similarity(&self, query: &[f32], slot: usize) -> f32 {
        dot(query, &self.vectors[slot])
    }

    /// Per-segment dot-product contributions for feature attribution.
    ///
    /// Both vectors are chunked into `segments` contiguous ranges; the sum of
    /// the returned values equals the full similarity.
    pub fn segment_contributions(&self, query: &[f32], slot: usize, segments: usize) -> Vec<f32> {
        segment_dots(query, &self.vectors[slot], segments)
    }

    fn sample_level(&self) -> usize {
        let u: f64 = rand::thread_rng().gen_range(f64::EPSILON..1.0);
        (-u.ln() * self.level_norm).floor() as usize
    }

    /// Insert a vector (normalized internally) and return its slot.
    pub fn insert(&mut self, vector: &[f32]) -> usize {
        let vector = normalized(vector);
        let level = self.sample_level();
        let slot = self.nodes.len();
        self.vectors.push(vector);
        self.nodes.push(Node {
            neighbors: vec![Vec::new(); level + 1],
        });

        let Some(mut ep) = self.entry else {
            self.entry = Some(slot);
            self.max_level = level;
            return slot;
        };

        let query = self.vectors[slot].clone();

        // Greedy descent through layers above the new node's level.
        let mut layer = self.max_level;
        while layer > level {
            ep = self.greedy_step(&query, ep, layer);
            layer -= 1;
        }

        // Beam search and bidirectional linking on the shared layers.
        let top = level.min(self.max_level);
        for l in (0..=top).rev() {
            let found = self.search_layer(&query, &[ep], self.params.ef_construction, l);
            let cap = self.layer_cap(l);
            let chosen: Vec<usize> = found.iter().take(cap).map(|&(_, s)| s).collect();

            for &neighbor in &chosen {
                self.nodes[slot].neighbors[l].push(neighbor);
                self.nodes[neighbor].neighbors[l].push(slot);
                self.prune(neighbor, l);
            }
            if let Some(&(_, best)) = found.first() {
                ep = best;
            }
        }

        if level > self.max_level {
            self.entry = Some(slot);
            self.max_level = level;
        }
        slot
    }

    /// Top-`k` slots by similarity, searched with candidate width `ef`.
    ///
    /// Results are re-scored against exact distances (they are computed from
    /// the stored vectors directly) and sorted descending.
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Vec<(usize, f32)> {
        let Some(mut ep) = self.entry else {
            return Vec::new();
        };
        let query = normalized(query);

        for layer in (1..=self.max_level).rev() {
            ep = self.greedy_step(&query, ep, layer);
        }

        let ef = ef.max(k);
        let found = self.search_layer(&query, &[ep], ef, 0);
        found
            .into_iter()
            .take(k)
            .map(|(sim, slot)| (slot, sim.0))
            .collect()
    }

    fn layer_cap(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params.m_max0
        } else {
            self.params.m
        }
    }

    /// Keep only the highest-similarity neighbors within the layer cap.
    fn prune(&mut self, slot: usize, layer: usize) {
        let cap = self.layer_cap(layer);
        let list = &self.nodes[slot].neighbors[layer];
        if list.len() <= cap {
            return;
        }
        let own = self.vectors[slot].clone();
        let mut scored: Vec<(Sim, usize)> = list
            .iter()
            .map(|&n| (Sim(dot(&own, &self.vectors[n])), n))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.dedup_by_key(|&mut (_, n)| n);
        scored.truncate(cap);
        self.nodes[slot].neighbors[layer] = scored.into_iter().map(|(_, n)| n).collect();
    }

    /// Single greedy hop-to-convergence on one layer.
    fn greedy_step(&self, query: &[f32], mut current: usize, layer: usize) -> usize {
        let mut best = dot(query, &self.vectors[current]);
        loop {
            let mut improved = false;
            for &n in self.node_neighbors(current, layer) {
                let sim = dot(query, &self.vectors[n]);
                if sim > best {
                    best = sim;
                    current = n;
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    fn node_neighbors(&self, slot: usize, layer: usize) -> &[usize] {
        self.nodes[slot]
            .neighbors
            .get(layer)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Beam search on one layer, returning up to `ef` results sorted by
    /// descending similarity.
    fn search_layer(
        &self,
        query: &[f32],
        entries: &[usize],
        ef: usize,
        layer: usize,
    ) -> Vec<(Sim, usize)> {
        let mut visited: HashSet<usize> = HashSet::new();
        let mut candidates: BinaryHeap<(Sim, usize)> = BinaryHeap::new();
        let mut results: BinaryHeap<Reverse<(Sim, usize)>> = BinaryHeap::new();

        for &ep in entries {
            if visited.insert(ep) {
                let sim = Sim(dot(query, &self.vectors[ep]));
                candidates.push((sim, ep));
                results.push(Reverse((sim, ep)));
            }
        }

        while let Some((sim, slot)) = candidates.pop() {
            let worst = results.peek().map(|Reverse((s, _))| *s).unwrap_or(Sim(f32::MIN));
            if results.len() >= ef && sim < worst {
                break;
            }
            for &n in self.node_neighbors(slot, layer) {
                if !visited.insert(n) {
                    continue;
                }
                let n_sim = Sim(dot(query, &self.vectors[n]));
                let worst = results.peek().map(|Reverse((s, _))| *s).unwrap_or(Sim(f32::MIN));
                if results.len() < ef || n_sim > worst {
                    candidates.push((n_sim, n));
                    results.push(Reverse((n_sim, n)));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<(Sim, usize)> = results.into_iter().map(|Reverse(p)| p).collect();
        out.sort_by(|a, b| b.0.cmp(&a.0));
        out
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Chunked partial dot products; used for region attribution.
pub(crate) fn segment_dots(a: &[f32], b: &[f32], segments: usize) -> Vec<f32> {
    let segments = segments.max(1);
    let chunk = a.len().div_ceil(segments);
    a.chunks(chunk.max(1))
        .zip(b.chunks(chunk.max(1)))
        .map(|(ca, cb)| dot(ca, cb))
        .collect()
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
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect()
    }

    fn exact_top1(vectors: &[Vec<f32>], query: &[f32]) -> usize {
        let q = normalized(query);
        let mut best = (f32::MIN, 0);
        for (i, v) in vectors.iter().enumerate() {
            let sim = dot(&q, &normalized(v));
            if sim > best.0 {
                best = (sim, i);
            }
        }
        best.1
    }

    #[test]
    fn empty_graph_returns_nothing() {
        let graph = HnswGraph::new(HnswParams::new(8, 32));
        assert!(graph.search(&[1.0, 0.0], 5, 16).is_empty());
    }

    #[test]
    fn identical_vector_is_top1_with_near_unit_similarity() {
        let mut graph = HnswGraph::new(HnswParams::new(8, 64));
        let vectors = random_vectors(200, 16, 7);
        for v in &vectors {
            graph.insert(v);
        }
        let target = &vectors[42];
        let results = graph.search(target, 1, 64);
        assert_eq!(results[0].0, 42);
        assert!(results[0].1 >= 0.99, "similarity {}", results[0].1);
    }

    #[test]
    fn results_sorted_descending() {
        let mut graph = HnswGraph::new(HnswParams::new(8, 64));
        for v in random_vectors(100, 8, 3) {
            graph.insert(&v);
        }
        let results = graph.search(&random_vectors(1, 8, 99)[0], 10, 64);
        for pair in results.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn high_ef_matches_exact_scan_top1() {
        let vectors = random_vectors(300, 12, 11);
        let mut graph = HnswGraph::new(HnswParams::new(12, 128));
        for v in &vectors {
            graph.insert(v);
        }
        let queries = random_vectors(20, 12, 55);
        let mut hits = 0;
        for q in &queries {
            let expected = exact_top1(&vectors, q);
            let got = graph.search(q, 1, 256);
            if got[0].0 == expected {
                hits += 1;
            }
        }
        // With ef close to the collection size the graph search is effectively
        // exhaustive over the connected component.
        assert!(hits >= 18, "top-1 agreement {hits}/20");
    }

    #[test]
    fn incremental_insert_is_searchable_immediately() {
        let mut graph = HnswGraph::new(HnswParams::new(8, 32));
        for v in random_vectors(50, 8, 1) {
            graph.insert(&v);
        }
        let fresh = vec![0.9f32, 0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let slot = graph.insert(&fresh);
        let results = graph.search(&fresh, 1, 64);
        assert_eq!(results[0].0, slot);
    }
}
