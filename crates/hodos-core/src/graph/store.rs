//! In-memory graph-over-document store.
//!
//! Vertices and edges are documents: a label plus a property bag. Each
//! vertex carries adjacency lists; once a vertex's edge count passes the
//! spill threshold its adjacency is marked spilled and downstream
//! consumers must fetch it through the batched [`GraphStore::fetch_adjacency`]
//! entry point (one call per batch, never one per vertex).

use super::Direction;
use ahash::RandomState;
use hashbrown::{HashMap, HashSet};
use hodos_common::types::{EdgeId, PropertyKey, Value, VertexId};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A vertex document.
#[derive(Debug, Clone)]
pub struct VertexDoc {
    /// Document id.
    pub id: VertexId,
    /// Vertex label.
    pub label: String,
    /// Property bag.
    pub properties: HashMap<PropertyKey, Value>,
    /// Partition key value, if the graph is partitioned.
    pub partition: Option<Value>,
}

/// An edge document.
#[derive(Debug, Clone)]
pub struct EdgeDoc {
    /// Document id.
    pub id: EdgeId,
    /// Edge label.
    pub label: String,
    /// Property bag.
    pub properties: HashMap<PropertyKey, Value>,
    /// Source vertex.
    pub source: VertexId,
    /// Sink vertex.
    pub target: VertexId,
}

#[derive(Default)]
struct StoreInner {
    vertices: HashMap<VertexId, VertexDoc, RandomState>,
    edges: HashMap<EdgeId, EdgeDoc, RandomState>,
    out_adjacency: HashMap<VertexId, Vec<EdgeId>, RandomState>,
    in_adjacency: HashMap<VertexId, Vec<EdgeId>, RandomState>,
    spilled: HashSet<VertexId, RandomState>,
    next_vertex: u64,
    next_edge: u64,
}

/// The in-memory store.
pub struct GraphStore {
    inner: RwLock<StoreInner>,
    edge_spill_threshold: usize,
    adjacency_fetches: AtomicUsize,
}

impl GraphStore {
    /// Creates an empty store with the given edge-spill threshold.
    #[must_use]
    pub fn new(edge_spill_threshold: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            edge_spill_threshold,
            adjacency_fetches: AtomicUsize::new(0),
        }
    }

    /// Adds a vertex document and returns its id.
    pub fn add_vertex<I, K>(&self, label: impl Into<String>, properties: I) -> VertexId
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<PropertyKey>,
    {
        self.add_vertex_partitioned(label, properties, None)
    }

    /// Adds a vertex document with an explicit partition key value.
    pub fn add_vertex_partitioned<I, K>(
        &self,
        label: impl Into<String>,
        properties: I,
        partition: Option<Value>,
    ) -> VertexId
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<PropertyKey>,
    {
        let mut inner = self.inner.write();
        let id = VertexId::new(inner.next_vertex);
        inner.next_vertex += 1;
        let doc = VertexDoc {
            id,
            label: label.into(),
            properties: properties.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            partition,
        };
        inner.vertices.insert(id, doc);
        id
    }

    /// Adds an edge document between two vertices and returns its id.
    pub fn add_edge<I, K>(
        &self,
        label: impl Into<String>,
        source: VertexId,
        target: VertexId,
        properties: I,
    ) -> EdgeId
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<PropertyKey>,
    {
        let mut inner = self.inner.write();
        let id = EdgeId::new(inner.next_edge);
        inner.next_edge += 1;
        let doc = EdgeDoc {
            id,
            label: label.into(),
            properties: properties.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            source,
            target,
        };
        inner.edges.insert(id, doc);
        inner.out_adjacency.entry(source).or_default().push(id);
        inner.in_adjacency.entry(target).or_default().push(id);

        // Past the threshold the adjacency list no longer lives inside the
        // vertex document and must be fetched through the batched entry.
        for v in [source, target] {
            let degree = inner.out_adjacency.get(&v).map_or(0, Vec::len)
                + inner.in_adjacency.get(&v).map_or(0, Vec::len);
            if degree > self.edge_spill_threshold {
                inner.spilled.insert(v);
            }
        }
        id
    }

    /// Returns a snapshot of the vertex document.
    #[must_use]
    pub fn vertex(&self, id: VertexId) -> Option<VertexDoc> {
        self.inner.read().vertices.get(&id).cloned()
    }

    /// Returns a snapshot of the edge document.
    #[must_use]
    pub fn edge(&self, id: EdgeId) -> Option<EdgeDoc> {
        self.inner.read().edges.get(&id).cloned()
    }

    /// All vertex ids, sorted for deterministic scans.
    #[must_use]
    pub fn vertex_ids(&self) -> Vec<VertexId> {
        let mut ids: Vec<VertexId> = self.inner.read().vertices.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// All edge ids, sorted for deterministic scans.
    #[must_use]
    pub fn edge_ids(&self) -> Vec<EdgeId> {
        let mut ids: Vec<EdgeId> = self.inner.read().edges.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of vertices in the store.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.inner.read().vertices.len()
    }

    /// A vertex property value.
    #[must_use]
    pub fn vertex_property(&self, id: VertexId, key: &str) -> Option<Value> {
        self.inner
            .read()
            .vertices
            .get(&id)
            .and_then(|doc| doc.properties.get(&PropertyKey::from(key)).cloned())
    }

    /// An edge property value.
    #[must_use]
    pub fn edge_property(&self, id: EdgeId, key: &str) -> Option<Value> {
        self.inner
            .read()
            .edges
            .get(&id)
            .and_then(|doc| doc.properties.get(&PropertyKey::from(key)).cloned())
    }

    /// The label of a vertex.
    #[must_use]
    pub fn vertex_label(&self, id: VertexId) -> Option<String> {
        self.inner.read().vertices.get(&id).map(|d| d.label.clone())
    }

    /// The label of an edge.
    #[must_use]
    pub fn edge_label(&self, id: EdgeId) -> Option<String> {
        self.inner.read().edges.get(&id).map(|d| d.label.clone())
    }

    /// Edges incident to `id` in the given direction. When
    /// `use_reverse_edges` is false, incoming adjacency is resolved by
    /// scanning all out-edges instead of the materialized reverse list.
    #[must_use]
    pub fn edges_from(&self, id: VertexId, direction: Direction, use_reverse_edges: bool) -> Vec<EdgeDoc> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        if matches!(direction, Direction::Out | Direction::Both) {
            if let Some(edges) = inner.out_adjacency.get(&id) {
                out.extend(edges.iter().filter_map(|e| inner.edges.get(e).cloned()));
            }
        }
        if matches!(direction, Direction::In | Direction::Both) {
            if use_reverse_edges {
                if let Some(edges) = inner.in_adjacency.get(&id) {
                    out.extend(edges.iter().filter_map(|e| inner.edges.get(e).cloned()));
                }
            } else {
                let mut incoming: Vec<EdgeDoc> = inner
                    .edges
                    .values()
                    .filter(|e| e.target == id)
                    .cloned()
                    .collect();
                incoming.sort_unstable_by_key(|e| e.id);
                out.extend(incoming);
            }
        }
        out
    }

    /// Whether this vertex's adjacency was spilled out of its document.
    #[must_use]
    pub fn has_unfetched_adjacency(&self, id: VertexId) -> bool {
        self.inner.read().spilled.contains(&id)
    }

    /// Batched adjacency-list constructor.
    ///
    /// Fetches adjacency for every id in one call, keyed by
    /// `(id, partition key)`. Vertices lacking a partition key are still
    /// part of the batch; callers pass `None` as the absent-partition
    /// marker at the matching offset. Counted so callers can assert a
    /// one-call-per-batch discipline.
    #[must_use]
    pub fn fetch_adjacency(
        &self,
        direction: Direction,
        ids: &[VertexId],
        partitions: &[Option<Value>],
    ) -> HashMap<VertexId, Vec<EdgeDoc>, RandomState> {
        debug_assert_eq!(ids.len(), partitions.len());
        self.adjacency_fetches.fetch_add(1, Ordering::Relaxed);
        let mut result: HashMap<VertexId, Vec<EdgeDoc>, RandomState> = HashMap::default();
        for &id in ids {
            result.insert(id, self.edges_from(id, direction, true));
        }
        result
    }

    /// Number of batched adjacency fetches issued so far.
    #[must_use]
    pub fn adjacency_fetch_count(&self) -> usize {
        self.adjacency_fetches.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_expand() {
        let store = GraphStore::new(usize::MAX);
        let a = store.add_vertex("person", [("name", Value::from("marko"))]);
        let b = store.add_vertex("software", [("name", Value::from("lop"))]);
        store.add_edge("created", a, b, [("weight", Value::from(0.4))]);

        let out = store.edges_from(a, Direction::Out, true);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "created");
        assert_eq!(out[0].target, b);

        let incoming = store.edges_from(b, Direction::In, true);
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].source, a);
    }

    #[test]
    fn test_reverse_edge_fallback_matches_materialized() {
        let store = GraphStore::new(usize::MAX);
        let a = store.add_vertex("person", [("name", Value::from("a"))]);
        let b = store.add_vertex("person", [("name", Value::from("b"))]);
        let c = store.add_vertex("person", [("name", Value::from("c"))]);
        store.add_edge("knows", a, c, [] as [(&str, Value); 0]);
        store.add_edge("knows", b, c, [] as [(&str, Value); 0]);

        let materialized: Vec<EdgeId> = store
            .edges_from(c, Direction::In, true)
            .into_iter()
            .map(|e| e.id)
            .collect();
        let scanned: Vec<EdgeId> = store
            .edges_from(c, Direction::In, false)
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(materialized, scanned);
    }

    #[test]
    fn test_spill_threshold() {
        let store = GraphStore::new(2);
        let hub = store.add_vertex("person", [] as [(&str, Value); 0]);
        for _ in 0..3 {
            let v = store.add_vertex("person", [] as [(&str, Value); 0]);
            store.add_edge("knows", hub, v, [] as [(&str, Value); 0]);
        }
        assert!(store.has_unfetched_adjacency(hub));
    }

    #[test]
    fn test_batched_fetch_counts_once() {
        let store = GraphStore::new(usize::MAX);
        let a = store.add_vertex("person", [] as [(&str, Value); 0]);
        let b = store.add_vertex("person", [] as [(&str, Value); 0]);
        store.add_edge("knows", a, b, [] as [(&str, Value); 0]);

        let result = store.fetch_adjacency(Direction::Both, &[a, b], &[None, None]);
        assert_eq!(store.adjacency_fetch_count(), 1);
        assert_eq!(result[&a].len(), 1);
        assert_eq!(result[&b].len(), 1);
    }
}
