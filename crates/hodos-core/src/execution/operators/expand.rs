//! Match-path expansion with batched adjacency fetching.

use crate::execution::{evaluate_scalar, BoxedOperator, Cell, ExecutionContext, Operator, Record};
use crate::graph::{Direction, EdgeDoc};
use crate::statement::MatchPathSegment;
use hashbrown::HashMap;
use hodos_common::types::{Value, VertexId};
use hodos_common::{Error, Result};
use smallvec::SmallVec;
use std::collections::VecDeque;

/// Input rows buffered per adjacency fetch.
const EXPAND_BATCH: usize = 64;

/// Expands one match-path segment.
///
/// The segment source usually resolves to a vertex: the operator follows
/// that vertex's edges in the segment direction, binding the edge under
/// `edge_alias` and the reached vertex under `sink_alias`. When the source
/// resolves to an edge instead, the segment extracts an endpoint:
/// `In` binds the edge's target, `Out` its source, `Both` both.
///
/// Input rows are pulled in batches. Vertices whose adjacency was spilled
/// out of their document are collected across the whole batch, together
/// with their partition keys (or the absent-partition marker), and
/// resolved through a single [`GraphStore::fetch_adjacency`] call; the
/// fetched lists are then spliced back at each row's offset so output
/// order matches input order.
///
/// [`GraphStore::fetch_adjacency`]: crate::graph::GraphStore::fetch_adjacency
pub struct ExpandMatchOperator {
    input: BoxedOperator,
    segment: MatchPathSegment,
    cx: ExecutionContext,
    buffer: VecDeque<Record>,
    exhausted: bool,
}

impl ExpandMatchOperator {
    /// Creates an expansion over the input.
    #[must_use]
    pub fn new(input: BoxedOperator, segment: MatchPathSegment, cx: ExecutionContext) -> Self {
        Self {
            input,
            segment,
            cx,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fill_batch(&mut self) -> Result<()> {
        let mut batch: SmallVec<[(Record, Cell); 8]> = SmallVec::new();
        while batch.len() < EXPAND_BATCH {
            match self.input.next()? {
                Some(record) => {
                    let source = evaluate_scalar(&self.segment.source, &record, &self.cx)?;
                    batch.push((record, source));
                }
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }

        // One fetch for every spilled vertex in the batch, deduplicated,
        // keyed by (id, partition key).
        let mut spilled_ids: Vec<VertexId> = Vec::new();
        let mut partitions: Vec<Option<Value>> = Vec::new();
        for (_, source) in &batch {
            if let Cell::Vertex(id) = source {
                if self.cx.store.has_unfetched_adjacency(*id) && !spilled_ids.contains(id) {
                    spilled_ids.push(*id);
                    partitions.push(self.cx.store.vertex(*id).and_then(|doc| doc.partition));
                }
            }
        }
        let fetched: HashMap<VertexId, Vec<EdgeDoc>, ahash::RandomState> =
            if spilled_ids.is_empty() {
                HashMap::default()
            } else {
                self.cx
                    .store
                    .fetch_adjacency(self.segment.direction, &spilled_ids, &partitions)
            };

        for (record, source) in batch {
            match source {
                Cell::Vertex(id) => {
                    let edges = if let Some(edges) = fetched.get(&id) {
                        edges.clone()
                    } else {
                        self.cx.store.edges_from(
                            id,
                            self.segment.direction,
                            self.cx.config.use_reverse_edges,
                        )
                    };
                    for edge in edges {
                        self.buffer.push_back(self.bind_hop(&record, id, &edge));
                    }
                }
                Cell::Edge(id) => {
                    let Some(doc) = self.cx.store.edge(id) else {
                        return Err(Error::Internal(format!("dangling edge reference: {id}")));
                    };
                    let endpoints: SmallVec<[VertexId; 2]> = match self.segment.direction {
                        Direction::In => SmallVec::from_slice(&[doc.target]),
                        Direction::Out => SmallVec::from_slice(&[doc.source]),
                        Direction::Both => SmallVec::from_slice(&[doc.source, doc.target]),
                    };
                    for endpoint in endpoints {
                        let mut out = record.clone().with(&self.segment.edge_alias, Cell::Edge(id));
                        if let Some(sink) = &self.segment.sink_alias {
                            out.set(sink, Cell::Vertex(endpoint));
                        }
                        self.buffer.push_back(out);
                    }
                }
                // A null source matches nothing.
                cell if cell.is_null() => {}
                cell => {
                    return Err(Error::Internal(format!(
                        "match path source is not a graph element: {cell:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn bind_hop(&self, record: &Record, source: VertexId, edge: &EdgeDoc) -> Record {
        let sink = if edge.source == source {
            edge.target
        } else {
            edge.source
        };
        let mut out = record.clone().with(&self.segment.edge_alias, Cell::Edge(edge.id));
        if let Some(alias) = &self.segment.sink_alias {
            out.set(alias, Cell::Vertex(sink));
        }
        out
    }
}

impl Operator for ExpandMatchOperator {
    fn next(&mut self) -> Result<Option<Record>> {
        while self.buffer.is_empty() && !self.exhausted {
            self.fill_batch()?;
        }
        Ok(self.buffer.pop_front())
    }

    fn reset(&mut self) {
        self.input.reset();
        self.buffer.clear();
        self.exhausted = false;
    }

    fn name(&self) -> &'static str {
        "ExpandMatch"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::operators::{ScanVerticesOperator, SingleRowOperator};
    use crate::graph::{GraphConfig, GraphStore};
    use crate::statement::ScalarExpression;
    use std::sync::Arc;

    fn segment(direction: Direction) -> MatchPathSegment {
        MatchPathSegment {
            source: ScalarExpression::default_column("n0"),
            edge_alias: "e0".to_string(),
            direction,
            sink_alias: Some("n1".to_string()),
        }
    }

    #[test]
    fn test_expand_out() {
        let store = Arc::new(GraphStore::new(usize::MAX));
        let a = store.add_vertex("person", [] as [(&str, Value); 0]);
        let b = store.add_vertex("person", [] as [(&str, Value); 0]);
        let e = store.add_edge("knows", a, b, [] as [(&str, Value); 0]);
        let cx = ExecutionContext::new(store, GraphConfig::default());

        let scan = ScanVerticesOperator::new(
            Box::new(SingleRowOperator::new(Record::new())),
            "n0",
            cx.clone(),
        );
        let mut expand = ExpandMatchOperator::new(Box::new(scan), segment(Direction::Out), cx);

        let row = expand.next().unwrap().unwrap();
        assert_eq!(row.get("n0"), Some(&Cell::Vertex(a)));
        assert_eq!(row.get("e0"), Some(&Cell::Edge(e)));
        assert_eq!(row.get("n1"), Some(&Cell::Vertex(b)));
        assert!(expand.next().unwrap().is_none());
    }

    #[test]
    fn test_spilled_vertices_fetch_once_per_batch() {
        let store = Arc::new(GraphStore::new(1));
        let hub = store.add_vertex("person", [] as [(&str, Value); 0]);
        for _ in 0..4 {
            let v = store.add_vertex("person", [] as [(&str, Value); 0]);
            store.add_edge("knows", hub, v, [] as [(&str, Value); 0]);
        }
        assert!(store.has_unfetched_adjacency(hub));
        let cx = ExecutionContext::new(store, GraphConfig::default());

        let seed = SingleRowOperator::new(Record::new());
        let scan = ScanVerticesOperator::new(Box::new(seed), "n0", cx.clone());
        let filter_to_hub = crate::execution::operators::FilterOperator::new(
            Box::new(scan),
            crate::statement::BooleanExpression::Comparison {
                left: ScalarExpression::column("n0", "id"),
                op: crate::statement::ComparisonOp::Eq,
                right: ScalarExpression::Literal(Value::Int64(hub.as_u64() as i64)),
            },
            cx.clone(),
        );
        let mut expand =
            ExpandMatchOperator::new(Box::new(filter_to_hub), segment(Direction::Out), cx.clone());

        let mut rows = 0;
        while expand.next().unwrap().is_some() {
            rows += 1;
        }
        assert_eq!(rows, 4);
        assert_eq!(cx.store.adjacency_fetch_count(), 1);
    }

    #[test]
    fn test_endpoint_extraction_from_edge() {
        let store = Arc::new(GraphStore::new(usize::MAX));
        let a = store.add_vertex("person", [] as [(&str, Value); 0]);
        let b = store.add_vertex("person", [] as [(&str, Value); 0]);
        let e = store.add_edge("knows", a, b, [] as [(&str, Value); 0]);
        let cx = ExecutionContext::new(store, GraphConfig::default());

        let seed = SingleRowOperator::new(Record::new().with("e0", Cell::Edge(e)));
        let segment = MatchPathSegment {
            source: ScalarExpression::default_column("e0"),
            edge_alias: "e0".to_string(),
            direction: Direction::In,
            sink_alias: Some("n1".to_string()),
        };
        let mut expand = ExpandMatchOperator::new(Box::new(seed), segment, cx);

        let row = expand.next().unwrap().unwrap();
        assert_eq!(row.get("n1"), Some(&Cell::Vertex(b)));
    }
}
