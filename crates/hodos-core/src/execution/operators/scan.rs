//! Source operators: the single-row seed and the vertex-table scan.

use crate::execution::{BoxedOperator, Cell, ExecutionContext, Operator, Record};
use hodos_common::types::VertexId;
use hodos_common::Result;

/// Emits exactly one record, then nothing.
///
/// Every compiled block starts from one of these; correlated sub-blocks
/// seed it with the outer row so column references into the outer scope
/// resolve naturally.
pub struct SingleRowOperator {
    seed: Record,
    emitted: bool,
}

impl SingleRowOperator {
    /// Creates a seed operator over the given record.
    #[must_use]
    pub fn new(seed: Record) -> Self {
        Self {
            seed,
            emitted: false,
        }
    }
}

impl Operator for SingleRowOperator {
    fn next(&mut self) -> Result<Option<Record>> {
        if self.emitted {
            Ok(None)
        } else {
            self.emitted = true;
            Ok(Some(self.seed.clone()))
        }
    }

    fn reset(&mut self) {
        self.emitted = false;
    }

    fn name(&self) -> &'static str {
        "SingleRow"
    }
}

/// Cross-applies the vertex table to each input record: one output row
/// per `(input row, vertex)` pair, the vertex bound under `alias`.
///
/// Ids are scanned in sorted order so results are deterministic.
pub struct ScanVerticesOperator {
    input: BoxedOperator,
    alias: String,
    cx: ExecutionContext,
    current: Option<(Record, Vec<VertexId>, usize)>,
}

impl ScanVerticesOperator {
    /// Creates a scan bound under `alias`.
    #[must_use]
    pub fn new(input: BoxedOperator, alias: impl Into<String>, cx: ExecutionContext) -> Self {
        Self {
            input,
            alias: alias.into(),
            cx,
            current: None,
        }
    }
}

impl Operator for ScanVerticesOperator {
    fn next(&mut self) -> Result<Option<Record>> {
        loop {
            if let Some((record, ids, index)) = &mut self.current {
                if let Some(&id) = ids.get(*index) {
                    *index += 1;
                    return Ok(Some(record.clone().with(&self.alias, Cell::Vertex(id))));
                }
                self.current = None;
            }
            match self.input.next()? {
                Some(record) => {
                    self.current = Some((record, self.cx.store.vertex_ids(), 0));
                }
                None => return Ok(None),
            }
        }
    }

    fn reset(&mut self) {
        self.input.reset();
        self.current = None;
    }

    fn name(&self) -> &'static str {
        "ScanVertices"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphConfig, GraphStore};
    use hodos_common::types::Value;
    use std::sync::Arc;

    #[test]
    fn test_scan_emits_sorted_ids() {
        let store = Arc::new(GraphStore::new(usize::MAX));
        let a = store.add_vertex("person", [("name", Value::from("a"))]);
        let b = store.add_vertex("person", [("name", Value::from("b"))]);
        let cx = ExecutionContext::new(store, GraphConfig::default());

        let mut scan = ScanVerticesOperator::new(
            Box::new(SingleRowOperator::new(Record::new())),
            "n0",
            cx,
        );
        let first = scan.next().unwrap().unwrap();
        let second = scan.next().unwrap().unwrap();
        assert_eq!(first.get("n0"), Some(&Cell::Vertex(a)));
        assert_eq!(second.get("n0"), Some(&Cell::Vertex(b)));
        assert!(scan.next().unwrap().is_none());

        scan.reset();
        assert!(scan.next().unwrap().is_some());
    }
}
