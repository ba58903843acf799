//! Where-clause filtering.

use crate::execution::{evaluate_boolean, BoxedOperator, ExecutionContext, Operator, Record};
use crate::statement::BooleanExpression;
use hodos_common::Result;

/// Passes through records satisfying the predicate tree.
pub struct FilterOperator {
    input: BoxedOperator,
    predicate: BooleanExpression,
    cx: ExecutionContext,
}

impl FilterOperator {
    /// Creates a filter over the input.
    #[must_use]
    pub fn new(input: BoxedOperator, predicate: BooleanExpression, cx: ExecutionContext) -> Self {
        Self {
            input,
            predicate,
            cx,
        }
    }
}

impl Operator for FilterOperator {
    fn next(&mut self) -> Result<Option<Record>> {
        while let Some(record) = self.input.next()? {
            if evaluate_boolean(&self.predicate, &record, &self.cx)? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn reset(&mut self) {
        self.input.reset();
    }

    fn name(&self) -> &'static str {
        "Filter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::operators::{ScanVerticesOperator, SingleRowOperator};
    use crate::execution::Cell;
    use crate::graph::{GraphConfig, GraphStore};
    use crate::statement::{ComparisonOp, ScalarExpression};
    use hodos_common::types::Value;
    use std::sync::Arc;

    #[test]
    fn test_filter_on_property() {
        let store = Arc::new(GraphStore::new(usize::MAX));
        store.add_vertex("person", [("age", Value::Int64(29))]);
        let v = store.add_vertex("person", [("age", Value::Int64(35))]);
        let cx = ExecutionContext::new(store, GraphConfig::default());

        let scan = ScanVerticesOperator::new(
            Box::new(SingleRowOperator::new(Record::new())),
            "n0",
            cx.clone(),
        );
        let predicate = BooleanExpression::Comparison {
            left: ScalarExpression::column("n0", "age"),
            op: ComparisonOp::Gt,
            right: ScalarExpression::Literal(Value::Int64(30)),
        };
        let mut filter = FilterOperator::new(Box::new(scan), predicate, cx);

        let row = filter.next().unwrap().unwrap();
        assert_eq!(row.get("n0"), Some(&Cell::Vertex(v)));
        assert!(filter.next().unwrap().is_none());
    }
}
