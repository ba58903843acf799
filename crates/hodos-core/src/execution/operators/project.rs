//! Select-list evaluation.

use crate::execution::{evaluate_scalar, BoxedOperator, ExecutionContext, Operator, Record};
use crate::statement::SelectItem;
use hodos_common::Result;

/// Evaluates the select list, producing records whose columns are exactly
/// the select aliases.
///
/// Every compiled block ends in one of these, which is what keeps branch
/// arms column-aligned: each arm's output is restricted to the same
/// select aliases regardless of what the arm bound internally.
pub struct ProjectOperator {
    input: BoxedOperator,
    items: Vec<SelectItem>,
    cx: ExecutionContext,
}

impl ProjectOperator {
    /// Creates a projection over the input.
    #[must_use]
    pub fn new(input: BoxedOperator, items: Vec<SelectItem>, cx: ExecutionContext) -> Self {
        Self { input, items, cx }
    }
}

impl Operator for ProjectOperator {
    fn next(&mut self) -> Result<Option<Record>> {
        let Some(record) = self.input.next()? else {
            return Ok(None);
        };
        let mut out = Record::new();
        for item in &self.items {
            let cell = evaluate_scalar(&item.expression, &record, &self.cx)?;
            out.set(&item.alias, cell);
        }
        Ok(Some(out))
    }

    fn reset(&mut self) {
        self.input.reset();
    }

    fn name(&self) -> &'static str {
        "Project"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::operators::{ScanVerticesOperator, SingleRowOperator};
    use crate::execution::Cell;
    use crate::graph::{GraphConfig, GraphStore};
    use crate::statement::{ScalarExpression, DEFAULT_COLUMN};
    use hodos_common::types::Value;
    use std::sync::Arc;

    #[test]
    fn test_project_restricts_columns() {
        let store = Arc::new(GraphStore::new(usize::MAX));
        let v = store.add_vertex("person", [("name", Value::from("marko"))]);
        let cx = ExecutionContext::new(store, GraphConfig::default());

        let scan = ScanVerticesOperator::new(
            Box::new(SingleRowOperator::new(Record::new())),
            "n0",
            cx.clone(),
        );
        let items = vec![
            SelectItem::new(ScalarExpression::default_column("n0"), DEFAULT_COLUMN),
            SelectItem::new(ScalarExpression::column("n0", "name"), "name"),
        ];
        let mut project = ProjectOperator::new(Box::new(scan), items, cx);

        let row = project.next().unwrap().unwrap();
        assert_eq!(row.len(), 2);
        assert_eq!(row.get(DEFAULT_COLUMN), Some(&Cell::Vertex(v)));
        assert_eq!(row.get("name"), Some(&Cell::Value(Value::from("marko"))));
    }
}
