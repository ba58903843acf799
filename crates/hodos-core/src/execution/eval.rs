//! Scalar and boolean expression evaluation over a record.

use super::compiler::run_block;
use super::{Cell, ExecutionContext, Record};
use crate::statement::{
    BooleanExpression, ComparisonOp, ScalarExpression, DEFAULT_COLUMN,
};
use hodos_common::{Error, Result};
use indexmap::IndexMap;
use std::cmp::Ordering;

/// Resolves `table.column` against the record.
///
/// Element cells expose `_value` (the element itself), `id`, `label`, and
/// their properties; composite cells expose their entries. Unknown
/// columns resolve to null rather than failing, matching the
/// populate-on-demand projection model.
pub fn resolve_column(
    record: &Record,
    table: &str,
    column: &str,
    cx: &ExecutionContext,
) -> Result<Cell> {
    let Some(cell) = record.get(table) else {
        return Err(Error::Internal(format!(
            "unbound table alias in column reference: {table}.{column}"
        )));
    };
    let resolved = match cell {
        Cell::Map(entries) => entries.get(column).cloned().unwrap_or_else(Cell::null),
        Cell::Vertex(id) => match column {
            DEFAULT_COLUMN => cell.clone(),
            "id" => Cell::Value((id.as_u64() as i64).into()),
            "label" => cx
                .store
                .vertex_label(*id)
                .map_or_else(Cell::null, |l| Cell::Value(l.into())),
            property => cx
                .store
                .vertex_property(*id, property)
                .map_or_else(Cell::null, Cell::Value),
        },
        Cell::Edge(id) => match column {
            DEFAULT_COLUMN => cell.clone(),
            "id" => Cell::Value((id.as_u64() as i64).into()),
            "label" => cx
                .store
                .edge_label(*id)
                .map_or_else(Cell::null, |l| Cell::Value(l.into())),
            property => cx
                .store
                .edge_property(*id, property)
                .map_or_else(Cell::null, Cell::Value),
        },
        Cell::Value(_) | Cell::List(_) => {
            if column == DEFAULT_COLUMN {
                cell.clone()
            } else {
                Cell::null()
            }
        }
    };
    Ok(resolved)
}

/// Evaluates a scalar expression against a record.
pub fn evaluate_scalar(
    expr: &ScalarExpression,
    record: &Record,
    cx: &ExecutionContext,
) -> Result<Cell> {
    match expr {
        ScalarExpression::Column { table, column } => resolve_column(record, table, column, cx),
        ScalarExpression::Literal(v) => Ok(Cell::Value(v.clone())),
        ScalarExpression::Null => Ok(Cell::null()),
        ScalarExpression::Function { name, args } => match name.as_str() {
            // Path arguments that are themselves histories (loop-carried
            // fragments) splice into the outer path in place.
            "path" => {
                let mut steps = Vec::with_capacity(args.len());
                for arg in args {
                    match evaluate_scalar(arg, record, cx)? {
                        Cell::List(items) => steps.extend(items),
                        cell => steps.push(cell),
                    }
                }
                Ok(Cell::List(steps))
            }
            other => Err(Error::unsupported(format!(
                "unknown scalar function: {other}"
            ))),
        },
        ScalarExpression::Subquery(block) => {
            let rows = run_block(block, cx, Some(record))?;
            Ok(rows.into_iter().next().map_or_else(Cell::null, |row| {
                row.get(DEFAULT_COLUMN)
                    .or_else(|| row.iter().next().map(|(_, c)| c))
                    .cloned()
                    .unwrap_or_else(Cell::null)
            }))
        }
        ScalarExpression::Compose1(entries) => {
            let mut map = IndexMap::with_capacity(entries.len());
            for (label, entry) in entries {
                map.insert(label.clone(), evaluate_scalar(entry, record, cx)?);
            }
            Ok(Cell::Map(map))
        }
    }
}

/// Evaluates a boolean predicate against a record.
///
/// Comparisons against incomparable operands (nulls included) are false;
/// negation then makes them true, which is what the predicate algebra's
/// operator-flipping negation produces as well.
pub fn evaluate_boolean(
    expr: &BooleanExpression,
    record: &Record,
    cx: &ExecutionContext,
) -> Result<bool> {
    match expr {
        BooleanExpression::Comparison { left, op, right } => {
            let left = evaluate_scalar(left, record, cx)?;
            let right = evaluate_scalar(right, record, cx)?;
            Ok(match op {
                ComparisonOp::Eq => cells_equal(&left, &right),
                ComparisonOp::Neq => !cells_equal(&left, &right),
                ComparisonOp::Lt => matches!(compare_cells(&left, &right), Some(Ordering::Less)),
                ComparisonOp::Lte => matches!(
                    compare_cells(&left, &right),
                    Some(Ordering::Less | Ordering::Equal)
                ),
                ComparisonOp::Gt => {
                    matches!(compare_cells(&left, &right), Some(Ordering::Greater))
                }
                ComparisonOp::Gte => matches!(
                    compare_cells(&left, &right),
                    Some(Ordering::Greater | Ordering::Equal)
                ),
            })
        }
        BooleanExpression::And(a, b) => {
            Ok(evaluate_boolean(a, record, cx)? && evaluate_boolean(b, record, cx)?)
        }
        BooleanExpression::Or(a, b) => {
            Ok(evaluate_boolean(a, record, cx)? || evaluate_boolean(b, record, cx)?)
        }
        BooleanExpression::Not(inner) => Ok(!evaluate_boolean(inner, record, cx)?),
        BooleanExpression::Call { function, args } => {
            let cells = args
                .iter()
                .map(|arg| evaluate_scalar(arg, record, cx))
                .collect::<Result<Vec<_>>>()?;
            match function.as_str() {
                "is_null" => Ok(cells.first().is_some_and(Cell::is_null)),
                // Set membership of the first argument among the rest.
                "within" => Ok(cells
                    .split_first()
                    .is_some_and(|(head, rest)| rest.iter().any(|c| cells_equal(head, c)))),
                "without" => Ok(cells
                    .split_first()
                    .is_some_and(|(head, rest)| !rest.iter().any(|c| cells_equal(head, c)))),
                other => Err(Error::unsupported(format!(
                    "unknown boolean function: {other}"
                ))),
            }
        }
        BooleanExpression::Exists(block) => {
            Ok(!run_block(block, cx, Some(record))?.is_empty())
        }
    }
}

/// Orders two cells. Element references order by id within their kind;
/// scalars coerce numerically. `None` when incomparable.
#[must_use]
pub fn compare_cells(a: &Cell, b: &Cell) -> Option<Ordering> {
    match (a, b) {
        (Cell::Vertex(x), Cell::Vertex(y)) => Some(x.cmp(y)),
        (Cell::Edge(x), Cell::Edge(y)) => Some(x.cmp(y)),
        _ => a.as_value().compare(&b.as_value()),
    }
}

/// Equality over cells: element references by id, scalars by value with
/// numeric coercion, composites structurally.
#[must_use]
pub fn cells_equal(a: &Cell, b: &Cell) -> bool {
    match compare_cells(a, b) {
        Some(ord) => ord == Ordering::Equal,
        None => a.as_value() == b.as_value(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphConfig, GraphStore};
    use hodos_common::types::Value;
    use std::sync::Arc;

    fn cx() -> ExecutionContext {
        ExecutionContext::new(Arc::new(GraphStore::new(usize::MAX)), GraphConfig::default())
    }

    #[test]
    fn test_column_on_vertex_cell() {
        let cx = cx();
        let id = cx.store.add_vertex("person", [("name", Value::from("marko"))]);
        let record = Record::new().with("n0", Cell::Vertex(id));

        let name = resolve_column(&record, "n0", "name", &cx).unwrap();
        assert_eq!(name, Cell::Value(Value::from("marko")));
        let label = resolve_column(&record, "n0", "label", &cx).unwrap();
        assert_eq!(label, Cell::Value(Value::from("person")));
        let missing = resolve_column(&record, "n0", "age", &cx).unwrap();
        assert!(missing.is_null());
    }

    #[test]
    fn test_comparison_against_null_is_false() {
        let cx = cx();
        let record = Record::new();
        let pred = BooleanExpression::Comparison {
            left: ScalarExpression::Null,
            op: ComparisonOp::Lt,
            right: ScalarExpression::Literal(Value::Int64(5)),
        };
        assert!(!evaluate_boolean(&pred, &record, &cx).unwrap());
        let negated = BooleanExpression::Not(Box::new(pred));
        assert!(evaluate_boolean(&negated, &record, &cx).unwrap());
    }

    #[test]
    fn test_numeric_coercion_in_equality() {
        let a = Cell::Value(Value::Int64(2));
        let b = Cell::Value(Value::Float64(2.0));
        assert!(cells_equal(&a, &b));
    }
}
