//! Compiles select query blocks into operator pipelines.

use super::operators::{
    ExpandMatchOperator, FilterOperator, ProjectOperator, RepeatOperator, ScanVerticesOperator,
    SingleRowOperator, TvfOperator,
};
use super::{BoxedOperator, ExecutionContext, Record};
use crate::statement::{
    BooleanExpression, MatchPathSegment, ScalarExpression, SelectQueryBlock, StatementTree,
    TableReference, TvfCall, TvfName, TvfParameter,
};
use hashbrown::HashSet;
use hodos_common::{Error, Result};
use tracing::trace;

/// Compiles a statement tree into its root operator.
pub fn compile_statement(tree: &StatementTree, cx: &ExecutionContext) -> Result<BoxedOperator> {
    compile_block(&tree.root, cx, None)
}

/// Compiles one block: a single-row seed, then the from-list entries
/// cross-applied left to right, with match-path expansions and
/// where-clause factors attached as soon as every alias they reference
/// is bound, and finally the select-list projection.
///
/// The interleaving matters both ways: a table-valued function whose
/// parameters read a match-bound sink must run after that expansion, and
/// a filter over a scanned vertex must run before a blocking function
/// further down the from-list aggregates the stream.
///
/// `env` is the outer row for correlated sub-blocks: it seeds the
/// pipeline, so column references into the outer scope resolve against
/// it.
pub fn compile_block(
    block: &SelectQueryBlock,
    cx: &ExecutionContext,
    env: Option<&Record>,
) -> Result<BoxedOperator> {
    trace!(
        tables = block.from.len(),
        matches = block.matches.len(),
        correlated = env.is_some(),
        "compiling query block"
    );
    let seed = env.cloned().unwrap_or_default();
    let mut bound: HashSet<String> = seed.column_names().map(ToString::to_string).collect();
    let mut segments: Vec<&MatchPathSegment> = block.matches.iter().collect();
    let mut factors = match &block.where_clause {
        Some(predicate) => and_factors(predicate),
        None => Vec::new(),
    };

    let mut op: BoxedOperator = Box::new(SingleRowOperator::new(seed));
    op = attach_ready(op, cx, &mut bound, &mut segments, &mut factors);
    for table in &block.from {
        op = match table {
            TableReference::Vertices { alias } => {
                bound.insert(alias.clone());
                Box::new(ScanVerticesOperator::new(op, alias, cx.clone()))
            }
            TableReference::Tvf(call) if call.function == TvfName::Repeat => {
                bound.insert(call.alias.clone());
                compile_repeat(op, call, cx)?
            }
            TableReference::Tvf(call) => {
                bound.insert(call.alias.clone());
                Box::new(TvfOperator::new(op, call.clone(), cx.clone())?)
            }
        };
        op = attach_ready(op, cx, &mut bound, &mut segments, &mut factors);
    }
    // Anything still pending references aliases this block never binds;
    // leave it at the tail where the outer row may still resolve it.
    for segment in segments {
        op = Box::new(ExpandMatchOperator::new(op, segment.clone(), cx.clone()));
    }
    for factor in factors {
        op = Box::new(FilterOperator::new(op, factor, cx.clone()));
    }
    if !block.select.is_empty() {
        op = Box::new(ProjectOperator::new(op, block.select.clone(), cx.clone()));
    }
    Ok(op)
}

/// Attaches every pending match segment and filter factor whose
/// referenced aliases are all bound, repeating until none qualifies.
fn attach_ready(
    mut op: BoxedOperator,
    cx: &ExecutionContext,
    bound: &mut HashSet<String>,
    segments: &mut Vec<&MatchPathSegment>,
    factors: &mut Vec<BooleanExpression>,
) -> BoxedOperator {
    loop {
        let mut progressed = false;
        let mut index = 0;
        while index < segments.len() {
            let ready = match source_alias(segments[index]) {
                Some(alias) => bound.contains(alias),
                None => false,
            };
            if ready {
                let segment = segments.remove(index);
                bound.insert(segment.edge_alias.clone());
                if let Some(sink) = &segment.sink_alias {
                    bound.insert(sink.clone());
                }
                op = Box::new(ExpandMatchOperator::new(op, segment.clone(), cx.clone()));
                progressed = true;
            } else {
                index += 1;
            }
        }
        let mut index = 0;
        while index < factors.len() {
            let mut aliases = HashSet::new();
            boolean_aliases(&factors[index], &mut aliases);
            if aliases.iter().all(|alias| bound.contains(alias)) {
                let factor = factors.remove(index);
                op = Box::new(FilterOperator::new(op, factor, cx.clone()));
                progressed = true;
            } else {
                index += 1;
            }
        }
        if !progressed {
            return op;
        }
    }
}

fn source_alias(segment: &MatchPathSegment) -> Option<&str> {
    match &segment.source {
        ScalarExpression::Column { table, .. } => Some(table),
        _ => None,
    }
}

/// Splits a predicate tree into its top-level AND factors.
fn and_factors(predicate: &BooleanExpression) -> Vec<BooleanExpression> {
    let mut factors = Vec::new();
    fn split(expr: &BooleanExpression, out: &mut Vec<BooleanExpression>) {
        match expr {
            BooleanExpression::And(left, right) => {
                split(left, out);
                split(right, out);
            }
            other => out.push(other.clone()),
        }
    }
    split(predicate, &mut factors);
    factors
}

/// Every table alias a predicate reads, including through nested blocks;
/// nested blocks' own aliases count too, which keeps correlated factors
/// conservatively at the tail.
fn boolean_aliases(expr: &BooleanExpression, out: &mut HashSet<String>) {
    match expr {
        BooleanExpression::Comparison { left, right, .. } => {
            scalar_aliases(left, out);
            scalar_aliases(right, out);
        }
        BooleanExpression::And(left, right) | BooleanExpression::Or(left, right) => {
            boolean_aliases(left, out);
            boolean_aliases(right, out);
        }
        BooleanExpression::Not(inner) => boolean_aliases(inner, out),
        BooleanExpression::Call { args, .. } => {
            for arg in args {
                scalar_aliases(arg, out);
            }
        }
        BooleanExpression::Exists(block) => block_aliases(block, out),
    }
}

fn scalar_aliases(expr: &ScalarExpression, out: &mut HashSet<String>) {
    match expr {
        ScalarExpression::Column { table, .. } => {
            out.insert(table.clone());
        }
        ScalarExpression::Function { args, .. } => {
            for arg in args {
                scalar_aliases(arg, out);
            }
        }
        ScalarExpression::Subquery(block) => block_aliases(block, out),
        ScalarExpression::Compose1(entries) => {
            for (_, entry) in entries {
                scalar_aliases(entry, out);
            }
        }
        ScalarExpression::Literal(_) | ScalarExpression::Null => {}
    }
}

fn block_aliases(block: &SelectQueryBlock, out: &mut HashSet<String>) {
    for item in &block.select {
        scalar_aliases(&item.expression, out);
    }
    for segment in &block.matches {
        scalar_aliases(&segment.source, out);
    }
    if let Some(predicate) = &block.where_clause {
        boolean_aliases(predicate, out);
    }
}

/// A repeat call carries its zero-iteration arm, its iteration arm, and
/// the loop bookkeeping, in that parameter order.
fn compile_repeat(
    input: BoxedOperator,
    call: &TvfCall,
    cx: &ExecutionContext,
) -> Result<BoxedOperator> {
    let (
        Some(TvfParameter::Query(zero_arm)),
        Some(TvfParameter::Query(iter_arm)),
        Some(TvfParameter::Repeat(condition)),
    ) = (call.params.get(0), call.params.get(1), call.params.get(2))
    else {
        return Err(Error::Internal(
            "malformed repeat call parameters".to_string(),
        ));
    };
    Ok(Box::new(RepeatOperator::new(
        input,
        &call.alias,
        zero_arm.clone(),
        iter_arm.clone(),
        condition.as_ref().clone(),
        cx.clone(),
    )?))
}

/// Compiles and fully drains a block. Used for correlated sub-blocks,
/// which run once per outer row.
pub fn run_block(
    block: &SelectQueryBlock,
    cx: &ExecutionContext,
    env: Option<&Record>,
) -> Result<Vec<Record>> {
    let mut op = compile_block(block, cx, env)?;
    let mut rows = Vec::new();
    while let Some(record) = op.next()? {
        rows.push(record);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Cell;
    use crate::graph::{Direction, GraphConfig, GraphStore};
    use crate::statement::{
        BooleanExpression, ComparisonOp, MatchPathSegment, ScalarExpression, SelectItem,
        DEFAULT_COLUMN,
    };
    use hodos_common::types::Value;
    use std::sync::Arc;

    #[test]
    fn test_scan_filter_project_pipeline() {
        let store = Arc::new(GraphStore::new(usize::MAX));
        let marko = store.add_vertex(
            "person",
            [("name", Value::from("marko")), ("age", Value::from(29i64))],
        );
        store.add_vertex(
            "person",
            [("name", Value::from("peter")), ("age", Value::from(35i64))],
        );
        let lop = store.add_vertex("software", [("name", Value::from("lop"))]);
        store.add_edge("created", marko, lop, [] as [(&str, Value); 0]);
        let cx = ExecutionContext::new(store, GraphConfig::default());

        let block = SelectQueryBlock {
            select: vec![SelectItem::new(
                ScalarExpression::column("n1", "name"),
                DEFAULT_COLUMN,
            )],
            from: vec![TableReference::Vertices {
                alias: "n0".to_string(),
            }],
            matches: vec![MatchPathSegment {
                source: ScalarExpression::default_column("n0"),
                edge_alias: "e0".to_string(),
                direction: Direction::Out,
                sink_alias: Some("n1".to_string()),
            }],
            where_clause: Some(BooleanExpression::Comparison {
                left: ScalarExpression::column("n0", "age"),
                op: ComparisonOp::Lt,
                right: ScalarExpression::Literal(Value::Int64(30)),
            }),
        };

        let rows = run_block(&block, &cx, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].get(DEFAULT_COLUMN),
            Some(&Cell::Value(Value::from("lop")))
        );
    }

    #[test]
    fn test_correlated_env_seeds_block() {
        let store = Arc::new(GraphStore::new(usize::MAX));
        let cx = ExecutionContext::new(store, GraphConfig::default());

        let block = SelectQueryBlock {
            select: vec![SelectItem::new(
                ScalarExpression::column("outer", "x"),
                DEFAULT_COLUMN,
            )],
            ..Default::default()
        };
        let mut entries = indexmap::IndexMap::new();
        entries.insert("x".to_string(), Cell::Value(Value::Int64(9)));
        let env = Record::new().with("outer", Cell::Map(entries));

        let rows = run_block(&block, &cx, Some(&env)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].get(DEFAULT_COLUMN),
            Some(&Cell::Value(Value::Int64(9)))
        );
    }
}
