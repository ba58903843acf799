//! Scope to statement tree.
//!
//! Rendering is a pure function over the finished translation: it never
//! mutates a scope, so the same scope can be rendered once as a boolean
//! fragment and later as a row source, and rendering twice yields equal
//! trees.

use hodos_common::types::Value;
use hodos_common::{Error, Result};
use hodos_core::statement::{
    BooleanExpression, ComparisonOp, MatchPathSegment, ScalarExpression, SelectItem,
    SelectQueryBlock, SortKey, SortRule, StatementTree, TableReference, TvfCall, TvfParameter,
    DEFAULT_COLUMN,
};
use tracing::debug;

use super::context::{CxId, SortKeyParam, TableRef, Translation, TvfParam, VarId};
use super::repeat::render_repeat;
use super::variable::VariableKind;

/// Renders a translation's root scope into a statement tree.
pub fn render_statement(t: &Translation, root: CxId) -> Result<StatementTree> {
    debug!("rendering statement tree");
    Ok(StatementTree {
        root: render_block(t, root, false)?,
    })
}

/// Renders one scope as a row-producing query block.
///
/// The select list is the pivot's whole-value column under the default
/// alias, followed by the scope's projected properties in registration
/// order. Each property resolves to a direct column when the pivot can
/// supply it, and to a null literal otherwise.
///
/// With `compose1`, the block collapses to a single composite column for
/// use as a subquery value.
pub fn render_block(t: &Translation, cx: CxId, compose1: bool) -> Result<SelectQueryBlock> {
    let context = t.cx(cx);
    let Some(pivot) = context.pivot else {
        return Err(Error::compilation("cannot render a scope without a pivot"));
    };

    let mut from = Vec::with_capacity(context.table_refs.len());
    for table in &context.table_refs {
        from.push(render_table_ref(t, table)?);
    }

    let matches = context
        .match_paths
        .iter()
        .map(|path| MatchPathSegment {
            source: t.var(path.source).default_projection(),
            edge_alias: t.var(path.edge).alias.clone(),
            direction: path.direction,
            sink_alias: path.sink.map(|sink| t.var(sink).alias.clone()),
        })
        .collect();

    let select = if compose1 {
        vec![SelectItem::new(t.var(pivot).to_compose1(), DEFAULT_COLUMN)]
    } else {
        let mut items = vec![SelectItem::new(
            t.var(pivot).default_projection(),
            DEFAULT_COLUMN,
        )];
        for property in &context.projected {
            items.push(SelectItem::new(
                resolve_property(t, pivot, property),
                property.clone(),
            ));
        }
        items
    };

    Ok(SelectQueryBlock {
        select,
        from,
        matches,
        where_clause: context.predicates.clone(),
    })
}

/// Renders a scope as a truth test.
///
/// A scope that registered no row sources is purely a predicate fragment
/// and renders to its where-clause tree directly; a scope with row
/// sources renders to an existence test over its block.
pub fn render_boolean(t: &Translation, cx: CxId) -> Result<BooleanExpression> {
    let context = t.cx(cx);
    if context.table_refs.is_empty() && context.match_paths.is_empty() {
        return Ok(context.predicates.clone().unwrap_or_else(trivially_true));
    }
    Ok(BooleanExpression::Exists(Box::new(render_block(
        t, cx, true,
    )?)))
}

fn render_table_ref(t: &Translation, table: &TableRef) -> Result<TableReference> {
    match table {
        TableRef::Vertices { var } => Ok(TableReference::Vertices {
            alias: t.var(*var).alias.clone(),
        }),
        TableRef::Tvf {
            var,
            function,
            params,
        } => {
            let mut rendered = Vec::with_capacity(params.len());
            for param in params {
                match param {
                    TvfParam::Scalar(expr) => rendered.push(TvfParameter::Scalar(expr.clone())),
                    TvfParam::Context { cx, compose1 } => {
                        rendered.push(TvfParameter::Query(render_block(t, *cx, *compose1)?));
                    }
                    TvfParam::Sort { key, order } => {
                        let key = match key {
                            SortKeyParam::Scalar(expr) => SortKey::Scalar(expr.clone()),
                            SortKeyParam::Context(cx) => {
                                SortKey::Query(render_block(t, *cx, true)?)
                            }
                        };
                        rendered.push(TvfParameter::Sort(SortRule { key, order: *order }));
                    }
                    TvfParam::Repeat(spec) => rendered.extend(render_repeat(t, spec)?),
                }
            }
            Ok(TableReference::Tvf(TvfCall {
                function: *function,
                params: rendered,
                alias: t.var(*var).alias.clone(),
            }))
        }
    }
}

/// A projected property resolves to a column when the variable can supply
/// it: element variables always can (the store materializes properties),
/// derived variables only when the property was populated into them.
/// Everything else falls back to a null literal placeholder.
fn resolve_property(t: &Translation, var: VarId, property: &str) -> ScalarExpression {
    let variable = t.var(var);
    match variable.kind {
        VariableKind::Vertex | VariableKind::Edge => variable.projection(property),
        _ if variable.properties.contains(property) => variable.projection(property),
        _ => ScalarExpression::Null,
    }
}

fn trivially_true() -> BooleanExpression {
    BooleanExpression::Comparison {
        left: ScalarExpression::Literal(Value::Int64(0)),
        op: ComparisonOp::Eq,
        right: ScalarExpression::Literal(Value::Int64(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::context::MatchPath;
    use hodos_core::graph::Direction;

    #[test]
    fn test_select_list_follows_projection_order() {
        let mut t = Translation::new();
        let root = t.root();
        let v = t.new_var(VariableKind::Vertex);
        t.cx_mut(root).table_refs.push(TableRef::Vertices { var: v });
        t.set_pivot(root, v);
        t.populate(root, "name");
        t.populate(root, "age");

        let block = render_block(&t, root, false).unwrap();
        assert_eq!(block.output_columns(), vec![DEFAULT_COLUMN, "name", "age"]);
    }

    #[test]
    fn test_render_is_idempotent() {
        let mut t = Translation::new();
        let root = t.root();
        let v = t.new_var(VariableKind::Vertex);
        t.cx_mut(root).table_refs.push(TableRef::Vertices { var: v });
        t.set_pivot(root, v);
        let e = t.new_var(VariableKind::Edge);
        let w = t.new_var(VariableKind::Vertex);
        t.cx_mut(root).match_paths.push(MatchPath {
            source: v,
            edge: e,
            direction: Direction::Out,
            sink: Some(w),
        });
        t.set_pivot(root, w);
        t.populate(root, "name");

        let first = render_statement(&t, root).unwrap();
        let second = render_statement(&t, root).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_predicate_only_scope_renders_as_boolean_fragment() {
        let mut t = Translation::new();
        let root = t.root();
        let v = t.new_var(VariableKind::Vertex);
        t.set_pivot(root, v);
        let child = t.sub_context(root, v);
        let predicate = BooleanExpression::Comparison {
            left: t.var(v).projection("age"),
            op: ComparisonOp::Gt,
            right: ScalarExpression::Literal(Value::Int64(30)),
        };
        t.cx_mut(child).add_predicate(Some(predicate.clone()));

        assert_eq!(render_boolean(&t, child).unwrap(), predicate);
    }

    #[test]
    fn test_unpopulated_property_renders_null() {
        let mut t = Translation::new();
        let root = t.root();
        let scalar = t.new_var(VariableKind::Scalar);
        t.set_pivot(root, scalar);
        t.cx_mut(root).projected.insert("name".to_string());
        // Scalar pivot never materialized "name".
        let block = render_block(&t, root, false).unwrap();
        assert_eq!(block.select[1].expression, ScalarExpression::Null);
    }
}
