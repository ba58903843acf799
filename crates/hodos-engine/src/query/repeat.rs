//! Repeat lowering: the two-armed union and the column rewrite.
//!
//! A loop body is compiled exactly once, against the original input
//! variable. At render time it becomes two arms with identical select
//! shapes: the zero-iteration arm projects the original input straight
//! through under the loop-carried column names, and the iteration arm is
//! the body with every column reference to the original input rewritten
//! to the loop-carried alias. The rewrite deliberately skips
//! path-construction fragments, which must keep referencing the true
//! input so traversal histories accumulate across iterations. The
//! runtime's loop operator re-invokes the same compiled arms per
//! iteration; there is no per-iteration recompilation.

use hodos_common::Result;
use hodos_core::statement::{
    BooleanExpression, EmitCondition, RepeatCondition, ScalarExpression, SelectItem,
    SelectQueryBlock, SortKey, TvfParameter,
};

use super::context::{EmitSpec, RepeatSpec, Translation};
use super::renderer::render_block;

/// Renders a lowered `repeat` into its parameter list: zero arm,
/// iteration arm, then the loop bookkeeping.
pub fn render_repeat(t: &Translation, spec: &RepeatSpec) -> Result<Vec<TvfParameter>> {
    let input_alias = t.var(spec.input).alias.clone();
    let loop_alias = t.var(spec.loop_var).alias.clone();

    let mut iter_arm = render_block(t, spec.body, false)?;
    rewrite_block(&mut iter_arm, &input_alias, &loop_alias);

    // The zero arm aliases the original input onto the iteration arm's
    // column names, so both arms align column for column.
    let zero_arm = SelectQueryBlock {
        select: iter_arm
            .select
            .iter()
            .map(|item| {
                SelectItem::new(
                    ScalarExpression::column(&input_alias, &item.alias),
                    item.alias.clone(),
                )
            })
            .collect(),
        ..Default::default()
    };

    let until = match &spec.until {
        Some(cx) => {
            let mut block = render_block(t, *cx, true)?;
            rewrite_block(&mut block, &input_alias, &loop_alias);
            Some(block)
        }
        None => None,
    };
    let emit = match &spec.emit {
        Some(EmitSpec::Always) => Some(EmitCondition::Always),
        Some(EmitSpec::Filtered(cx)) => {
            let mut block = render_block(t, *cx, true)?;
            rewrite_block(&mut block, &input_alias, &loop_alias);
            Some(EmitCondition::Filtered(block))
        }
        None => None,
    };

    Ok(vec![
        TvfParameter::Query(zero_arm),
        TvfParameter::Query(iter_arm),
        TvfParameter::Repeat(Box::new(RepeatCondition {
            loop_alias,
            times: spec.times,
            until,
            until_before_body: spec.until_before_body,
            emit,
            emit_before_body: spec.emit_before_body,
        })),
    ])
}

/// Rewrites every column reference to `from` into `to`, recursing through
/// the whole block.
pub(crate) fn rewrite_block(block: &mut SelectQueryBlock, from: &str, to: &str) {
    for item in &mut block.select {
        rewrite_scalar(&mut item.expression, from, to);
    }
    for table in &mut block.from {
        if let hodos_core::statement::TableReference::Tvf(call) = table {
            for param in &mut call.params {
                match param {
                    TvfParameter::Scalar(expr) => rewrite_scalar(expr, from, to),
                    TvfParameter::Query(sub) => rewrite_block(sub, from, to),
                    TvfParameter::Repeat(condition) => {
                        if let Some(until) = &mut condition.until {
                            rewrite_block(until, from, to);
                        }
                        if let Some(EmitCondition::Filtered(emit)) = &mut condition.emit {
                            rewrite_block(emit, from, to);
                        }
                    }
                    TvfParameter::Sort(rule) => match &mut rule.key {
                        SortKey::Scalar(expr) => rewrite_scalar(expr, from, to),
                        SortKey::Query(sub) => rewrite_block(sub, from, to),
                    },
                }
            }
        }
    }
    for segment in &mut block.matches {
        rewrite_scalar(&mut segment.source, from, to);
    }
    if let Some(predicate) = &mut block.where_clause {
        rewrite_boolean(predicate, from, to);
    }
}

fn rewrite_scalar(expr: &mut ScalarExpression, from: &str, to: &str) {
    match expr {
        ScalarExpression::Column { table, .. } => {
            if table == from {
                *table = to.to_string();
            }
        }
        // Path fragments keep referencing the true input.
        ScalarExpression::Function { name, .. } if name == "path" => {}
        ScalarExpression::Function { args, .. } => {
            for arg in args {
                rewrite_scalar(arg, from, to);
            }
        }
        ScalarExpression::Subquery(block) => rewrite_block(block, from, to),
        ScalarExpression::Compose1(entries) => {
            for (_, entry) in entries {
                rewrite_scalar(entry, from, to);
            }
        }
        ScalarExpression::Literal(_) | ScalarExpression::Null => {}
    }
}

fn rewrite_boolean(expr: &mut BooleanExpression, from: &str, to: &str) {
    match expr {
        BooleanExpression::Comparison { left, right, .. } => {
            rewrite_scalar(left, from, to);
            rewrite_scalar(right, from, to);
        }
        BooleanExpression::And(a, b) | BooleanExpression::Or(a, b) => {
            rewrite_boolean(a, from, to);
            rewrite_boolean(b, from, to);
        }
        BooleanExpression::Not(inner) => rewrite_boolean(inner, from, to),
        BooleanExpression::Call { args, .. } => {
            for arg in args {
                rewrite_scalar(arg, from, to);
            }
        }
        BooleanExpression::Exists(block) => rewrite_block(block, from, to),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hodos_core::statement::ComparisonOp;
    use hodos_common::types::Value;

    #[test]
    fn test_rewrite_skips_path_fragments() {
        let mut expr = ScalarExpression::Function {
            name: "path".to_string(),
            args: vec![ScalarExpression::default_column("n0")],
        };
        rewrite_scalar(&mut expr, "n0", "r1");
        let ScalarExpression::Function { args, .. } = &expr else {
            panic!("rewrite changed the expression shape");
        };
        assert_eq!(args[0], ScalarExpression::default_column("n0"));

        let mut column = ScalarExpression::default_column("n0");
        rewrite_scalar(&mut column, "n0", "r1");
        assert_eq!(column, ScalarExpression::default_column("r1"));
    }

    #[test]
    fn test_rewrite_descends_into_predicates() {
        let mut predicate = BooleanExpression::Comparison {
            left: ScalarExpression::column("n0", "age"),
            op: ComparisonOp::Gt,
            right: ScalarExpression::Literal(Value::Int64(30)),
        };
        rewrite_boolean(&mut predicate, "n0", "r1");
        let BooleanExpression::Comparison { left, .. } = &predicate else {
            unreachable!();
        };
        assert_eq!(left, &ScalarExpression::column("r1", "age"));
    }
}
