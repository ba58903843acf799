//! The predicate algebra.
//!
//! Predicates are built through the factory functions (`eq`, `gt`,
//! `between`, `within`, ...), composed with `and`/`or`, and negated with
//! [`Predicate::not`], which is total over every tag: comparisons flip to
//! their inverse relation, ranges and sets flip to their complements, and
//! compounds follow De Morgan. Applying `not` twice returns the original
//! tag.
//!
//! A predicate only becomes a boolean expression when rendered against a
//! left-hand scalar, at which point range and set tags expand into
//! conjunctions and disjunctions of primitive comparisons. Boundary
//! inclusivity differs deliberately: `between(l, h)` is half-open
//! (`>= l AND < h`) while `inside(l, h)` is strict (`> l AND < h`).

use hodos_common::types::Value;
use hodos_core::statement::{BooleanExpression, ComparisonOp, ScalarExpression};

/// A comparison, range, set, or compound predicate over the pivot value.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Equal to the value.
    Eq(Value),
    /// Not equal to the value.
    Neq(Value),
    /// Strictly less than the value.
    Lt(Value),
    /// Less than or equal to the value.
    Lte(Value),
    /// Strictly greater than the value.
    Gt(Value),
    /// Greater than or equal to the value.
    Gte(Value),
    /// Strictly between the bounds: `> low AND < high`.
    Inside(Value, Value),
    /// Outside the bounds: `< low OR > high`.
    Outside(Value, Value),
    /// Half-open interval: `>= low AND < high`.
    Between(Value, Value),
    /// Complement of [`Between`](Self::Between): `< low OR >= high`.
    /// Produced only by negation; there is no factory for it.
    NotBetween(Value, Value),
    /// Equal to one of the values.
    Within(Vec<Value>),
    /// Equal to none of the values.
    Without(Vec<Value>),
    /// Equal to one of the labeled steps' values. Renders as a single
    /// set-membership call rather than an expanded equality chain.
    WithinTags(Vec<ScalarExpression>),
    /// Equal to none of the labeled steps' values.
    WithoutTags(Vec<ScalarExpression>),
    /// Both predicates hold.
    And(Box<Predicate>, Box<Predicate>),
    /// Either predicate holds.
    Or(Box<Predicate>, Box<Predicate>),
}

/// Equality predicate.
pub fn eq(value: impl Into<Value>) -> Predicate {
    Predicate::Eq(value.into())
}

/// Inequality predicate.
pub fn neq(value: impl Into<Value>) -> Predicate {
    Predicate::Neq(value.into())
}

/// Strict less-than predicate.
pub fn lt(value: impl Into<Value>) -> Predicate {
    Predicate::Lt(value.into())
}

/// Less-than-or-equal predicate.
pub fn lte(value: impl Into<Value>) -> Predicate {
    Predicate::Lte(value.into())
}

/// Strict greater-than predicate.
pub fn gt(value: impl Into<Value>) -> Predicate {
    Predicate::Gt(value.into())
}

/// Greater-than-or-equal predicate.
pub fn gte(value: impl Into<Value>) -> Predicate {
    Predicate::Gte(value.into())
}

/// Strict interval predicate: `> low AND < high`.
pub fn inside(low: impl Into<Value>, high: impl Into<Value>) -> Predicate {
    Predicate::Inside(low.into(), high.into())
}

/// Complement of [`inside`]: `< low OR > high`.
pub fn outside(low: impl Into<Value>, high: impl Into<Value>) -> Predicate {
    Predicate::Outside(low.into(), high.into())
}

/// Half-open interval predicate: `>= low AND < high`.
pub fn between(low: impl Into<Value>, high: impl Into<Value>) -> Predicate {
    Predicate::Between(low.into(), high.into())
}

/// Set-membership predicate.
pub fn within<I, V>(values: I) -> Predicate
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    Predicate::Within(values.into_iter().map(Into::into).collect())
}

/// Set-exclusion predicate.
pub fn without<I, V>(values: I) -> Predicate
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    Predicate::Without(values.into_iter().map(Into::into).collect())
}

impl Predicate {
    /// Conjoins with another predicate.
    #[must_use]
    pub fn and(self, other: Predicate) -> Predicate {
        Predicate::And(Box::new(self), Box::new(other))
    }

    /// Disjoins with another predicate.
    #[must_use]
    pub fn or(self, other: Predicate) -> Predicate {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    /// Structure-preserving negation, total over every tag.
    #[must_use]
    pub fn not(self) -> Predicate {
        match self {
            Predicate::Eq(v) => Predicate::Neq(v),
            Predicate::Neq(v) => Predicate::Eq(v),
            Predicate::Lt(v) => Predicate::Gte(v),
            Predicate::Lte(v) => Predicate::Gt(v),
            Predicate::Gt(v) => Predicate::Lte(v),
            Predicate::Gte(v) => Predicate::Lt(v),
            Predicate::Inside(l, h) => Predicate::Outside(l, h),
            Predicate::Outside(l, h) => Predicate::Inside(l, h),
            Predicate::Between(l, h) => Predicate::NotBetween(l, h),
            Predicate::NotBetween(l, h) => Predicate::Between(l, h),
            Predicate::Within(vs) => Predicate::Without(vs),
            Predicate::Without(vs) => Predicate::Within(vs),
            Predicate::WithinTags(ts) => Predicate::WithoutTags(ts),
            Predicate::WithoutTags(ts) => Predicate::WithinTags(ts),
            Predicate::And(a, b) => Predicate::Or(Box::new(a.not()), Box::new(b.not())),
            Predicate::Or(a, b) => Predicate::And(Box::new(a.not()), Box::new(b.not())),
        }
    }

    /// Renders the predicate against a left-hand scalar expression.
    #[must_use]
    pub fn render(&self, left: &ScalarExpression) -> BooleanExpression {
        let cmp = |op: ComparisonOp, value: &Value| BooleanExpression::Comparison {
            left: left.clone(),
            op,
            right: ScalarExpression::Literal(value.clone()),
        };
        match self {
            Predicate::Eq(v) => cmp(ComparisonOp::Eq, v),
            Predicate::Neq(v) => cmp(ComparisonOp::Neq, v),
            Predicate::Lt(v) => cmp(ComparisonOp::Lt, v),
            Predicate::Lte(v) => cmp(ComparisonOp::Lte, v),
            Predicate::Gt(v) => cmp(ComparisonOp::Gt, v),
            Predicate::Gte(v) => cmp(ComparisonOp::Gte, v),
            Predicate::Inside(l, h) => cmp(ComparisonOp::Gt, l).and(cmp(ComparisonOp::Lt, h)),
            Predicate::Outside(l, h) => cmp(ComparisonOp::Lt, l).or(cmp(ComparisonOp::Gt, h)),
            Predicate::Between(l, h) => cmp(ComparisonOp::Gte, l).and(cmp(ComparisonOp::Lt, h)),
            Predicate::NotBetween(l, h) => cmp(ComparisonOp::Lt, l).or(cmp(ComparisonOp::Gte, h)),
            Predicate::Within(values) => values
                .iter()
                .map(|v| cmp(ComparisonOp::Eq, v))
                .reduce(BooleanExpression::or)
                .unwrap_or_else(always_false),
            Predicate::Without(values) => values
                .iter()
                .map(|v| cmp(ComparisonOp::Neq, v))
                .reduce(BooleanExpression::and)
                .unwrap_or_else(always_true),
            Predicate::WithinTags(tags) => membership_call("within", left, tags),
            Predicate::WithoutTags(tags) => membership_call("without", left, tags),
            Predicate::And(a, b) => a.render(left).and(b.render(left)),
            Predicate::Or(a, b) => a.render(left).or(b.render(left)),
        }
    }
}

fn membership_call(
    function: &str,
    left: &ScalarExpression,
    tags: &[ScalarExpression],
) -> BooleanExpression {
    let mut args = Vec::with_capacity(tags.len() + 1);
    args.push(left.clone());
    args.extend(tags.iter().cloned());
    BooleanExpression::Call {
        function: function.to_string(),
        args,
    }
}

/// `within([])` matches nothing.
fn always_false() -> BooleanExpression {
    BooleanExpression::Comparison {
        left: ScalarExpression::Literal(Value::Int64(0)),
        op: ComparisonOp::Eq,
        right: ScalarExpression::Literal(Value::Int64(1)),
    }
}

/// `without([])` excludes nothing.
fn always_true() -> BooleanExpression {
    BooleanExpression::Comparison {
        left: ScalarExpression::Literal(Value::Int64(0)),
        op: ComparisonOp::Eq,
        right: ScalarExpression::Literal(Value::Int64(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn left() -> ScalarExpression {
        ScalarExpression::column("n0", "age")
    }

    #[test]
    fn test_between_is_half_open() {
        let rendered = between(10i64, 20i64).render(&left());
        let expected = BooleanExpression::Comparison {
            left: left(),
            op: ComparisonOp::Gte,
            right: ScalarExpression::Literal(Value::Int64(10)),
        }
        .and(BooleanExpression::Comparison {
            left: left(),
            op: ComparisonOp::Lt,
            right: ScalarExpression::Literal(Value::Int64(20)),
        });
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_inside_is_strict() {
        let rendered = inside(10i64, 20i64).render(&left());
        let expected = BooleanExpression::Comparison {
            left: left(),
            op: ComparisonOp::Gt,
            right: ScalarExpression::Literal(Value::Int64(10)),
        }
        .and(BooleanExpression::Comparison {
            left: left(),
            op: ComparisonOp::Lt,
            right: ScalarExpression::Literal(Value::Int64(20)),
        });
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_within_expands_to_or_chain() {
        let rendered = within([1i64, 2i64]).render(&left());
        let eq_n = |n: i64| BooleanExpression::Comparison {
            left: left(),
            op: ComparisonOp::Eq,
            right: ScalarExpression::Literal(Value::Int64(n)),
        };
        assert_eq!(rendered, eq_n(1).or(eq_n(2)));
    }

    #[test]
    fn test_de_morgan() {
        let p = inside(1i64, 5i64).and(eq("x"));
        assert_eq!(
            p.clone().not(),
            Predicate::Or(
                Box::new(Predicate::Outside(Value::Int64(1), Value::Int64(5))),
                Box::new(Predicate::Neq(Value::from("x"))),
            )
        );
        assert_eq!(p.clone().not().not(), p);
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::Int64),
            any::<bool>().prop_map(Value::Bool),
            "[a-z]{0,8}".prop_map(Value::from),
        ]
    }

    fn arb_predicate() -> impl Strategy<Value = Predicate> {
        let leaf = prop_oneof![
            arb_value().prop_map(Predicate::Eq),
            arb_value().prop_map(Predicate::Neq),
            arb_value().prop_map(Predicate::Lt),
            arb_value().prop_map(Predicate::Gte),
            (arb_value(), arb_value()).prop_map(|(l, h)| Predicate::Inside(l, h)),
            (arb_value(), arb_value()).prop_map(|(l, h)| Predicate::Between(l, h)),
            proptest::collection::vec(arb_value(), 0..4).prop_map(Predicate::Within),
        ];
        leaf.prop_recursive(3, 16, 2, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone())
                    .prop_map(|(a, b)| Predicate::And(Box::new(a), Box::new(b))),
                (inner.clone(), inner).prop_map(|(a, b)| Predicate::Or(Box::new(a), Box::new(b))),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_not_is_an_involution(p in arb_predicate()) {
            prop_assert_eq!(p.clone().not().not(), p);
        }
    }
}
