//! Relational statement tree.
//!
//! The engine lowers a traversal into a tree of [`SelectQueryBlock`]s. A
//! block selects scalar expressions from a list of table references (base
//! vertex tables and table-valued function calls), connects them with match
//! paths, and filters on a boolean predicate tree. [`StatementTree`] wraps
//! the root block of one translated traversal.

use crate::graph::Direction;
use hodos_common::types::Value;

/// Column alias that carries a table reference's primary output.
pub const DEFAULT_COLUMN: &str = "_value";

/// A scalar-valued expression inside a select list or predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarExpression {
    /// A column of a table reference, `table.column`.
    Column {
        /// Alias of the referenced table.
        table: String,
        /// Column name on that table.
        column: String,
    },
    /// A literal value.
    Literal(Value),
    /// The null literal.
    Null,
    /// A scalar function call, e.g. `path(a, b, c)`.
    Function {
        /// Function name.
        name: String,
        /// Argument expressions.
        args: Vec<ScalarExpression>,
    },
    /// A correlated scalar subquery yielding its first row's default column.
    Subquery(Box<SelectQueryBlock>),
    /// A labeled composite of scalar entries, rendered as one map value.
    Compose1(Vec<(String, ScalarExpression)>),
}

impl ScalarExpression {
    /// Shorthand for a column reference.
    #[must_use]
    pub fn column(table: impl Into<String>, column: impl Into<String>) -> Self {
        ScalarExpression::Column {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Shorthand for a table's default column.
    #[must_use]
    pub fn default_column(table: impl Into<String>) -> Self {
        ScalarExpression::column(table, DEFAULT_COLUMN)
    }
}

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    /// `=`
    Eq,
    /// `<>`
    Neq,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
}

impl ComparisonOp {
    /// The operator testing the opposite outcome.
    #[must_use]
    pub const fn negated(self) -> Self {
        match self {
            ComparisonOp::Eq => ComparisonOp::Neq,
            ComparisonOp::Neq => ComparisonOp::Eq,
            ComparisonOp::Lt => ComparisonOp::Gte,
            ComparisonOp::Lte => ComparisonOp::Gt,
            ComparisonOp::Gt => ComparisonOp::Lte,
            ComparisonOp::Gte => ComparisonOp::Lt,
        }
    }
}

impl std::fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Neq => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::Lte => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Gte => ">=",
        };
        write!(f, "{s}")
    }
}

/// A boolean predicate tree attached to a query block.
#[derive(Debug, Clone, PartialEq)]
pub enum BooleanExpression {
    /// `left op right`.
    Comparison {
        /// Left operand.
        left: ScalarExpression,
        /// Comparison operator.
        op: ComparisonOp,
        /// Right operand.
        right: ScalarExpression,
    },
    /// Conjunction.
    And(Box<BooleanExpression>, Box<BooleanExpression>),
    /// Disjunction.
    Or(Box<BooleanExpression>, Box<BooleanExpression>),
    /// Negation.
    Not(Box<BooleanExpression>),
    /// A boolean-valued function call.
    Call {
        /// Function name.
        function: String,
        /// Argument expressions.
        args: Vec<ScalarExpression>,
    },
    /// `EXISTS (subquery)` -- true when the block yields at least one row.
    Exists(Box<SelectQueryBlock>),
}

impl BooleanExpression {
    /// Conjoins two predicates.
    #[must_use]
    pub fn and(self, other: BooleanExpression) -> Self {
        BooleanExpression::And(Box::new(self), Box::new(other))
    }

    /// Disjoins two predicates.
    #[must_use]
    pub fn or(self, other: BooleanExpression) -> Self {
        BooleanExpression::Or(Box::new(self), Box::new(other))
    }
}

/// One hop of a match path: `source -edge-> sink`.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchPathSegment {
    /// Source vertex expression.
    pub source: ScalarExpression,
    /// Alias bound to the traversed edge.
    pub edge_alias: String,
    /// Traversal direction from the source.
    pub direction: Direction,
    /// Alias bound to the reached vertex, when the hop lands on a table.
    pub sink_alias: Option<String>,
}

/// Table-valued functions the renderer emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TvfName {
    /// Concatenation of sub-block outputs.
    Union,
    /// First non-empty sub-block.
    Coalesce,
    /// Predicate-routed branch.
    Choose,
    /// Iterated sub-block with loop bookkeeping.
    Repeat,
    /// Sub-block that falls back to its input when empty.
    Optional,
    /// Sub-block applied once per input row.
    Local,
    /// Projection of labeled path steps.
    Select,
    /// Duplicate elimination over a key tuple.
    Dedup,
    /// Key/value grouping.
    Group,
    /// Grouping that counts per key.
    GroupCount,
    /// Sorted output.
    Order,
    /// Bounded sample of the input.
    Sample,
    /// Materialized traversal history.
    Path,
    /// Rolls the input stream into one list.
    Fold,
    /// Flattens list rows into elements.
    Unfold,
    /// Row count aggregate.
    Count,
    /// Sum aggregate.
    Sum,
    /// Minimum aggregate.
    Min,
    /// Maximum aggregate.
    Max,
    /// Mean aggregate.
    Mean,
    /// Property multi-projection.
    Values,
    /// Positional row slice.
    Range,
    /// Positional row prefix.
    Limit,
    /// Constant-producing source.
    Constant,
    /// Lazy side-effect store.
    Store,
    /// Eager side-effect store.
    Aggregate,
    /// Reads a named side-effect collection.
    Cap,
    /// Labeled sub-block projection into a map.
    Project,
}

impl TvfName {
    /// The function's rendered name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TvfName::Union => "union",
            TvfName::Coalesce => "coalesce",
            TvfName::Choose => "choose",
            TvfName::Repeat => "repeat",
            TvfName::Optional => "optional",
            TvfName::Local => "local",
            TvfName::Select => "select",
            TvfName::Dedup => "dedup",
            TvfName::Group => "group",
            TvfName::GroupCount => "group_count",
            TvfName::Order => "order",
            TvfName::Sample => "sample",
            TvfName::Path => "path",
            TvfName::Fold => "fold",
            TvfName::Unfold => "unfold",
            TvfName::Count => "count",
            TvfName::Sum => "sum",
            TvfName::Min => "min",
            TvfName::Max => "max",
            TvfName::Mean => "mean",
            TvfName::Values => "values",
            TvfName::Range => "range",
            TvfName::Limit => "limit",
            TvfName::Constant => "constant",
            TvfName::Store => "store",
            TvfName::Aggregate => "aggregate",
            TvfName::Cap => "cap",
            TvfName::Project => "project",
        }
    }
}

/// How often the loop emits intermediate rows.
#[derive(Debug, Clone, PartialEq)]
pub enum EmitCondition {
    /// Every iteration's rows are emitted.
    Always,
    /// Rows passing the filter block are emitted.
    Filtered(SelectQueryBlock),
}

/// Loop bookkeeping carried by a repeat call.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatCondition {
    /// Alias the loop body reads its carried row through.
    pub loop_alias: String,
    /// Fixed iteration count, when `times` bounded the loop.
    pub times: Option<i64>,
    /// Termination filter, when `until` bounded the loop.
    pub until: Option<SelectQueryBlock>,
    /// True when `until` preceded `repeat`, making the check run before
    /// each iteration instead of after.
    pub until_before_body: bool,
    /// Emit behavior, when present.
    pub emit: Option<EmitCondition>,
    /// True when `emit` preceded `repeat`.
    pub emit_before_body: bool,
}

/// Sort direction for one order rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
    /// Deterministic pseudo-random permutation.
    Shuffle,
}

/// The key an order rule sorts by.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    /// A scalar expression over the input row.
    Scalar(ScalarExpression),
    /// A correlated sub-block evaluated per row.
    Query(SelectQueryBlock),
}

/// One `by(...)` rule of an order call.
#[derive(Debug, Clone, PartialEq)]
pub struct SortRule {
    /// Sort key.
    pub key: SortKey,
    /// Sort direction.
    pub order: SortOrder,
}

/// A parameter of a table-valued function call.
#[derive(Debug, Clone, PartialEq)]
pub enum TvfParameter {
    /// A scalar argument.
    Scalar(ScalarExpression),
    /// A sub-block argument.
    Query(SelectQueryBlock),
    /// Loop bookkeeping for a repeat call.
    Repeat(Box<RepeatCondition>),
    /// An order rule.
    Sort(SortRule),
}

/// A cross-applied table-valued function call.
#[derive(Debug, Clone, PartialEq)]
pub struct TvfCall {
    /// Which function.
    pub function: TvfName,
    /// Its parameters, in call order.
    pub params: Vec<TvfParameter>,
    /// Alias the call's output table is referenced by.
    pub alias: String,
}

/// An entry in a block's from-list.
#[derive(Debug, Clone, PartialEq)]
pub enum TableReference {
    /// The base vertex table.
    Vertices {
        /// Alias the table is referenced by.
        alias: String,
    },
    /// A table-valued function call, cross-applied to what precedes it.
    Tvf(TvfCall),
}

impl TableReference {
    /// The alias this reference binds.
    #[must_use]
    pub fn alias(&self) -> &str {
        match self {
            TableReference::Vertices { alias } => alias,
            TableReference::Tvf(call) => &call.alias,
        }
    }
}

/// One entry of a select list.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    /// The projected expression.
    pub expression: ScalarExpression,
    /// Output column name.
    pub alias: String,
}

impl SelectItem {
    /// Creates a select item.
    #[must_use]
    pub fn new(expression: ScalarExpression, alias: impl Into<String>) -> Self {
        Self {
            expression,
            alias: alias.into(),
        }
    }
}

/// One select query block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectQueryBlock {
    /// Select list.
    pub select: Vec<SelectItem>,
    /// From-list: base tables and cross-applied function calls, in order.
    pub from: Vec<TableReference>,
    /// Match paths connecting from-list entries.
    pub matches: Vec<MatchPathSegment>,
    /// Where-clause predicate, when present.
    pub where_clause: Option<BooleanExpression>,
}

impl SelectQueryBlock {
    /// The output column names, in select-list order.
    #[must_use]
    pub fn output_columns(&self) -> Vec<&str> {
        self.select.iter().map(|item| item.alias.as_str()).collect()
    }
}

/// The root of one translated traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementTree {
    /// Root query block.
    pub root: SelectQueryBlock,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_negation_is_involutive() {
        for op in [
            ComparisonOp::Eq,
            ComparisonOp::Neq,
            ComparisonOp::Lt,
            ComparisonOp::Lte,
            ComparisonOp::Gt,
            ComparisonOp::Gte,
        ] {
            assert_eq!(op.negated().negated(), op);
        }
    }

    #[test]
    fn test_output_columns() {
        let block = SelectQueryBlock {
            select: vec![
                SelectItem::new(ScalarExpression::default_column("n0"), DEFAULT_COLUMN),
                SelectItem::new(ScalarExpression::column("n0", "name"), "name"),
            ],
            ..Default::default()
        };
        assert_eq!(block.output_columns(), vec![DEFAULT_COLUMN, "name"]);
    }
}
