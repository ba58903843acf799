//! The traversal builder and the per-step lowering rules.
//!
//! [`GraphTraversal`] accumulates a chain of [`TraversalStep`]s; nothing
//! is compiled until [`GraphTraversal::to_statement`] walks the chain and
//! lowers each step against the current scope. Usage errors (an
//! `option()` with no `choose()` to attach to, a `by()` with nothing to
//! modulate, duplicate option keys) are raised while the chain is being
//! built; everything else surfaces during lowering.

use hodos_common::types::Value;
use hodos_common::{Error, Result};
use hodos_core::statement::{ScalarExpression, SortOrder, StatementTree, TvfName};
use smallvec::SmallVec;
use tracing::debug;

use super::context::{
    CxId, EmitSpec, MatchPath, RepeatSpec, SortKeyParam, TableRef, Translation, TvfParam, VarId,
};
use super::predicate::{self, Predicate};
use super::renderer::{render_boolean, render_statement};
use super::variable::{VariableKind, VariableRole};
use hodos_core::graph::Direction;

/// A `by()` modulation payload.
#[derive(Debug, Clone, PartialEq)]
pub enum By {
    /// Modulate by a property key.
    Key(String),
    /// Modulate by a sub-traversal.
    Traversal(GraphTraversal),
}

/// One ordering rule of an `order()` step.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRule {
    /// What to sort by; `None` sorts by the pivot itself.
    pub target: Option<By>,
    /// Sort direction.
    pub order: SortOrder,
}

/// The two shapes of `choose`.
#[derive(Debug, Clone, PartialEq)]
pub enum ChooseOptions {
    /// Predicate-routed true/false branches.
    Binary {
        /// Taken when the chooser yields rows.
        true_branch: GraphTraversal,
        /// Taken otherwise.
        false_branch: GraphTraversal,
    },
    /// Value-routed option branches filled in by `option()`.
    Keyed {
        /// `(key, branch)` pairs in declaration order.
        options: Vec<(Value, GraphTraversal)>,
        /// The branch taken when no key matches.
        none: Option<GraphTraversal>,
    },
}

/// A logical repeat node. `times`/`until`/`emit` arriving before
/// `repeat()` create a placeholder (no body yet) that the later
/// `repeat()` completes, so both orderings build the same node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RepeatNode {
    /// The loop body; `None` while the node is a placeholder.
    pub body: Option<GraphTraversal>,
    /// Fixed iteration count.
    pub times: Option<i64>,
    /// Termination traversal.
    pub until: Option<GraphTraversal>,
    /// True when `until` arrived before the body.
    pub until_before_body: bool,
    /// Emit marker: `Some(None)` emits everything, `Some(Some(t))`
    /// filters through `t`.
    pub emit: Option<Option<GraphTraversal>>,
    /// True when `emit` arrived before the body.
    pub emit_before_body: bool,
}

/// One step of the fluent chain.
#[derive(Debug, Clone, PartialEq)]
pub enum TraversalStep {
    /// `V()`, optionally restricted to ids.
    V {
        /// Vertex ids to restrict to; empty scans all.
        ids: Vec<i64>,
    },
    /// `out(labels...)`.
    Out {
        /// Edge labels to follow; empty follows all.
        labels: Vec<String>,
    },
    /// `in(labels...)`.
    In {
        /// Edge labels to follow.
        labels: Vec<String>,
    },
    /// `both(labels...)`.
    Both {
        /// Edge labels to follow.
        labels: Vec<String>,
    },
    /// `outE(labels...)`.
    OutE {
        /// Edge labels to follow.
        labels: Vec<String>,
    },
    /// `inE(labels...)`.
    InE {
        /// Edge labels to follow.
        labels: Vec<String>,
    },
    /// `bothE(labels...)`.
    BothE {
        /// Edge labels to follow.
        labels: Vec<String>,
    },
    /// `outV()`.
    OutV,
    /// `inV()`.
    InV,
    /// `bothV()`.
    BothV,
    /// `has(key, predicate)`.
    Has {
        /// Property key.
        key: String,
        /// Predicate over the property value.
        predicate: Predicate,
    },
    /// `hasLabel(labels...)`.
    HasLabel {
        /// Accepted labels.
        labels: Vec<String>,
    },
    /// `hasId(ids...)`.
    HasId {
        /// Accepted ids.
        ids: Vec<i64>,
    },
    /// `hasNot(key)`.
    HasNot {
        /// Property key that must be absent.
        key: String,
    },
    /// `values(keys...)`.
    Values {
        /// Property keys to project.
        keys: Vec<String>,
    },
    /// `valueMap(keys...)`.
    ValueMap {
        /// Property keys to project into one map.
        keys: Vec<String>,
    },
    /// `id()`.
    Id,
    /// `label()`.
    Label,
    /// `constant(value)`.
    Constant {
        /// The constant.
        value: Value,
    },
    /// `count()`.
    Count,
    /// `sum()`.
    Sum,
    /// `min()`.
    Min,
    /// `max()`.
    Max,
    /// `mean()`.
    Mean,
    /// `fold()`.
    Fold,
    /// `unfold()`.
    Unfold,
    /// `limit(n)`.
    Limit {
        /// Row cap.
        count: i64,
    },
    /// `range(low, high)`; high `-1` is unbounded.
    Range {
        /// First kept row.
        low: i64,
        /// First dropped row.
        high: i64,
    },
    /// `dedup(labels...)`.
    Dedup {
        /// Labeled steps to key on; empty keys on the pivot.
        labels: Vec<String>,
    },
    /// `order()` with its `by()` rules.
    Order {
        /// Ordering rules in modulation order.
        rules: Vec<OrderRule>,
    },
    /// `sample(n)`.
    Sample {
        /// Sample size.
        amount: i64,
    },
    /// `as(label)`.
    As {
        /// The label to attach.
        label: String,
    },
    /// `select(keys...)` with its `by()` modulations.
    Select {
        /// Labels to select.
        keys: Vec<String>,
        /// Modulations, cycled over the keys.
        by: Vec<By>,
    },
    /// `path()`.
    Path,
    /// `where(traversal)`.
    Where {
        /// The truth-test traversal.
        traversal: GraphTraversal,
    },
    /// `where(predicate)` comparing the pivot against labeled steps.
    WhereCompare {
        /// Predicate whose string values name labeled steps.
        predicate: Predicate,
    },
    /// `and(traversals...)`.
    And {
        /// All must hold.
        traversals: Vec<GraphTraversal>,
    },
    /// `or(traversals...)`.
    Or {
        /// At least one must hold.
        traversals: Vec<GraphTraversal>,
    },
    /// `not(traversal)`.
    Not {
        /// Must not hold.
        traversal: GraphTraversal,
    },
    /// `union(traversals...)`.
    Union {
        /// The arms.
        branches: Vec<GraphTraversal>,
    },
    /// `coalesce(traversals...)`.
    Coalesce {
        /// The arms, first non-empty wins.
        branches: Vec<GraphTraversal>,
    },
    /// `choose(...)` in either shape.
    Choose {
        /// The routing traversal.
        condition: GraphTraversal,
        /// The branch table.
        options: ChooseOptions,
    },
    /// `match(traversals...)`.
    Match {
        /// The pattern traversals.
        traversals: Vec<GraphTraversal>,
    },
    /// `local(traversal)`.
    Local {
        /// Applied once per input row.
        traversal: GraphTraversal,
    },
    /// `optional(traversal)`.
    Optional {
        /// Falls back to the input when empty.
        traversal: GraphTraversal,
    },
    /// The coalesced repeat node.
    Repeat(RepeatNode),
    /// `group()` with `by()` key/value modulations.
    Group {
        /// Key modulation.
        key: Option<By>,
        /// Value modulation.
        value: Option<By>,
    },
    /// `groupCount()` with an optional `by()` key.
    GroupCount {
        /// Key modulation.
        key: Option<By>,
    },
    /// `store(name)`.
    Store {
        /// Collection name.
        name: String,
    },
    /// `aggregate(name)`.
    Aggregate {
        /// Collection name.
        name: String,
    },
    /// `cap(name)`.
    Cap {
        /// Collection name.
        name: String,
    },
    /// `project(names...)` with `by()` sub-traversals.
    Project {
        /// Output entry names.
        names: Vec<String>,
        /// Modulations, cycled over the names.
        by: Vec<By>,
    },
}

/// The fluent chain handle. Every method appends a step (or completes a
/// pending one) and returns the chain for further calls.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GraphTraversal {
    steps: Vec<TraversalStep>,
}

fn strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

impl GraphTraversal {
    /// An empty chain, for anonymous sub-traversals.
    #[must_use]
    pub fn start() -> Self {
        Self::default()
    }

    /// The steps accumulated so far.
    #[must_use]
    pub fn steps(&self) -> &[TraversalStep] {
        &self.steps
    }

    fn push(mut self, step: TraversalStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Starts from every vertex.
    #[must_use]
    pub fn v(self) -> Self {
        self.push(TraversalStep::V { ids: Vec::new() })
    }

    /// Starts from the given vertex ids.
    #[must_use]
    pub fn v_ids(self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.push(TraversalStep::V {
            ids: ids.into_iter().collect(),
        })
    }

    /// Follows outgoing edges to their heads.
    #[must_use]
    pub fn out<I, S>(self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(TraversalStep::Out {
            labels: strings(labels),
        })
    }

    /// Follows incoming edges to their tails.
    #[must_use]
    pub fn in_<I, S>(self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(TraversalStep::In {
            labels: strings(labels),
        })
    }

    /// Follows edges in both directions.
    #[must_use]
    pub fn both<I, S>(self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(TraversalStep::Both {
            labels: strings(labels),
        })
    }

    /// Moves to outgoing edges.
    #[must_use]
    pub fn out_e<I, S>(self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(TraversalStep::OutE {
            labels: strings(labels),
        })
    }

    /// Moves to incoming edges.
    #[must_use]
    pub fn in_e<I, S>(self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(TraversalStep::InE {
            labels: strings(labels),
        })
    }

    /// Moves to incident edges in both directions.
    #[must_use]
    pub fn both_e<I, S>(self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(TraversalStep::BothE {
            labels: strings(labels),
        })
    }

    /// Moves from an edge to its tail vertex.
    #[must_use]
    pub fn out_v(self) -> Self {
        self.push(TraversalStep::OutV)
    }

    /// Moves from an edge to its head vertex.
    #[must_use]
    pub fn in_v(self) -> Self {
        self.push(TraversalStep::InV)
    }

    /// Moves from an edge to both endpoints.
    #[must_use]
    pub fn both_v(self) -> Self {
        self.push(TraversalStep::BothV)
    }

    /// Filters on a property predicate.
    #[must_use]
    pub fn has(self, key: impl Into<String>, predicate: Predicate) -> Self {
        self.push(TraversalStep::Has {
            key: key.into(),
            predicate,
        })
    }

    /// Filters on property equality.
    #[must_use]
    pub fn has_value(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.has(key, predicate::eq(value))
    }

    /// Filters on the element label.
    #[must_use]
    pub fn has_label<I, S>(self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(TraversalStep::HasLabel {
            labels: strings(labels),
        })
    }

    /// Filters on the element id.
    #[must_use]
    pub fn has_id(self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.push(TraversalStep::HasId {
            ids: ids.into_iter().collect(),
        })
    }

    /// Keeps elements lacking the property.
    #[must_use]
    pub fn has_not(self, key: impl Into<String>) -> Self {
        self.push(TraversalStep::HasNot { key: key.into() })
    }

    /// Projects property values, one row per present property.
    #[must_use]
    pub fn values<I, S>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(TraversalStep::Values {
            keys: strings(keys),
        })
    }

    /// Projects the given properties into one map per element.
    #[must_use]
    pub fn value_map<I, S>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(TraversalStep::ValueMap {
            keys: strings(keys),
        })
    }

    /// Projects the element id.
    #[must_use]
    pub fn id(self) -> Self {
        self.push(TraversalStep::Id)
    }

    /// Projects the element label.
    #[must_use]
    pub fn label(self) -> Self {
        self.push(TraversalStep::Label)
    }

    /// Replaces the pivot with a constant.
    #[must_use]
    pub fn constant(self, value: impl Into<Value>) -> Self {
        self.push(TraversalStep::Constant {
            value: value.into(),
        })
    }

    /// Counts the rows.
    #[must_use]
    pub fn count(self) -> Self {
        self.push(TraversalStep::Count)
    }

    /// Sums the pivot values.
    #[must_use]
    pub fn sum(self) -> Self {
        self.push(TraversalStep::Sum)
    }

    /// Minimum of the pivot values.
    #[must_use]
    pub fn min(self) -> Self {
        self.push(TraversalStep::Min)
    }

    /// Maximum of the pivot values.
    #[must_use]
    pub fn max(self) -> Self {
        self.push(TraversalStep::Max)
    }

    /// Mean of the pivot values.
    #[must_use]
    pub fn mean(self) -> Self {
        self.push(TraversalStep::Mean)
    }

    /// Rolls the stream into one list.
    #[must_use]
    pub fn fold(self) -> Self {
        self.push(TraversalStep::Fold)
    }

    /// Flattens list pivots into elements.
    #[must_use]
    pub fn unfold(self) -> Self {
        self.push(TraversalStep::Unfold)
    }

    /// Keeps the first `count` rows.
    #[must_use]
    pub fn limit(self, count: i64) -> Self {
        self.push(TraversalStep::Limit { count })
    }

    /// Keeps rows with positions in `[low, high)`; `-1` is unbounded.
    #[must_use]
    pub fn range(self, low: i64, high: i64) -> Self {
        self.push(TraversalStep::Range { low, high })
    }

    /// Removes duplicate pivots.
    #[must_use]
    pub fn dedup(self) -> Self {
        self.push(TraversalStep::Dedup { labels: Vec::new() })
    }

    /// Removes rows duplicating the labeled steps' value tuple.
    #[must_use]
    pub fn dedup_by<I, S>(self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(TraversalStep::Dedup {
            labels: strings(labels),
        })
    }

    /// Orders the stream; direction and keys attach through `by()`.
    #[must_use]
    pub fn order(self) -> Self {
        self.push(TraversalStep::Order { rules: Vec::new() })
    }

    /// Keeps a deterministic pseudo-random sample of `amount` rows.
    #[must_use]
    pub fn sample(self, amount: i64) -> Self {
        self.push(TraversalStep::Sample { amount })
    }

    /// Labels the current pivot.
    #[must_use]
    pub fn as_(self, label: impl Into<String>) -> Self {
        self.push(TraversalStep::As {
            label: label.into(),
        })
    }

    /// Selects previously labeled steps.
    #[must_use]
    pub fn select<I, S>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(TraversalStep::Select {
            keys: strings(keys),
            by: Vec::new(),
        })
    }

    /// Projects the traversal history.
    #[must_use]
    pub fn path(self) -> Self {
        self.push(TraversalStep::Path)
    }

    /// Filters rows for which the sub-traversal yields something.
    #[must_use]
    pub fn where_(self, traversal: GraphTraversal) -> Self {
        self.push(TraversalStep::Where { traversal })
    }

    /// Filters by comparing the pivot against labeled steps.
    #[must_use]
    pub fn where_compare(self, predicate: Predicate) -> Self {
        self.push(TraversalStep::WhereCompare { predicate })
    }

    /// Keeps rows satisfying every sub-traversal.
    #[must_use]
    pub fn and_(self, traversals: impl IntoIterator<Item = GraphTraversal>) -> Self {
        self.push(TraversalStep::And {
            traversals: traversals.into_iter().collect(),
        })
    }

    /// Keeps rows satisfying at least one sub-traversal.
    #[must_use]
    pub fn or_(self, traversals: impl IntoIterator<Item = GraphTraversal>) -> Self {
        self.push(TraversalStep::Or {
            traversals: traversals.into_iter().collect(),
        })
    }

    /// Keeps rows for which the sub-traversal yields nothing.
    #[must_use]
    pub fn not_(self, traversal: GraphTraversal) -> Self {
        self.push(TraversalStep::Not { traversal })
    }

    /// Concatenates the arms' outputs.
    #[must_use]
    pub fn union(self, branches: impl IntoIterator<Item = GraphTraversal>) -> Self {
        self.push(TraversalStep::Union {
            branches: branches.into_iter().collect(),
        })
    }

    /// Takes the first arm that yields rows.
    #[must_use]
    pub fn coalesce(self, branches: impl IntoIterator<Item = GraphTraversal>) -> Self {
        self.push(TraversalStep::Coalesce {
            branches: branches.into_iter().collect(),
        })
    }

    /// Predicate-routed branch: `true_branch` when `condition` yields
    /// rows, `false_branch` otherwise.
    #[must_use]
    pub fn choose(
        self,
        condition: GraphTraversal,
        true_branch: GraphTraversal,
        false_branch: GraphTraversal,
    ) -> Self {
        self.push(TraversalStep::Choose {
            condition,
            options: ChooseOptions::Binary {
                true_branch,
                false_branch,
            },
        })
    }

    /// Value-routed branch; fill the branch table with `option()`.
    #[must_use]
    pub fn choose_by(self, condition: GraphTraversal) -> Self {
        self.push(TraversalStep::Choose {
            condition,
            options: ChooseOptions::Keyed {
                options: Vec::new(),
                none: None,
            },
        })
    }

    /// Adds a branch to the preceding `choose_by`. Fails without one, or
    /// on a duplicate key.
    pub fn option(mut self, key: impl Into<Value>, branch: GraphTraversal) -> Result<Self> {
        let key = key.into();
        match self.steps.last_mut() {
            Some(TraversalStep::Choose {
                options: ChooseOptions::Keyed { options, .. },
                ..
            }) => {
                if options.iter().any(|(existing, _)| *existing == key) {
                    return Err(Error::syntax(format!(
                        "duplicate option key in choose(): {key}"
                    )));
                }
                options.push((key, branch));
                Ok(self)
            }
            _ => Err(Error::syntax("option() requires a preceding choose()")),
        }
    }

    /// Adds the fallback branch to the preceding `choose_by`.
    pub fn option_none(mut self, branch: GraphTraversal) -> Result<Self> {
        match self.steps.last_mut() {
            Some(TraversalStep::Choose {
                options: ChooseOptions::Keyed { none, .. },
                ..
            }) => {
                if none.is_some() {
                    return Err(Error::syntax("duplicate none branch in choose()"));
                }
                *none = Some(branch);
                Ok(self)
            }
            _ => Err(Error::syntax("option() requires a preceding choose()")),
        }
    }

    /// Solves a pattern of labeled traversals.
    #[must_use]
    pub fn match_(self, traversals: impl IntoIterator<Item = GraphTraversal>) -> Self {
        self.push(TraversalStep::Match {
            traversals: traversals.into_iter().collect(),
        })
    }

    /// Applies the sub-traversal once per input row.
    #[must_use]
    pub fn local(self, traversal: GraphTraversal) -> Self {
        self.push(TraversalStep::Local { traversal })
    }

    /// Applies the sub-traversal, falling back to the input when it
    /// yields nothing.
    #[must_use]
    pub fn optional(self, traversal: GraphTraversal) -> Self {
        self.push(TraversalStep::Optional { traversal })
    }

    fn repeat_node(&mut self) -> &mut RepeatNode {
        if !matches!(self.steps.last(), Some(TraversalStep::Repeat(_))) {
            self.steps.push(TraversalStep::Repeat(RepeatNode::default()));
        }
        match self.steps.last_mut() {
            Some(TraversalStep::Repeat(node)) => node,
            _ => unreachable!("a repeat node was just pushed"),
        }
    }

    /// Loops the body. Completes a pending node left by an earlier
    /// `times`/`until`/`emit`, so modifier order does not matter.
    #[must_use]
    pub fn repeat(mut self, body: GraphTraversal) -> Self {
        let node = self.repeat_node();
        if node.body.is_some() {
            // Two bodies mean two loops.
            self.steps.push(TraversalStep::Repeat(RepeatNode {
                body: Some(body),
                ..Default::default()
            }));
        } else {
            node.body = Some(body);
        }
        self
    }

    /// Bounds the loop to `n` iterations.
    #[must_use]
    pub fn times(mut self, n: i64) -> Self {
        self.repeat_node().times = Some(n);
        self
    }

    /// Ends the loop for rows the traversal accepts.
    #[must_use]
    pub fn until(mut self, traversal: GraphTraversal) -> Self {
        let node = self.repeat_node();
        node.until_before_body = node.body.is_none();
        node.until = Some(traversal);
        self
    }

    /// Emits every iteration's rows.
    #[must_use]
    pub fn emit(mut self) -> Self {
        let node = self.repeat_node();
        node.emit_before_body = node.body.is_none();
        node.emit = Some(None);
        self
    }

    /// Emits rows the traversal accepts.
    #[must_use]
    pub fn emit_if(mut self, traversal: GraphTraversal) -> Self {
        let node = self.repeat_node();
        node.emit_before_body = node.body.is_none();
        node.emit = Some(Some(traversal));
        self
    }

    /// Groups by key, values collected per key; modulate with `by()`.
    #[must_use]
    pub fn group(self) -> Self {
        self.push(TraversalStep::Group {
            key: None,
            value: None,
        })
    }

    /// Counts per group key; modulate with `by()`.
    #[must_use]
    pub fn group_count(self) -> Self {
        self.push(TraversalStep::GroupCount { key: None })
    }

    /// Lazily appends pivots to a named collection.
    #[must_use]
    pub fn store(self, name: impl Into<String>) -> Self {
        self.push(TraversalStep::Store { name: name.into() })
    }

    /// Eagerly appends pivots to a named collection.
    #[must_use]
    pub fn aggregate(self, name: impl Into<String>) -> Self {
        self.push(TraversalStep::Aggregate { name: name.into() })
    }

    /// Reads a named collection as the new pivot.
    #[must_use]
    pub fn cap(self, name: impl Into<String>) -> Self {
        self.push(TraversalStep::Cap { name: name.into() })
    }

    /// Projects named entries; each entry's value attaches through
    /// `by()`.
    #[must_use]
    pub fn project<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(TraversalStep::Project {
            names: strings(names),
            by: Vec::new(),
        })
    }

    /// Modulates the most recent step by a property key. Fails when the
    /// last step takes no modulation.
    pub fn by(self, key: impl Into<String>) -> Result<Self> {
        self.modulate(By::Key(key.into()), SortOrder::Asc)
    }

    /// Modulates the most recent step by a sub-traversal.
    pub fn by_traversal(self, traversal: GraphTraversal) -> Result<Self> {
        self.modulate(By::Traversal(traversal), SortOrder::Asc)
    }

    /// Adds a descending order rule on a property key.
    pub fn by_desc(self, key: impl Into<String>) -> Result<Self> {
        self.modulate_order(Some(By::Key(key.into())), SortOrder::Desc)
    }

    /// Adds an ascending order rule on the pivot itself.
    pub fn by_self(self) -> Result<Self> {
        self.modulate_order(None, SortOrder::Asc)
    }

    /// Adds a shuffle rule.
    pub fn by_shuffle(self) -> Result<Self> {
        self.modulate_order(None, SortOrder::Shuffle)
    }

    fn modulate(mut self, by: By, order: SortOrder) -> Result<Self> {
        match self.steps.last_mut() {
            Some(TraversalStep::Order { rules }) => {
                rules.push(OrderRule {
                    target: Some(by),
                    order,
                });
                Ok(self)
            }
            Some(
                TraversalStep::Select { by: slots, .. } | TraversalStep::Project { by: slots, .. },
            ) => {
                slots.push(by);
                Ok(self)
            }
            Some(TraversalStep::Group { key, value }) => {
                if key.is_none() {
                    *key = Some(by);
                } else if value.is_none() {
                    *value = Some(by);
                } else {
                    return Err(Error::syntax("group() takes at most two by() modulations"));
                }
                Ok(self)
            }
            Some(TraversalStep::GroupCount { key }) => {
                if key.is_some() {
                    return Err(Error::syntax(
                        "groupCount() takes at most one by() modulation",
                    ));
                }
                *key = Some(by);
                Ok(self)
            }
            _ => Err(Error::syntax("by() has no preceding step to modulate")),
        }
    }

    fn modulate_order(mut self, target: Option<By>, order: SortOrder) -> Result<Self> {
        match self.steps.last_mut() {
            Some(TraversalStep::Order { rules }) => {
                rules.push(OrderRule { target, order });
                Ok(self)
            }
            _ => Err(Error::syntax("ordering by() requires a preceding order()")),
        }
    }

    /// Lowers the whole chain and renders the statement tree.
    pub fn to_statement(&self) -> Result<StatementTree> {
        debug!(steps = self.steps.len(), "lowering traversal chain");
        let mut t = Translation::new();
        let root = t.root();
        lower_chain(&mut t, root, &self.steps)?;
        render_statement(&t, root)
    }
}

fn lower_chain(t: &mut Translation, cx: CxId, steps: &[TraversalStep]) -> Result<()> {
    for step in steps {
        lower_step(t, cx, step)?;
    }
    Ok(())
}

fn lower_sub(t: &mut Translation, parent: CxId, input: VarId, sub: &GraphTraversal) -> Result<CxId> {
    let cx = t.sub_context(parent, input);
    lower_chain(t, cx, &sub.steps)?;
    Ok(cx)
}

fn pivot_of(t: &Translation, cx: CxId) -> Result<VarId> {
    t.cx(cx)
        .pivot
        .ok_or_else(|| Error::compilation("step requires a traversal source before it"))
}

/// Pivot kinds a graph-pattern step can expand from.
fn expandable(kind: VariableKind) -> bool {
    matches!(
        kind,
        VariableKind::Vertex | VariableKind::Table | VariableKind::Unknown
    )
}

fn label_filter(
    t: &Translation,
    edge: VarId,
    labels: &[String],
) -> Option<hodos_core::statement::BooleanExpression> {
    if labels.is_empty() {
        return None;
    }
    let values: Vec<Value> = labels.iter().map(|l| Value::from(l.clone())).collect();
    Some(Predicate::Within(values).render(&t.var(edge).projection("label")))
}

/// Registers a vertex-to-vertex or vertex-to-edge hop.
fn lower_hop(
    t: &mut Translation,
    cx: CxId,
    direction: Direction,
    labels: &[String],
    to_vertex: bool,
) -> Result<()> {
    let pivot = pivot_of(t, cx)?;
    if !expandable(t.var(pivot).kind) {
        return Err(Error::compilation(format!(
            "cannot expand edges from a {:?} value",
            t.var(pivot).kind
        )));
    }
    let edge = t.new_var(VariableKind::Edge);
    let sink = to_vertex.then(|| t.new_var(VariableKind::Vertex));
    t.cx_mut(cx).match_paths.push(MatchPath {
        source: pivot,
        edge,
        direction,
        sink,
    });
    let filter = label_filter(t, edge, labels);
    t.cx_mut(cx).add_predicate(filter);
    t.cx_mut(cx).variables.push(edge);
    t.set_pivot(cx, sink.unwrap_or(edge));
    Ok(())
}

/// Registers an edge-to-vertex endpoint hop.
fn lower_endpoint(t: &mut Translation, cx: CxId, direction: Direction) -> Result<()> {
    let pivot = pivot_of(t, cx)?;
    if t.var(pivot).kind != VariableKind::Edge {
        return Err(Error::compilation(
            "endpoint steps require an edge pivot; use outE/inE/bothE first",
        ));
    }
    let sink = t.new_var(VariableKind::Vertex);
    t.cx_mut(cx).match_paths.push(MatchPath {
        source: pivot,
        edge: pivot,
        direction,
        sink: Some(sink),
    });
    t.set_pivot(cx, sink);
    Ok(())
}

/// Appends a table-valued function entry and pivots onto its output.
fn lower_tvf(
    t: &mut Translation,
    cx: CxId,
    function: TvfName,
    params: Vec<TvfParam>,
    kind: VariableKind,
    role: VariableRole,
    rebind_pivot: bool,
) -> VarId {
    let var = t.new_var(kind);
    t.var_mut(var).role = role;
    t.cx_mut(cx).table_refs.push(TableRef::Tvf {
        var,
        function,
        params,
    });
    if rebind_pivot {
        t.set_pivot(cx, var);
    } else {
        t.cx_mut(cx).variables.push(var);
    }
    var
}

fn by_to_context(t: &mut Translation, cx: CxId, input: VarId, by: Option<&By>) -> Result<CxId> {
    match by {
        None => {
            // Identity: the sub-scope passes its input through.
            Ok(t.sub_context(cx, input))
        }
        Some(By::Key(key)) => {
            let sub = t.sub_context(cx, input);
            lower_step(
                t,
                sub,
                &TraversalStep::Values {
                    keys: vec![key.clone()],
                },
            )?;
            Ok(sub)
        }
        Some(By::Traversal(traversal)) => lower_sub(t, cx, input, traversal),
    }
}

fn lower_step(t: &mut Translation, cx: CxId, step: &TraversalStep) -> Result<()> {
    match step {
        TraversalStep::V { ids } => {
            let var = t.new_var(VariableKind::Vertex);
            t.cx_mut(cx).table_refs.push(TableRef::Vertices { var });
            t.set_pivot(cx, var);
            if !ids.is_empty() {
                let values: Vec<Value> = ids.iter().map(|id| Value::Int64(*id)).collect();
                let filter = Predicate::Within(values).render(&t.var(var).projection("id"));
                t.cx_mut(cx).add_predicate(Some(filter));
            }
        }
        TraversalStep::Out { labels } => lower_hop(t, cx, Direction::Out, labels, true)?,
        TraversalStep::In { labels } => lower_hop(t, cx, Direction::In, labels, true)?,
        TraversalStep::Both { labels } => lower_hop(t, cx, Direction::Both, labels, true)?,
        TraversalStep::OutE { labels } => lower_hop(t, cx, Direction::Out, labels, false)?,
        TraversalStep::InE { labels } => lower_hop(t, cx, Direction::In, labels, false)?,
        TraversalStep::BothE { labels } => lower_hop(t, cx, Direction::Both, labels, false)?,
        // outV is the edge's tail, inV its head.
        TraversalStep::OutV => lower_endpoint(t, cx, Direction::Out)?,
        TraversalStep::InV => lower_endpoint(t, cx, Direction::In)?,
        TraversalStep::BothV => lower_endpoint(t, cx, Direction::Both)?,
        TraversalStep::Has { key, predicate } => {
            let pivot = pivot_of(t, cx)?;
            t.populate(cx, key);
            let filter = predicate.render(&t.var(pivot).projection(key));
            t.cx_mut(cx).add_predicate(Some(filter));
        }
        TraversalStep::HasLabel { labels } => {
            let pivot = pivot_of(t, cx)?;
            let values: Vec<Value> = labels.iter().map(|l| Value::from(l.clone())).collect();
            let filter = Predicate::Within(values).render(&t.var(pivot).projection("label"));
            t.cx_mut(cx).add_predicate(Some(filter));
        }
        TraversalStep::HasId { ids } => {
            let pivot = pivot_of(t, cx)?;
            let values: Vec<Value> = ids.iter().map(|id| Value::Int64(*id)).collect();
            let filter = Predicate::Within(values).render(&t.var(pivot).projection("id"));
            t.cx_mut(cx).add_predicate(Some(filter));
        }
        TraversalStep::HasNot { key } => {
            let pivot = pivot_of(t, cx)?;
            let filter = hodos_core::statement::BooleanExpression::Call {
                function: "is_null".to_string(),
                args: vec![t.var(pivot).projection(key)],
            };
            t.cx_mut(cx).add_predicate(Some(filter));
        }
        TraversalStep::Values { keys } => {
            let pivot = pivot_of(t, cx)?;
            let mut params = Vec::with_capacity(keys.len());
            for key in keys {
                t.populate_var(pivot, key);
                params.push(TvfParam::Scalar(t.var(pivot).projection(key)));
            }
            lower_tvf(
                t,
                cx,
                TvfName::Values,
                params,
                VariableKind::Scalar,
                VariableRole::Free,
                true,
            );
        }
        TraversalStep::ValueMap { keys } => {
            let pivot = pivot_of(t, cx)?;
            let mut entries = Vec::with_capacity(keys.len());
            for key in keys {
                t.populate_var(pivot, key);
                entries.push((key.clone(), t.var(pivot).projection(key)));
            }
            lower_tvf(
                t,
                cx,
                TvfName::Select,
                vec![TvfParam::Scalar(ScalarExpression::Compose1(entries))],
                VariableKind::Map,
                VariableRole::Free,
                true,
            );
        }
        TraversalStep::Id | TraversalStep::Label => {
            let pivot = pivot_of(t, cx)?;
            let column = if matches!(step, TraversalStep::Id) {
                "id"
            } else {
                "label"
            };
            lower_tvf(
                t,
                cx,
                TvfName::Values,
                vec![TvfParam::Scalar(t.var(pivot).projection(column))],
                VariableKind::Scalar,
                VariableRole::Free,
                true,
            );
        }
        TraversalStep::Constant { value } => {
            lower_tvf(
                t,
                cx,
                TvfName::Constant,
                vec![TvfParam::Scalar(ScalarExpression::Literal(value.clone()))],
                VariableKind::Scalar,
                VariableRole::Free,
                true,
            );
        }
        TraversalStep::Count => {
            lower_tvf(
                t,
                cx,
                TvfName::Count,
                Vec::new(),
                VariableKind::Scalar,
                VariableRole::Aggregate,
                true,
            );
        }
        TraversalStep::Sum | TraversalStep::Min | TraversalStep::Max | TraversalStep::Mean => {
            let pivot = pivot_of(t, cx)?;
            let function = match step {
                TraversalStep::Sum => TvfName::Sum,
                TraversalStep::Min => TvfName::Min,
                TraversalStep::Max => TvfName::Max,
                _ => TvfName::Mean,
            };
            lower_tvf(
                t,
                cx,
                function,
                vec![TvfParam::Scalar(t.var(pivot).default_projection())],
                VariableKind::Scalar,
                VariableRole::Aggregate,
                true,
            );
        }
        TraversalStep::Fold => {
            let pivot = pivot_of(t, cx)?;
            let composite = t.var(pivot).to_compose1();
            lower_tvf(
                t,
                cx,
                TvfName::Fold,
                vec![TvfParam::Scalar(composite)],
                VariableKind::List,
                VariableRole::Free,
                true,
            );
        }
        TraversalStep::Unfold => {
            let pivot = pivot_of(t, cx)?;
            lower_tvf(
                t,
                cx,
                TvfName::Unfold,
                vec![TvfParam::Scalar(t.var(pivot).default_projection())],
                VariableKind::Unknown,
                VariableRole::Free,
                true,
            );
        }
        TraversalStep::Limit { count } => {
            let pivot = pivot_of(t, cx)?;
            lower_tvf(
                t,
                cx,
                TvfName::Limit,
                vec![
                    TvfParam::Scalar(t.var(pivot).default_projection()),
                    TvfParam::Scalar(ScalarExpression::Literal(Value::Int64(*count))),
                ],
                VariableKind::Table,
                VariableRole::Free,
                false,
            );
        }
        TraversalStep::Range { low, high } => {
            let pivot = pivot_of(t, cx)?;
            lower_tvf(
                t,
                cx,
                TvfName::Range,
                vec![
                    TvfParam::Scalar(t.var(pivot).default_projection()),
                    TvfParam::Scalar(ScalarExpression::Literal(Value::Int64(*low))),
                    TvfParam::Scalar(ScalarExpression::Literal(Value::Int64(*high))),
                ],
                VariableKind::Table,
                VariableRole::Free,
                false,
            );
        }
        TraversalStep::Dedup { labels } => {
            let pivot = pivot_of(t, cx)?;
            let params = if labels.is_empty() {
                vec![TvfParam::Scalar(t.var(pivot).default_projection())]
            } else {
                let mut params = Vec::with_capacity(labels.len());
                for label in labels {
                    let var = t.find_labeled(cx, label).ok_or_else(|| {
                        Error::compilation(format!("dedup references unknown step label: {label}"))
                    })?;
                    params.push(TvfParam::Scalar(t.var(var).default_projection()));
                }
                params
            };
            lower_tvf(
                t,
                cx,
                TvfName::Dedup,
                params,
                VariableKind::Table,
                VariableRole::Free,
                false,
            );
        }
        TraversalStep::Order { rules } => {
            let pivot = pivot_of(t, cx)?;
            let mut params = vec![TvfParam::Scalar(t.var(pivot).default_projection())];
            for rule in rules {
                let key = match &rule.target {
                    None => SortKeyParam::Scalar(t.var(pivot).default_projection()),
                    Some(By::Key(key)) => {
                        t.populate_var(pivot, key);
                        SortKeyParam::Scalar(t.var(pivot).projection(key))
                    }
                    Some(By::Traversal(sub)) => {
                        SortKeyParam::Context(lower_sub(t, cx, pivot, sub)?)
                    }
                };
                params.push(TvfParam::Sort {
                    key,
                    order: rule.order,
                });
            }
            lower_tvf(
                t,
                cx,
                TvfName::Order,
                params,
                VariableKind::Table,
                VariableRole::Free,
                false,
            );
        }
        TraversalStep::Sample { amount } => {
            let pivot = pivot_of(t, cx)?;
            lower_tvf(
                t,
                cx,
                TvfName::Sample,
                vec![
                    TvfParam::Scalar(t.var(pivot).default_projection()),
                    TvfParam::Scalar(ScalarExpression::Literal(Value::Int64(*amount))),
                ],
                VariableKind::Table,
                VariableRole::Free,
                false,
            );
        }
        TraversalStep::As { label } => {
            let pivot = pivot_of(t, cx)?;
            t.var_mut(pivot).labels.push(label.clone());
        }
        TraversalStep::Select { keys, by } => {
            lower_select(t, cx, keys, by)?;
        }
        TraversalStep::Path => {
            pivot_of(t, cx)?;
            let steps = t.global_path_steps(cx);
            let params = vec![TvfParam::Scalar(ScalarExpression::Function {
                name: "path".to_string(),
                args: steps.iter().map(|v| t.var(*v).to_compose1()).collect(),
            })];
            lower_tvf(
                t,
                cx,
                TvfName::Path,
                params,
                VariableKind::Path,
                VariableRole::Path { steps },
                true,
            );
        }
        TraversalStep::Where { traversal } => {
            let pivot = pivot_of(t, cx)?;
            let sub = lower_sub(t, cx, pivot, traversal)?;
            let test = render_boolean(t, sub)?;
            t.cx_mut(cx).add_predicate(Some(test));
        }
        TraversalStep::WhereCompare { predicate } => {
            lower_where_compare(t, cx, predicate)?;
        }
        TraversalStep::And { traversals } => {
            let pivot = pivot_of(t, cx)?;
            for sub in traversals {
                let child = lower_sub(t, cx, pivot, sub)?;
                let test = render_boolean(t, child)?;
                t.cx_mut(cx).add_predicate(Some(test));
            }
        }
        TraversalStep::Or { traversals } => {
            let pivot = pivot_of(t, cx)?;
            let mut combined: Option<hodos_core::statement::BooleanExpression> = None;
            for sub in traversals {
                let child = lower_sub(t, cx, pivot, sub)?;
                let test = render_boolean(t, child)?;
                combined = Some(match combined {
                    Some(existing) => existing.or(test),
                    None => test,
                });
            }
            t.cx_mut(cx).add_predicate(combined);
        }
        TraversalStep::Not { traversal } => {
            let pivot = pivot_of(t, cx)?;
            let child = lower_sub(t, cx, pivot, traversal)?;
            let test = render_boolean(t, child)?;
            t.cx_mut(cx)
                .add_predicate(Some(hodos_core::statement::BooleanExpression::Not(
                    Box::new(test),
                )));
        }
        TraversalStep::Union { branches } | TraversalStep::Coalesce { branches } => {
            let pivot = pivot_of(t, cx)?;
            let mut contexts = Vec::with_capacity(branches.len());
            let mut params = Vec::with_capacity(branches.len());
            for branch in branches {
                let child = lower_sub(t, cx, pivot, branch)?;
                contexts.push(child);
                params.push(TvfParam::Context {
                    cx: child,
                    compose1: false,
                });
            }
            let function = if matches!(step, TraversalStep::Union { .. }) {
                TvfName::Union
            } else {
                TvfName::Coalesce
            };
            lower_tvf(
                t,
                cx,
                function,
                params,
                VariableKind::Unknown,
                VariableRole::Branch { contexts },
                true,
            );
        }
        TraversalStep::Choose { condition, options } => {
            lower_choose(t, cx, condition, options)?;
        }
        TraversalStep::Match { traversals } => {
            lower_match(t, cx, traversals)?;
        }
        TraversalStep::Local { traversal } => {
            let pivot = pivot_of(t, cx)?;
            let child = lower_sub(t, cx, pivot, traversal)?;
            lower_tvf(
                t,
                cx,
                TvfName::Local,
                vec![TvfParam::Context {
                    cx: child,
                    compose1: false,
                }],
                VariableKind::Unknown,
                VariableRole::Branch {
                    contexts: vec![child],
                },
                true,
            );
        }
        TraversalStep::Optional { traversal } => {
            let pivot = pivot_of(t, cx)?;
            let child = lower_sub(t, cx, pivot, traversal)?;
            // A body built around an aggregate always yields a row, and
            // its fallback must then carry the composite shape the
            // aggregate arm produces.
            let aggregate_shaped = t.cx(child).table_refs.iter().any(|table| {
                matches!(t.var(table.var()).role, VariableRole::Aggregate)
            });
            let fallback = if aggregate_shaped {
                t.var(pivot).to_compose1()
            } else {
                t.var(pivot).default_projection()
            };
            lower_tvf(
                t,
                cx,
                TvfName::Optional,
                vec![
                    TvfParam::Scalar(fallback),
                    TvfParam::Context {
                        cx: child,
                        compose1: false,
                    },
                ],
                VariableKind::Unknown,
                VariableRole::Branch {
                    contexts: vec![child],
                },
                true,
            );
        }
        TraversalStep::Repeat(node) => {
            lower_repeat(t, cx, node)?;
        }
        TraversalStep::Group { key, value } => {
            let pivot = pivot_of(t, cx)?;
            let key_cx = by_to_context(t, cx, pivot, key.as_ref())?;
            let value_cx = by_to_context(t, cx, pivot, value.as_ref())?;
            lower_tvf(
                t,
                cx,
                TvfName::Group,
                vec![
                    TvfParam::Context {
                        cx: key_cx,
                        compose1: false,
                    },
                    TvfParam::Context {
                        cx: value_cx,
                        compose1: false,
                    },
                ],
                VariableKind::Map,
                VariableRole::Free,
                true,
            );
        }
        TraversalStep::GroupCount { key } => {
            let pivot = pivot_of(t, cx)?;
            let key_cx = by_to_context(t, cx, pivot, key.as_ref())?;
            lower_tvf(
                t,
                cx,
                TvfName::GroupCount,
                vec![TvfParam::Context {
                    cx: key_cx,
                    compose1: false,
                }],
                VariableKind::Map,
                VariableRole::Free,
                true,
            );
        }
        TraversalStep::Store { name } | TraversalStep::Aggregate { name } => {
            let pivot = pivot_of(t, cx)?;
            let function = if matches!(step, TraversalStep::Store { .. }) {
                TvfName::Store
            } else {
                TvfName::Aggregate
            };
            let var = lower_tvf(
                t,
                cx,
                function,
                vec![
                    TvfParam::Scalar(ScalarExpression::Literal(Value::from(name.clone()))),
                    TvfParam::Scalar(t.var(pivot).default_projection()),
                ],
                VariableKind::List,
                VariableRole::SideEffect { name: name.clone() },
                false,
            );
            t.cx_mut(cx).side_effects.push((name.clone(), var));
        }
        TraversalStep::Cap { name } => {
            if !t
                .visible_side_effects(cx)
                .iter()
                .any(|(existing, _)| existing == name)
            {
                return Err(Error::compilation(format!(
                    "cap() references an undeclared side-effect collection: {name}"
                )));
            }
            lower_tvf(
                t,
                cx,
                TvfName::Cap,
                vec![TvfParam::Scalar(ScalarExpression::Literal(Value::from(
                    name.clone(),
                )))],
                VariableKind::List,
                VariableRole::Free,
                true,
            );
        }
        TraversalStep::Project { names, by } => {
            let pivot = pivot_of(t, cx)?;
            let mut params = Vec::with_capacity(names.len() * 2);
            for (index, name) in names.iter().enumerate() {
                let modulation = if by.is_empty() {
                    None
                } else {
                    by.get(index % by.len())
                };
                let sub = by_to_context(t, cx, pivot, modulation)?;
                params.push(TvfParam::Scalar(ScalarExpression::Literal(Value::from(
                    name.clone(),
                ))));
                params.push(TvfParam::Context {
                    cx: sub,
                    compose1: false,
                });
            }
            lower_tvf(
                t,
                cx,
                TvfName::Project,
                params,
                VariableKind::Map,
                VariableRole::Free,
                true,
            );
        }
    }
    Ok(())
}

fn lower_select(t: &mut Translation, cx: CxId, keys: &[String], by: &[By]) -> Result<()> {
    let mut resolved: SmallVec<[(String, ScalarExpression); 2]> = SmallVec::new();
    for (index, key) in keys.iter().enumerate() {
        let var = t.find_labeled(cx, key).ok_or_else(|| {
            Error::compilation(format!("select references unknown step label: {key}"))
        })?;
        let modulation = if by.is_empty() {
            None
        } else {
            by.get(index % by.len())
        };
        let expr = match modulation {
            None => t.var(var).to_compose1(),
            Some(By::Key(property)) => {
                t.populate_var(var, property);
                t.var(var).projection(property)
            }
            Some(By::Traversal(sub)) => {
                let child = lower_sub(t, cx, var, sub)?;
                ScalarExpression::Subquery(Box::new(super::renderer::render_block(
                    t, child, true,
                )?))
            }
        };
        resolved.push((key.clone(), expr));
    }
    let (kind, param) = if let [(_, expr)] = resolved.as_slice() {
        (VariableKind::Unknown, expr.clone())
    } else {
        (
            VariableKind::Map,
            ScalarExpression::Compose1(resolved.into_vec()),
        )
    };
    lower_tvf(
        t,
        cx,
        TvfName::Select,
        vec![TvfParam::Scalar(param)],
        kind,
        VariableRole::Free,
        true,
    );
    Ok(())
}

/// `where(predicate)` with string values naming labeled steps: the pivot
/// is compared against those steps' values.
fn lower_where_compare(t: &mut Translation, cx: CxId, predicate: &Predicate) -> Result<()> {
    let pivot = pivot_of(t, cx)?;
    let left = t.var(pivot).default_projection();

    let resolve = |t: &Translation, value: &Value| -> Result<ScalarExpression> {
        let Value::String(label) = value else {
            return Err(Error::syntax(
                "where(predicate) expects step labels as arguments",
            ));
        };
        let var = t.find_labeled(cx, label).ok_or_else(|| {
            Error::compilation(format!("where references unknown step label: {label}"))
        })?;
        Ok(t.var(var).default_projection())
    };

    let rendered = match predicate {
        Predicate::Eq(v) | Predicate::Neq(v) | Predicate::Lt(v) | Predicate::Lte(v)
        | Predicate::Gt(v) | Predicate::Gte(v) => {
            let op = match predicate {
                Predicate::Eq(_) => hodos_core::statement::ComparisonOp::Eq,
                Predicate::Neq(_) => hodos_core::statement::ComparisonOp::Neq,
                Predicate::Lt(_) => hodos_core::statement::ComparisonOp::Lt,
                Predicate::Lte(_) => hodos_core::statement::ComparisonOp::Lte,
                Predicate::Gt(_) => hodos_core::statement::ComparisonOp::Gt,
                _ => hodos_core::statement::ComparisonOp::Gte,
            };
            hodos_core::statement::BooleanExpression::Comparison {
                left,
                op,
                right: resolve(t, v)?,
            }
        }
        Predicate::Within(values) => {
            let tags = values
                .iter()
                .map(|v| resolve(t, v))
                .collect::<Result<Vec<_>>>()?;
            Predicate::WithinTags(tags).render(&left)
        }
        Predicate::Without(values) => {
            let tags = values
                .iter()
                .map(|v| resolve(t, v))
                .collect::<Result<Vec<_>>>()?;
            Predicate::WithoutTags(tags).render(&left)
        }
        _ => {
            return Err(Error::unsupported(
                "where(predicate) supports comparisons, within, and without",
            ))
        }
    };
    t.cx_mut(cx).add_predicate(Some(rendered));
    Ok(())
}

fn lower_choose(
    t: &mut Translation,
    cx: CxId,
    condition: &GraphTraversal,
    options: &ChooseOptions,
) -> Result<()> {
    let pivot = pivot_of(t, cx)?;
    let chooser = lower_sub(t, cx, pivot, condition)?;
    let mut params = vec![TvfParam::Context {
        cx: chooser,
        compose1: false,
    }];
    let mut contexts = Vec::new();
    match options {
        ChooseOptions::Binary {
            true_branch,
            false_branch,
        } => {
            for branch in [true_branch, false_branch] {
                let child = lower_sub(t, cx, pivot, branch)?;
                contexts.push(child);
                params.push(TvfParam::Context {
                    cx: child,
                    compose1: false,
                });
            }
        }
        ChooseOptions::Keyed { options, none } => {
            for (key, branch) in options {
                let child = lower_sub(t, cx, pivot, branch)?;
                contexts.push(child);
                params.push(TvfParam::Scalar(ScalarExpression::Literal(key.clone())));
                params.push(TvfParam::Context {
                    cx: child,
                    compose1: false,
                });
            }
            if let Some(branch) = none {
                let child = lower_sub(t, cx, pivot, branch)?;
                contexts.push(child);
                params.push(TvfParam::Context {
                    cx: child,
                    compose1: false,
                });
            }
        }
    }
    lower_tvf(
        t,
        cx,
        TvfName::Choose,
        params,
        VariableKind::Unknown,
        VariableRole::Branch { contexts },
        true,
    );
    Ok(())
}

fn lower_repeat(t: &mut Translation, cx: CxId, node: &RepeatNode) -> Result<()> {
    let Some(body) = &node.body else {
        return Err(Error::compilation(
            "repeat modifier without a repeat body; add repeat(...)",
        ));
    };
    let input = pivot_of(t, cx)?;
    let loop_var = t.new_var(VariableKind::Table);
    t.var_mut(loop_var).role = VariableRole::ContextInput { source: input };

    let body_cx = lower_sub(t, cx, input, body)?;
    let until = match &node.until {
        Some(sub) => Some(lower_sub(t, cx, input, sub)?),
        None => None,
    };
    let emit = match &node.emit {
        Some(None) => Some(EmitSpec::Always),
        Some(Some(sub)) => Some(EmitSpec::Filtered(lower_sub(t, cx, input, sub)?)),
        None => None,
    };
    if node.times.is_none() && until.is_none() {
        return Err(Error::compilation(
            "repeat() requires times() or until() to terminate",
        ));
    }

    let spec = RepeatSpec {
        body: body_cx,
        input,
        loop_var,
        times: node.times,
        until,
        until_before_body: node.until_before_body,
        emit,
        emit_before_body: node.emit_before_body,
    };
    lower_tvf(
        t,
        cx,
        TvfName::Repeat,
        vec![TvfParam::Repeat(spec)],
        VariableKind::Unknown,
        VariableRole::Branch {
            contexts: vec![body_cx],
        },
        true,
    );
    Ok(())
}

/// Solves a `match()` pattern: pick a start label that never appears as
/// an end label, bind it to the current pivot, then breadth-first lower
/// each traversal whose start label is bound, emitting equality
/// predicates when a label is revisited instead of recompiling.
fn lower_match(t: &mut Translation, cx: CxId, traversals: &[GraphTraversal]) -> Result<()> {
    let pivot = pivot_of(t, cx)?;

    struct Pattern<'a> {
        start: String,
        end: Option<String>,
        middle: &'a [TraversalStep],
    }
    let mut patterns = Vec::with_capacity(traversals.len());
    for traversal in traversals {
        let steps = traversal.steps();
        let Some(TraversalStep::As { label: start }) = steps.first() else {
            return Err(Error::compilation(
                "match traversals must begin with as(label)",
            ));
        };
        let (end, middle) = match steps.last() {
            Some(TraversalStep::As { label }) if steps.len() > 1 => {
                (Some(label.clone()), &steps[1..steps.len() - 1])
            }
            _ => (None, &steps[1..]),
        };
        patterns.push(Pattern {
            start: start.clone(),
            end,
            middle,
        });
    }

    // Start from a label no traversal ends on; ties break by name.
    let mut start_labels: Vec<&str> = patterns
        .iter()
        .map(|p| p.start.as_str())
        .filter(|s| patterns.iter().all(|p| p.end.as_deref() != Some(*s)))
        .collect();
    start_labels.sort_unstable();
    let Some(start) = start_labels.first().copied() else {
        return Err(Error::compilation(
            "match pattern has no unambiguous start label",
        ));
    };
    let start = start.to_string();

    let mut bound: Vec<(String, VarId)> = vec![(start.clone(), pivot)];
    t.var_mut(pivot).labels.push(start);

    let mut remaining: Vec<usize> = (0..patterns.len()).collect();
    while !remaining.is_empty() {
        let Some((position, input)) = remaining.iter().enumerate().find_map(|(slot, &i)| {
            bound
                .iter()
                .find(|(label, _)| *label == patterns[i].start)
                .map(|(_, var)| (slot, *var))
        }) else {
            return Err(Error::compilation(
                "match pattern is disconnected from its start label",
            ));
        };
        let index = remaining.remove(position);
        let pattern = &patterns[index];

        t.set_pivot(cx, input);
        for step in pattern.middle {
            lower_step(t, cx, step)?;
        }
        let result = pivot_of(t, cx)?;

        if let Some(end) = &pattern.end {
            if let Some((_, existing)) = bound.iter().find(|(label, _)| label == end) {
                // Revisited label: equate rather than recompile.
                let existing = *existing;
                let column = match t.var(existing).kind {
                    VariableKind::Vertex | VariableKind::Edge => "id",
                    _ => hodos_core::statement::DEFAULT_COLUMN,
                };
                let equality = hodos_core::statement::BooleanExpression::Comparison {
                    left: t.var(result).projection(column),
                    op: hodos_core::statement::ComparisonOp::Eq,
                    right: t.var(existing).projection(column),
                };
                t.cx_mut(cx).add_predicate(Some(equality));
            } else {
                t.var_mut(result).labels.push(end.clone());
                bound.push((end.clone(), result));
            }
        }
    }

    // The pattern's output is the map of all bound labels.
    let entries: Vec<(String, ScalarExpression)> = bound
        .iter()
        .map(|(label, var)| (label.clone(), t.var(*var).default_projection()))
        .collect();
    lower_tvf(
        t,
        cx,
        TvfName::Select,
        vec![TvfParam::Scalar(ScalarExpression::Compose1(entries))],
        VariableKind::Map,
        VariableRole::Free,
        true,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::predicate::{eq, gt};
    use hodos_core::statement::{TableReference, TvfParameter};

    fn tvf_calls(tree: &StatementTree) -> Vec<TvfName> {
        tree.root
            .from
            .iter()
            .filter_map(|table| match table {
                TableReference::Tvf(call) => Some(call.function),
                TableReference::Vertices { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_option_requires_choose() {
        let err = GraphTraversal::start()
            .v()
            .option(1i64, GraphTraversal::start().out(["knows"]))
            .unwrap_err();
        assert!(err.to_string().contains("choose"));
    }

    #[test]
    fn test_duplicate_option_key_rejected() {
        let chain = GraphTraversal::start()
            .v()
            .choose_by(GraphTraversal::start().values(["age"]))
            .option(1i64, GraphTraversal::start().out(["knows"]))
            .unwrap();
        let err = chain
            .option(1i64, GraphTraversal::start().out(["created"]))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate option key"));
    }

    #[test]
    fn test_by_requires_modulatable_step() {
        let err = GraphTraversal::start().v().by("name").unwrap_err();
        assert!(err.to_string().contains("by()"));
    }

    #[test]
    fn test_times_before_and_after_repeat_build_same_node() {
        let body = || GraphTraversal::start().out(["knows"]);
        let before = GraphTraversal::start().v().times(2).repeat(body());
        let after = GraphTraversal::start().v().repeat(body()).times(2);
        assert_eq!(before, after);
        assert_eq!(
            before.to_statement().unwrap(),
            after.to_statement().unwrap()
        );
    }

    #[test]
    fn test_until_orientation_is_recorded() {
        let body = || GraphTraversal::start().out(["knows"]);
        let check = || GraphTraversal::start().has_value("name", "ripple");

        let before = GraphTraversal::start().v().until(check()).repeat(body());
        let Some(TraversalStep::Repeat(node)) = before.steps().last() else {
            panic!("expected a repeat node");
        };
        assert!(node.until_before_body);

        let after = GraphTraversal::start().v().repeat(body()).until(check());
        let Some(TraversalStep::Repeat(node)) = after.steps().last() else {
            panic!("expected a repeat node");
        };
        assert!(!node.until_before_body);
    }

    #[test]
    fn test_repeat_without_termination_fails_at_lowering() {
        let chain = GraphTraversal::start()
            .v()
            .repeat(GraphTraversal::start().out(["knows"]));
        let err = chain.to_statement().unwrap_err();
        assert!(err.to_string().contains("times() or until()"));
    }

    #[test]
    fn test_union_renders_one_sub_statement_per_branch() {
        let tree = GraphTraversal::start()
            .v()
            .union([
                GraphTraversal::start().out(["knows"]),
                GraphTraversal::start().out(["created"]),
                GraphTraversal::start().in_(["created"]),
            ])
            .values(["name"])
            .to_statement()
            .unwrap();
        let TableReference::Tvf(call) = &tree.root.from[1] else {
            panic!("expected the union call");
        };
        assert_eq!(call.function, TvfName::Union);
        let arms: Vec<_> = call
            .params
            .iter()
            .filter(|p| matches!(p, TvfParameter::Query(_)))
            .collect();
        assert_eq!(arms.len(), 3);
        // Branch select lists align: same output columns in each arm.
        let columns: Vec<Vec<&str>> = call
            .params
            .iter()
            .filter_map(|p| match p {
                TvfParameter::Query(block) => Some(block.output_columns()),
                _ => None,
            })
            .collect();
        assert!(columns.windows(2).all(|pair| pair[0] == pair[1]));
        assert!(columns[0].contains(&"name"));
    }

    #[test]
    fn test_simple_chain_lowering_shape() {
        let tree = GraphTraversal::start()
            .v()
            .has("age", gt(30i64))
            .out(["created"])
            .values(["name"])
            .to_statement()
            .unwrap();
        assert_eq!(tree.root.matches.len(), 1);
        assert!(tree.root.where_clause.is_some());
        assert_eq!(tvf_calls(&tree), vec![TvfName::Values]);
    }

    #[test]
    fn test_where_compare_resolves_labels() {
        let tree = GraphTraversal::start()
            .v()
            .as_("a")
            .out(["knows"])
            .where_compare(eq("a").not())
            .to_statement()
            .unwrap();
        assert!(tree.root.where_clause.is_some());
    }

    #[test]
    fn test_cap_requires_declared_collection() {
        let err = GraphTraversal::start()
            .v()
            .cap("missing")
            .to_statement()
            .unwrap_err();
        assert!(err.to_string().contains("undeclared side-effect"));
    }
}
