//! Compilation scopes and the translation arena.
//!
//! One [`Translation`] holds every variable and every scope created while
//! lowering a single traversal, in flat arenas addressed by [`VarId`] and
//! [`CxId`]. Match paths and table references store handles into the
//! variable arena, never the variables themselves, so scopes can be
//! duplicated as shallow list copies and the parent link stays a pure
//! upward-lookup reference.

use hodos_core::graph::Direction;
use hodos_core::statement::{BooleanExpression, ScalarExpression, SortOrder, TvfName};
use indexmap::IndexSet;

use super::variable::{Variable, VariableKind, VariableRole};

/// Handle into the variable arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub(crate) u32);

/// Handle into the scope arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CxId(pub(crate) u32);

/// A graph-pattern edge registered by a traversal step, rendered later as
/// one match-path segment.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchPath {
    /// Source variable (a vertex, or an edge for endpoint extraction).
    pub source: VarId,
    /// The traversed edge variable.
    pub edge: VarId,
    /// Traversal direction from the source.
    pub direction: Direction,
    /// The reached vertex variable, when the step lands on one.
    pub sink: Option<VarId>,
}

/// A sort rule parameter before rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKeyParam {
    /// Sort by a scalar over the input row.
    Scalar(ScalarExpression),
    /// Sort by a sub-scope evaluated per row.
    Context(CxId),
}

/// Emit behavior of a loop.
#[derive(Debug, Clone, PartialEq)]
pub enum EmitSpec {
    /// Emit every iteration's rows.
    Always,
    /// Emit rows the filter scope accepts.
    Filtered(CxId),
}

/// Everything a lowered `repeat` carries until render time.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatSpec {
    /// The loop-body scope, compiled against the original input variable.
    pub body: CxId,
    /// The original input variable the body's references point at.
    pub input: VarId,
    /// The loop-carried variable those references are rewritten to.
    pub loop_var: VarId,
    /// Fixed iteration count, when `times` bounded the loop.
    pub times: Option<i64>,
    /// Termination scope, when `until` bounded the loop.
    pub until: Option<CxId>,
    /// True when `until` preceded `repeat` in the chain.
    pub until_before_body: bool,
    /// Emit behavior, when present.
    pub emit: Option<EmitSpec>,
    /// True when `emit` preceded `repeat` in the chain.
    pub emit_before_body: bool,
}

/// A table-valued function parameter before rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum TvfParam {
    /// A scalar argument.
    Scalar(ScalarExpression),
    /// A sub-scope rendered at statement-build time; `compose1` collapses
    /// it to a single composite column.
    Context {
        /// The sub-scope.
        cx: CxId,
        /// Whether to render it as one composite column.
        compose1: bool,
    },
    /// A sort rule.
    Sort {
        /// Sort key.
        key: SortKeyParam,
        /// Sort direction.
        order: SortOrder,
    },
    /// Loop bookkeeping.
    Repeat(RepeatSpec),
}

/// An entry of a scope's from-list.
#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    /// The base vertex table, bound to a vertex variable.
    Vertices {
        /// The scan output variable.
        var: VarId,
    },
    /// A cross-applied table-valued function call.
    Tvf {
        /// The call's output variable; its alias is the table alias.
        var: VarId,
        /// Which function.
        function: TvfName,
        /// Parameters in call order.
        params: Vec<TvfParam>,
    },
}

impl TableRef {
    /// The output variable of this entry.
    #[must_use]
    pub fn var(&self) -> VarId {
        match self {
            TableRef::Vertices { var } | TableRef::Tvf { var, .. } => *var,
        }
    }
}

/// One compilation scope.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TranslationContext {
    /// Enclosing scope, for upward lookups only.
    pub parent: Option<CxId>,
    /// The variable subsequent steps operate on.
    pub pivot: Option<VarId>,
    /// Variables this scope introduced or inherited, in creation order.
    pub variables: Vec<VarId>,
    /// From-list entries.
    pub table_refs: Vec<TableRef>,
    /// Graph-pattern edges.
    pub match_paths: Vec<MatchPath>,
    /// Where-clause tree, AND-combined as predicates arrive.
    pub predicates: Option<BooleanExpression>,
    /// Property names this scope must surface, in first-request order.
    pub projected: IndexSet<String>,
    /// Pivot history, for path reconstruction.
    pub steps: Vec<VarId>,
    /// Named side-effect accumulators declared in this scope.
    pub side_effects: Vec<(String, VarId)>,
}

impl TranslationContext {
    /// ANDs an expression into the where-clause tree; `None` is a no-op.
    pub fn add_predicate(&mut self, expr: Option<BooleanExpression>) {
        if let Some(expr) = expr {
            self.predicates = Some(match self.predicates.take() {
                Some(existing) => existing.and(expr),
                None => expr,
            });
        }
    }
}

/// The arena owning every variable and scope of one lowering run.
#[derive(Debug, Default)]
pub struct Translation {
    vars: Vec<Variable>,
    contexts: Vec<TranslationContext>,
    alias_counter: u32,
}

impl Translation {
    /// Creates a translation with an empty root scope.
    #[must_use]
    pub fn new() -> Self {
        let mut t = Self::default();
        t.contexts.push(TranslationContext::default());
        t
    }

    /// The root scope.
    #[must_use]
    pub fn root(&self) -> CxId {
        CxId(0)
    }

    /// Allocates a fresh variable of the given kind with a generated
    /// alias, unique within this translation.
    pub fn new_var(&mut self, kind: VariableKind) -> VarId {
        let alias = format!("{}{}", kind.alias_prefix(), self.alias_counter);
        self.alias_counter += 1;
        let id = VarId(self.vars.len() as u32);
        self.vars.push(Variable::new(alias, kind));
        id
    }

    /// Immutable variable access.
    #[must_use]
    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id.0 as usize]
    }

    /// Mutable variable access.
    pub fn var_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.vars[id.0 as usize]
    }

    /// Immutable scope access.
    #[must_use]
    pub fn cx(&self, id: CxId) -> &TranslationContext {
        &self.contexts[id.0 as usize]
    }

    /// Mutable scope access.
    pub fn cx_mut(&mut self, id: CxId) -> &mut TranslationContext {
        &mut self.contexts[id.0 as usize]
    }

    /// Allocates a child scope seeded with an input variable, for
    /// compiling a nested traversal against the current pivot.
    pub fn sub_context(&mut self, parent: CxId, input: VarId) -> CxId {
        let id = CxId(self.contexts.len() as u32);
        self.contexts.push(TranslationContext {
            parent: Some(parent),
            pivot: Some(input),
            variables: vec![input],
            steps: vec![input],
            ..Default::default()
        });
        id
    }

    /// Shallow-copies a scope: new lists, same variable handles. Used to
    /// fork branch-local compilation without mutating the original.
    pub fn duplicate(&mut self, cx: CxId) -> CxId {
        let copy = self.cx(cx).clone();
        let id = CxId(self.contexts.len() as u32);
        self.contexts.push(copy);
        id
    }

    /// Clears a scope except for one designated input variable, which
    /// becomes the pivot again. Used by `repeat` to re-run the loop body
    /// against a fresh accumulation.
    pub fn reset(&mut self, cx: CxId, input: VarId) {
        let parent = self.cx(cx).parent;
        *self.cx_mut(cx) = TranslationContext {
            parent,
            pivot: Some(input),
            variables: vec![input],
            steps: vec![input],
            ..Default::default()
        };
    }

    /// Sets the scope's pivot and appends it to the step history.
    pub fn set_pivot(&mut self, cx: CxId, var: VarId) {
        let context = self.cx_mut(cx);
        context.pivot = Some(var);
        if !context.variables.contains(&var) {
            context.variables.push(var);
        }
        context.steps.push(var);
    }

    /// Registers a property on the scope and its pivot, propagating
    /// through stand-in and branch variables so every arm that must
    /// surface the property learns about it.
    pub fn populate(&mut self, cx: CxId, property: &str) {
        self.cx_mut(cx).projected.insert(property.to_string());
        if let Some(pivot) = self.cx(cx).pivot {
            self.populate_var(pivot, property);
        }
    }

    /// Registers a property on one variable, with role propagation.
    pub fn populate_var(&mut self, var: VarId, property: &str) {
        if !self.var_mut(var).populate(property) {
            return;
        }
        match self.var(var).role.clone() {
            VariableRole::ContextInput { source } => self.populate_var(source, property),
            VariableRole::Branch { contexts } => {
                for branch in contexts {
                    self.populate(branch, property);
                }
            }
            VariableRole::Free
            | VariableRole::Aggregate
            | VariableRole::Path { .. }
            | VariableRole::SideEffect { .. } => {}
        }
    }

    /// Finds the most recent variable carrying a user label, searching
    /// this scope's variables newest-first, then the parent chain.
    #[must_use]
    pub fn find_labeled(&self, cx: CxId, label: &str) -> Option<VarId> {
        let mut current = Some(cx);
        while let Some(id) = current {
            let context = self.cx(id);
            if let Some(var) = context
                .variables
                .iter()
                .rev()
                .copied()
                .find(|v| self.var(*v).has_label(label))
            {
                return Some(var);
            }
            current = context.parent;
        }
        None
    }

    /// Every named side-effect accumulator visible from a scope: its own
    /// declarations plus the whole parent chain's.
    #[must_use]
    pub fn visible_side_effects(&self, cx: CxId) -> Vec<(String, VarId)> {
        let mut out = Vec::new();
        let mut current = Some(cx);
        while let Some(id) = current {
            out.extend(self.cx(id).side_effects.iter().cloned());
            current = self.cx(id).parent;
        }
        out
    }

    /// Full pivot history across nested scopes, outermost first.
    #[must_use]
    pub fn global_path_steps(&self, cx: CxId) -> Vec<VarId> {
        let mut chain = Vec::new();
        let mut current = Some(cx);
        while let Some(id) = current {
            chain.push(id);
            current = self.cx(id).parent;
        }
        let mut steps = Vec::new();
        for id in chain.into_iter().rev() {
            for step in &self.cx(id).steps {
                if steps.last() != Some(step) {
                    steps.push(*step);
                }
            }
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hodos_core::statement::ComparisonOp;
    use hodos_common::types::Value;

    #[test]
    fn test_duplicate_is_isolated() {
        let mut t = Translation::new();
        let root = t.root();
        let v = t.new_var(VariableKind::Vertex);
        t.set_pivot(root, v);

        let copy = t.duplicate(root);
        let w = t.new_var(VariableKind::Vertex);
        t.set_pivot(copy, w);

        assert_eq!(t.cx(root).pivot, Some(v));
        assert_eq!(t.cx(copy).pivot, Some(w));
        assert_eq!(t.cx(root).variables.len(), 1);
    }

    #[test]
    fn test_populate_propagates_into_branches() {
        let mut t = Translation::new();
        let root = t.root();
        let input = t.new_var(VariableKind::Vertex);
        t.set_pivot(root, input);

        let arm_a = t.sub_context(root, input);
        let a = t.new_var(VariableKind::Vertex);
        t.set_pivot(arm_a, a);
        let arm_b = t.sub_context(root, input);
        let b = t.new_var(VariableKind::Vertex);
        t.set_pivot(arm_b, b);

        let branch = t.new_var(VariableKind::Unknown);
        t.var_mut(branch).role = VariableRole::Branch {
            contexts: vec![arm_a, arm_b],
        };
        t.set_pivot(root, branch);

        t.populate(root, "name");
        assert!(t.var(a).properties.contains("name"));
        assert!(t.var(b).properties.contains("name"));
        assert!(t.cx(arm_a).projected.contains("name"));
        assert!(t.cx(arm_b).projected.contains("name"));
    }

    #[test]
    fn test_reset_keeps_input() {
        let mut t = Translation::new();
        let root = t.root();
        let input = t.new_var(VariableKind::Vertex);
        let cx = t.sub_context(root, input);
        let other = t.new_var(VariableKind::Vertex);
        t.set_pivot(cx, other);
        let left = t.var(other).projection("age");
        t.cx_mut(cx).add_predicate(Some(BooleanExpression::Comparison {
            left,
            op: ComparisonOp::Gt,
            right: hodos_core::statement::ScalarExpression::Literal(Value::Int64(1)),
        }));

        t.reset(cx, input);
        assert_eq!(t.cx(cx).pivot, Some(input));
        assert_eq!(t.cx(cx).variables, vec![input]);
        assert!(t.cx(cx).predicates.is_none());
    }

    #[test]
    fn test_side_effects_visible_through_parents() {
        let mut t = Translation::new();
        let root = t.root();
        let input = t.new_var(VariableKind::Vertex);
        t.set_pivot(root, input);
        let acc = t.new_var(VariableKind::List);
        t.cx_mut(root).side_effects.push(("x".to_string(), acc));

        let child = t.sub_context(root, input);
        let visible = t.visible_side_effects(child);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].0, "x");
    }
}
