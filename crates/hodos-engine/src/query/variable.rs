//! Typed traversal variables.
//!
//! Each variable is one column- or table-shaped value flowing through the
//! plan: a generated alias, a kind tag, the lazily grown set of projected
//! property names, and the user labels attached by `as()`. Variables live
//! in the translation's flat arena; contexts, table references, and match
//! paths hold [`VarId`] handles rather than owning them.

use hodos_core::statement::{ScalarExpression, DEFAULT_COLUMN};
use indexmap::IndexSet;
use smallvec::SmallVec;

use super::context::{CxId, VarId};

/// The shape of the value a variable carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    /// A vertex document.
    Vertex,
    /// An edge document.
    Edge,
    /// A single scalar value.
    Scalar,
    /// A derived table (a table-valued function output).
    Table,
    /// An ordered collection.
    List,
    /// A keyed collection.
    Map,
    /// A grouped tree value.
    Tree,
    /// A traversal history.
    Path,
    /// The null value.
    Null,
    /// Anything; the kind branches disagree on collapses to this.
    Unknown,
}

impl VariableKind {
    /// Alias prefix used when generating names of this kind.
    #[must_use]
    pub const fn alias_prefix(self) -> &'static str {
        match self {
            VariableKind::Vertex => "n",
            VariableKind::Edge => "e",
            _ => "r",
        }
    }

    /// Whether values of this kind can carry arbitrary properties.
    #[must_use]
    pub const fn holds_properties(self) -> bool {
        !matches!(self, VariableKind::Null)
    }
}

/// What a variable stands for beyond its own columns. Drives `populate`
/// propagation and render-time decisions.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableRole {
    /// An ordinary variable.
    Free,
    /// A loop or sub-scope input standing in for another variable;
    /// property requests forward to the source.
    ContextInput {
        /// The variable this one stands in for.
        source: VarId,
    },
    /// An aggregate output (`count`, `sum`, `min`, `max`, `mean`).
    Aggregate,
    /// A branch output (`union`/`coalesce`/`choose`); property requests
    /// propagate into every branch scope so arms agree on shape.
    Branch {
        /// The branch scopes, in declaration order.
        contexts: Vec<CxId>,
    },
    /// A traversal history over the given step variables.
    Path {
        /// Constituent steps, head to tail.
        steps: Vec<VarId>,
    },
    /// A named side-effect accumulator (`store`/`aggregate`).
    SideEffect {
        /// Collection name.
        name: String,
    },
}

/// One traversal variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Generated unique alias, also the rendered table alias.
    pub alias: String,
    /// Kind tag.
    pub kind: VariableKind,
    /// Projected property names, in first-request order.
    pub properties: IndexSet<String>,
    /// User labels attached by `as()`.
    pub labels: SmallVec<[String; 2]>,
    /// Structural role.
    pub role: VariableRole,
}

impl Variable {
    /// Creates a free variable.
    #[must_use]
    pub fn new(alias: impl Into<String>, kind: VariableKind) -> Self {
        Self {
            alias: alias.into(),
            kind,
            properties: IndexSet::new(),
            labels: SmallVec::new(),
            role: VariableRole::Free,
        }
    }

    /// Idempotently records that a property must be projected. Returns
    /// whether it was newly added. A no-op on kinds that cannot hold
    /// properties.
    pub fn populate(&mut self, property: &str) -> bool {
        if !self.kind.holds_properties() {
            return false;
        }
        self.properties.insert(property.to_string())
    }

    /// The variable's implicit whole-value column.
    #[must_use]
    pub fn default_projection(&self) -> ScalarExpression {
        ScalarExpression::column(&self.alias, DEFAULT_COLUMN)
    }

    /// A property column on this variable.
    #[must_use]
    pub fn projection(&self, property: &str) -> ScalarExpression {
        ScalarExpression::column(&self.alias, property)
    }

    /// Packs the default value plus every populated property into one
    /// composite, for crossing a subquery boundary (`fold`, `cap`, path
    /// steps).
    #[must_use]
    pub fn to_compose1(&self) -> ScalarExpression {
        let mut entries = Vec::with_capacity(self.properties.len() + 1);
        entries.push((DEFAULT_COLUMN.to_string(), self.default_projection()));
        for property in &self.properties {
            entries.push((property.clone(), self.projection(property)));
        }
        ScalarExpression::Compose1(entries)
    }

    /// Whether the variable carries the given user label.
    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_populate_is_idempotent() {
        let mut var = Variable::new("n0", VariableKind::Vertex);
        assert!(var.populate("name"));
        assert!(!var.populate("name"));
        assert_eq!(var.properties.len(), 1);
    }

    #[test]
    fn test_null_kind_rejects_properties() {
        let mut var = Variable::new("r0", VariableKind::Null);
        assert!(!var.populate("name"));
        assert!(var.properties.is_empty());
    }

    #[test]
    fn test_compose1_packs_default_and_properties() {
        let mut var = Variable::new("n0", VariableKind::Vertex);
        var.populate("name");
        let ScalarExpression::Compose1(entries) = var.to_compose1() else {
            panic!("compose1 did not produce a composite");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, DEFAULT_COLUMN);
        assert_eq!(entries[1].0, "name");
    }
}
