//! Pull-based execution over statement trees.
//!
//! This module provides the physical side of the pipeline:
//!
//! - [`Record`] / [`Cell`] - the row model operators exchange
//! - [`Operator`] - the pull interface (`next`/`reset`/`name`)
//! - [`compile_block`] - turns a [`SelectQueryBlock`](crate::statement::SelectQueryBlock)
//!   into an operator tree, recursively compiling correlated sub-blocks
//!   against the current input row
//! - `operators` - scan, match-path expansion with batched adjacency
//!   fetching, filter, project, the table-valued functions, and the loop
//!   runtime

mod compiler;
mod eval;
pub mod operators;

pub use compiler::{compile_block, compile_statement, run_block};
pub use eval::{cells_equal, compare_cells, evaluate_boolean, evaluate_scalar};

use crate::graph::{GraphConfig, GraphStore};
use hashbrown::HashMap;
use hodos_common::types::{EdgeId, PropertyKey, Value, VertexId};
use hodos_common::Result;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// A single cell of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// A scalar value.
    Value(Value),
    /// A vertex reference.
    Vertex(VertexId),
    /// An edge reference.
    Edge(EdgeId),
    /// A named composite, e.g. a `select("a", "b")` projection.
    Map(IndexMap<String, Cell>),
    /// An ordered collection, e.g. a folded stream or a path.
    List(Vec<Cell>),
}

impl Cell {
    /// Null scalar cell.
    #[must_use]
    pub const fn null() -> Self {
        Cell::Value(Value::Null)
    }

    /// Whether this is the null scalar.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Value(Value::Null))
    }

    /// Converts the cell into a plain [`Value`]. Element references
    /// collapse to their numeric ids.
    #[must_use]
    pub fn as_value(&self) -> Value {
        match self {
            Cell::Value(v) => v.clone(),
            Cell::Vertex(id) => Value::Int64(id.as_u64() as i64),
            Cell::Edge(id) => Value::Int64(id.as_u64() as i64),
            Cell::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (PropertyKey::new(k.clone()), v.as_value()))
                    .collect(),
            ),
            Cell::List(items) => Value::List(items.iter().map(Cell::as_value).collect()),
        }
    }

    /// Canonical key string for dedup and grouping. Element references
    /// stay distinct from scalars that happen to share their id.
    #[must_use]
    pub fn group_key(&self) -> String {
        match self {
            Cell::Vertex(id) => format!("v:{id}"),
            Cell::Edge(id) => format!("e:{id}"),
            _ => format!("s:{:?}", self.as_value()),
        }
    }
}

impl From<Value> for Cell {
    fn from(v: Value) -> Self {
        Cell::Value(v)
    }
}

/// One row exchanged between operators: named cells in insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    columns: IndexMap<String, Cell>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a cell by column name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Cell> {
        self.columns.get(name)
    }

    /// Binds a cell, replacing any existing binding of the same name.
    pub fn set(&mut self, name: impl Into<String>, cell: Cell) {
        self.columns.insert(name.into(), cell);
    }

    /// Consuming variant of [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, cell: Cell) -> Self {
        self.set(name, cell);
        self
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Iterates over `(name, cell)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the record has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// The record's columns as one composite cell.
    #[must_use]
    pub fn as_map_cell(&self) -> Cell {
        Cell::Map(self.columns.clone())
    }
}

/// Named side-effect collections (`store`/`aggregate`/`cap`).
///
/// Shared across every operator compiled from one statement tree, so a
/// `cap` deep in the tree sees what a `store` upstream collected.
#[derive(Clone, Default)]
pub struct SideEffects {
    inner: Arc<Mutex<HashMap<String, Vec<Cell>>>>,
}

impl SideEffects {
    /// Creates an empty set of collections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a cell to the named collection.
    pub fn push(&self, name: &str, cell: Cell) {
        self.inner.lock().entry(name.to_string()).or_default().push(cell);
    }

    /// Snapshot of the named collection, empty when never written.
    #[must_use]
    pub fn snapshot(&self, name: &str) -> Vec<Cell> {
        self.inner.lock().get(name).cloned().unwrap_or_default()
    }
}

/// Everything an operator needs besides its input: the store, the graph
/// configuration, and the shared side-effect collections.
#[derive(Clone)]
pub struct ExecutionContext {
    /// The backing store.
    pub store: Arc<GraphStore>,
    /// Graph-wide configuration.
    pub config: GraphConfig,
    /// Shared side-effect collections.
    pub side_effects: SideEffects,
}

impl ExecutionContext {
    /// Creates a context with fresh side-effect collections.
    #[must_use]
    pub fn new(store: Arc<GraphStore>, config: GraphConfig) -> Self {
        Self {
            store,
            config,
            side_effects: SideEffects::new(),
        }
    }
}

/// Trait for physical operators.
pub trait Operator {
    /// Returns the next record, or `None` when exhausted.
    fn next(&mut self) -> Result<Option<Record>>;

    /// Resets the operator to its initial state.
    fn reset(&mut self);

    /// Returns the name of this operator for debugging.
    fn name(&self) -> &'static str;
}

/// A boxed operator in a pipeline.
pub type BoxedOperator = Box<dyn Operator>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_key_distinguishes_elements_from_scalars() {
        let v = Cell::Vertex(VertexId::new(3));
        let s = Cell::Value(Value::Int64(3));
        assert_ne!(v.group_key(), s.group_key());
    }

    #[test]
    fn test_record_binding_order() {
        let record = Record::new()
            .with("a", Cell::Value(Value::Int64(1)))
            .with("b", Cell::Value(Value::Int64(2)));
        let names: Vec<&str> = record.column_names().collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(record.get("b"), Some(&Cell::Value(Value::Int64(2))));
    }

    #[test]
    fn test_side_effects_shared() {
        let effects = SideEffects::new();
        let clone = effects.clone();
        clone.push("x", Cell::Value(Value::Int64(1)));
        assert_eq!(effects.snapshot("x").len(), 1);
        assert!(effects.snapshot("missing").is_empty());
    }
}
