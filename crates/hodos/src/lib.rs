//! # Hodos
//!
//! A Gremlin-style traversal compiler over a graph-in-documents store.
//!
//! Traversals are built fluently with [`GraphTraversal`], lowered to a
//! relational statement tree, compiled into a pull-based iterator, and
//! driven lazily. Start with [`Graph`].
//!
//! ## Quick Start
//!
//! ```rust
//! use hodos::predicate::gt;
//! use hodos::{Graph, OutputFormat, Value};
//!
//! let graph = Graph::in_memory();
//! let store = graph.connection().store();
//! let marko = store.add_vertex(
//!     "person",
//!     [("name", Value::from("marko")), ("age", Value::from(29i64))],
//! );
//! let lop = store.add_vertex("software", [("name", Value::from("lop"))]);
//! store.add_edge("created", marko, lop, [("weight", Value::from(0.4))]);
//!
//! let names: Result<Vec<_>, _> = graph
//!     .traversal()
//!     .v()
//!     .has("age", gt(25i64))
//!     .out(["created"])
//!     .values(["name"])
//!     .run(graph.connection(), OutputFormat::Regular)?
//!     .collect();
//! assert_eq!(names?, vec!["lop".to_string()]);
//! # Ok::<(), hodos::Error>(())
//! ```

#![warn(missing_docs)]

use std::sync::Arc;

// Core types: ids, property values, errors.
pub use hodos_common::types::{EdgeId, PropertyKey, Value, VertexId};
pub use hodos_common::{Error, Result};

// The store and its connection surface.
pub use hodos_core::graph::{Connection, GraphConfig, GraphStore, GraphType};
pub use hodos_core::statement::StatementTree;

// The traversal surface.
pub use hodos_engine::query::predicate;
pub use hodos_engine::{GraphTraversal, OutputFormat, Predicate, TraversalResult};

/// An opened graph: a connection plus the traversal entry point.
#[derive(Clone)]
pub struct Graph {
    connection: Connection,
}

impl Graph {
    /// Opens an in-memory graph with default configuration.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            connection: Connection::in_memory(),
        }
    }

    /// Opens a graph over an existing store.
    #[must_use]
    pub fn open(store: Arc<GraphStore>, config: GraphConfig) -> Self {
        Self {
            connection: Connection::new(store, config),
        }
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Starts an empty traversal chain.
    #[must_use]
    pub fn traversal(&self) -> GraphTraversal {
        GraphTraversal::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_traversal_round_trip() {
        let graph = Graph::in_memory();
        let store = graph.connection().store();
        let a = store.add_vertex("person", [("name", Value::from("alice"))]);
        let b = store.add_vertex("person", [("name", Value::from("bob"))]);
        store.add_edge("knows", a, b, [] as [(&str, Value); 0]);

        let rows: Result<Vec<String>> = graph
            .traversal()
            .v()
            .out(["knows"])
            .values(["name"])
            .run(graph.connection(), OutputFormat::Regular)
            .unwrap()
            .collect();
        assert_eq!(rows.unwrap(), vec!["bob".to_string()]);
    }
}
