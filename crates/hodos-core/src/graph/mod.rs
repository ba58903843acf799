//! The graph-over-document store and connection surface.
//!
//! - [`GraphStore`] - in-memory vertex/edge documents with adjacency lists
//!   that may be spilled out of the vertex document past a threshold.
//! - [`Connection`] / [`GraphConfig`] - graph-wide configuration the
//!   translator and executor consult (reverse-edge usage, edge-spill
//!   threshold, partition key).

mod connection;
mod store;

pub use connection::{Connection, GraphConfig, GraphType};
pub use store::{EdgeDoc, GraphStore, VertexDoc};

/// Direction of edge traversal relative to a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Follow outgoing edges.
    Out,
    /// Follow incoming edges.
    In,
    /// Follow edges in either direction.
    Both,
}
