//! Connection and graph-wide configuration.

use super::GraphStore;
use std::sync::Arc;

/// How vertex documents are laid out in the backing collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphType {
    /// One collection, no partitioning.
    #[default]
    Unpartitioned,
    /// Vertices are distributed by a partition key; batched adjacency
    /// fetches must carry the key (or an absent-partition marker).
    Partitioned,
}

/// Graph-wide configuration consulted by translation and execution.
///
/// Mirrors what the connection to the backing store exposes: whether
/// reverse edges are materialized, the threshold past which adjacency
/// lists are spilled out of the vertex document, and the partition key.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Layout of the backing collection.
    pub graph_type: GraphType,
    /// Whether incoming edges are materialized per vertex. When false,
    /// `in()`-style expansion falls back to scanning outgoing adjacency.
    pub use_reverse_edges: bool,
    /// Number of edges past which a vertex's adjacency list is spilled
    /// into separate edge documents and must be fetched on demand.
    pub edge_spill_threshold: usize,
    /// Property name used as the partition key, if any.
    pub partition_key: Option<String>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            graph_type: GraphType::Unpartitioned,
            use_reverse_edges: true,
            edge_spill_threshold: usize::MAX,
            partition_key: None,
        }
    }
}

impl GraphConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the graph layout.
    #[must_use]
    pub fn with_graph_type(mut self, graph_type: GraphType) -> Self {
        self.graph_type = graph_type;
        self
    }

    /// Enables or disables materialized reverse edges.
    #[must_use]
    pub fn with_reverse_edges(mut self, enabled: bool) -> Self {
        self.use_reverse_edges = enabled;
        self
    }

    /// Sets the edge-spill threshold.
    #[must_use]
    pub fn with_edge_spill_threshold(mut self, threshold: usize) -> Self {
        self.edge_spill_threshold = threshold;
        self
    }

    /// Sets the partition key property name.
    #[must_use]
    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self.graph_type = GraphType::Partitioned;
        self
    }
}

/// A connection to a graph: the store plus its configuration.
///
/// Cheap to clone; the store is shared.
#[derive(Clone)]
pub struct Connection {
    store: Arc<GraphStore>,
    config: GraphConfig,
}

impl Connection {
    /// Opens a connection over the given store.
    #[must_use]
    pub fn new(store: Arc<GraphStore>, config: GraphConfig) -> Self {
        Self { store, config }
    }

    /// Opens a connection with default configuration.
    #[must_use]
    pub fn in_memory() -> Self {
        let config = GraphConfig::default();
        let store = Arc::new(GraphStore::new(config.edge_spill_threshold));
        Self { store, config }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// The graph configuration.
    #[must_use]
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = GraphConfig::new()
            .with_reverse_edges(false)
            .with_edge_spill_threshold(8)
            .with_partition_key("region");
        assert!(!config.use_reverse_edges);
        assert_eq!(config.edge_spill_threshold, 8);
        assert_eq!(config.graph_type, GraphType::Partitioned);
        assert_eq!(config.partition_key.as_deref(), Some("region"));
    }
}
