//! Physical operators for statement-tree execution.
//!
//! The compiler wires these into a pull pipeline:
//!
//! - Scan: single-row seed and vertex-table scans
//! - Expand: match-path traversal with batched adjacency fetching
//! - Filter: where-clause predicates
//! - Project: select-list evaluation
//! - Tvf: the cross-applied table-valued functions
//! - Repeat: the loop runtime behind `repeat`

mod expand;
mod filter;
mod project;
mod repeat;
mod scan;
mod tvf;

pub use expand::ExpandMatchOperator;
pub use filter::FilterOperator;
pub use project::ProjectOperator;
pub use repeat::RepeatOperator;
pub use scan::{ScanVerticesOperator, SingleRowOperator};
pub use tvf::TvfOperator;
