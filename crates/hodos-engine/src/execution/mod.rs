//! Compiling a rendered statement tree and driving it to output rows.

mod adapter;

pub use adapter::{OutputFormat, TraversalResult};
