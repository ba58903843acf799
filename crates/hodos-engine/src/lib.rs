//! # hodos-engine
//!
//! The translation pipeline: a fluent traversal builder whose step chain
//! is lowered, scope by scope, into the relational statement tree defined
//! in `hodos-core`, then compiled into a pull-based iterator.
//!
//! The pipeline in order:
//!
//! - [`query::predicate`] - the predicate algebra (`eq`, `between`,
//!   `within`, compounds, total negation).
//! - [`query::variable`] / [`query::context`] - typed traversal
//!   variables and the compilation scopes that own them.
//! - [`query::steps`] - the [`GraphTraversal`] builder and the per-step
//!   lowering rules.
//! - [`query::renderer`] - scope to statement tree, deterministic and
//!   idempotent.
//! - [`execution`] - the adapter that compiles a rendered tree and
//!   drives it, with regular or batched GraphSON output.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod execution;
pub mod query;

pub use execution::{OutputFormat, TraversalResult};
pub use query::predicate::Predicate;
pub use query::steps::GraphTraversal;
