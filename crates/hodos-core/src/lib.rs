//! # hodos-core
//!
//! The storage and execution layer of Hodos.
//!
//! This crate holds the pieces the translation pipeline consumes and
//! produces:
//!
//! - [`graph`] - the in-memory graph-over-document store and the
//!   [`Connection`](graph::Connection) surface exposing graph-wide
//!   configuration.
//! - [`statement`] - the relational statement-tree IR the translator
//!   renders into: select blocks, cross-applied table-valued-function
//!   calls, match paths, and boolean predicates.
//! - [`execution`] - the pull-based physical operators, the expression
//!   evaluator, and the statement-tree compiler producing an
//!   [`Operator`](execution::Operator) that yields one
//!   [`Record`](execution::Record) per pull.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod execution;
pub mod graph;
pub mod statement;

pub use graph::{Connection, Direction, GraphConfig, GraphStore};
pub use statement::{SelectQueryBlock, StatementTree};
