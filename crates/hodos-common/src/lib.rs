//! # hodos-common
//!
//! Foundation layer for Hodos: types and utilities.
//!
//! This crate provides the fundamental building blocks used by all other
//! Hodos crates. It has no internal dependencies and should be kept minimal.
//!
//! ## Modules
//!
//! - [`types`] - Core type definitions (VertexId, EdgeId, Value, etc.)
//! - [`utils`] - Utility functions and helpers (errors)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod types;
pub mod utils;

// Re-export commonly used types at crate root
pub use types::{EdgeId, PropertyKey, Value, VertexId};
pub use utils::error::{Error, Result};
