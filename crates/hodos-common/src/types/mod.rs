//! Core type definitions for Hodos.
//!
//! This module contains all fundamental types used throughout the
//! translation pipeline and the document store:
//! - Identifier types ([`VertexId`], [`EdgeId`])
//! - Property types ([`Value`], [`PropertyKey`])

mod id;
mod value;

pub use id::{EdgeId, VertexId};
pub use value::{PropertyKey, Value};
