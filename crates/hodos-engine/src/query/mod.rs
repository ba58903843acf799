//! Traversal-to-statement translation.

pub mod context;
pub mod predicate;
pub mod renderer;
pub mod repeat;
pub mod steps;
pub mod variable;

pub use context::{CxId, Translation, TranslationContext, VarId};
pub use predicate::Predicate;
pub use steps::{GraphTraversal, TraversalStep};
pub use variable::{Variable, VariableKind, VariableRole};
