//! Render Graph System
//!
//! A declarative system for defining render passes as a directed acyclic graph (DAG).
//! Passes declare what they read and write; the graph derives execution order,
//! culls passes that feed no output, computes resource lifetimes, aliases
//! transient memory and inserts state barriers.

pub mod builder;
mod compiler;
pub mod error;
pub mod graph;
pub mod pass;
pub mod pool;
pub mod resource;

pub use builder::GraphBuilder;
pub use compiler::required_state;
pub use error::GraphError;
pub use graph::*;
pub use pass::*;
pub use pool::{BackingId, ResourcePool, ResourcePoolStats};
pub use resource::*;
