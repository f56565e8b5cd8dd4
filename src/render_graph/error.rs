//! Render graph error types

use crate::backend::traits::BackendError;
use crate::render_graph::pass::PassError;
use thiserror::Error;

/// Errors reported by [`RenderGraph::compile`](super::RenderGraph::compile)
/// and [`RenderGraph::execute`](super::RenderGraph::execute).
///
/// Every variant leaves the graph usable: a failed compile keeps the previous
/// compiled state, a failed execute only aborts the current frame.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Pass at index {index} has an empty name")]
    EmptyPassName { index: usize },

    #[error("More than one pass is named '{0}'")]
    DuplicatePassName(String),

    #[error("Dependencies were declared for unknown pass '{0}'")]
    UnknownPass(String),

    #[error("Resource '{name}' (id {id}) has an invalid descriptor: {reason}")]
    InvalidResourceDesc { id: u32, name: String, reason: String },

    #[error("{context} references unknown resource id {id}")]
    InvalidHandle { context: String, id: u32 },

    #[error("Cyclic dependency between passes: {}", passes.join(", "))]
    CyclicDependency { passes: Vec<String> },

    #[error("Failed to create resource '{resource}': {source}")]
    ResourceCreation {
        resource: String,
        #[source]
        source: BackendError,
    },

    #[error("Pass '{pass}' failed: {source}")]
    Execution {
        pass: String,
        #[source]
        source: PassError,
    },

    #[error("Render graph has not been compiled")]
    NotCompiled,
}

impl GraphError {
    /// Declaration mistakes the caller can fix and compile again
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            GraphError::EmptyPassName { .. }
                | GraphError::DuplicatePassName(_)
                | GraphError::UnknownPass(_)
                | GraphError::InvalidResourceDesc { .. }
                | GraphError::InvalidHandle { .. }
                | GraphError::CyclicDependency { .. }
        )
    }
}
