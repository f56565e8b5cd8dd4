//! Frame Graph - a render graph compiler and executor
//!
//! Rendering code declares passes and the resources they read and write;
//! the graph takes care of the rest.
//!
//! # Features
//! - Deterministic pass scheduling (topological sort, stable tie-break)
//! - Culling of passes that contribute to no final output
//! - Resource lifetime analysis and transient memory aliasing
//! - Automatic resource state barriers
//! - Imported (external) resources that the graph never owns
//! - Debug dump and Graphviz export
//!
//! # Example
//! ```
//! use frame_graph::backend::dummy::{DummyContext, DummyDevice};
//! use frame_graph::render_graph::*;
//! use std::sync::Arc;
//!
//! struct Clear {
//!     target: ResourceHandle,
//! }
//!
//! impl RenderPass for Clear {
//!     fn name(&self) -> &str {
//!         "Clear"
//!     }
//!
//!     fn setup(&mut self, ctx: &mut PassSetupContext) {
//!         ctx.write(&self.target);
//!     }
//!
//!     fn execute(&self, ctx: &mut PassExecuteData) -> Result<(), PassError> {
//!         ctx.texture(&self.target)?;
//!         Ok(())
//!     }
//! }
//!
//! let mut graph = RenderGraph::new(Arc::new(DummyDevice::new()));
//! let mut builder = graph.builder();
//! let color = builder.create_color_target("Color", 1280, 720);
//! builder.set_final_output(&color);
//! drop(builder);
//!
//! graph.add_pass(Clear { target: color });
//! graph.compile().unwrap();
//! graph.execute(&mut DummyContext::new()).unwrap();
//! assert_eq!(graph.stats().executed_passes, 1);
//! ```

pub mod backend;
pub mod render_graph;

pub use render_graph::{GraphError, GraphSettings, GraphStats, RenderGraph};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
