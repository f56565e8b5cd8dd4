//! Backend abstraction layer
//!
//! The interfaces the render graph needs from a graphics API, plus a dummy
//! implementation for headless runs and tests.

pub mod dummy;
pub mod traits;
pub mod types;

pub use traits::*;
pub use types::*;
