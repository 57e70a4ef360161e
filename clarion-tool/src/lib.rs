//! Tool registry, middleware pipeline, and execution engine.
//!
//! [`ToolRegistry`] holds native tools behind a composable middleware chain.
//! [`ToolExecutionEngine`] resolves model-requested calls against the
//! registry first, then against remote tool services addressed by a name
//! prefix, and normalizes every outcome into a
//! [`ToolExecutionResult`](clarion_types::ToolExecutionResult).
#![deny(missing_docs)]

pub mod builtin;
pub mod engine;
pub mod middleware;
pub mod registry;
pub mod remote;

pub use builtin::*;
pub use engine::*;
pub use middleware::*;
pub use registry::*;
pub use remote::*;
