//! Core types and traits shared by every clarion crate.
//!
//! This crate defines the conversation data model ([`Message`],
//! [`ToolDefinition`], [`ToolCallRequest`], [`ToolExecutionResult`]), the
//! streaming delta model ([`DeltaEvent`], [`StreamHandle`]), the error
//! taxonomy, and the seams the rest of the workspace plugs into:
//! [`ChatTransport`], [`Tool`]/[`ToolDyn`], [`BlacklistStore`] and
//! [`RemoteToolService`].
#![deny(missing_docs)]

pub mod error;
pub mod stream;
pub mod traits;
pub mod types;

pub use error::*;
pub use stream::*;
pub use traits::*;
pub use types::*;
