#![deny(missing_docs)]
//! The agentic loop for clarion.
//!
//! [`AgentLoop`] drives one user turn to completion: it sends the
//! conversation through an [`AdaptiveToolNegotiator`], streams text to a
//! caller-supplied callback, assembles tool calls from stream fragments
//! with [`ToolCallAssembler`], runs them on a [`ToolExecutionEngine`], and
//! follows up until the model stops asking for tools, the iteration budget
//! runs out, or the caller presses stop.
//!
//! Backends without native tool calling go through
//! [`StructuredOutputFallback`], which asks for a JSON answer describing
//! the calls instead.
//!
//! [`AdaptiveToolNegotiator`]: clarion_negotiator::AdaptiveToolNegotiator
//! [`ToolExecutionEngine`]: clarion_tool::ToolExecutionEngine

pub mod assembler;
pub mod config;
pub mod loop_impl;
pub mod structured;

pub use assembler::ToolCallAssembler;
pub use config::{AgentConfig, StructuredMode, ToolMode};
pub use loop_impl::{
    AgentIterationRecord, AgentLoop, BUDGET_EXHAUSTED_MARKER, FinalMessage, StopHandle, TurnInput,
    TurnStatus,
};
pub use structured::{StructuredAnswer, StructuredOutputFallback};
