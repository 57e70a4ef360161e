#![deny(missing_docs)]
//! # clarion: umbrella crate
//!
//! A single import surface for clarion. Re-exports the member crates
//! behind feature flags, plus a `prelude` for the common path:
//!
//! ```ignore
//! use clarion::prelude::*;
//! use std::sync::Arc;
//!
//! let blacklist = Arc::new(Blacklist::new(Arc::new(MemoryBlacklistStore::new())));
//! let negotiator = AdaptiveToolNegotiator::new(OpenAiCompat::from_env(), blacklist);
//! let engine = ToolExecutionEngine::new(Arc::new(registry));
//! let agent = AgentLoop::new(negotiator, engine, AgentConfig::default());
//! let reply = agent.run_turn(TurnInput::new("", "hello"), &mut |c| print!("{c}")).await;
//! ```

#[cfg(feature = "core")]
pub use clarion_loop;
#[cfg(feature = "core")]
pub use clarion_negotiator;
#[cfg(feature = "provider-openai")]
pub use clarion_provider_openai;
#[cfg(feature = "state-fs")]
pub use clarion_state_fs;
#[cfg(feature = "state-memory")]
pub use clarion_state_memory;
#[cfg(feature = "core")]
pub use clarion_tool;
#[cfg(feature = "core")]
pub use clarion_types;

/// Happy-path imports for wiring an agent.
pub mod prelude {
    #[cfg(feature = "core")]
    pub use clarion_types::{
        BlacklistStore, Capabilities, ChatOptions, ChatRequest, ChatResponse, ChatTransport,
        Message, NegotiationError, ProviderError, Role, StreamHandle, Tool, ToolCallRequest,
        ToolContext, ToolDefinition, ToolDyn, ToolError, ToolExecutionResult, ToolParameter,
        ToolResultPayload,
    };

    #[cfg(feature = "core")]
    pub use clarion_tool::{OutputFormatter, SchemaValidator, ToolExecutionEngine, ToolRegistry};

    #[cfg(feature = "core")]
    pub use clarion_negotiator::{AdaptiveToolNegotiator, Blacklist, NegotiatorConfig};

    #[cfg(feature = "core")]
    pub use clarion_loop::{
        AgentConfig, AgentLoop, FinalMessage, StopHandle, StructuredMode, ToolMode, TurnInput,
        TurnStatus,
    };

    #[cfg(feature = "provider-openai")]
    pub use clarion_provider_openai::OpenAiCompat;

    #[cfg(feature = "state-memory")]
    pub use clarion_state_memory::MemoryBlacklistStore;

    #[cfg(feature = "state-fs")]
    pub use clarion_state_fs::FsBlacklistStore;
}
