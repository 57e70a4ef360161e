//! OpenAI-compatible chat transport for clarion.
//!
//! Implements [`ChatTransport`] for any backend that speaks the
//! [Chat Completions API](https://platform.openai.com/docs/api-reference/chat):
//! OpenAI itself, Ollama's `/v1` endpoint, llama.cpp, LM Studio and most
//! proxies.
//!
//! # Usage
//!
//! ```no_run
//! use clarion_provider_openai::OpenAiCompat;
//!
//! let openai = OpenAiCompat::openai("sk-...").model("gpt-4o-mini");
//! let local = OpenAiCompat::ollama().model("llama3.2");
//! ```
//!
//! # Features
//!
//! - Unary and streaming requests
//! - SSE (`data: {...}`) and bare NDJSON stream frames
//! - Malformed stream lines are skipped; in-stream `error` payloads end the stream
//! - Cooperative cancellation via [`CancellationToken`](tokio_util::sync::CancellationToken)
//! - Error mapping from HTTP status codes to [`ProviderError`] variants
#![deny(missing_docs)]

pub mod client;
pub(crate) mod error;
pub mod mapping;
pub mod streaming;

pub use client::OpenAiCompat;

// Re-export clarion-types for convenience
pub use clarion_types::{ChatTransport, DeltaEvent, ProviderError, StreamHandle};
