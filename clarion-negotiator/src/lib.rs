#![deny(missing_docs)]
//! Adaptive tool negotiation for clarion.
//!
//! Some backends reject a whole request when a single tool schema is not to
//! their liking. [`AdaptiveToolNegotiator`] wraps a [`ChatTransport`]: when
//! a request fails with a tool validation error it removes the offending
//! tool, records it in a per-provider [`Blacklist`], and retries with the
//! rest. Later requests to the same provider skip blacklisted tools up
//! front.
//!
//! Rejections are classified by a swappable [`ErrorClassifier`]; the
//! default [`SignatureClassifier`] reads structured error fields first and
//! falls back to known message signatures.
//!
//! [`ChatTransport`]: clarion_types::ChatTransport

pub mod blacklist;
pub mod classify;
pub mod negotiator;

pub use blacklist::Blacklist;
pub use classify::{ErrorClassifier, SignatureClassifier};
pub use negotiator::{AdaptiveToolNegotiator, Negotiated, NegotiatorConfig};
