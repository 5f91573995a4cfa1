//! Trellis SDK
//!
//! Shared contract between the reconciliation engine and request senders:
//! the error taxonomy, the controller's wire types and the sender trait.

/// Error types and handling
pub mod errors;

/// Wire types: verbs, requests, response envelopes, classified results
pub mod types;

/// Request sender trait
pub mod sender;

// Re-export commonly used types
pub use errors::{ErrorExt, ReconcileError};
pub use sender::RequestSender;
pub use types::{Fields, OperationRequest, OperationResult, ResponseEnvelope, Verb};
