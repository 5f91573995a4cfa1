//! Trellis Engine Library
//!
//! Declarative reconciliation of controller-managed network resources.
//! Used by callers that embed the engine and by the integration tests.

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// Transport coordinator: check mode, retry, classification
pub mod transport;

/// Outcome aggregator
pub mod results;

/// Reconciliation planner and resource-kind descriptors
pub mod planner;

/// Session orchestration
pub mod reconciler;

pub use reconciler::{Reconciler, State};
pub use results::FinalReport;
