//! Request sender trait
//!
//! A request sender is the only component that touches the network. It sends
//! one `OperationRequest` and hands back the controller's raw envelope; all
//! classification and retrying happens in the engine's transport coordinator.

use crate::errors::ReconcileError;
use crate::types::{OperationRequest, ResponseEnvelope};
use async_trait::async_trait;

/// Trait that all request senders must implement
#[async_trait]
pub trait RequestSender: Send + Sync {
    /// Returns the name of the sender (e.g., "http")
    fn name(&self) -> &str;

    /// Send one request and return the controller's response envelope
    ///
    /// A non-success envelope (4xx/5xx) is still `Ok`. `Err` is reserved for
    /// failures below the envelope, such as a refused connection.
    async fn send(&self, request: &OperationRequest) -> Result<ResponseEnvelope, ReconcileError>;
}
