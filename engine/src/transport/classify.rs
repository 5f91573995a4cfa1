//! Response classification
//!
//! Turns a raw controller envelope into an `OperationResult`. The rules are
//! exact; callers depend on every branch.
//!
//! - GET: `404 / "Not Found"` means the resource is absent, which is not a
//!   failure. `200` or `404` with `"OK"` means found. Anything else failed.
//! - POST, PUT, DELETE: an error indicator fails the write, as does any
//!   message other than `"OK"`. Otherwise the write succeeded and changed the
//!   controller.

use sdk::{OperationResult, ResponseEnvelope, Verb};

/// Message the controller uses for a successful operation
pub const MESSAGE_OK: &str = "OK";

/// Message the controller uses for an absent resource
pub const MESSAGE_NOT_FOUND: &str = "Not Found";

/// Classify a response according to the verb that produced it
pub fn classify(verb: Verb, response: &ResponseEnvelope) -> OperationResult {
    match verb {
        Verb::Get => classify_read(response),
        Verb::Post | Verb::Put | Verb::Delete => classify_write(response),
    }
}

fn classify_read(response: &ResponseEnvelope) -> OperationResult {
    let message = response.message.as_deref();

    if response.return_code == 404 && message == Some(MESSAGE_NOT_FOUND) {
        return OperationResult::read(false, true);
    }
    if matches!(response.return_code, 200 | 404) && message == Some(MESSAGE_OK) {
        return OperationResult::read(true, true);
    }
    OperationResult::read(false, false)
}

fn classify_write(response: &ResponseEnvelope) -> OperationResult {
    if response.has_error() {
        return OperationResult::write(false);
    }
    match response.message.as_deref() {
        Some(message) if message != MESSAGE_OK => OperationResult::write(false),
        _ => OperationResult::write(true),
    }
}
