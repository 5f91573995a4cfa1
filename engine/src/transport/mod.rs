//! Transport Coordinator
//!
//! Executes one operation against the controller through a pluggable
//! `RequestSender`, with check-mode simulation and a bounded retry loop.
//!
//! # Retry
//!
//! In normal mode the coordinator sends, classifies, and on failure sleeps
//! for `send_interval` seconds and charges that interval against the timeout
//! budget. It stops on the first success or once the budget is no longer
//! positive. With `send_interval = 5` and `timeout = 12` a failing operation
//! is attempted three times (budget 12, 7, 2). `fast_test` skips the sleeps
//! but keeps the same accounting.
//!
//! # Check mode
//!
//! In check mode nothing is sent. A fixed envelope (`200`, `"OK"`) is
//! classified exactly like a real one, so a dry run is deterministic.
//!
//! # Serial lane
//!
//! `commit` takes `&mut self`: one coordinator never has two operations in
//! flight. Use one coordinator per lane.

use sdk::{
    Fields, OperationRequest, OperationResult, ReconcileError, RequestSender, ResponseEnvelope,
    Verb,
};
use serde_json::Value;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod classify;
pub mod http;

pub use classify::classify;
pub use http::HttpSender;

/// Placeholder `DATA` of every simulated check-mode response
pub const SIMULATED_DATA: &str = "[simulated-check-mode-response:Success]";

/// Largest accepted interval or timeout, in seconds
pub const MAX_SECONDS: u64 = i64::MAX as u64;

/// Validated retry and simulation settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    send_interval: u64,
    timeout: u64,
    check_mode: bool,
    fast_test: bool,
}

impl TransportSettings {
    /// Create settings with the given interval and timeout budget (seconds)
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if either value is zero or above [`MAX_SECONDS`].
    /// A zero interval would never exhaust the budget.
    pub fn new(send_interval: u64, timeout: u64) -> Result<Self, ReconcileError> {
        validate_seconds("send_interval", send_interval)?;
        validate_timeout(timeout)?;

        Ok(Self {
            send_interval,
            timeout,
            check_mode: false,
            fast_test: false,
        })
    }

    pub fn with_check_mode(mut self, check_mode: bool) -> Self {
        self.check_mode = check_mode;
        self
    }

    pub fn with_fast_test(mut self, fast_test: bool) -> Self {
        self.fast_test = fast_test;
        self
    }

    pub fn send_interval(&self) -> u64 {
        self.send_interval
    }

    pub fn timeout(&self) -> u64 {
        self.timeout
    }

    pub fn check_mode(&self) -> bool {
        self.check_mode
    }

    pub fn fast_test(&self) -> bool {
        self.fast_test
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            send_interval: 5,
            timeout: 300,
            check_mode: false,
            fast_test: false,
        }
    }
}

fn validate_timeout(timeout: u64) -> Result<(), ReconcileError> {
    validate_seconds("timeout", timeout)
}

fn validate_seconds(field: &str, seconds: u64) -> Result<(), ReconcileError> {
    if seconds == 0 {
        return Err(ReconcileError::invalid_value(
            field,
            "must be at least 1 second",
        ));
    }
    if seconds > MAX_SECONDS {
        return Err(ReconcileError::invalid_value(
            field,
            format!("must be at most {} seconds", MAX_SECONDS),
        ));
    }
    Ok(())
}

/// Coordinates sending, retrying and classifying one operation at a time
pub struct Coordinator {
    sender: Option<Arc<dyn RequestSender>>,
    path: Option<String>,
    verb: Option<Verb>,
    payload: Option<Value>,
    settings: TransportSettings,

    response_current: Option<ResponseEnvelope>,
    result_current: Option<OperationResult>,
    responses: Vec<ResponseEnvelope>,
    results: Vec<OperationResult>,
    attempt_budgets: Vec<u64>,
}

impl Coordinator {
    /// Create a coordinator without a sender. `commit` fails until one is set
    pub fn new(settings: TransportSettings) -> Self {
        Self {
            sender: None,
            path: None,
            verb: None,
            payload: None,
            settings,
            response_current: None,
            result_current: None,
            responses: Vec::new(),
            results: Vec::new(),
            attempt_budgets: Vec::new(),
        }
    }

    pub fn with_sender(sender: Arc<dyn RequestSender>, settings: TransportSettings) -> Self {
        let mut coordinator = Self::new(settings);
        coordinator.sender = Some(sender);
        coordinator
    }

    pub fn set_sender(&mut self, sender: Arc<dyn RequestSender>) {
        self.sender = Some(sender);
    }

    /// Set path, verb and payload from one request
    pub fn configure(&mut self, request: OperationRequest) {
        self.path = Some(request.path);
        self.verb = Some(request.verb);
        self.payload = request.payload;
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = Some(path.into());
    }

    pub fn set_verb(&mut self, verb: Verb) {
        self.verb = Some(verb);
    }

    pub fn set_payload(&mut self, payload: Option<Value>) {
        self.payload = payload;
    }

    /// Set the timeout budget in seconds
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` for a zero budget or one above [`MAX_SECONDS`].
    pub fn set_timeout(&mut self, timeout: u64) -> Result<(), ReconcileError> {
        validate_timeout(timeout)?;
        self.settings.timeout = timeout;
        Ok(())
    }

    pub fn set_check_mode(&mut self, check_mode: bool) {
        self.settings.check_mode = check_mode;
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Most recent raw response
    pub fn response_current(&self) -> Option<&ResponseEnvelope> {
        self.response_current.as_ref()
    }

    /// Most recent classified result
    pub fn result_current(&self) -> Option<&OperationResult> {
        self.result_current.as_ref()
    }

    /// Every final response of this session, oldest first
    pub fn responses(&self) -> &[ResponseEnvelope] {
        &self.responses
    }

    /// Every classified result of this session, oldest first
    pub fn results(&self) -> &[OperationResult] {
        &self.results
    }

    /// Budget remaining before each attempt of the last commit
    pub fn last_attempt_budgets(&self) -> &[u64] {
        &self.attempt_budgets
    }

    /// Execute the configured operation
    ///
    /// Returns the classified result of the last attempt. An exhausted retry
    /// budget is reported through `success = false`, not as an error.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the sender, path or verb is unset.
    pub async fn commit(&mut self) -> Result<OperationResult, ReconcileError> {
        let sender = self
            .sender
            .clone()
            .ok_or_else(|| ReconcileError::Config("request sender is not set".to_string()))?;
        let path = self
            .path
            .clone()
            .ok_or_else(|| ReconcileError::Config("path is not set".to_string()))?;
        let verb = self
            .verb
            .ok_or_else(|| ReconcileError::Config("verb is not set".to_string()))?;

        let request = OperationRequest {
            path,
            verb,
            payload: self.payload.clone(),
        };

        self.attempt_budgets.clear();

        let (response, result) = if self.settings.check_mode {
            debug!("Check mode: simulating {} {}", verb, request.path);
            let response = simulated_response();
            let result = classify(verb, &response);
            (response, result)
        } else {
            self.send_with_retry(sender.as_ref(), &request).await?
        };

        self.responses.push(response.clone());
        self.results.push(result);
        self.response_current = Some(response);
        self.result_current = Some(result);

        Ok(result)
    }

    async fn send_with_retry(
        &mut self,
        sender: &dyn RequestSender,
        request: &OperationRequest,
    ) -> Result<(ResponseEnvelope, OperationResult), ReconcileError> {
        let interval = self.settings.send_interval;
        let mut budget = self.settings.timeout;
        let mut last = None;

        while budget > 0 {
            self.attempt_budgets.push(budget);

            let response = match sender.send(request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(
                        "Sender {} failed on {} {}: {}",
                        sender.name(),
                        request.verb,
                        request.path,
                        e
                    );
                    failed_envelope(&e)
                }
            };
            let result = classify(request.verb, &response);
            let success = result.success;
            last = Some((response, result));

            if success {
                break;
            }

            debug!(
                "{} {} unsuccessful (budget {}s), retrying in {}s",
                request.verb, request.path, budget, interval
            );
            if !self.settings.fast_test {
                tokio::time::sleep(Duration::from_secs(interval)).await;
            }
            budget = budget.saturating_sub(interval);
        }

        let (response, result) = last.ok_or_else(|| {
            ReconcileError::Config("timeout budget allowed no attempts".to_string())
        })?;

        if result.success {
            info!(
                "{} {} succeeded after {} attempt(s)",
                request.verb,
                request.path,
                self.attempt_budgets.len()
            );
        } else {
            warn!(
                "{} {} still unsuccessful after {} attempt(s): {}",
                request.verb,
                request.path,
                self.attempt_budgets.len(),
                response.message.as_deref().unwrap_or("no message")
            );
        }

        Ok((response, result))
    }

    /// Temporarily force a live read
    ///
    /// Check mode is switched off and the timeout replaced for as long as the
    /// returned guard lives. Both are restored when it drops, on every exit
    /// path including early returns through `?`.
    pub fn force_live(&mut self, timeout: u64) -> LiveRead<'_> {
        let saved = self.settings;
        self.settings.check_mode = false;
        self.settings.timeout = timeout.max(1);
        LiveRead {
            coordinator: self,
            saved,
        }
    }
}

/// Scoped override created by [`Coordinator::force_live`]
pub struct LiveRead<'a> {
    coordinator: &'a mut Coordinator,
    saved: TransportSettings,
}

impl Deref for LiveRead<'_> {
    type Target = Coordinator;

    fn deref(&self) -> &Coordinator {
        self.coordinator
    }
}

impl DerefMut for LiveRead<'_> {
    fn deref_mut(&mut self) -> &mut Coordinator {
        self.coordinator
    }
}

impl Drop for LiveRead<'_> {
    fn drop(&mut self) {
        self.coordinator.settings.check_mode = self.saved.check_mode;
        self.coordinator.settings.timeout = self.saved.timeout;
    }
}

/// The envelope every check-mode commit produces
pub fn simulated_response() -> ResponseEnvelope {
    ResponseEnvelope::new(200, classify::MESSAGE_OK, Value::from(SIMULATED_DATA))
}

/// Envelope recorded when the sender could not produce one
fn failed_envelope(error: &ReconcileError) -> ResponseEnvelope {
    let text = error.to_string();
    ResponseEnvelope {
        return_code: 0,
        message: Some(text.clone()),
        data: Value::Object(Fields::new()),
        error: Some(Value::from(text)),
    }
}
