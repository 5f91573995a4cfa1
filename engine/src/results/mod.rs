//! Outcome Aggregator
//!
//! Records one `TaskResultRecord` per logical sub-operation and reduces the
//! session into a single pass/fail/changed report.
//!
//! Usage per task: record the pending diff, response, result and metadata,
//! then call `register_task_result`. Registration stamps the next sequence
//! number onto all four, appends the record and clears the pending values.
//! `build_final_result` consumes the aggregator.

use sdk::Fields;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Key under which the sequence number is injected into every recorded map
pub const SEQUENCE_NUMBER: &str = "sequence_number";

/// What kind of operation a task performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Query,
    #[default]
    Update,
    Delete,
    Save,
    Deploy,
}

impl OperationType {
    pub fn as_str(&self) -> &str {
        match self {
            OperationType::Query => "query",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
            OperationType::Save => "save",
            OperationType::Deploy => "deploy",
        }
    }

    /// Read-only operations never change the controller
    pub fn is_read_only(&self) -> bool {
        matches!(self, OperationType::Query)
    }
}

/// One registered task, immutable once appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResultRecord {
    pub sequence_number: u64,
    pub action: String,
    pub check_mode: bool,
    pub state: String,
    pub operation_type: OperationType,
    pub changed: bool,
    pub failed: bool,
    pub diff: Fields,
    pub response: Fields,
    pub result: Fields,
    pub metadata: Fields,
}

/// Session outcome handed back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub changed: bool,
    pub failed: bool,
    pub diff: Vec<Fields>,
    pub response: Vec<Fields>,
    pub result: Vec<Fields>,
    pub metadata: Vec<Fields>,
}

/// Single-session accumulator of task results
#[derive(Debug, Default)]
pub struct Results {
    check_mode: bool,
    action: String,
    state: String,
    operation_type: OperationType,

    diff_current: Fields,
    response_current: Fields,
    result_current: Fields,
    metadata_current: Fields,

    task_sequence_number: u64,
    records: Vec<TaskResultRecord>,
    changed: BTreeSet<bool>,
    failed: BTreeSet<bool>,
}

impl Results {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session-wide check mode. A check-mode session never reports a change
    pub fn set_check_mode(&mut self, check_mode: bool) {
        self.check_mode = check_mode;
    }

    pub fn set_action(&mut self, action: impl Into<String>) {
        self.action = action.into();
    }

    pub fn set_state(&mut self, state: impl Into<String>) {
        self.state = state.into();
    }

    pub fn set_operation_type(&mut self, operation_type: OperationType) {
        self.operation_type = operation_type;
    }

    pub fn record_diff(&mut self, diff: Fields) {
        self.diff_current = diff;
    }

    pub fn record_response(&mut self, response: Fields) {
        self.response_current = response;
    }

    pub fn record_result(&mut self, result: Fields) {
        self.result_current = result;
    }

    pub fn record_metadata(&mut self, metadata: Fields) {
        self.metadata_current = metadata;
    }

    pub fn records(&self) -> &[TaskResultRecord] {
        &self.records
    }

    /// Whether any registered task failed so far
    pub fn any_failed(&self) -> bool {
        self.failed.contains(&true)
    }

    /// Register the pending values as one task
    ///
    /// Returns the sequence number assigned to the task.
    pub fn register_task_result(&mut self) -> u64 {
        self.task_sequence_number += 1;
        let sequence_number = self.task_sequence_number;

        let mut diff = std::mem::take(&mut self.diff_current);
        let mut response = std::mem::take(&mut self.response_current);
        let mut result = std::mem::take(&mut self.result_current);
        let mut metadata = std::mem::take(&mut self.metadata_current);

        let changed = self.task_changed(&diff, &result);
        let failed = self.task_failed(&result);

        for map in [&mut diff, &mut response, &mut result] {
            map.insert(SEQUENCE_NUMBER.to_string(), Value::from(sequence_number));
        }
        metadata.insert("action".to_string(), Value::from(self.action.as_str()));
        metadata.insert("check_mode".to_string(), Value::from(self.check_mode));
        metadata.insert("state".to_string(), Value::from(self.state.as_str()));
        metadata.insert(SEQUENCE_NUMBER.to_string(), Value::from(sequence_number));

        debug!(
            "Registered task {} ({}): changed={}, failed={}",
            sequence_number, self.action, changed, failed
        );

        self.changed.insert(changed);
        self.failed.insert(failed);
        self.records.push(TaskResultRecord {
            sequence_number,
            action: self.action.clone(),
            check_mode: self.check_mode,
            state: self.state.clone(),
            operation_type: self.operation_type,
            changed,
            failed,
            diff,
            response,
            result,
            metadata,
        });

        sequence_number
    }

    /// Decide whether the pending task changed the controller
    ///
    /// First match wins: check mode, read-only operation type, legacy
    /// "query" action or state, an explicit `changed` flag in the result,
    /// and finally whether the diff holds anything besides the sequence number.
    fn task_changed(&self, diff: &Fields, result: &Fields) -> bool {
        if self.check_mode {
            return false;
        }
        if self.operation_type.is_read_only() {
            return false;
        }
        if self.action == "query" || self.state == "query" {
            return false;
        }
        match result.get("changed").and_then(Value::as_bool) {
            Some(changed) => changed,
            None => diff.keys().any(|key| key != SEQUENCE_NUMBER),
        }
    }

    fn task_failed(&self, result: &Fields) -> bool {
        match result.get("success").and_then(Value::as_bool) {
            Some(success) => !success,
            None => {
                warn!(
                    "Task {} ({}) result carries no success flag; treating as not failed",
                    self.task_sequence_number, self.action
                );
                false
            }
        }
    }

    /// Reduce the session into the final report
    ///
    /// `changed` and `failed` are true if any registered task was.
    pub fn build_final_result(self) -> FinalReport {
        let changed = self.changed.contains(&true);
        let failed = self.failed.contains(&true);

        let mut report = FinalReport {
            changed,
            failed,
            diff: Vec::with_capacity(self.records.len()),
            response: Vec::with_capacity(self.records.len()),
            result: Vec::with_capacity(self.records.len()),
            metadata: Vec::with_capacity(self.records.len()),
        };
        for record in self.records {
            report.diff.push(record.diff);
            report.response.push(record.response);
            report.result.push(record.result);
            report.metadata.push(record.metadata);
        }
        report
    }
}
