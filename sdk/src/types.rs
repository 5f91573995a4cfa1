//! Wire types shared between the engine and request senders

use crate::errors::ReconcileError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// A flat field-name to value mapping, as the controller speaks it
pub type Fields = Map<String, Value>;

/// HTTP-style verb of one controller operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Verb::Get),
            "POST" => Ok(Verb::Post),
            "PUT" => Ok(Verb::Put),
            "DELETE" => Ok(Verb::Delete),
            _ => Err(ReconcileError::UnsupportedVerb {
                verb: s.to_string(),
            }),
        }
    }
}

/// One operation to send to the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub path: String,
    pub verb: Verb,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl OperationRequest {
    pub fn new(verb: Verb, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            verb,
            payload: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Verb::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Verb::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Verb::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Verb::Delete, path)
    }

    /// Attach a JSON payload
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Raw response envelope returned by the controller
///
/// Field names follow the controller's wire format:
/// `{RETURN_CODE, MESSAGE?, DATA, ERROR?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "RETURN_CODE")]
    pub return_code: i64,

    #[serde(rename = "MESSAGE", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(rename = "DATA", default)]
    pub data: Value,

    /// Error indicator. Any non-null value marks the response as failed
    #[serde(rename = "ERROR", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl ResponseEnvelope {
    pub fn new(return_code: i64, message: impl Into<String>, data: Value) -> Self {
        Self {
            return_code,
            message: Some(message.into()),
            data,
            error: None,
        }
    }

    pub fn with_error(mut self, error: Value) -> Self {
        self.error = Some(error);
        self
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Render as a field map, the shape recorded in outcome reports
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("RETURN_CODE".to_string(), Value::from(self.return_code));
        if let Some(message) = &self.message {
            fields.insert("MESSAGE".to_string(), Value::from(message.as_str()));
        }
        fields.insert("DATA".to_string(), self.data.clone());
        if let Some(error) = &self.error {
            fields.insert("ERROR".to_string(), error.clone());
        }
        fields
    }
}

/// Classification of one response
///
/// Reads carry `found`, writes carry `changed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub found: Option<bool>,
}

impl OperationResult {
    pub fn read(found: bool, success: bool) -> Self {
        Self {
            success,
            changed: None,
            found: Some(found),
        }
    }

    /// A write result. Writes change the controller exactly when they succeed
    pub fn write(success: bool) -> Self {
        Self {
            success,
            changed: Some(success),
            found: None,
        }
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("success".to_string(), Value::from(self.success));
        if let Some(changed) = self.changed {
            fields.insert("changed".to_string(), Value::from(changed));
        }
        if let Some(found) = self.found {
            fields.insert("found".to_string(), Value::from(found));
        }
        fields
    }
}
