//! Stratum protocol message definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stratum protocol methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StratumMethod {
    /// Client subscribes to mining notifications
    Subscribe,
    /// Client authorizes with credentials
    Authorize,
    /// Client submits a share
    Submit,
    /// Server notifies client of new work
    Notify,
    /// Server sets the session difficulty
    SetDifficulty,
    /// Unknown method
    Unknown(String),
}

impl StratumMethod {
    /// Parse method from string
    pub fn parse_method(s: &str) -> Self {
        match s {
            "mining.subscribe" => Self::Subscribe,
            "mining.authorize" => Self::Authorize,
            "mining.submit" => Self::Submit,
            "mining.notify" => Self::Notify,
            "mining.set_difficulty" => Self::SetDifficulty,
            _ => Self::Unknown(s.to_string()),
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::Subscribe => "mining.subscribe",
            Self::Authorize => "mining.authorize",
            Self::Submit => "mining.submit",
            Self::Notify => "mining.notify",
            Self::SetDifficulty => "mining.set_difficulty",
            Self::Unknown(s) => s,
        }
    }
}

/// Error codes carried in Stratum error replies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StratumErrorCode {
    Other = 20,
    JobNotFound = 21,
    LowDifficultyShare = 23,
    UnauthorizedWorker = 24,
}

impl StratumErrorCode {
    /// Default human-readable message for the code
    pub fn message(&self) -> &'static str {
        match self {
            Self::Other => "Invalid request",
            Self::JobNotFound => "Job not found",
            Self::LowDifficultyShare => "Low difficulty share",
            Self::UnauthorizedWorker => "Unauthorized worker",
        }
    }
}

/// Stratum request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumRequest {
    /// Request ID
    pub id: Value,
    /// Method name
    pub method: String,
    /// Method parameters
    pub params: Vec<Value>,
}

impl StratumRequest {
    /// Create a new request
    pub fn new(id: impl Into<Value>, method: &str, params: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.to_string(),
            params,
        }
    }

    /// Get the method as enum
    pub fn method_enum(&self) -> StratumMethod {
        StratumMethod::parse_method(&self.method)
    }
}

/// Stratum response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumResponse {
    /// Request ID this responds to
    pub id: Value,
    /// Result if successful
    pub result: Option<Value>,
    /// Error if failed
    pub error: Option<Value>,
}

impl StratumResponse {
    /// Create a successful response
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Value, code: i32, message: &str) -> Self {
        Self {
            id,
            result: None,
            error: Some(Value::Array(vec![
                Value::Number(code.into()),
                Value::String(message.to_string()),
                Value::Null,
            ])),
        }
    }

    /// Create an error response from a well-known code
    pub fn error_with_code(id: Value, code: StratumErrorCode) -> Self {
        Self::error(id, code as i32, code.message())
    }
}

/// Stratum notification (no ID)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumNotification {
    /// Always null for notifications
    pub id: Value,
    /// Method name
    pub method: String,
    /// Method parameters
    pub params: Vec<Value>,
}

impl StratumNotification {
    /// Create a new notification
    pub fn new(method: &str, params: Vec<Value>) -> Self {
        Self {
            id: Value::Null,
            method: method.to_string(),
            params,
        }
    }
}

/// Generic Stratum message
#[derive(Debug, Clone)]
pub enum StratumMessage {
    /// Request from client
    Request(StratumRequest),
    /// Response to request
    Response(StratumResponse),
    /// Notification (no response expected)
    Notification(StratumNotification),
}

impl StratumMessage {
    /// Parse a JSON string into a Stratum message
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(json)?;

        // A method field marks a request or notification
        if value.get("method").is_some() {
            if value.get("id") == Some(&Value::Null) {
                let notification: StratumNotification = serde_json::from_value(value)?;
                Ok(StratumMessage::Notification(notification))
            } else {
                let request: StratumRequest = serde_json::from_value(value)?;
                Ok(StratumMessage::Request(request))
            }
        } else {
            let response: StratumResponse = serde_json::from_value(value)?;
            Ok(StratumMessage::Response(response))
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            StratumMessage::Request(req) => serde_json::to_string(req),
            StratumMessage::Response(resp) => serde_json::to_string(resp),
            StratumMessage::Notification(notif) => serde_json::to_string(notif),
        }
    }
}
