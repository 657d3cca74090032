// crates/core/src/transport/message.rs

//! Wire messages exchanged between a supervisor and its worker.
//!
//! Each message is one JSON object terminated by a newline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorPayload, ShimError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Request,
    Response,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportMessage {
    pub kind: MessageKind,
    pub operation: String,
    #[serde(default)]
    pub payload: Value,
    pub correlation_id: String,
}

impl TransportMessage {
    pub fn request(operation: &str, payload: Value, correlation_id: &str) -> Self {
        Self {
            kind: MessageKind::Request,
            operation: operation.to_string(),
            payload,
            correlation_id: correlation_id.to_string(),
        }
    }

    pub fn response(operation: &str, payload: Value, correlation_id: &str) -> Self {
        Self {
            kind: MessageKind::Response,
            operation: operation.to_string(),
            payload,
            correlation_id: correlation_id.to_string(),
        }
    }

    pub fn error(operation: &str, error: &ShimError, correlation_id: &str) -> Self {
        Self {
            kind: MessageKind::Error,
            operation: operation.to_string(),
            payload: serde_json::to_value(error.to_payload()).unwrap_or(Value::Null),
            correlation_id: correlation_id.to_string(),
        }
    }

    /// Serialize as a single newline-terminated line.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Decode the payload of an `error` message.
    pub fn into_error(self) -> ShimError {
        match serde_json::from_value::<ErrorPayload>(self.payload.clone()) {
            Ok(payload) => ShimError::from_payload(&self.operation, payload),
            Err(_) => ShimError::remote(None, self.payload.to_string()),
        }
    }
}
