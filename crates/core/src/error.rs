// crates/core/src/error.rs

//! Error taxonomy shared by every layer of the shim.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline stage at which loading an agent failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStage {
    Source,
    Translate,
    Persist,
    Load,
    Invoke,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadStage::Source => "source",
            LoadStage::Translate => "translate",
            LoadStage::Persist => "persist",
            LoadStage::Load => "load",
            LoadStage::Invoke => "invoke",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error)]
pub enum ShimError {
    #[error("runtime context used before initialize")]
    NotInitialized,

    #[error("remote service error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    RemoteService {
        status: Option<u16>,
        message: String,
    },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("request {operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("transport closed")]
    TransportClosed,

    #[error("failed to {stage} agent module {}: {message}", .file.display())]
    AgentLoad {
        file: PathBuf,
        stage: LoadStage,
        message: String,
    },

    #[error("invalid runtime config: {0}")]
    Config(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),
}

pub type ShimResult<T> = Result<T, ShimError>;

impl ShimError {
    pub fn remote(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::RemoteService {
            status,
            message: message.into(),
        }
    }

    pub fn agent_load(
        file: impl Into<PathBuf>,
        stage: LoadStage,
        message: impl fmt::Display,
    ) -> Self {
        Self::AgentLoad {
            file: file.into(),
            stage,
            message: message.to_string(),
        }
    }

    /// Timeouts are transient; everything else is reported as-is.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Encode this error as the payload of an `error` transport message.
    pub fn to_payload(&self) -> ErrorPayload {
        let (code, status) = match self {
            ShimError::NotInitialized => ("not_initialized", None),
            ShimError::RemoteService { status, .. } => ("remote_service", *status),
            ShimError::MalformedResponse(_) => ("malformed_response", None),
            ShimError::Timeout { .. } => ("timeout", None),
            ShimError::TransportClosed => ("transport_closed", None),
            ShimError::AgentLoad { .. } => ("agent_load", None),
            ShimError::Config(_) => ("config", None),
            ShimError::UnknownOperation(_) => ("unknown_operation", None),
        };
        let message = match self {
            ShimError::RemoteService { message, .. } => message.clone(),
            ShimError::MalformedResponse(message)
            | ShimError::Config(message)
            | ShimError::UnknownOperation(message) => message.clone(),
            other => other.to_string(),
        };
        ErrorPayload {
            code: code.to_string(),
            message,
            status,
        }
    }

    /// Rebuild an error received from the other side of a transport.
    ///
    /// Timeouts and closed channels are local conditions: when the peer
    /// reports one of them it is surfaced as a remote failure instead.
    pub fn from_payload(operation: &str, payload: ErrorPayload) -> Self {
        match payload.code.as_str() {
            "not_initialized" => ShimError::NotInitialized,
            "malformed_response" => ShimError::MalformedResponse(payload.message),
            "unknown_operation" => ShimError::UnknownOperation(payload.message),
            "config" => ShimError::Config(payload.message),
            "remote_service" => ShimError::remote(payload.status, payload.message),
            _ => ShimError::remote(
                payload.status,
                format!("{operation} failed in peer: {}", payload.message),
            ),
        }
    }
}

/// Wire shape of an `error` transport message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}
