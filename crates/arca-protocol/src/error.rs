//! RPC error object and the JSON-RPC reserved error codes used by the server.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Reserved JSON-RPC error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InternalError,

    // Custom code
    Custom(i32),
}

impl ErrorCode {
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InternalError => -32603,
            Self::Custom(c) => *c,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32603 => Self::InternalError,
            c => Self::Custom(c),
        }
    }

    /// Canonical message sent alongside the code.
    pub fn message(&self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InternalError => "Internal error",
            Self::Custom(_) => "Server error",
        }
    }
}

/// JSON-RPC error object as it appears on the wire.
///
/// `Data` is always serialized, as `null` when there is nothing to attach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl RpcError {
    pub fn new(code: ErrorCode, data: Value) -> Self {
        Self {
            code: code.code(),
            message: code.message().to_string(),
            data,
        }
    }

    /// Malformed frame. `data` carries the parser's message.
    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, Value::String(detail.into()))
    }

    /// The request's context could not produce a routing key.
    pub fn invalid_request(id: &str, method: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InvalidRequest,
            json!({ "Error": detail.into(), "ID": id, "Method": method }),
        )
    }

    /// No handler is registered for the (context, method) pair.
    pub fn method_not_found(id: &str, method: &str) -> Self {
        Self::new(ErrorCode::MethodNotFound, json!({ "ID": id, "Method": method }))
    }

    /// The handler returned an error or terminated abnormally.
    pub fn internal(id: &str, method: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalError,
            json!({ "Error": detail.into(), "ID": id, "Method": method }),
        )
    }

    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_code(self.code)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RPC Error [{}]: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// Failure to extract a routing key from a request's context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("Incorrect context {0}")]
    Incorrect(String),
}
