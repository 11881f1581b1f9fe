//! Request and response envelopes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ContextError, RpcError};

/// Result from a registered handler. `Ok(None)` means "send nothing".
pub type HandlerResult = anyhow::Result<Option<Value>>;

/// Which registry a request is being dispatched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Arrived on a client connection.
    Source,
    /// Server-initiated notification.
    Target,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "Source",
            Self::Target => "Target",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing context carried by every envelope.
///
/// Either a bare channel name, or an object mapping a role name
/// (`"Source"` / `"Target"`) to a channel name. Anything else is kept
/// verbatim so it can be echoed back, but never routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Context {
    Key(String),
    RoleKeyed(Map<String, Value>),
    Other(Value),
}

impl Default for Context {
    fn default() -> Self {
        Self::Other(Value::Null)
    }
}

impl Context {
    /// Routing key for `role`. A bare string routes the same for both roles.
    pub fn key_for(&self, role: Role) -> Result<&str, ContextError> {
        match self {
            Self::Key(key) => Ok(key),
            Self::RoleKeyed(map) => map
                .get(role.as_str())
                .and_then(Value::as_str)
                .ok_or_else(|| self.incorrect()),
            Self::Other(_) => Err(self.incorrect()),
        }
    }

    fn incorrect(&self) -> ContextError {
        ContextError::Incorrect(serde_json::to_string(self).unwrap_or_default())
    }
}

impl From<&str> for Context {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<Value> for Context {
    fn from(value: Value) -> Self {
        match value {
            Value::String(key) => Self::Key(key),
            Value::Object(map) => Self::RoleKeyed(map),
            other => Self::Other(other),
        }
    }
}

/// Fields shared by requests and responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Base {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub context: Context,
}

/// Client or notification request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Request {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub context: Context,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(id: impl Into<String>, method: impl Into<String>, context: impl Into<Context>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            context: context.into(),
            params: Value::Null,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Envelope echoed back in any reply to this request.
    pub fn base(&self) -> Base {
        Base {
            id: self.id.clone(),
            method: self.method.clone(),
            context: self.context.clone(),
        }
    }
}

/// Reply envelope. Exactly one of `Result` / `Error` is set for any
/// response built through [`Response::success`] or [`Response::failure`];
/// both keys are always present on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
    #[serde(flatten)]
    base: Base,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

impl Response {
    pub fn success(base: Base, result: Value) -> Self {
        Self {
            base,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(base: Base, error: RpcError) -> Self {
        Self {
            base,
            result: None,
            error: Some(error),
        }
    }

    pub fn base(&self) -> &Base {
        &self.base
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&RpcError> {
        self.error.as_ref()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_success(&self) -> bool {
        !self.is_error()
    }
}
