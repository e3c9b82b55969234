//! Crate-wide error type.
//!
//! Every fallible public operation in the engine returns [`CoreError`] (or a
//! narrower, subsystem-local error that converts into it at the component
//! boundary) so callers can match on [`ErrorKind`] without downcasting through
//! `Box<dyn Error>`.

use std::error::Error;
use std::fmt;

/// Closed vocabulary of error categories produced by the engine.
///
/// Matches the policy table in the engine's design notes: tool errors never
/// escape the owning agent, LLM errors become a failed reply, and only
/// `timeout`/`cancelled` tear down a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArguments,
    NotFound,
    PermissionDenied,
    AlreadyExists,
    NetworkError,
    ApiError,
    AuthError,
    QuotaExceeded,
    ParseError,
    RouterSaturated,
    InboxSaturated,
    Cancelled,
    Timeout,
    UnknownTool,
    AlreadyActive,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::InvalidArguments => "invalid_arguments",
            ErrorKind::NotFound => "not_found",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::ApiError => "api_error",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::RouterSaturated => "router_saturated",
            ErrorKind::InboxSaturated => "inbox_saturated",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Timeout => "timeout",
            ErrorKind::UnknownTool => "unknown_tool",
            ErrorKind::AlreadyActive => "already_active",
        };
        write!(f, "{}", label)
    }
}

/// The error type returned at every component boundary in the engine.
#[derive(Debug)]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

impl From<crate::engine::tool_protocol::ToolError> for CoreError {
    fn from(err: crate::engine::tool_protocol::ToolError) -> Self {
        use crate::engine::tool_protocol::ToolError as TE;
        let kind = match &err {
            TE::UnknownTool(_) => ErrorKind::UnknownTool,
            TE::InvalidArguments(_) => ErrorKind::InvalidArguments,
            TE::NotFound(_) => ErrorKind::NotFound,
            TE::PermissionDenied(_) => ErrorKind::PermissionDenied,
            TE::AlreadyExists(_) => ErrorKind::AlreadyExists,
            TE::Timeout(_) => ErrorKind::Timeout,
            TE::Network(_) => ErrorKind::NetworkError,
            TE::Disk(_) => ErrorKind::NotFound,
            TE::Unknown(_) => ErrorKind::ApiError,
        };
        CoreError::new(kind, err.to_string())
    }
}
