//! Error types for the Metabase MCP Server.
//!
//! This module defines the semantic error taxonomy (validation, write blocked,
//! upstream, transport) and the agent-facing error envelope every tool failure
//! is rendered into.

use crate::resource::ResourceKind;
pub use mcpkit::McpError;
use serde::Serialize;
use thiserror::Error;

/// Identity of the upstream resource an error relates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: Option<u64>,
}

impl ResourceRef {
    /// Reference a single item.
    pub fn item(kind: ResourceKind, id: u64) -> Self {
        Self { kind, id: Some(id) }
    }

    /// Reference a kind as a whole (listing).
    pub fn kind(kind: ResourceKind) -> Self {
        Self { kind, id: None }
    }

    fn describe(&self) -> String {
        match self.id {
            Some(id) => format!("{} {}", self.kind.singular(), id),
            None => self.kind.as_str().to_string(),
        }
    }
}

/// Domain-specific errors for the Metabase MCP Server.
///
/// Named `ServerError` to avoid collision with `mcpkit::McpError`.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid tool parameters, rejected before any I/O
    #[error("Invalid parameter '{field}': {message}")]
    Validation {
        field: String,
        message: String,
        guidance: String,
    },

    /// Write statement rejected by read-only mode
    #[error("Write blocked: {keyword} statements are not allowed in read-only mode")]
    WriteBlocked { keyword: String },

    /// Non-2xx response from the Metabase API
    #[error("Metabase API error ({status}): {message}")]
    Upstream {
        status: u16,
        message: String,
        data: Option<serde_json::Value>,
        resource: Option<ResourceRef>,
    },

    /// Upstream payload that does not match the expected shape
    #[error("Unexpected {kind} payload: {message}")]
    UnexpectedPayload { kind: ResourceKind, message: String },

    /// Transport-level failure talking to Metabase
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Upstream request exceeded its timeout
    #[error("Request timeout: operation exceeded {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error with agent guidance.
    pub fn validation(
        field: impl Into<String>,
        message: impl Into<String>,
        guidance: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
            guidance: guidance.into(),
        }
    }

    /// Create a write-blocked error for the offending leading keyword.
    pub fn write_blocked(keyword: impl Into<String>) -> Self {
        Self::WriteBlocked {
            keyword: keyword.into(),
        }
    }

    /// Create an upstream error from a status and message.
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
            data: None,
            resource: None,
        }
    }

    /// Create an upstream error carrying the response body.
    pub fn upstream_with_data(
        status: u16,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
            data,
            resource: None,
        }
    }

    /// Create an unexpected payload error.
    pub fn unexpected_payload(kind: ResourceKind, message: impl Into<String>) -> Self {
        Self::UnexpectedPayload {
            kind,
            message: message.into(),
        }
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a connection error with a source.
    pub fn connection_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Attach the resource an upstream error relates to.
    ///
    /// Other variants are returned unchanged.
    pub fn for_resource(self, resource: ResourceRef) -> Self {
        match self {
            Self::Upstream {
                status,
                message,
                data,
                ..
            } => Self::Upstream {
                status,
                message,
                data,
                resource: Some(resource),
            },
            other => other,
        }
    }

    /// HTTP status for upstream errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::WriteBlocked { .. } => "WRITE_BLOCKED",
            Self::Upstream { status, .. } => match status {
                400 => "BAD_REQUEST",
                401 => "AUTHENTICATION_FAILED",
                403 => "PERMISSION_DENIED",
                404 => "RESOURCE_NOT_FOUND",
                429 => "RATE_LIMITED",
                500..=599 => "UPSTREAM_UNAVAILABLE",
                _ => "UPSTREAM_ERROR",
            },
            Self::UnexpectedPayload { .. } => "UNEXPECTED_RESPONSE",
            Self::Connection { .. } => "CONNECTION_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Check if this error is transient and may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::Timeout { .. } => true,
            Self::Upstream { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// Suggested wait before retrying, for throttling and overload responses.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::Upstream { status: 429, .. } => Some(60_000),
            Self::Upstream {
                status: 502 | 503 | 504,
                ..
            } => Some(30_000),
            Self::Timeout { .. } | Self::Connection { .. } => Some(5_000),
            _ => None,
        }
    }

    /// Actionable, resource-specific instruction for the calling agent.
    pub fn agent_guidance(&self) -> String {
        match self {
            Self::Config(_) => {
                "The server is misconfigured. Ask the operator to check METABASE_URL and the \
                 credential environment variables; retrying will not help."
                    .to_string()
            }
            Self::Validation { guidance, .. } => guidance.clone(),
            Self::WriteBlocked { keyword } => format!(
                "The server is in read-only mode and {keyword} statements are rejected before \
                 reaching the database. Rewrite the request as a SELECT (or WITH ... SELECT) \
                 query that only reads data."
            ),
            Self::Upstream {
                status, resource, ..
            } => upstream_guidance(*status, resource.as_ref()),
            Self::UnexpectedPayload { kind, .. } => format!(
                "Metabase returned a {} payload in an unexpected shape. Verify the id with \
                 `search`, or retrieve a different {} and report the mismatch.",
                kind.singular(),
                kind.singular()
            ),
            Self::Connection { .. } => {
                "Metabase could not be reached. Wait a few seconds and retry the same call; if it \
                 keeps failing the instance may be down."
                    .to_string()
            }
            Self::Timeout { timeout_ms } => format!(
                "The request did not finish within {timeout_ms} ms. Narrow the query (add WHERE \
                 filters or a smaller row_limit) or retrieve fewer ids per call."
            ),
            Self::Internal(_) => {
                "An internal server error occurred. Retry once; if it persists, report the \
                 message verbatim."
                    .to_string()
            }
        }
    }

    /// Short recovery action label.
    pub fn recovery_action(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONTACT_ADMINISTRATOR",
            Self::Validation { .. } => "FIX_PARAMETERS",
            Self::WriteBlocked { .. } => "USE_READ_ONLY_QUERY",
            Self::Upstream { status, .. } => match status {
                400 => "FIX_PARAMETERS",
                401 => "CHECK_CREDENTIALS",
                403 => "REQUEST_ACCESS",
                404 => "VERIFY_ID",
                429 => "WAIT_AND_RETRY",
                _ if self.is_transient() => "WAIT_AND_RETRY",
                _ => "RETRY_OR_REPORT",
            },
            Self::UnexpectedPayload { .. } => "VERIFY_ID",
            Self::Connection { .. } | Self::Timeout { .. } => "WAIT_AND_RETRY",
            Self::Internal(_) => "RETRY_OR_REPORT",
        }
    }

    /// Ordered troubleshooting steps for errors that benefit from them.
    pub fn troubleshooting_steps(&self) -> Option<Vec<String>> {
        match self {
            Self::Upstream { status: 401, .. } => Some(vec![
                "Verify METABASE_API_KEY, or METABASE_USER_EMAIL and METABASE_PASSWORD".to_string(),
                "Check that the API key has not been revoked in Metabase admin settings"
                    .to_string(),
            ]),
            Self::Upstream { status: 404, .. } => Some(vec![
                "Use `search` with the resource name to find its current id".to_string(),
                "Use `list` to browse available resources of this kind".to_string(),
                "The resource may have been archived or deleted".to_string(),
            ]),
            Self::Connection { .. } => Some(vec![
                "Check that METABASE_URL is correct and reachable".to_string(),
                "Check network connectivity and proxy settings".to_string(),
            ]),
            Self::Timeout { .. } => Some(vec![
                "Add filters or aggregate in SQL to reduce scanned rows".to_string(),
                "Lower row_limit".to_string(),
                "Increase REQUEST_TIMEOUT_MS if long queries are expected".to_string(),
            ]),
            _ => None,
        }
    }

    /// Render this error into the agent-facing envelope.
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            code: self.code().to_string(),
            message: self.to_string(),
            agent_guidance: self.agent_guidance(),
            recovery_action: self.recovery_action().to_string(),
            retryable: self.is_transient(),
            retry_after_ms: self.retry_after_ms(),
            troubleshooting_steps: self.troubleshooting_steps(),
        }
    }
}

fn upstream_guidance(status: u16, resource: Option<&ResourceRef>) -> String {
    let target = resource
        .map(ResourceRef::describe)
        .unwrap_or_else(|| "the requested resource".to_string());

    match status {
        400 => format!(
            "Metabase rejected the request for {target}. Check the parameters (for SQL, check \
             the syntax for this database's dialect) and try again."
        ),
        401 => "Metabase rejected the credentials. Do not retry; ask the operator to fix \
                authentication."
            .to_string(),
        403 => format!(
            "The configured Metabase user cannot access {target}. Pick another resource or ask \
             for permissions; retrying will not help."
        ),
        404 => match resource {
            Some(r) if r.id.is_some() => format!(
                "{target} was not found. Verify the id with `search` (or `list` model=\"{}\") \
                 before retrying.",
                r.kind.as_str()
            ),
            _ => format!("{target} was not found. Verify ids with `search` before retrying."),
        },
        429 => "Metabase is throttling requests. Wait before retrying and request fewer ids per \
                call."
            .to_string(),
        502..=504 => "Metabase is temporarily unavailable. Wait and retry the same call.".to_string(),
        _ => format!(
            "Metabase failed while handling {target}. Retry once; if it persists, report the \
             message."
        ),
    }
}

/// Agent-facing error envelope consumed by the protocol layer.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub agent_guidance: String,
    pub recovery_action: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub troubleshooting_steps: Option<Vec<String>>,
}

impl ErrorEnvelope {
    /// Serialize the envelope as pretty JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&serde_json::json!({ "error": self }))
            .unwrap_or_else(|_| format!("{}: {}", self.code, self.message))
    }
}

/// Convert ServerError to mcpkit's McpError for protocol responses.
///
/// Note: Tool errors should generally return `ToolOutput::error()` with the
/// rendered envelope instead of using this conversion. This is primarily for
/// protocol-level errors.
impl From<ServerError> for McpError {
    fn from(e: ServerError) -> Self {
        match e {
            ServerError::Validation { field, message, .. } => McpError::invalid_params(field, message),
            blocked @ ServerError::WriteBlocked { .. } => {
                McpError::invalid_params("query", blocked.to_string())
            }
            ServerError::Config(msg) => McpError::invalid_request(msg),
            other => McpError::internal(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for ServerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServerError::timeout(0)
        } else if e.is_connect() || e.is_request() {
            ServerError::connection_with_source("Failed to reach Metabase", e)
        } else if e.is_decode() {
            ServerError::internal(format!("Failed to decode Metabase response: {e}"))
        } else if let Some(status) = e.status() {
            ServerError::upstream(status.as_u16(), e.to_string())
        } else {
            ServerError::connection(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(e: serde_json::Error) -> Self {
        ServerError::internal(format!("JSON serialization error: {e}"))
    }
}
