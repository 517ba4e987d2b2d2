//! Error types for the appliance client.
//!
//! # Design
//! Every failure surfaces as an `SdkError`: a closed `ErrorKind` naming what
//! went wrong plus an `ErrorContext` naming where (operation, host, resource
//! kind). Status-code classification, convergence failures and mistakes in
//! the declared operation tables all share this one type, so callers branch
//! on `err.kind()` instead of on a family of unrelated error structs.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::task::{TaskResource, TaskState};

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, SdkError>;

/// The closed set of failure conditions.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// HTTP 400.
    #[error("bad request: {message}")]
    BadRequest { message: String },

    /// HTTP 401.
    #[error("unauthorized")]
    Unauthorized,

    /// HTTP 403.
    #[error("forbidden")]
    Forbidden,

    /// HTTP 405.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// HTTP 404.
    #[error("resource not found")]
    ResourceNotFound,

    /// HTTP 409, 412, 415, 500 or 503.
    #[error("internal server error (HTTP {status}): {message}")]
    InternalServerError { status: u16, message: String },

    /// Any other status, or a network-level failure (`status` is `None`).
    #[error("appliance unreachable: {reason}")]
    ApplianceUnreachable { status: Option<u16>, reason: String },

    /// Caller input rejected before any I/O.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// An empty body where one was required.
    #[error("no response from appliance")]
    NoResponse,

    /// The task reached a failure state (Error, Killed, Interrupted, or
    /// Warning under `WarningPolicy::Fail`). Carries the final snapshot.
    #[error("{}", task_failure_summary(.task))]
    TaskFailed { task: Box<TaskResource> },

    /// The task did not reach a terminal state in time. It keeps running on
    /// the appliance.
    #[error("task {task_uri} still {last_state:?} after {timeout:?}")]
    TaskTimeout { task_uri: String, timeout: Duration, last_state: TaskState },

    /// The request entity cannot be encoded under its content type.
    #[error("unsupported entity for content type {content_type}")]
    UnsupportedEntity { content_type: String },

    /// A declared operation does not line up with its arguments or template.
    #[error("malformed operation: {reason}")]
    MalformedOperation { reason: String },

    /// A body could not be encoded or decoded.
    #[error("codec error: {reason}")]
    Codec { reason: String },

    /// Local file I/O failed during an upload or download.
    #[error("i/o error: {reason}")]
    Io { reason: String },

    /// The configured API version is newer than the appliance supports.
    #[error("API version {configured} not supported by appliance (current {current})")]
    ApiVersionMismatch { configured: u32, current: u32 },
}

impl ErrorKind {
    /// Stable label suitable for structured logging.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest { .. } => "bad_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::MethodNotAllowed => "method_not_allowed",
            ErrorKind::ResourceNotFound => "resource_not_found",
            ErrorKind::InternalServerError { .. } => "internal_server_error",
            ErrorKind::ApplianceUnreachable { .. } => "appliance_unreachable",
            ErrorKind::InvalidArgument { .. } => "invalid_argument",
            ErrorKind::NoResponse => "no_response",
            ErrorKind::TaskFailed { .. } => "task_failed",
            ErrorKind::TaskTimeout { .. } => "task_timeout",
            ErrorKind::UnsupportedEntity { .. } => "unsupported_entity",
            ErrorKind::MalformedOperation { .. } => "malformed_operation",
            ErrorKind::Codec { .. } => "codec",
            ErrorKind::Io { .. } => "io",
            ErrorKind::ApiVersionMismatch { .. } => "api_version_mismatch",
        }
    }
}

fn task_failure_summary(task: &TaskResource) -> String {
    let uri = task.uri.as_deref().unwrap_or("<unknown task>");
    let first = task
        .task_errors
        .first()
        .and_then(|e| e.message.as_deref())
        .unwrap_or("no error detail");
    format!(
        "task {uri} ended in state {:?} with {} error(s): {first}",
        task.task_state,
        task.task_errors.len()
    )
}

/// Where a failure happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub operation: Option<String>,
    pub host: Option<String>,
    pub resource: Option<String>,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = [
            ("operation", &self.operation),
            ("host", &self.host),
            ("resource", &self.resource),
        ];
        let mut first = true;
        for (name, value) in fields {
            if let Some(value) = value {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{name}={value}")?;
                first = false;
            }
        }
        if first {
            write!(f, "no context")?;
        }
        Ok(())
    }
}

/// Error returned by every fallible operation in the crate.
#[derive(Debug, Error)]
#[error("{kind} [{context}]")]
pub struct SdkError {
    kind: ErrorKind,
    context: ErrorContext,
}

impl SdkError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: ErrorContext::default(),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Attach the operation name unless one is already recorded.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context.operation.get_or_insert_with(|| operation.into());
        self
    }

    /// Attach the target host unless one is already recorded.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.context.host.get_or_insert_with(|| host.into());
        self
    }

    /// Attach the resource kind unless one is already recorded.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.context.resource.get_or_insert_with(|| resource.into());
        self
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        ErrorKind::InvalidArgument {
            reason: reason.into(),
        }
        .into()
    }

    pub fn malformed_operation(reason: impl Into<String>) -> Self {
        ErrorKind::MalformedOperation {
            reason: reason.into(),
        }
        .into()
    }

    pub fn codec(reason: impl Into<String>) -> Self {
        ErrorKind::Codec {
            reason: reason.into(),
        }
        .into()
    }

    pub fn io(reason: impl Into<String>) -> Self {
        ErrorKind::Io {
            reason: reason.into(),
        }
        .into()
    }

    pub fn no_response() -> Self {
        ErrorKind::NoResponse.into()
    }
}

impl From<ErrorKind> for SdkError {
    fn from(kind: ErrorKind) -> Self {
        SdkError::new(kind)
    }
}
