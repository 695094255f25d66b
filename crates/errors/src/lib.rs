//! Rotor's error taxonomy.
//!
//! An [`ErrorMetadata`] is attached to an `anyhow` error chain via
//! `.context(e)`. Downstream code classifies errors by downcasting through
//! the chain with [`ErrorMetadataAnyhowExt`]; the message handler uses the
//! classification to decide between acking a message and asking the bus for
//! redelivery.

use std::borrow::Cow;

use http::StatusCode;
use serde::Serialize;

mod metrics;

/// Tags an error with the information needed to classify it.
///
/// The `short_msg` is a stable ScreamingCamelCase tag usable in tests and
/// metrics; the `msg` is the longer developer-facing description.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub code: ErrorCode,
    /// Short ScreamingCamelCase tag, resilient to changes in copy.
    /// Eg UnknownConnection.
    pub short_msg: Cow<'static, str>,
    /// Human readable, developer facing. Should be longer and descriptive.
    pub msg: Cow<'static, str>,
}

/// One entry per row of the error-handling table: the code alone decides
/// whether a message is redelivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The bus payload was not valid JSON. Dropped without retry.
    MalformedMessage,
    /// The config store has no connection for the message's routing key.
    UnknownConnection,
    /// The config store has no definition for a referenced UDF.
    UnknownFunction,
    /// A UDF definition lives in a different workspace than the connection.
    WorkspaceMismatch,
    /// A function id outside the `builtin.*` / `udf.*` namespaces.
    UnknownFunctionType,
    /// A connection references configuration that does not exist, e.g. a
    /// destination builtin for its type.
    ConfigError,
    /// The sandbox behind a compiled UDF was torn down between invocations.
    /// Recovered inline with a single rebuild; fatal if it happens again.
    SandboxDisposed,
    /// Any other failure thrown out of user code.
    UdfRuntime,
    /// Transient failure in an external dependency (downstream 5xx,
    /// connection refused, config store outage).
    TransientDownstream,
    /// The per-message deadline expired.
    Timeout,
}

impl ErrorCode {
    /// Retryable errors make the bus redeliver the message; everything else
    /// is acked so a poison message cannot wedge the partition.
    pub fn is_retryable(&self) -> bool {
        match self {
            ErrorCode::TransientDownstream | ErrorCode::Timeout => true,
            ErrorCode::MalformedMessage
            | ErrorCode::UnknownConnection
            | ErrorCode::UnknownFunction
            | ErrorCode::WorkspaceMismatch
            | ErrorCode::UnknownFunctionType
            | ErrorCode::ConfigError
            | ErrorCode::SandboxDisposed
            | ErrorCode::UdfRuntime => false,
        }
    }

    pub fn http_status_code(&self) -> StatusCode {
        match self {
            ErrorCode::MalformedMessage
            | ErrorCode::UnknownFunctionType
            | ErrorCode::ConfigError => StatusCode::BAD_REQUEST,
            ErrorCode::UnknownConnection | ErrorCode::UnknownFunction => StatusCode::NOT_FOUND,
            ErrorCode::WorkspaceMismatch => StatusCode::FORBIDDEN,
            ErrorCode::SandboxDisposed | ErrorCode::UdfRuntime => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
            ErrorCode::TransientDownstream | ErrorCode::Timeout => {
                StatusCode::SERVICE_UNAVAILABLE
            },
        }
    }

    /// Stable label value for metrics.
    pub fn metric_value(&self) -> &'static str {
        match self {
            ErrorCode::MalformedMessage => "malformed_message",
            ErrorCode::UnknownConnection => "unknown_connection",
            ErrorCode::UnknownFunction => "unknown_function",
            ErrorCode::WorkspaceMismatch => "workspace_mismatch",
            ErrorCode::UnknownFunctionType => "unknown_function_type",
            ErrorCode::ConfigError => "config_error",
            ErrorCode::SandboxDisposed => "sandbox_disposed",
            ErrorCode::UdfRuntime => "udf_runtime",
            ErrorCode::TransientDownstream => "transient_downstream",
            ErrorCode::Timeout => "timeout",
        }
    }

    pub const ALL: [ErrorCode; 10] = [
        ErrorCode::MalformedMessage,
        ErrorCode::UnknownConnection,
        ErrorCode::UnknownFunction,
        ErrorCode::WorkspaceMismatch,
        ErrorCode::UnknownFunctionType,
        ErrorCode::ConfigError,
        ErrorCode::SandboxDisposed,
        ErrorCode::UdfRuntime,
        ErrorCode::TransientDownstream,
        ErrorCode::Timeout,
    ];
}

impl ErrorMetadata {
    pub fn malformed_message(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::MalformedMessage,
            short_msg: "MalformedMessage".into(),
            msg: msg.into(),
        }
    }

    pub fn unknown_connection(connection_id: &str) -> Self {
        Self {
            code: ErrorCode::UnknownConnection,
            short_msg: "UnknownConnection".into(),
            msg: format!("No connection found for id {connection_id}").into(),
        }
    }

    pub fn unknown_function(function_id: &str) -> Self {
        Self {
            code: ErrorCode::UnknownFunction,
            short_msg: "UnknownFunction".into(),
            msg: format!("No function definition found for id {function_id}").into(),
        }
    }

    pub fn workspace_mismatch(
        function_id: &str,
        function_workspace: &str,
        connection_workspace: &str,
    ) -> Self {
        Self {
            code: ErrorCode::WorkspaceMismatch,
            short_msg: "WorkspaceMismatch".into(),
            msg: format!(
                "Function {function_id} belongs to workspace {function_workspace}, not to the \
                 connection's workspace {connection_workspace}"
            )
            .into(),
        }
    }

    pub fn unknown_function_type(function_id: &str) -> Self {
        Self {
            code: ErrorCode::UnknownFunctionType,
            short_msg: "UnknownFunctionType".into(),
            msg: format!("Unknown function type: {function_id}").into(),
        }
    }

    /// Misconfiguration fatal to the current message, eg a missing
    /// destination builtin for the connection's type.
    ///
    /// The short_msg should be a CapitalCamelCased tag describing the error.
    pub fn config_error(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::ConfigError,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn sandbox_disposed(function_id: &str) -> Self {
        Self {
            code: ErrorCode::SandboxDisposed,
            short_msg: SANDBOX_DISPOSED.into(),
            msg: format!("Sandbox for function {function_id} is disposed").into(),
        }
    }

    /// A failure thrown out of user code that is not the disposed signal.
    ///
    /// The short_msg should be a CapitalCamelCased tag describing the error.
    pub fn udf_runtime(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::UdfRuntime,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Transient failure of an external dependency. The message will be
    /// redelivered.
    ///
    /// The short_msg should be a CapitalCamelCased tag describing the error.
    pub fn transient_downstream(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::TransientDownstream,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn timeout(description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::Timeout,
            short_msg: "Timeout".into(),
            msg: description.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn is_sandbox_disposed(&self) -> bool {
        self.code == ErrorCode::SandboxDisposed
    }

    pub(crate) fn log(&self) {
        crate::metrics::log_error_metadata(self.code);
    }
}

pub trait ErrorMetadataAnyhowExt {
    /// The code of the closest `ErrorMetadata` in the chain, if any.
    fn error_code(&self) -> Option<ErrorCode>;
    /// Untagged errors are treated as fatal: acked, never redelivered.
    fn is_retryable(&self) -> bool;
    fn is_sandbox_disposed(&self) -> bool;
    fn short_msg(&self) -> &str;
    fn msg(&self) -> &str;
    fn http_status(&self) -> StatusCode;
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn error_code(&self) -> Option<ErrorCode> {
        self.downcast_ref::<ErrorMetadata>().map(|e| e.code)
    }

    fn is_retryable(&self) -> bool {
        self.error_code().is_some_and(|c| c.is_retryable())
    }

    fn is_sandbox_disposed(&self) -> bool {
        self.error_code() == Some(ErrorCode::SandboxDisposed)
    }

    fn short_msg(&self) -> &str {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return &e.short_msg;
        }
        INTERNAL_SERVER_ERROR
    }

    fn msg(&self) -> &str {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return &e.msg;
        }
        INTERNAL_SERVER_ERROR_MSG
    }

    fn http_status(&self) -> StatusCode {
        if let Some(code) = self.error_code() {
            return code.http_status_code();
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Record an error in the taxonomy metrics. Called by `report_error` so
/// every surfaced failure shows up in the per-code counter.
pub fn log_tagged_error(err: &anyhow::Error) {
    if let Some(e) = err.downcast_ref::<ErrorMetadata>() {
        e.log();
    } else {
        crate::metrics::log_untagged_error();
    }
}

pub const INTERNAL_SERVER_ERROR: &str = "InternalServerError";
pub const INTERNAL_SERVER_ERROR_MSG: &str = "The event couldn't be processed. Try again later.";
pub const SANDBOX_DISPOSED: &str = "SandboxDisposed";
