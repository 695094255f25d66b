use std::time::Duration;

use errors::{
    ErrorCode,
    ErrorMetadata,
    ErrorMetadataAnyhowExt,
};
use serde::{
    Serialize,
    Serializer,
};

/// A captured step failure. The taxonomy code travels with the entry so the
/// end-of-chain scan can classify without holding the original error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    pub short_msg: String,
    pub message: String,
}

impl StepError {
    pub fn of(err: &anyhow::Error) -> Self {
        Self {
            code: err.error_code(),
            short_msg: err.short_msg().to_owned(),
            message: format!("{err:#}"),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_some_and(|c| c.is_retryable())
    }

    /// Reconstruct an error carrying the original classification.
    pub fn to_error(&self) -> anyhow::Error {
        let base = anyhow::anyhow!(self.message.clone());
        match self.code {
            Some(code) => base.context(ErrorMetadata {
                code,
                short_msg: self.short_msg.clone().into(),
                msg: self.message.clone().into(),
            }),
            None => base,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StepStatus {
    Ok { events: usize },
    Dropped,
    Error { error: StepError },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecLogEntry {
    pub function_id: String,
    #[serde(flatten)]
    pub status: StepStatus,
    #[serde(rename = "durationMs", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Per-step records accumulated by the executor, in execution order. Inner
/// pipeline steps contribute their own entries ahead of the pipeline step's
/// summary entry.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ExecLog {
    entries: Vec<ExecLogEntry>,
}

impl ExecLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ExecLogEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ExecLogEntry] {
        &self.entries
    }

    pub fn error_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, StepStatus::Error { .. }))
            .count()
    }
}

/// End-of-chain classification. A retryable entry anywhere in the log wins:
/// the message goes back to the bus even when fatal errors are also present.
/// Fatal-only logs are acceptable to ack; the failures were already
/// captured.
pub fn check_error(log: &ExecLog) -> anyhow::Result<()> {
    for entry in log.entries() {
        if let StepStatus::Error { error } = &entry.status {
            if error.is_retryable() {
                return Err(error
                    .to_error()
                    .context(format!("Step {} hit a retryable failure", entry.function_id)));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use errors::{
        ErrorCode,
        ErrorMetadata,
        ErrorMetadataAnyhowExt,
    };

    use super::{
        check_error,
        ExecLog,
        ExecLogEntry,
        StepError,
        StepStatus,
    };

    fn entry(function_id: &str, status: StepStatus) -> ExecLogEntry {
        ExecLogEntry {
            function_id: function_id.to_owned(),
            status,
            duration: Duration::from_millis(3),
        }
    }

    fn error_entry(function_id: &str, err: anyhow::Error) -> ExecLogEntry {
        entry(
            function_id,
            StepStatus::Error {
                error: StepError::of(&err),
            },
        )
    }

    #[test]
    fn test_clean_log_has_no_error() {
        let mut log = ExecLog::new();
        log.push(entry("builtin.transformation.addTimestamp", StepStatus::Ok { events: 1 }));
        log.push(entry("builtin.destination.bulker", StepStatus::Ok { events: 1 }));
        assert!(check_error(&log).is_ok());
    }

    #[test]
    fn test_fatal_only_log_is_acked() {
        let mut log = ExecLog::new();
        log.push(error_entry(
            "udf.PIPELINE",
            ErrorMetadata::udf_runtime("UdfThrew", "boom").into(),
        ));
        assert!(check_error(&log).is_ok());
        assert_eq!(log.error_count(), 1);
    }

    #[test]
    fn test_retryable_wins_over_fatal() {
        let mut log = ExecLog::new();
        log.push(error_entry(
            "udf.PIPELINE",
            ErrorMetadata::udf_runtime("UdfThrew", "boom").into(),
        ));
        log.push(error_entry(
            "builtin.destination.bulker",
            ErrorMetadata::transient_downstream("BulkerUnavailable", "503").into(),
        ));
        let err = check_error(&log).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.error_code(), Some(ErrorCode::TransientDownstream));
    }

    #[test]
    fn test_untagged_step_error_is_fatal() {
        let mut log = ExecLog::new();
        log.push(error_entry("udf.PIPELINE", anyhow::anyhow!("mystery failure")));
        assert!(check_error(&log).is_ok());
    }

    #[test]
    fn test_exec_log_serializes_for_operators() {
        let mut log = ExecLog::new();
        log.push(entry("udf.PIPELINE", StepStatus::Ok { events: 2 }));
        log.push(error_entry(
            "builtin.destination.webhook",
            ErrorMetadata::transient_downstream("WebhookUnavailable", "502").into(),
        ));
        let rendered = serde_json::to_value(&log).unwrap();
        let entries = rendered.as_array().unwrap();
        assert_eq!(entries[0]["functionId"], "udf.PIPELINE");
        assert_eq!(entries[0]["status"], "ok");
        assert_eq!(entries[0]["events"], 2);
        assert_eq!(entries[1]["status"], "error");
        assert_eq!(entries[1]["error"]["code"], "transient_downstream");
    }
}
