use ::errors::{
    log_tagged_error,
    ErrorMetadataAnyhowExt,
};

/// Return Result<(), MainError> from main functions to log returned errors
/// through the standard reporting path.
pub struct MainError(anyhow::Error);

impl<T: Into<anyhow::Error>> From<T> for MainError {
    fn from(e: T) -> Self {
        let mut err: anyhow::Error = e.into();
        report_error_sync(&mut err);
        Self(err)
    }
}

impl std::fmt::Debug for MainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Just print the `Display` of the error rather than `Debug`;
        // report_error already logged the chain.
        write!(f, "{}", self.0)
    }
}

/// Log an error through tracing and the taxonomy counter. Other crates
/// should route surfaced failures here rather than calling tracing::error
/// ad hoc, so every failure shows up in the per-code metrics.
pub async fn report_error(err: &mut anyhow::Error) {
    // Yield first in case this is during shutdown, allowing tokio to
    // complete a cancellation instead.
    tokio::task::yield_now().await;
    report_error_sync(err);
}

pub fn report_error_sync(err: &mut anyhow::Error) {
    log_tagged_error(err);
    if err.is_retryable() {
        tracing::warn!(short_msg = err.short_msg(), "{err:#}");
    } else {
        tracing::error!(short_msg = err.short_msg(), "{err:#}");
    }
}
