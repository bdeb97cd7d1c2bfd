//! Failure routing for dispatched operations.

use tracing::error;

use crate::error::S3Error;

/// Receives the errors of operations that were dispatched without their own
/// failure callback.
pub trait FailureHandler: Send + Sync {
    fn handle(&self, error: S3Error);
}

impl<F> FailureHandler for F
where
    F: Fn(S3Error) + Send + Sync,
{
    fn handle(&self, error: S3Error) {
        self(error)
    }
}

/// Default handler: logs the error and drops it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFailure;

impl FailureHandler for LogFailure {
    fn handle(&self, err: S3Error) {
        error!(error = %err, retryable = err.is_retryable(), "S3 operation failed");
    }
}
