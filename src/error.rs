//! Engine error taxonomy.

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors surfaced by the analytical engine.
///
/// Structural errors (`NotInitialized`, `UntrainedModel`, the two
/// insufficient-data variants) are returned as the sole result of a call.
/// `MalformedRecord` is only ever produced per record and recovered locally.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("insufficient training data: need {needed} records, have {have}")]
    InsufficientTrainingData { needed: usize, have: usize },

    #[error("insufficient data for trend analysis: need {needed} records, have {have}")]
    InsufficientTrendData { needed: usize, have: usize },

    #[error("model has not been trained")]
    UntrainedModel,

    #[error("engine has not been initialized")]
    NotInitialized,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed record: {reason}")]
    MalformedRecord { reason: String },

    #[error("operation cancelled")]
    CancelledOperation,
}

/// How many loop iterations pass between cancellation checks.
pub(crate) const CANCEL_CHECK_INTERVAL: usize = 256;

/// Return `CancelledOperation` if the caller has cancelled.
pub(crate) fn ensure_active(cancel: &CancellationToken) -> Result<(), EngineError> {
    if cancel.is_cancelled() {
        return Err(EngineError::CancelledOperation);
    }
    Ok(())
}

/// Periodic variant of [`ensure_active`] for hot loops.
pub(crate) fn checkpoint(cancel: &CancellationToken, iteration: usize) -> Result<(), EngineError> {
    if iteration % CANCEL_CHECK_INTERVAL == 0 {
        ensure_active(cancel)?;
    }
    Ok(())
}
