//! Error type shared by the tuner, the backends and the validator.

use thiserror::Error;

/// Every failure the harness can hit.  None of them are retried: the
/// caller propagates the first one up to the driver, which ends the run.
#[derive(Error, Debug)]
pub enum TunerError {
    /// A device, queue, buffer or kernel operation failed.
    #[error("{operation} failed: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },

    #[error("{tensor} index {index} out of range {len}")]
    IndexOutOfRange {
        tensor: &'static str,
        index: usize,
        len: usize,
    },

    #[error("negative filter index {index} at row {row}, col {col}")]
    InvalidFilterIndex { row: usize, col: usize, index: i32 },

    /// First output element outside the validation tolerance.
    #[error(
        "result check failed at row: {row}, col: {col}, filter index: {filter_index}. \
         Expected: {expected}, got: {actual}"
    )]
    Mismatch {
        row: usize,
        col: usize,
        filter_index: usize,
        expected: f32,
        actual: f32,
    },

    #[error("invalid problem size {width}x{height}: {reason}")]
    InvalidProblemSize {
        width: u32,
        height: u32,
        reason: &'static str,
    },

    #[error("invalid work-group shape: {0}")]
    InvalidShape(String),
}

impl TunerError {
    pub(crate) fn backend(operation: &'static str, message: impl Into<String>) -> Self {
        TunerError::Backend {
            operation,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TunerError>;
