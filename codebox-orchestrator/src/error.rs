use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// A job handler failure, classified for the scheduler.
///
/// `recoverable` means the handler never got far enough to record the
/// failure on the workspace, so the delivery should be retried. Anything
/// else has already been written to the workspace (log line + `Error`
/// status) and the job itself counts as delivered.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct OrchestrationError {
    pub message: String,
    pub recoverable: bool,
}

impl OrchestrationError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: false,
        }
    }
}

impl From<codebox_db::DbError> for OrchestrationError {
    fn from(e: codebox_db::DbError) -> Self {
        Self::recoverable(e.to_string())
    }
}
