use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RunnerError>;

#[derive(Error, Debug)]
pub enum RunnerError {
    /// The runner is in tunnel mode but holds no assigned port; no
    /// request is attempted.
    #[error("runner is not connected")]
    NotConnected,

    #[error("runner unreachable: {0}")]
    Unreachable(String),

    #[error("unexpected runner response: {0}")]
    BadResponse(String),

    /// The configuration snapshot was never materialized; the start job
    /// has to produce it before calling the runner.
    #[error("configuration snapshot missing: {0}")]
    ConfigMissing(PathBuf),

    #[error("no free tunnel ports available")]
    NoFreePorts,

    #[error("invalid runner token")]
    InvalidToken,

    #[error(transparent)]
    Db(#[from] codebox_db::DbError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
