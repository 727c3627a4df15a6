use thiserror::Error;

/// Failure modes the core itself can raise. Collaborator parse failures are
/// represented separately (see [`crate::tailer::ParseError`]) since the core
/// never inspects what went wrong inside a caller-supplied parser.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watched file does not exist")]
    FileMissing,

    #[error("file-system watch service closed unexpectedly")]
    WatchClosed,

    #[error("parent directory of the watched file is no longer accessible")]
    ParentDirLost,

    #[error("schedule '{0}' was registered with a non-positive period")]
    InvalidPeriod(String),

    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is not running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, CoreError>;
