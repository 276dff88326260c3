use thiserror::Error;

pub type UplinkResult<T> = Result<T, UplinkError>;

#[derive(Debug, Error)]
pub enum UplinkError {
    /// The task store could not be read or written. Fatal to the current run.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("upload error: {0}")]
    Upload(String),

    /// Rejected at enqueue time
    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl UplinkError {
    pub fn persistence(msg: impl Into<String>) -> Self {
        UplinkError::Persistence(msg.into())
    }

    pub fn is_persistence(&self) -> bool {
        matches!(self, UplinkError::Persistence(_))
    }
}
