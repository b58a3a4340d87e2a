use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Config(String),

    /// startup failures: pool bootstrap, thread spawn
    #[error("construction failed: {0}")]
    Construction(String),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("logging setup failed: {0}")]
    Logging(String),
}

/// Credential table failures
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("user already exists: {0}")]
    DuplicateUser(String),

    #[error("malformed credential record: {0}")]
    MalformedRecord(String),

    #[error("credential store io: {0}")]
    Storage(#[from] std::io::Error),
}
