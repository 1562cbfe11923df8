use {ctigate_protocol::StatusError, thiserror::Error};

/// Startup, sync and transport errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Persistence(#[from] ctigate_persistence::Error),

    #[error(transparent)]
    Auth(#[from] ctigate_auth::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

impl ctigate_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

ctigate_common::impl_context!();

// ── Handler errors ───────────────────────────────────────────────────────────

/// How a message handler can fail.
///
/// `Status` reaches the client unchanged. `Internal` is logged and replaced
/// with a generic failure status at the dispatch boundary.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn internal(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::Internal(message.into())
    }
}

impl From<ctigate_persistence::Error> for HandlerError {
    fn from(err: ctigate_persistence::Error) -> Self {
        Self::Internal(Box::new(err))
    }
}
