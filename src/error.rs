use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("attendee {0} not found")]
    NotFound(String),
    #[error("store rejected request: {0}")]
    Rejected(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawRejected {
    #[error("the roster is empty")]
    EmptyRoster,
    #[error("a draw is already spinning")]
    AlreadySpinning,
}

#[derive(Error, Debug)]
pub enum ControlError {
    #[error(transparent)]
    Draw(#[from] DrawRejected),
    #[error("winners cannot be reset while a draw is spinning")]
    DrawInProgress,
    #[error("attendee {0} is not on the roster")]
    UnknownAttendee(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("controller is not running")]
    Stopped,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid scene bounds: {0}")]
    Bounds(String),
}
