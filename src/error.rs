#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PickerError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Server error: {0}")]
    TransientServer(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Unknown index status: {0:?}")]
    UnknownStatus(String),

    #[error("A rebuild is already in flight")]
    RebuildInFlight,

    #[error("Edit mode is not active")]
    NotEditing,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl PickerError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn server(msg: impl std::fmt::Display) -> Self {
        Self::TransientServer(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PickerError>;
