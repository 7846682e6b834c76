use thiserror::Error;

/// Navigation core error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to decode message on '{topic}': {reason}")]
    Decode { topic: String, reason: String },

    #[error("Failed to encode message for '{topic}': {reason}")]
    Encode { topic: String, reason: String },

    #[error("Unparseable NMEA sentence '{sentence}': {reason}")]
    Parse { sentence: String, reason: String },

    #[error("EKF initialization refused: {0}")]
    Initialization(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid loop rate: {0}")]
    InvalidRate(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl NavError {
    /// Errors that only affect a single message or sentence.
    ///
    /// The owning task logs these and keeps going; everything else should
    /// propagate up to the node so it can be restarted.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            NavError::Decode { .. } | NavError::Parse { .. } | NavError::Numerical(_)
        )
    }

    pub(crate) fn parse(sentence: &str, reason: impl Into<String>) -> Self {
        NavError::Parse {
            sentence: sentence.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for navigation core operations
pub type Result<T> = std::result::Result<T, NavError>;
