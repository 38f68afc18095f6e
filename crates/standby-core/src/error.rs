//! Error types for Standby Core

use thiserror::Error;

/// Result type alias using Standby Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the replication core
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or out-of-order caller-supplied identifiers.
    ///
    /// Always raised before any state is touched.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The persistence capability failed an operation
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// I/O errors from the replication channel
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Synchronization unit outside its legal predecessor state, or carrying
    /// an illegal field value. Fatal to the current attempt only.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Internal contract breach (e.g. topology queried while empty)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Invalid configuration or configuration source failure
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a storage failure
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageFailure(msg.into())
    }

    /// Create a codec error
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    /// Create a protocol violation
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Create an invariant violation
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True if the persistence layer failed
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Self::StorageFailure(_))
    }

    /// True if a synchronization attempt must be restarted from `StreamBegin`
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_))
    }
}

impl From<heed::Error> for Error {
    fn from(err: heed::Error) -> Self {
        Self::StorageFailure(format!("lmdb: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heed_errors_are_storage_failures() {
        let err: Error = heed::Error::Io(std::io::Error::other("disk gone")).into();
        assert!(err.is_storage_failure());
        assert!(err.to_string().contains("disk gone"));
    }

    #[test]
    fn test_protocol_violation_classification() {
        let err = Error::protocol("EntityEnd before EntityBegin");
        assert!(err.is_protocol_violation());
        assert!(!err.is_storage_failure());
    }
}
