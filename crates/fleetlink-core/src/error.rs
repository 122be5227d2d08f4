//! Unified error handling for FleetLink.
//!
//! Request-level failures (name resolution, connection failure, timeout) are
//! not errors in this sense: they are first-class outcomes carried by the
//! response type of the devices crate. This type covers everything else.

/// Unified error type for FleetLink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Service discovery backend errors.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// A body that was expected to be JSON could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A success-only or failure-only accessor was used on the other variant.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Version string is not `major.minor.patch[-label]`.
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// Generic internal errors.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Other errors.
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

#[macro_export]
macro_rules! config_err {
    ($msg:expr) => {
        $crate::error::Error::Config($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! discovery_err {
    ($msg:expr) => {
        $crate::error::Error::Discovery($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Discovery(format!($fmt, $($arg)*))
    };
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_macros() {
        let err = config_err!("bad interval");
        assert_eq!(err, Error::Config("bad interval".to_string()));

        let err = discovery_err!("daemon exited with {}", 3);
        assert_eq!(err.to_string(), "Discovery error: daemon exited with 3");
    }

    #[test]
    fn test_other_keeps_message() {
        let err = Error::Other("daemon gone".to_string());
        assert_eq!(err.clone(), err);
        assert_eq!(err.to_string(), "Other error: daemon gone");
    }

    #[test]
    fn test_from_serde_json() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Decode(_)));
    }
}
