//! Error types and result aliases shared across the workflow manager.

/// The result type used throughout the workflow manager.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in workflow-manager operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Startup configuration was missing or malformed.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of what made the configuration invalid.
        message: String,
    },

    /// An object-storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        /// Whether the failure is worth retrying (5xx, throttling, network).
        transient: bool,
    },

    /// A batch object key did not have the expected shape.
    #[error("malformed batch path {path}: {message}")]
    BatchPath {
        /// The offending object key.
        path: String,
        /// Description of what made the key invalid.
        message: String,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },
}

impl Error {
    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new permanent storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
            transient: false,
        }
    }

    /// Creates a new transient storage error, eligible for retry.
    #[must_use]
    pub fn storage_transient(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
            transient: true,
        }
    }

    /// Creates a new permanent storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
            transient: false,
        }
    }

    /// Creates a new transient storage error with a source cause.
    #[must_use]
    pub fn storage_transient_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
            transient: true,
        }
    }

    /// Creates a new batch-path error.
    #[must_use]
    pub fn batch_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BatchPath {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns true if retrying the failed operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage { transient: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn storage_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = Error::storage_with_source("listing bucket failed", source);
        assert!(err.to_string().contains("storage error"));
        assert!(StdError::source(&err).is_some());
        assert!(!err.is_transient());
    }

    #[test]
    fn transient_flag_is_preserved() {
        assert!(Error::storage_transient("throttled").is_transient());
        assert!(!Error::storage("forbidden").is_transient());
        assert!(!Error::configuration("missing flag").is_transient());
    }

    #[test]
    fn batch_path_error_display() {
        let err = Error::batch_path("a/b", "expected 7 components, got 2");
        assert!(err.to_string().contains("a/b"));
        assert!(err.to_string().contains("7 components"));
    }
}
