//! Error types for the scheduling domain.

/// The result type used throughout wfm-scheduler.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while scheduling tasks.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Startup configuration was missing or malformed.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of what made the configuration invalid.
        message: String,
    },

    /// Publishing a task to the broker failed.
    #[error("dispatch error: {message}")]
    Dispatch {
        /// Description of the dispatch failure.
        message: String,
    },

    /// A ready batch carried a different aggregation ID than the one
    /// being scheduled.
    #[error("found batch with aggregation ID {found}, wanted {expected}")]
    AggregationIdMismatch {
        /// The aggregation ID being scheduled.
        expected: String,
        /// The aggregation ID found on the batch.
        found: String,
    },

    /// An error from wfm-core (storage, batch paths, serialization).
    #[error("core error: {0}")]
    Core(#[from] wfm_core::Error),
}

impl Error {
    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new dispatch error.
    #[must_use]
    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::Dispatch {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_error_names_both_ids() {
        let err = Error::AggregationIdMismatch {
            expected: "kittens-seen".into(),
            found: "puppies-seen".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("kittens-seen"));
        assert!(msg.contains("puppies-seen"));
    }

    #[test]
    fn core_errors_convert() {
        let err: Error = wfm_core::Error::storage("listing failed").into();
        assert!(err.to_string().contains("listing failed"));
    }
}
