//! Error types for the validator client

use crate::types::PhaseWarning;
use ethers::types::Address;
use thiserror::Error;

/// Result type for validator client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Validator client errors
///
/// Every variant is fatal for the invocation that produced it. Timing problems
/// the ledger decides authoritatively are reported as [`PhaseWarning`] values
/// instead, except when the reveal phase guard refuses to proceed.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing required input, reported before any network call
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Expected local record or on-chain state is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Action not permitted in the current protocol phase
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Reveal attempted before the commit phase closed
    #[error("{0}; pass --force to submit anyway")]
    PhaseNotReached(PhaseWarning),

    /// External ledger call reverted or failed (message kept verbatim)
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Resolved signing identity differs from the expected address
    #[error("Signer mismatch: expected {expected:?}, resolved {actual:?}")]
    SignerMismatch {
        /// Address the action must be signed by
        expected: Address,
        /// Address of the signer that would have been used
        actual: Address,
    },

    /// Record store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit code for this error class
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation(_) => 2,
            Error::NotFound(_) => 3,
            Error::Conflict(_) | Error::PhaseNotReached(_) => 4,
            Error::Ledger(_) => 5,
            Error::SignerMismatch { .. } => 6,
            Error::Config(_) => 7,
            Error::Storage(_) | Error::Serialization(_) | Error::Io(_) => 1,
        }
    }

    /// Whether this error means the requested record or state is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_class() {
        let codes = [
            Error::Validation(String::new()).exit_code(),
            Error::NotFound(String::new()).exit_code(),
            Error::Conflict(String::new()).exit_code(),
            Error::Ledger(String::new()).exit_code(),
            Error::SignerMismatch {
                expected: Address::zero(),
                actual: Address::repeat_byte(1),
            }
            .exit_code(),
            Error::Config(String::new()).exit_code(),
        ];

        let mut sorted = codes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
        assert!(codes.iter().all(|c| *c != 0));
    }

    #[test]
    fn test_phase_not_reached_mentions_force() {
        let err = Error::PhaseNotReached(PhaseWarning::RevealBeforeCommitDeadline {
            now: 10,
            commit_deadline: 20,
        });
        assert!(err.to_string().contains("--force"));
        assert_eq!(err.exit_code(), Error::Conflict(String::new()).exit_code());
    }
}
