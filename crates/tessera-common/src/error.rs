//! Error types for Tessera
//!
//! Every failure that crosses a driver, cache or codec boundary is expressed
//! as one of these variants. Backend-specific errors are wrapped, never
//! surfaced directly.

use crate::encoded::EncodedModel;
use crate::types::{FieldKind, PersistenceFailure, Role, WriteExpectation};
use thiserror::Error;

/// Common result type for Tessera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed underlying cause
pub type Cause = Box<dyn std::error::Error + Send + Sync>;

/// Common error type for Tessera
#[derive(Debug, Error)]
pub enum Error {
    // Schema errors
    #[error("invalid model type: {type_name} does not have any of the roles {expected:?}")]
    InvalidModelType {
        type_name: String,
        expected: Vec<Role>,
    },

    #[error("missing annotated field: {type_name} has no {kind} field")]
    MissingAnnotatedField { type_name: String, kind: FieldKind },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    // Codec errors
    #[error("failed to inflate {type_name}: {message}")]
    ModelInflate {
        type_name: String,
        message: String,
        #[source]
        source: Option<Cause>,
    },

    #[error("failed to deflate {type_name}: {message}")]
    ModelDeflate {
        type_name: String,
        message: String,
        #[source]
        source: Option<Cause>,
    },

    // Write errors
    #[error(
        "write conflict on {type_name} '{}': expected {expectation}",
        .key.as_deref().unwrap_or("<generated>")
    )]
    ModelWriteConflict {
        type_name: String,
        key: Option<String>,
        expectation: WriteExpectation,
    },

    #[error(
        "write failed for {type_name} '{}': {message}",
        .key.as_deref().unwrap_or("<generated>")
    )]
    ModelWriteFailure {
        type_name: String,
        key: Option<String>,
        /// Model being written; absent for deletes
        model: Option<Box<EncodedModel>>,
        message: String,
        #[source]
        source: Option<Cause>,
    },

    #[error("persistence operation failed ({reason})")]
    PersistenceOperationFailed {
        reason: PersistenceFailure,
        #[source]
        source: Option<Cause>,
    },

    // Caller errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a role mismatch error
    pub fn invalid_model_type(type_name: impl Into<String>, expected: &[Role]) -> Self {
        Self::InvalidModelType {
            type_name: type_name.into(),
            expected: expected.to_vec(),
        }
    }

    /// Create a missing ID/KEY field error
    pub fn missing_field(type_name: impl Into<String>, kind: FieldKind) -> Self {
        Self::MissingAnnotatedField {
            type_name: type_name.into(),
            kind,
        }
    }

    /// Create a schema error
    pub fn invalid_schema(msg: impl Into<String>) -> Self {
        Self::InvalidSchema(msg.into())
    }

    /// Create an inflate error without an underlying cause
    pub fn inflate(type_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ModelInflate {
            type_name: type_name.into(),
            message: msg.into(),
            source: None,
        }
    }

    /// Create an inflate error wrapping the decoder's error
    pub fn inflate_with(
        type_name: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ModelInflate {
            type_name: type_name.into(),
            message: cause.to_string(),
            source: Some(Box::new(cause)),
        }
    }

    /// Create a deflate error without an underlying cause
    pub fn deflate(type_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ModelDeflate {
            type_name: type_name.into(),
            message: msg.into(),
            source: None,
        }
    }

    /// Create a deflate error wrapping the encoder's error
    pub fn deflate_with(
        type_name: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ModelDeflate {
            type_name: type_name.into(),
            message: cause.to_string(),
            source: Some(Box::new(cause)),
        }
    }

    /// Create a write conflict error
    pub fn conflict(
        type_name: impl Into<String>,
        key: Option<String>,
        expectation: WriteExpectation,
    ) -> Self {
        Self::ModelWriteConflict {
            type_name: type_name.into(),
            key,
            expectation,
        }
    }

    /// Create a non-conflict write failure
    pub fn write_failure(
        type_name: impl Into<String>,
        key: Option<String>,
        model: Option<EncodedModel>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ModelWriteFailure {
            type_name: type_name.into(),
            key,
            model: model.map(Box::new),
            message: cause.to_string(),
            source: Some(Box::new(cause)),
        }
    }

    /// Create a classified operation failure
    pub fn operation_failed(reason: PersistenceFailure) -> Self {
        Self::PersistenceOperationFailed {
            reason,
            source: None,
        }
    }

    /// Create a classified operation failure with its cause
    pub fn operation_failed_with(
        reason: PersistenceFailure,
        cause: impl Into<Cause>,
    ) -> Self {
        Self::PersistenceOperationFailed {
            reason,
            source: Some(cause.into()),
        }
    }

    /// Wrap a backend error as an internal operation failure
    pub fn internal(cause: impl Into<Cause>) -> Self {
        Self::operation_failed_with(PersistenceFailure::Internal, cause)
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Classified failure reason, if this is an operation failure
    #[must_use]
    pub fn failure_reason(&self) -> Option<PersistenceFailure> {
        match self {
            Self::PersistenceOperationFailed { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Check if this is a retryable error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.failure_reason(),
            Some(PersistenceFailure::Timeout | PersistenceFailure::Unavailable)
        )
    }

    /// Model carried by a write failure
    #[must_use]
    pub fn failed_model(&self) -> Option<&EncodedModel> {
        match self {
            Self::ModelWriteFailure { model, .. } => model.as_deref(),
            _ => None,
        }
    }

    /// Check if this is a write conflict
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ModelWriteConflict { .. })
    }

    /// Check if this error indicates a caller programming error
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_)
                | Self::InvalidModelType { .. }
                | Self::MissingAnnotatedField { .. }
                | Self::InvalidSchema(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EncodingMode;

    #[test]
    fn test_error_retryable() {
        assert!(Error::operation_failed(PersistenceFailure::Timeout).is_retryable());
        assert!(Error::operation_failed(PersistenceFailure::Unavailable).is_retryable());
        assert!(!Error::operation_failed(PersistenceFailure::Cancelled).is_retryable());
        assert!(!Error::conflict("T", None, WriteExpectation::MustExist).is_retryable());
    }

    #[test]
    fn test_conflict_display() {
        let err = Error::conflict(
            "tessera.test.Person",
            Some("abc".into()),
            WriteExpectation::MustNotExist,
        );
        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            "write conflict on tessera.test.Person 'abc': expected record to be absent"
        );

        let err = Error::conflict("T", None, WriteExpectation::MustExist);
        assert!(err.to_string().contains("<generated>"));
    }

    #[test]
    fn test_failure_reason() {
        let io = std::io::Error::other("disk gone");
        let err = Error::internal(io);
        assert_eq!(err.failure_reason(), Some(PersistenceFailure::Internal));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(Error::invalid_argument("x").failure_reason(), None);
    }

    #[test]
    fn test_write_failure_carries_model() {
        let encoded = EncodedModel::new("tessera.test.Person", EncodingMode::Json, b"{}".to_vec());
        let err = Error::write_failure(
            "tessera.test.Person",
            Some("jd".into()),
            Some(encoded.clone()),
            std::io::Error::other("commit refused"),
        );
        assert_eq!(err.failed_model(), Some(&encoded));
        assert!(!err.is_conflict());
        assert_eq!(
            err.to_string(),
            "write failed for tessera.test.Person 'jd': commit refused"
        );

        let err = Error::write_failure("T", None, None, std::io::Error::other("x"));
        assert_eq!(err.failed_model(), None);
    }

    #[test]
    fn test_caller_errors() {
        assert!(Error::invalid_argument("bad path").is_caller_error());
        assert!(Error::invalid_model_type("T", Role::KEYED).is_caller_error());
        assert!(!Error::inflate("T", "garbage").is_caller_error());
    }
}
