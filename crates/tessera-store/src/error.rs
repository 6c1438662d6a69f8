//! Backend error plumbing
//!
//! Raw redb, bincode and io errors stay inside the drivers. At the driver
//! boundary they become `PersistenceOperationFailed` with a classified
//! reason.

use tessera_common::{Error, PersistenceFailure, Result};

/// Error type for backend operations
#[derive(Debug, thiserror::Error)]
pub(crate) enum BackendError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::TransactionError> for BackendError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl BackendError {
    /// Failure reason reported to callers
    pub(crate) fn reason(&self) -> PersistenceFailure {
        match self {
            Self::Redb(redb::DatabaseError::DatabaseAlreadyOpen)
            | Self::Storage(redb::StorageError::Io(_))
            | Self::Io(_) => PersistenceFailure::Unavailable,
            _ => PersistenceFailure::Internal,
        }
    }
}

impl From<BackendError> for Error {
    fn from(e: BackendError) -> Self {
        Self::operation_failed_with(e.reason(), e)
    }
}

/// Convert raw backend results at the driver boundary
pub(crate) trait BackendResultExt<T> {
    fn backend(self) -> Result<T>;
}

impl<T, E: Into<BackendError>> BackendResultExt<T> for std::result::Result<T, E> {
    fn backend(self) -> Result<T> {
        self.map_err(|e| Error::from(e.into()))
    }
}
