//! Engine-level errors: the store/transaction-discipline violations that
//! sit below [`wot_common::WotError`], plus a conversion into it for
//! callers that only want the spec's public error taxonomy.

use thiserror::Error;
use wot_common::WotError;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Wot(#[from] WotError),

    #[error("no active transaction")]
    NoActiveTransaction,

    #[error("a transaction is already active on this store")]
    TransactionAlreadyActive,

    #[error("database is already locked by another engine instance")]
    DatabaseAlreadyLocked,
}

impl From<EngineError> for WotError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Wot(inner) => inner,
            EngineError::NoActiveTransaction | EngineError::TransactionAlreadyActive => {
                WotError::TransactionAborted(err.to_string())
            }
            EngineError::DatabaseAlreadyLocked => WotError::Store(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_wot_error() {
        let err: WotError = EngineError::DatabaseAlreadyLocked.into();
        assert!(matches!(err, WotError::Store(_)));
    }
}
