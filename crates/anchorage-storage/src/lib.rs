//! # Anchorage Storage
//!
//! RocksDB persistence for the anchor subsystem.
//!
//! ## Storage Layout
//!
//! | Column family | Key | Value |
//! |---------------|-----|-------|
//! | `anchors` | chain position (u64 BE) | `Anchor` |
//! | `pending` | external tx hash | `PendingAnchor` |
//! | `meta` | fixed keys | schema version, local and external heights, community balances |
//!
//! Values are `bincode` encoded. A snapshot replaces the whole anchor state in
//! one atomic write batch.

pub mod anchor_db;

pub use anchor_db::{AnchorDb, STORAGE_SCHEMA_VERSION};

use anchorage_core::AnchorError;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("RocksDB error: {0}")]
    Rocks(#[from] rocksdb::Error),

    #[error("Encoding error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Missing column family: {0}")]
    MissingColumnFamily(&'static str),

    #[error("Database schema version {found} is not supported (expected {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl From<StorageError> for AnchorError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Codec(e) => AnchorError::Serialization(e.to_string()),
            other => AnchorError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let err: AnchorError = StorageError::MissingColumnFamily("anchors").into();
        assert!(matches!(err, AnchorError::Storage(_)));

        let err: AnchorError = StorageError::UnsupportedSchema {
            found: 9,
            supported: 1,
        }
        .into();
        assert_eq!(err.code(), AnchorError::Storage(String::new()).code());
    }
}
