//! Run State Store errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// The database was opened without one of the expected column families
    #[error("Missing column family: {0}")]
    MissingColumnFamily(String),

    #[error("Bad key: {0}")]
    Key(String),

    #[error("Record encoding error: {0}")]
    Encoding(String),

    #[error("No such run: {0}")]
    RunNotFound(String),

    #[error("Run already exists: {0}")]
    RunExists(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Encoding(err.to_string())
    }
}
