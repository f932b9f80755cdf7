//! Errors surfaced at the buffer boundary.

use thiserror::Error;

/// Errors raised by the blob file store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid store configuration: {0}")]
    Configuration(String),

    #[error("No stored file named '{0}'")]
    NotFound(String),

    #[error("A stored file named '{0}' already exists")]
    AlreadyExists(String),

    #[error("'{0}' is not a valid blob name")]
    InvalidName(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Invalid catalog configuration: {0}")]
    Configuration(String),

    #[error("Catalog unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),
}

/// Errors surfaced by [`PriorityBuffer`](crate::PriorityBuffer) operations.
///
/// An item that cannot be produced (missing blob, vanished hot-set entry) is
/// not an error; `pop` reports it as `Ok(None)`.
#[derive(Error, Debug)]
pub enum BufferError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
