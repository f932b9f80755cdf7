//! Trait seam between SQLite-backed stores and the crates that own them. A
//! store implements [`Database`] to open its connection file and bootstrap its
//! schema, and [`Table`] for the row-level statements of one table. Keeping
//! the seam here lets callers swap or mock the backing store without touching
//! the SQL that lives next to each table type.

use std::path::Path;

use rusqlite::{Connection, Result};

/// A SQLite database that lives at a caller-chosen path.
pub trait Database {
    /// Opens a connection to the database file at `path`, creating the schema
    /// when it does not exist yet.
    fn open(path: &Path) -> Result<Connection>;
}

/// Row-level operations for a single table of a [`Database`].
pub trait Table {
    type Record;

    /// Creates the table (and any indexes on it) if absent.
    fn create_table(conn: &Connection) -> Result<()>;

    /// Appends one record.
    fn insert(conn: &Connection, data: &Self::Record) -> Result<()>;
}
