//! The catalog is the durable priority index over buffered items. It stores
//! one record per item with its priority, minted hash, serialized size, and
//! tier flag, and answers the ordered queries every push and pop decision is
//! made from. The `CatalogDatabase` struct implements the `Database` trait to
//! open the backing SQLite file and bootstrap the schema, while `CatalogTable`
//! implements the `Table` trait plus the query statements for the records.

use std::path::Path;

use database::{Database, Table};
use rusqlite::{Connection, Result, params};

use crate::errors::CatalogError;

/// Reserved name of the catalog database file inside the managed directory.
/// Blob names are 32-character alphanumeric hashes, so the two can never
/// collide; directory listings that count blobs filter this prefix out.
pub const CATALOG_FILE: &str = "prism_data.db";

/// One catalog row. The insertion sequence id is assigned by the store and
/// only used for ordering, so it does not appear here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRecord {
    /// Priority assigned at push time; higher pops first.
    pub priority: u64,

    /// Opaque identifier tying the record to its hot-set entry or blob file.
    pub hash: String,

    /// Serialized byte size of the item, charged against the disk capacity
    /// while the record is on the disk tier.
    pub size: u64,

    /// Tier flag: `false` while the item lives in the hot set, `true` once it
    /// has been spilled to a blob.
    pub on_disk: bool,
}

/// Database interface for the catalog, opening the backing file and ensuring
/// the record table exists.
pub struct CatalogDatabase;

/// Table interface for the record table, providing the DDL and the row
/// statements the catalog queries are built from.
pub struct CatalogTable;

impl Database for CatalogDatabase {
    fn open(path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)?;

        // Recovery across reopen is promised, crash-durable commits are not,
        // so the cheaper sync level is enough.
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;

        CatalogTable::create_table(&conn)?;

        Ok(conn)
    }
}

impl Table for CatalogTable {
    type Record = CatalogRecord;

    fn create_table(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "BEGIN TRANSACTION;
            CREATE TABLE IF NOT EXISTS prism_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                priority INTEGER NOT NULL,
                hash TEXT NOT NULL,
                size INTEGER NOT NULL,
                on_disk INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS priority_idx ON prism_data (priority);
            CREATE INDEX IF NOT EXISTS on_disk_idx ON prism_data (on_disk);
            COMMIT;",
        )
    }

    fn insert(conn: &Connection, data: &Self::Record) -> Result<()> {
        conn.execute(
            "INSERT INTO prism_data (priority, hash, size, on_disk) VALUES (?1, ?2, ?3, ?4)",
            params![
                data.priority as i64,
                data.hash,
                data.size as i64,
                data.on_disk
            ],
        )?;

        Ok(())
    }
}

impl CatalogTable {
    /// Removes every row matching `hash`.
    pub fn delete_by_hash(conn: &Connection, hash: &str) -> Result<()> {
        conn.execute("DELETE FROM prism_data WHERE hash = ?1", params![hash])?;
        Ok(())
    }

    /// Sets the tier flag of the rows matching `hash`.
    pub fn set_tier(conn: &Connection, hash: &str, on_disk: bool) -> Result<()> {
        conn.execute(
            "UPDATE prism_data SET on_disk = ?1 WHERE hash = ?2",
            params![on_disk, hash],
        )?;
        Ok(())
    }

    /// The hash and tier of the highest-priority row. Ties prefer the
    /// in-memory tier, then insertion order.
    pub fn highest(conn: &Connection) -> Result<Option<(String, bool)>> {
        let mut stmt = conn.prepare(
            "SELECT hash, on_disk FROM prism_data ORDER BY priority DESC, on_disk ASC, id ASC LIMIT 1",
        )?;
        let mut rows = stmt.query([])?;

        if let Some(row) = rows.next()? {
            Ok(Some((row.get(0)?, row.get(1)?)))
        } else {
            Ok(None)
        }
    }

    /// The hash of the lowest-priority row on the given tier.
    pub fn lowest(conn: &Connection, on_disk: bool) -> Result<Option<String>> {
        let mut stmt = conn.prepare(
            "SELECT hash FROM prism_data WHERE on_disk = ?1 ORDER BY priority ASC, id ASC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![on_disk])?;

        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    /// Number of rows on the disk tier.
    pub fn disk_count(conn: &Connection) -> Result<u64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM prism_data WHERE on_disk = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Total serialized bytes of the rows on the disk tier.
    pub fn disk_bytes(conn: &Connection) -> Result<u64> {
        let total: Option<i64> = conn.query_row(
            "SELECT SUM(size) FROM prism_data WHERE on_disk = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(total.unwrap_or(0) as u64)
    }
}

/// The durable priority index. Holds one connection for its lifetime; the
/// owning buffer serializes access through its own lock. Any statement that
/// fails after construction, including the backing table having been dropped
/// externally, surfaces as [`CatalogError::Unavailable`].
pub struct Catalog {
    conn: Connection,
    max_disk_bytes: u64,
}

impl Catalog {
    /// Opens the catalog at `path`, creating the schema if absent.
    /// `max_disk_bytes` is the disk-tier capacity the [`full`](Catalog::full)
    /// predicate is measured against; zero is rejected.
    pub fn open(max_disk_bytes: u64, path: &Path) -> Result<Self, CatalogError> {
        if max_disk_bytes == 0 {
            return Err(CatalogError::Configuration(String::from(
                "max_disk_bytes must be nonzero",
            )));
        }

        let conn = CatalogDatabase::open(path)?;

        Ok(Self {
            conn,
            max_disk_bytes,
        })
    }

    /// Appends a record. An empty hash is silently ignored.
    pub fn insert(&self, record: &CatalogRecord) -> Result<(), CatalogError> {
        if record.hash.is_empty() {
            return Ok(());
        }

        CatalogTable::insert(&self.conn, record)?;
        Ok(())
    }

    /// Removes the rows matching `hash`. A no-op for empty or unknown hashes.
    pub fn delete(&self, hash: &str) -> Result<(), CatalogError> {
        if hash.is_empty() {
            return Ok(());
        }

        CatalogTable::delete_by_hash(&self.conn, hash)?;
        Ok(())
    }

    /// Flips the tier flag of the rows matching `hash`. A no-op for empty or
    /// unknown hashes.
    pub fn update_tier(&self, hash: &str, on_disk: bool) -> Result<(), CatalogError> {
        if hash.is_empty() {
            return Ok(());
        }

        CatalogTable::set_tier(&self.conn, hash, on_disk)?;
        Ok(())
    }

    /// The hash and tier of the record a pop should take next: greatest
    /// priority, ties broken toward the in-memory tier and then insertion
    /// order. `None` when the catalog holds no records.
    pub fn highest(&self) -> Result<Option<(String, bool)>, CatalogError> {
        Ok(CatalogTable::highest(&self.conn)?)
    }

    /// The lowest-priority in-memory record, the next demotion candidate.
    pub fn lowest_in_memory(&self) -> Result<Option<String>, CatalogError> {
        Ok(CatalogTable::lowest(&self.conn, false)?)
    }

    /// The lowest-priority on-disk record, the next eviction candidate.
    pub fn lowest_on_disk(&self) -> Result<Option<String>, CatalogError> {
        Ok(CatalogTable::lowest(&self.conn, true)?)
    }

    /// Whether the disk tier strictly exceeds its byte capacity.
    pub fn full(&self) -> Result<bool, CatalogError> {
        Ok(self.disk_bytes()? > self.max_disk_bytes)
    }

    /// Number of records on the disk tier.
    pub fn disk_count(&self) -> Result<u64, CatalogError> {
        Ok(CatalogTable::disk_count(&self.conn)?)
    }

    /// Total serialized bytes of the records on the disk tier.
    pub fn disk_bytes(&self) -> Result<u64, CatalogError> {
        Ok(CatalogTable::disk_bytes(&self.conn)?)
    }
}
