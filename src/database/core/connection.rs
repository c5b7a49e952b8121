//! Database connection management
//!
//! This module provides the connection wrapper shared by the schema store,
//! the migration engine and the scan configuration repositories.

use crate::error::Result;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::time::Duration;

/// Default time a connection waits on a locked database before giving up
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Core database connection wrapper
///
/// `DatabaseConn` wraps a SQLite connection and applies the settings every
/// scan database relies on, most importantly `foreign_keys=ON` so that
/// referential integrity is enforced by the store itself.
pub struct DatabaseConn {
    pub conn: Connection,
}

impl DatabaseConn {
    /// Open a database at the specified path
    ///
    /// If the path is `None`, an in-memory database is created.
    pub fn open(path: Option<&str>) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open a database, waiting up to `busy_timeout` for locks held by other clients
    pub fn open_with_timeout(path: Option<&str>, busy_timeout: Duration) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)?,
            None => Connection::open_in_memory()?,
        };

        let db = DatabaseConn { conn };
        db.configure(busy_timeout)?;
        Ok(db)
    }

    /// Open a database at the specified path (convenience method)
    pub fn open_path(path: &str) -> Result<Self> {
        Self::open(Some(path))
    }

    /// Create an in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::open(None)
    }

    fn configure(&self, busy_timeout: Duration) -> Result<()> {
        self.conn.busy_timeout(busy_timeout)?;

        // WAL lets scanning clients keep reading while an administrator writes
        let _: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        self.conn.execute("PRAGMA synchronous=NORMAL", [])?;
        self.conn.execute("PRAGMA foreign_keys=ON", [])?;

        Ok(())
    }

    /// Execute a SQL statement
    pub fn execute(&self, sql: &str) -> Result<usize> {
        Ok(self.conn.execute(sql, [])?)
    }

    /// Begin a deferred transaction for ordinary batched writes
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    /// Begin a transaction that takes the write lock immediately
    ///
    /// Administrative work (migrations, provisioning) uses this so that two
    /// administrators can never interleave on the same store.
    pub fn immediate_transaction(&self) -> Result<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    /// Check if a table exists in the database
    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        table_exists(&self.conn, table_name)
    }

    /// Check if a column exists on a table
    pub fn column_exists(&self, table_name: &str, column_name: &str) -> Result<bool> {
        column_exists(&self.conn, table_name, column_name)
    }

    /// Get the row count for a table
    pub fn table_count(&self, table_name: &str) -> Result<u64> {
        let query = format!("SELECT COUNT(*) FROM \"{}\"", table_name);
        let count: u64 = self.conn.query_row(&query, [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Check if a table exists, usable from inside a transaction
pub fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let count: i32 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
        [table_name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Check if a column exists on a table, usable from inside a transaction
pub fn column_exists(conn: &Connection, table_name: &str, column_name: &str) -> Result<bool> {
    let count: i32 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name=?2",
        [table_name, column_name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = DatabaseConn::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let db = DatabaseConn::open_in_memory().unwrap();
        let enabled: i32 = db
            .conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn test_table_and_column_exists() {
        let db = DatabaseConn::open_in_memory().unwrap();
        db.execute("CREATE TABLE test_table (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();

        assert!(db.table_exists("test_table").unwrap());
        assert!(!db.table_exists("nonexistent_table").unwrap());
        assert!(db.column_exists("test_table", "name").unwrap());
        assert!(!db.column_exists("test_table", "value").unwrap());
        assert!(!db.column_exists("nonexistent_table", "name").unwrap());
    }

    #[test]
    fn test_table_count() {
        let db = DatabaseConn::open_in_memory().unwrap();
        db.execute("CREATE TABLE test_table (id INTEGER PRIMARY KEY)")
            .unwrap();
        db.execute("INSERT INTO test_table (id) VALUES (1), (2), (3)")
            .unwrap();

        assert_eq!(db.table_count("test_table").unwrap(), 3);
    }

    #[test]
    fn test_immediate_transaction_rolls_back_on_drop() {
        let db = DatabaseConn::open_in_memory().unwrap();
        db.execute("CREATE TABLE test_table (id INTEGER PRIMARY KEY)")
            .unwrap();
        {
            let tx = db.immediate_transaction().unwrap();
            tx.execute("INSERT INTO test_table (id) VALUES (1)", [])
                .unwrap();
        }
        assert_eq!(db.table_count("test_table").unwrap(), 0);
    }
}
