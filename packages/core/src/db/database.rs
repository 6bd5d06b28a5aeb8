//! Database Connection Management
//!
//! This module provides the core database connection and initialization
//! functionality using libsql for the page cache.
//!
//! # Architecture
//!
//! - **Path-agnostic**: Accepts any valid PathBuf, or runs fully in memory
//! - **WAL mode**: Write-Ahead Logging for better concurrency
//! - **Foreign keys**: Enabled for referential integrity
//! - **Dynamic tables**: Page tables are created by the schema registry as
//!   page types register; only the shared relationships table lives here
//!
//! # Connection Patterns
//!
//! **Always use `connect_with_timeout()` in async functions** to avoid
//! SQLite thread-safety violations when the Tokio runtime moves futures
//! between threads. The 5-second busy timeout allows concurrent operations
//! to wait and retry instead of failing immediately with `SQLITE_BUSY`.

use std::path::PathBuf;
use std::sync::Arc;

use libsql::{Builder, Database};

use crate::db::error::DatabaseError;

/// Database service for managing the libsql connection and shared schema
///
/// # Examples
///
/// ```no_run
/// use pagecore::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db = DatabaseService::new(PathBuf::from("./data/pages.db")).await?;
///     let conn = db.connect_with_timeout().await?;
///     # let _ = conn;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    db: Arc<Database>,

    /// Path to the database file (":memory:" for in-memory databases)
    db_path: PathBuf,
}

impl DatabaseService {
    /// Create a new DatabaseService with the specified database path
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Initialize the shared schema (CREATE TABLE IF NOT EXISTS)
    /// 4. Enable SQLite features (WAL mode, foreign keys)
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if:
    /// - Parent directory cannot be created
    /// - Database connection fails
    /// - Schema initialization fails
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        // Whether a WAL checkpoint is needed after initialization - only for
        // databases that did not exist before we opened them
        let is_new_database = !db_path.exists();

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DatabaseError::permission_denied(db_path.clone())
                    } else {
                        DatabaseError::DirectoryCreationFailed(e)
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
        };

        service.initialize_schema(is_new_database).await?;

        Ok(service)
    }

    /// Create an in-memory DatabaseService (primarily for tests)
    pub async fn new_in_memory() -> Result<Self, DatabaseError> {
        let db_path = PathBuf::from(":memory:");
        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
        };

        service.initialize_schema(false).await?;

        Ok(service)
    }

    /// Path this database was opened with
    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of
    /// execute(). This helper encapsulates that pattern.
    async fn execute_pragma(
        &self,
        conn: &libsql::Connection,
        pragma: &str,
    ) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Initialize database configuration and the shared relationships table
    ///
    /// Page tables are created later, one per registered page type, by the
    /// schema registry. Initialization is idempotent (CREATE TABLE IF NOT
    /// EXISTS) and safe to call on every open.
    async fn initialize_schema(&self, is_new_database: bool) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        // Enable WAL mode for better concurrency
        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        // Make SQLite wait up to 5s instead of failing immediately on lock
        self.execute_pragma(&conn, "PRAGMA busy_timeout = 5000")
            .await?;

        // Enable foreign key constraints
        self.execute_pragma(&conn, "PRAGMA foreign_keys = ON")
            .await?;

        // Shared parent/child relationship table: one row per (child, "parent")
        conn.execute(
            "CREATE TABLE IF NOT EXISTS page_relationships (
                source_uri TEXT NOT NULL,
                relationship_type TEXT NOT NULL,
                target_uri TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (source_uri, relationship_type)
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!(
                "Failed to create page_relationships table: {}",
                e
            ))
        })?;

        // Index on source_uri (lineage walks child -> parent)
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_relationships_source
             ON page_relationships(source_uri)",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!(
                "Failed to create index 'idx_relationships_source': {}",
                e
            ))
        })?;

        // Index on target_uri (children-of queries parent -> children)
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_relationships_target
             ON page_relationships(target_uri)",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!(
                "Failed to create index 'idx_relationships_target': {}",
                e
            ))
        })?;

        // Flush the WAL for newly created database files so rapid reopen in
        // tests never observes a missing table
        if is_new_database {
            self.execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)")
                .await?;
        }

        Ok(())
    }

    /// Get a connection without configuring a busy timeout
    ///
    /// Only for synchronous, single-threaded contexts. Most code should use
    /// `connect_with_timeout()` instead.
    pub fn connect(&self) -> Result<libsql::Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::LibsqlError)
    }

    /// Get an async connection with busy timeout configured
    ///
    /// The safe default for async code: sets a 5-second busy timeout so
    /// concurrent operations wait and retry instead of failing immediately
    /// when the database is locked.
    pub async fn connect_with_timeout(&self) -> Result<libsql::Connection, DatabaseError> {
        let conn = self.connect()?;

        self.execute_pragma(&conn, "PRAGMA busy_timeout = 5000")
            .await?;

        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_initialization() {
        let db = DatabaseService::new_in_memory().await.unwrap();
        let conn = db.connect_with_timeout().await.unwrap();

        // Relationships table exists and is empty
        let mut rows = conn
            .query("SELECT COUNT(*) FROM page_relationships", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let count: i64 = row.get(0).unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_file_backed_initialization_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pages.db");

        let first = DatabaseService::new(path.clone()).await.unwrap();
        drop(first);

        // Re-opening an existing file must succeed and keep the schema
        let second = DatabaseService::new(path).await.unwrap();
        let conn = second.connect_with_timeout().await.unwrap();
        conn.execute(
            "INSERT INTO page_relationships (source_uri, relationship_type, target_uri)
             VALUES (?1, ?2, ?3)",
            ("r/c:1@1", "parent", "r/p:1@1"),
        )
        .await
        .unwrap();
    }
}
