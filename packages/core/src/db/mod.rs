//! Database Layer
//!
//! Connection management for the libsql backend:
//!
//! - Database initialization (WAL mode, busy timeout, foreign keys)
//! - The shared `page_relationships` table and its indexes
//! - In-memory databases for tests
//!
//! Per-type page tables are created on demand by the cache's schema
//! registry, not here.

mod database;
mod error;

pub use database::DatabaseService;
pub use error::DatabaseError;
