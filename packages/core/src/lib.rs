//! Pagecore - Typed Page Cache and Retrieval Runtime
//!
//! This crate provides the core retrieval-and-caching runtime for "pages":
//! typed, versioned, content-addressable records synthesized from external
//! data sources.
//!
//! # Architecture
//!
//! - **Explicit descriptors**: Page types are declared as field descriptors;
//!   the schema registry derives one table per type from them
//! - **Insert-only versioning**: A stored `(uri_prefix, version)` row is
//!   immutable; revisions create new versions and stale rows are flagged
//!   invalid, never rewritten
//! - **Read-through routing**: Handlers construct pages on cache misses and
//!   the router writes them back, allocating versions monotonically
//! - **Validator pipeline**: Per-type freshness predicates run on read and
//!   invalidate stale pages together with their dependent descendants
//! - **libsql/SQLite**: Embedded database with WAL mode
//!
//! # Modules
//!
//! - [`models`] - Data structures (PageURI, Page, descriptors, references)
//! - [`db`] - Database layer with libsql integration
//! - [`cache`] - Page cache (schema, storage, provenance, validation, query)
//! - [`router`] - URI-type routing with read-through caching
//! - [`toolkit`] - Tool registration and cursor-based pagination
//! - [`context`] - Context wiring, services, and search

pub mod cache;
pub mod context;
pub mod db;
pub mod models;
pub mod router;
pub mod toolkit;

// Re-exports
pub use cache::{CacheError, FilterOp, PageCache, PageFilter};
pub use context::{ContextError, Retriever, ServerContext, Service};
pub use db::{DatabaseError, DatabaseService};
pub use models::{
    FieldSpec, FieldType, FieldValue, Page, PageReference, PageType, PageURI, PageVersion,
    SearchResponse, StorageHint,
};
pub use router::{PageRouter, RouterError};
pub use toolkit::{
    PaginatedResponse, Tool, ToolArgs, ToolOptions, ToolOutput, ToolResultKind, Toolkit,
    ToolkitError,
};
