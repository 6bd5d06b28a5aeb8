//! Cache Error Types
//!
//! Error taxonomy for the page cache. Provenance violations get distinct
//! variants so callers can tell them apart.

use thiserror::Error;

use crate::db::DatabaseError;
use crate::models::{PageError, PageURI, UriError};

/// Page cache operation errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Page type was never registered with the schema registry
    #[error("Page type not registered: {0}")]
    NotRegistered(String),

    /// A row for this `(uri_prefix, version)` already exists; versioned
    /// records are immutable, callers produce a new version instead
    #[error("Page {0} already exists and cannot be updated")]
    AlreadyExists(PageURI),

    /// Attempt to store a page whose URI has no fixed positive version
    #[error("Cannot store page without a fixed version: {0}")]
    UnversionedPage(PageURI),

    /// The proposed parent does not exist in any registered type
    #[error("Parent page {0} does not exist in cache")]
    MissingParent(PageURI),

    /// The child already exists, so it cannot acquire a new parent
    #[error("Child page {0} already exists in cache")]
    ChildExists(PageURI),

    /// Parent and child share a page type
    #[error("Parent and child cannot be the same page type: {0}")]
    SameTypeParent(String),

    /// Parent URI carries no fixed positive version
    #[error("Parent URI must have a fixed version number: {0}")]
    UnversionedParent(PageURI),

    /// The relationship would close a cycle in the parent graph
    #[error("Adding {child} -> {parent} would create a cycle")]
    Cycle { child: PageURI, parent: PageURI },

    /// Stored value could not be converted back to a typed field
    #[error("Failed to deserialize field '{field}': {reason}")]
    Deserialization { field: String, reason: String },

    /// Filter references a column the table does not have
    #[error("Unknown filter field '{field}' for page type '{type_name}'")]
    UnknownFilterField { type_name: String, field: String },

    /// Filter is not expressible over the field it names
    #[error("Invalid filter on field '{field}': {reason}")]
    InvalidFilter { field: String, reason: String },

    /// Page construction from stored data failed
    #[error(transparent)]
    Page(#[from] PageError),

    /// Malformed URI in stored data or caller input
    #[error(transparent)]
    Uri(#[from] UriError),

    /// Underlying database failure
    #[error(transparent)]
    Database(#[from] DatabaseError),
}
