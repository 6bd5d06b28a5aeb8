//! Page Query Building and Execution
//!
//! Compiles caller-supplied filters over a page type's columns into
//! parameterized SQL, automatically restricted to `valid = TRUE`, and
//! deserializes each matching row back into a typed page.
//!
//! Results may still be stale by the validators' judgment: the cache facade
//! runs the validator pass over query results, this layer does not.

use std::sync::Arc;

use crate::cache::error::CacheError;
use crate::cache::schema::SchemaRegistry;
use crate::cache::serialization;
use crate::cache::storage;
use crate::db::{DatabaseError, DatabaseService};
use crate::models::{FieldValue, Page};

/// Comparison operator for page filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// Equality (=)
    Eq,
    /// Inequality (!=)
    Ne,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Gte,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Lte,
    /// String contains (LIKE %value%)
    Contains,
    /// String starts with (LIKE value%)
    StartsWith,
    /// String ends with (LIKE %value)
    EndsWith,
}

/// A single filter over a declared field
///
/// Given the table descriptor for its type, a filter compiles to one SQL
/// condition; a query ANDs all of its filters together.
#[derive(Debug, Clone)]
pub struct PageFilter {
    /// Declared field name to filter on
    pub field: String,
    /// Comparison operator
    pub op: FilterOp,
    /// Comparison value
    pub value: FieldValue,
}

impl PageFilter {
    /// Build a filter
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<FieldValue>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Equality shorthand
    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Substring shorthand
    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, FilterOp::Contains, FieldValue::String(value.into()))
    }

    /// Compile to a SQL condition and its bound value
    ///
    /// `index` is the 1-based placeholder number to use.
    fn compile(&self, index: usize) -> Result<(String, libsql::Value), CacheError> {
        let condition = match self.op {
            FilterOp::Eq => format!("{} = ?{}", self.field, index),
            FilterOp::Ne => format!("{} != ?{}", self.field, index),
            FilterOp::Gt => format!("{} > ?{}", self.field, index),
            FilterOp::Gte => format!("{} >= ?{}", self.field, index),
            FilterOp::Lt => format!("{} < ?{}", self.field, index),
            FilterOp::Lte => format!("{} <= ?{}", self.field, index),
            FilterOp::Contains | FilterOp::StartsWith | FilterOp::EndsWith => {
                format!("{} LIKE ?{}", self.field, index)
            }
        };

        let value = match self.op {
            FilterOp::Contains | FilterOp::StartsWith | FilterOp::EndsWith => {
                let text = self.value.as_str().ok_or_else(|| CacheError::InvalidFilter {
                    field: self.field.clone(),
                    reason: "string pattern operators require a string value".to_string(),
                })?;
                let pattern = match self.op {
                    FilterOp::Contains => format!("%{}%", text),
                    FilterOp::StartsWith => format!("{}%", text),
                    FilterOp::EndsWith => format!("%{}", text),
                    _ => unreachable!(),
                };
                libsql::Value::Text(pattern)
            }
            _ => serialization::to_stored(&self.value),
        };

        Ok((condition, value))
    }
}

/// Query execution over registered page tables
pub struct PageQuery {
    db: DatabaseService,
    registry: Arc<SchemaRegistry>,
}

impl PageQuery {
    /// Create a query engine over the shared database and registry
    pub fn new(db: DatabaseService, registry: Arc<SchemaRegistry>) -> Self {
        Self { db, registry }
    }

    /// Find pages of a type satisfying every filter
    ///
    /// The compiled query ANDs all filters with `valid = TRUE`. An
    /// unregistered type returns an empty list, never an error.
    pub async fn find(
        &self,
        type_name: &str,
        filters: &[PageFilter],
    ) -> Result<Vec<Page>, CacheError> {
        let entry = match self.registry.table_for(type_name).await {
            Ok(entry) => entry,
            Err(CacheError::NotRegistered(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut conditions = vec!["valid = TRUE".to_string()];
        let mut values: Vec<libsql::Value> = Vec::new();
        for filter in filters {
            if entry.descriptor.field(&filter.field).is_none() {
                return Err(CacheError::UnknownFilterField {
                    type_name: type_name.to_string(),
                    field: filter.field.clone(),
                });
            }
            let (condition, value) = filter.compile(values.len() + 1)?;
            conditions.push(condition);
            values.push(value);
        }

        let sql = format!(
            "{} WHERE {} ORDER BY uri_prefix, version",
            storage::select_clause(&entry),
            conditions.join(" AND ")
        );

        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query(&sql, libsql::params_from_iter(values))
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to query {}: {}", type_name, e))
            })?;

        let mut pages = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to query {}: {}", type_name, e))
        })? {
            let (page, _valid) = storage::row_to_page(&entry, &row)?;
            pages.push(page);
        }

        Ok(pages)
    }
}
