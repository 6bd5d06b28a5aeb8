//! Page Storage
//!
//! Insert-only record writes, primary-key reads, latest-version reads, and
//! validity mutation. A row, once written for a `(uri_prefix, version)`
//! pair, is never rewritten: new revisions create new versions, and stale
//! rows are flipped invalid rather than deleted.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::cache::error::CacheError;
use crate::cache::schema::{RegisteredType, SchemaRegistry};
use crate::cache::serialization;
use crate::db::{DatabaseError, DatabaseService};
use crate::models::{Page, PageURI, PageVersion};

/// Core CRUD operations for pages
pub struct PageStorage {
    db: DatabaseService,
    registry: Arc<SchemaRegistry>,
}

impl PageStorage {
    /// Create storage over the given database and registry
    pub fn new(db: DatabaseService, registry: Arc<SchemaRegistry>) -> Self {
        Self { db, registry }
    }

    /// Store a page with an optional parent relationship
    ///
    /// The page row and the relationship row are written in one
    /// transaction. Returns `true` on successful create.
    ///
    /// # Errors
    ///
    /// - [`CacheError::UnversionedPage`] if the URI has no fixed positive
    ///   version
    /// - [`CacheError::NotRegistered`] if the page type was never registered
    /// - [`CacheError::AlreadyExists`] if a row for `(uri_prefix, version)`
    ///   is already present - updates of existing versions are forbidden
    pub async fn store(
        &self,
        page: &Page,
        parent_uri: Option<&PageURI>,
    ) -> Result<bool, CacheError> {
        let version = match page.uri().version() {
            PageVersion::Exact(v) if v >= 1 => v as i64,
            _ => return Err(CacheError::UnversionedPage(page.uri().clone())),
        };

        let entry = self.registry.table_for(page.type_name()).await?;
        let effective_parent = parent_uri.or(page.parent_uri());

        let conn = self.db.connect_with_timeout().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to begin transaction: {}", e)))?;

        // Duplicate check inside the transaction so a concurrent writer
        // either sees our row or hits the primary key
        let mut existing = tx
            .query(
                &format!(
                    "SELECT 1 FROM {} WHERE uri_prefix = ?1 AND version = ?2",
                    entry.table.table_name
                ),
                (page.uri().prefix(), version),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed duplicate check: {}", e)))?;
        if existing
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed duplicate check: {}", e)))?
            .is_some()
        {
            return Err(CacheError::AlreadyExists(page.uri().clone()));
        }

        let (sql, values) = build_insert(&entry, page, version, effective_parent)?;
        tx.execute(&sql, libsql::params_from_iter(values))
            .await
            .map_err(|e| {
                if e.to_string().contains("UNIQUE") {
                    CacheError::AlreadyExists(page.uri().clone())
                } else {
                    DatabaseError::sql_execution(format!(
                        "Failed to insert page {}: {}",
                        page.uri(),
                        e
                    ))
                    .into()
                }
            })?;

        if let Some(parent) = effective_parent {
            tx.execute(
                "INSERT INTO page_relationships
                     (source_uri, relationship_type, target_uri, created_at)
                 VALUES (?1, 'parent', ?2, ?3)",
                (
                    page.uri().to_string(),
                    parent.to_string(),
                    Utc::now().to_rfc3339(),
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!(
                    "Failed to insert parent relationship for {}: {}",
                    page.uri(),
                    e
                ))
            })?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to commit store: {}", e)))?;

        debug!(uri = %page.uri(), "Stored page");
        Ok(true)
    }

    /// Get a page by type and URI
    ///
    /// With a fixed version, reads that exact row; with `Latest`, reads the
    /// newest row for the prefix. Invalid rows are skipped unless
    /// `ignore_validity` is set. An unregistered type reads as `None`.
    pub async fn get(
        &self,
        type_name: &str,
        uri: &PageURI,
        ignore_validity: bool,
    ) -> Result<Option<Page>, CacheError> {
        let entry = match self.registry.table_for(type_name).await {
            Ok(entry) => entry,
            Err(CacheError::NotRegistered(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let conn = self.db.connect_with_timeout().await?;
        let select = select_clause(&entry);

        let mut rows = match uri.version() {
            PageVersion::Exact(version) => conn
                .query(
                    &format!(
                        "{} WHERE uri_prefix = ?1 AND version = ?2",
                        select
                    ),
                    (uri.prefix(), version as i64),
                )
                .await,
            PageVersion::Latest => conn
                .query(
                    &format!(
                        "{} WHERE uri_prefix = ?1 ORDER BY version DESC LIMIT 1",
                        select
                    ),
                    [uri.prefix()],
                )
                .await,
        }
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to read {}: {}", uri, e)))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to read {}: {}", uri, e)))?
        {
            Some(row) => {
                let (page, valid) = row_to_page(&entry, &row)?;
                if ignore_validity || valid {
                    Ok(Some(page))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Get the highest-versioned valid page for a prefix
    pub async fn get_latest(
        &self,
        type_name: &str,
        uri_prefix: &str,
    ) -> Result<Option<Page>, CacheError> {
        let entry = match self.registry.table_for(type_name).await {
            Ok(entry) => entry,
            Err(CacheError::NotRegistered(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                &format!(
                    "{} WHERE uri_prefix = ?1 AND valid = TRUE ORDER BY version DESC LIMIT 1",
                    select_clause(&entry)
                ),
                [uri_prefix],
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to read latest {}: {}", uri_prefix, e))
            })?;

        match rows.next().await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to read latest {}: {}", uri_prefix, e))
        })? {
            Some(row) => {
                let (page, _valid) = row_to_page(&entry, &row)?;
                Ok(Some(page))
            }
            None => Ok(None),
        }
    }

    /// Highest version number ever stored for a prefix, valid or not
    ///
    /// Version allocation must never reuse an invalidated version, so this
    /// intentionally ignores the validity flag.
    pub async fn latest_version(
        &self,
        type_name: &str,
        uri_prefix: &str,
    ) -> Result<Option<u64>, CacheError> {
        let entry = match self.registry.table_for(type_name).await {
            Ok(entry) => entry,
            Err(CacheError::NotRegistered(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT MAX(version) FROM {} WHERE uri_prefix = ?1",
                    entry.table.table_name
                ),
                [uri_prefix],
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!(
                    "Failed to read max version for {}: {}",
                    uri_prefix, e
                ))
            })?;

        match rows.next().await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to read max version: {}", e))
        })? {
            Some(row) => match row.get_value(0).map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to read max version: {}", e))
            })? {
                libsql::Value::Integer(v) => Ok(Some(v as u64)),
                _ => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Mark the row matching the URI invalid, across all registered types
    ///
    /// At most one table has a hit. Idempotent; returns whether any row was
    /// updated. URIs without a fixed version match nothing.
    pub async fn mark_invalid(&self, uri: &PageURI) -> Result<bool, CacheError> {
        let version = match uri.version().number() {
            Some(v) => v as i64,
            None => return Ok(false),
        };

        let conn = self.db.connect_with_timeout().await?;
        for entry in self.registry.registered().await {
            let affected = conn
                .execute(
                    &format!(
                        "UPDATE {} SET valid = FALSE, updated_at = ?1
                         WHERE uri_prefix = ?2 AND version = ?3",
                        entry.table.table_name
                    ),
                    (Utc::now().to_rfc3339(), uri.prefix(), version),
                )
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to invalidate {}: {}", uri, e))
                })?;
            if affected > 0 {
                debug!(uri = %uri, "Marked page invalid");
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Mark every version of a prefix invalid, across all registered types
    ///
    /// Returns the number of affected rows.
    pub async fn mark_invalid_by_prefix(&self, uri_prefix: &str) -> Result<u64, CacheError> {
        let conn = self.db.connect_with_timeout().await?;
        let mut total = 0u64;
        for entry in self.registry.registered().await {
            let affected = conn
                .execute(
                    &format!(
                        "UPDATE {} SET valid = FALSE, updated_at = ?1 WHERE uri_prefix = ?2",
                        entry.table.table_name
                    ),
                    (Utc::now().to_rfc3339(), uri_prefix),
                )
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!(
                        "Failed to invalidate prefix {}: {}",
                        uri_prefix, e
                    ))
                })?;
            total += affected;
        }

        debug!(prefix = %uri_prefix, count = total, "Invalidated pages by prefix");
        Ok(total)
    }
}

/// SELECT clause listing columns in the fixed order `row_to_page` expects
pub(crate) fn select_clause(entry: &RegisteredType) -> String {
    let mut columns = vec![
        "uri_prefix".to_string(),
        "version".to_string(),
        "valid".to_string(),
        "parent_uri".to_string(),
    ];
    columns.extend(entry.field_columns().map(|c| c.to_string()));
    format!("SELECT {} FROM {}", columns.join(", "), entry.table.table_name)
}

/// Build the INSERT statement and bound values for a page row
///
/// The registered descriptor drives the column list; a page built against
/// a drifted descriptor that lacks one of those fields is rejected.
fn build_insert(
    entry: &RegisteredType,
    page: &Page,
    version: i64,
    effective_parent: Option<&PageURI>,
) -> Result<(String, Vec<libsql::Value>), CacheError> {
    let mut columns = vec![
        "uri_prefix".to_string(),
        "version".to_string(),
        "valid".to_string(),
        "parent_uri".to_string(),
    ];
    let now = Utc::now().to_rfc3339();
    let mut values: Vec<libsql::Value> = vec![
        libsql::Value::Text(page.uri().prefix()),
        libsql::Value::Integer(version),
        libsql::Value::Integer(1),
        match effective_parent {
            Some(parent) => libsql::Value::Text(parent.to_string()),
            None => libsql::Value::Null,
        },
    ];

    for spec in &entry.descriptor.fields {
        columns.push(spec.name.clone());
        let value = page.get(&spec.name).ok_or_else(|| CacheError::Deserialization {
            field: spec.name.clone(),
            reason: format!(
                "page for '{}' is missing a field the registered schema declares",
                entry.descriptor.name
            ),
        })?;
        values.push(serialization::to_stored(value));
    }

    columns.push("created_at".to_string());
    values.push(libsql::Value::Text(now.clone()));
    columns.push("updated_at".to_string());
    values.push(libsql::Value::Text(now));
    columns.push("_schema_signature".to_string());
    values.push(libsql::Value::Text(entry.table.signature.clone()));

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        entry.table.table_name,
        columns.join(", "),
        placeholders.join(", ")
    );

    Ok((sql, values))
}

/// Convert a row (in `select_clause` order) back into a page
///
/// Returns the page together with its validity flag.
pub(crate) fn row_to_page(
    entry: &RegisteredType,
    row: &libsql::Row,
) -> Result<(Page, bool), CacheError> {
    let read = |idx: i32| -> Result<libsql::Value, CacheError> {
        row.get_value(idx).map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to read column {}: {}", idx, e)).into()
        })
    };

    let uri_prefix = match read(0)? {
        libsql::Value::Text(s) => s,
        other => {
            return Err(DatabaseError::sql_execution(format!(
                "Unexpected uri_prefix value: {:?}",
                other
            ))
            .into())
        }
    };
    let version = match read(1)? {
        libsql::Value::Integer(v) => v,
        other => {
            return Err(DatabaseError::sql_execution(format!(
                "Unexpected version value: {:?}",
                other
            ))
            .into())
        }
    };
    let valid = matches!(read(2)?, libsql::Value::Integer(v) if v != 0);
    let parent_uri = match read(3)? {
        libsql::Value::Text(s) => Some(PageURI::parse(&s)?),
        _ => None,
    };

    let uri = PageURI::parse(&format!("{}@{}", uri_prefix, version))?;
    let mut builder = Page::builder(entry.descriptor.clone(), uri).maybe_parent(parent_uri);

    for (offset, spec) in entry.descriptor.fields.iter().enumerate() {
        let stored = read(4 + offset as i32)?;
        builder = builder.field(&spec.name, serialization::from_stored(stored, spec)?);
    }

    Ok((builder.build()?, valid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldSpec, FieldType, PageType};

    async fn setup() -> (PageStorage, Arc<PageType>) {
        let db = DatabaseService::new_in_memory().await.unwrap();
        let registry = Arc::new(SchemaRegistry::new(db.clone()));
        let descriptor = PageType::builder("doc")
            .field(FieldSpec::required("title", FieldType::String))
            .field(FieldSpec::optional("word_count", FieldType::Integer))
            .build()
            .unwrap();
        registry.ensure_registered(&descriptor).await.unwrap();
        (PageStorage::new(db, registry), descriptor)
    }

    fn page(descriptor: &Arc<PageType>, raw_uri: &str, title: &str) -> Page {
        Page::builder(descriptor.clone(), PageURI::parse(raw_uri).unwrap())
            .field("title", title)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_store_and_get_exact_version() {
        let (storage, descriptor) = setup().await;
        let stored = page(&descriptor, "r/doc:x@1", "T");
        assert!(storage.store(&stored, None).await.unwrap());

        let uri = PageURI::parse("r/doc:x@1").unwrap();
        let read = storage.get("doc", &uri, false).await.unwrap().unwrap();
        assert_eq!(read, stored);
    }

    #[tokio::test]
    async fn test_store_rejects_unversioned() {
        let (storage, descriptor) = setup().await;
        let unversioned = Page::builder(
            descriptor.clone(),
            PageURI::parse("r/doc:x").unwrap(),
        )
        .field("title", "T")
        .build()
        .unwrap();

        let err = storage.store(&unversioned, None).await.unwrap_err();
        assert!(matches!(err, CacheError::UnversionedPage(_)));
    }

    #[tokio::test]
    async fn test_store_duplicate_version_fails() {
        let (storage, descriptor) = setup().await;
        storage
            .store(&page(&descriptor, "r/doc:x@1", "T"), None)
            .await
            .unwrap();

        let err = storage
            .store(&page(&descriptor, "r/doc:x@1", "T2"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_latest_resolution() {
        let (storage, descriptor) = setup().await;
        storage
            .store(&page(&descriptor, "r/doc:x@1", "v1"), None)
            .await
            .unwrap();
        storage
            .store(&page(&descriptor, "r/doc:x@2", "v2"), None)
            .await
            .unwrap();

        let latest_uri = PageURI::parse("r/doc:x").unwrap();
        let read = storage.get("doc", &latest_uri, false).await.unwrap().unwrap();
        assert_eq!(read.get("title").and_then(|v| v.as_str()), Some("v2"));

        let latest = storage.get_latest("doc", "r/doc:x").await.unwrap().unwrap();
        assert_eq!(latest.uri().version(), PageVersion::Exact(2));
        assert_eq!(storage.latest_version("doc", "r/doc:x").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_mark_invalid_hides_row() {
        let (storage, descriptor) = setup().await;
        storage
            .store(&page(&descriptor, "r/doc:x@1", "T"), None)
            .await
            .unwrap();

        let uri = PageURI::parse("r/doc:x@1").unwrap();
        assert!(storage.mark_invalid(&uri).await.unwrap());
        // Idempotent second call still reports a hit on the same row
        assert!(storage.mark_invalid(&uri).await.unwrap());

        assert!(storage.get("doc", &uri, false).await.unwrap().is_none());
        // ignore_validity still sees it
        assert!(storage.get("doc", &uri, true).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_latest_version_counts_invalid_rows() {
        let (storage, descriptor) = setup().await;
        storage
            .store(&page(&descriptor, "r/doc:x@1", "v1"), None)
            .await
            .unwrap();
        storage
            .store(&page(&descriptor, "r/doc:x@2", "v2"), None)
            .await
            .unwrap();
        storage
            .mark_invalid(&PageURI::parse("r/doc:x@2").unwrap())
            .await
            .unwrap();

        // get_latest skips the invalid newest row
        let latest = storage.get_latest("doc", "r/doc:x").await.unwrap().unwrap();
        assert_eq!(latest.uri().version(), PageVersion::Exact(1));
        // but allocation input still sees version 2
        assert_eq!(storage.latest_version("doc", "r/doc:x").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_mark_invalid_by_prefix() {
        let (storage, descriptor) = setup().await;
        for v in 1..=3 {
            storage
                .store(&page(&descriptor, &format!("r/doc:x@{}", v), "T"), None)
                .await
                .unwrap();
        }
        storage
            .store(&page(&descriptor, "r/doc:other@1", "T"), None)
            .await
            .unwrap();

        let affected = storage.mark_invalid_by_prefix("r/doc:x").await.unwrap();
        assert_eq!(affected, 3);
        assert!(storage.get_latest("doc", "r/doc:x").await.unwrap().is_none());
        assert!(storage.get_latest("doc", "r/doc:other").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unregistered_type_reads_as_none() {
        let (storage, _descriptor) = setup().await;
        let uri = PageURI::parse("r/ghost:x@1").unwrap();
        assert!(storage.get("ghost", &uri, false).await.unwrap().is_none());
        assert!(storage.get_latest("ghost", "r/ghost:x").await.unwrap().is_none());
    }
}
