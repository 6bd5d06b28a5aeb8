//! Page Cache
//!
//! Content-addressed cache for typed, versioned pages, composed from
//! focused components:
//!
//! - [`schema`] - type registration and table management
//! - [`serialization`] - field value round-trips
//! - [`storage`] - insert-only CRUD with a validity flag
//! - [`provenance`] - parent/child links and lineage
//! - [`validator`] - per-type freshness predicates
//! - [`query`] - filtered, valid-only queries
//!
//! [`PageCache`] is the public contract: store with provenance checks, read
//! with read-time validation and ancestor propagation, typed queries, and
//! explicit invalidation.

mod error;
mod provenance;
mod query;
mod schema;
pub(crate) mod serialization;
mod storage;
mod validator;

use std::sync::Arc;

use tracing::warn;

pub use error::CacheError;
pub use query::{FilterOp, PageFilter};
pub use schema::{RegisteredType, SchemaRegistry, TableDescriptor};
pub use validator::ValidatorFn;

use provenance::ProvenanceManager;
use query::PageQuery;
use storage::PageStorage;
use validator::PageValidator;

use crate::db::DatabaseService;
use crate::models::{Page, PageType, PageURI};

/// Content-addressed page cache with schema-driven storage
///
/// # Examples
///
/// ```no_run
/// use pagecore::cache::{PageCache, PageFilter};
/// use pagecore::db::DatabaseService;
/// use pagecore::models::{FieldSpec, FieldType, Page, PageType, PageURI};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let db = DatabaseService::new_in_memory().await?;
/// let cache = PageCache::new(db);
///
/// let doc = PageType::builder("doc")
///     .field(FieldSpec::required("title", FieldType::String))
///     .build()?;
///
/// let page = Page::builder(doc.clone(), PageURI::parse("r/doc:x@1")?)
///     .field("title", "T")
///     .build()?;
/// cache.store(&page, None).await?;
///
/// let read = cache.get("doc", &PageURI::parse("r/doc:x@1")?).await?;
/// assert!(read.is_some());
///
/// let titled = cache
///     .find("doc")
///     .filter(PageFilter::eq("title", "T"))
///     .all()
///     .await?;
/// assert_eq!(titled.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct PageCache {
    registry: Arc<SchemaRegistry>,
    storage: Arc<PageStorage>,
    validator: Arc<PageValidator>,
    query: PageQuery,
    provenance: ProvenanceManager,
}

impl PageCache {
    /// Create a cache over an initialized database
    pub fn new(db: DatabaseService) -> Self {
        let registry = Arc::new(SchemaRegistry::new(db.clone()));
        let storage = Arc::new(PageStorage::new(db.clone(), registry.clone()));
        let validator = Arc::new(PageValidator::new());
        let query = PageQuery::new(db.clone(), registry.clone());
        let provenance = ProvenanceManager::new(db, storage.clone(), registry.clone());
        Self {
            registry,
            storage,
            validator,
            query,
            provenance,
        }
    }

    /// Idempotently register a page type's schema
    pub async fn ensure_registered(&self, descriptor: &Arc<PageType>) -> Result<(), CacheError> {
        self.registry.ensure_registered(descriptor).await.map(|_| ())
    }

    /// Store a page, optionally with a parent relationship
    ///
    /// Provenance is validated first when an effective parent is present
    /// (the explicit argument wins over the page's own `parent_uri`), then
    /// the page type is registered if needed, then the row is written.
    /// Returns `true` on successful create.
    pub async fn store(
        &self,
        page: &Page,
        parent_uri: Option<&PageURI>,
    ) -> Result<bool, CacheError> {
        if let Some(parent) = parent_uri.or(page.parent_uri()) {
            self.provenance.validate_relationship(page, parent).await?;
        }

        self.registry.ensure_registered(page.descriptor()).await?;
        self.storage.store(page, parent_uri).await
    }

    /// Get a page by type and URI, with read-time validation
    ///
    /// A page that fails its own validator is invalidated and read as a
    /// miss. When the page has a parent and any validator is registered,
    /// its whole lineage is validated too: a stale ancestor invalidates
    /// both the ancestor and this page.
    pub async fn get(
        &self,
        type_name: &str,
        uri: &PageURI,
    ) -> Result<Option<Page>, CacheError> {
        match self.storage.get(type_name, uri, false).await? {
            Some(page) => {
                if self.validate_page_and_ancestors(&page).await? {
                    Ok(Some(page))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Get a page by type and URI, ignoring the validity flag and skipping
    /// validators (stale reads)
    pub async fn get_ignoring_validity(
        &self,
        type_name: &str,
        uri: &PageURI,
    ) -> Result<Option<Page>, CacheError> {
        self.storage.get(type_name, uri, true).await
    }

    /// Get the latest valid version of a page
    ///
    /// The page's own validator still runs (latest-version reads need no
    /// ancestor propagation: latest is a freshness signal in its own
    /// right).
    pub async fn get_latest(
        &self,
        type_name: &str,
        uri_prefix: &str,
    ) -> Result<Option<Page>, CacheError> {
        match self.storage.get_latest(type_name, uri_prefix).await? {
            Some(page) => {
                if self.validator.is_valid(&page).await {
                    Ok(Some(page))
                } else {
                    self.storage.mark_invalid(page.uri()).await?;
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Highest version number ever stored for a prefix (valid or not)
    ///
    /// Used for version allocation; never decreases over time.
    pub async fn get_latest_version(
        &self,
        type_name: &str,
        uri_prefix: &str,
    ) -> Result<Option<u64>, CacheError> {
        self.storage.latest_version(type_name, uri_prefix).await
    }

    /// Start building a query for pages of the given type
    pub fn find(&self, type_name: impl Into<String>) -> QueryBuilder<'_> {
        QueryBuilder {
            cache: self,
            type_name: type_name.into(),
            filters: Vec::new(),
        }
    }

    /// Register a validator predicate for a page type
    pub fn register_validator<F, Fut>(&self, type_name: impl Into<String>, predicate: F)
    where
        F: Fn(Page) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.validator.register(type_name, predicate);
    }

    /// Mark a specific page version invalid
    ///
    /// Idempotent; returns whether any row was updated.
    pub async fn invalidate(&self, uri: &PageURI) -> Result<bool, CacheError> {
        self.storage.mark_invalid(uri).await
    }

    /// Mark every version of a prefix invalid; returns the affected count
    pub async fn invalidate_prefix(&self, uri_prefix: &str) -> Result<u64, CacheError> {
        self.storage.mark_invalid_by_prefix(uri_prefix).await
    }

    /// All pages whose parent link points at the given URI
    pub async fn get_children(&self, parent_uri: &PageURI) -> Result<Vec<Page>, CacheError> {
        self.provenance.get_children(parent_uri).await
    }

    /// The root-to-leaf chain of pages ending at the given URI
    pub async fn get_lineage(&self, page_uri: &PageURI) -> Result<Vec<Page>, CacheError> {
        self.provenance.get_lineage(page_uri).await
    }

    /// Validate a page and, when it has a parent, its ancestors
    ///
    /// Failing pages (and failing ancestors) are invalidated in storage. A
    /// lineage fetch failure counts as invalid whenever any validator is
    /// registered.
    async fn validate_page_and_ancestors(&self, page: &Page) -> Result<bool, CacheError> {
        if !self.validator.is_valid(page).await {
            self.storage.mark_invalid(page.uri()).await?;
            return Ok(false);
        }

        if page.parent_uri().is_some() && self.validator.has_any_validator() {
            let lineage = match self.provenance.get_lineage(page.uri()).await {
                Ok(lineage) => lineage,
                Err(e) => {
                    warn!(uri = %page.uri(), error = %e, "Error validating provenance chain");
                    return Ok(false);
                }
            };

            // The page itself is the last element of its own lineage
            let ancestors = lineage
                .iter()
                .filter(|ancestor| ancestor.uri() != page.uri());
            for ancestor in ancestors {
                if !self.validator.is_valid(ancestor).await {
                    self.storage.mark_invalid(ancestor.uri()).await?;
                    self.storage.mark_invalid(page.uri()).await?;
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }
}

/// Fluent interface for building page queries
///
/// Results are filtered post-retrieval by the validator pass, with
/// auto-invalidation of failures.
pub struct QueryBuilder<'a> {
    cache: &'a PageCache,
    type_name: String,
    filters: Vec<PageFilter>,
}

impl QueryBuilder<'_> {
    /// Add a filter condition (ANDed with the others)
    pub fn filter(mut self, filter: PageFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Execute and return all matching valid pages
    pub async fn all(self) -> Result<Vec<Page>, CacheError> {
        let pages = self.cache.query.find(&self.type_name, &self.filters).await?;
        let mut valid_pages = Vec::new();

        for page in pages {
            if self.cache.validator.is_valid(&page).await {
                valid_pages.push(page);
            } else {
                self.cache.storage.mark_invalid(page.uri()).await?;
            }
        }

        Ok(valid_pages)
    }

    /// Execute and return the first matching valid page
    pub async fn first(self) -> Result<Option<Page>, CacheError> {
        Ok(self.all().await?.into_iter().next())
    }

    /// Count matching valid pages
    pub async fn count(self) -> Result<usize, CacheError> {
        Ok(self.all().await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldSpec, FieldType, PageVersion};

    fn header_type() -> Arc<PageType> {
        PageType::builder("header")
            .field(FieldSpec::required("title", FieldType::String))
            .field(FieldSpec::required("revision", FieldType::String))
            .build()
            .unwrap()
    }

    fn chunk_type() -> Arc<PageType> {
        PageType::builder("chunk")
            .field(FieldSpec::required("text", FieldType::String))
            .build()
            .unwrap()
    }

    async fn cache() -> PageCache {
        PageCache::new(DatabaseService::new_in_memory().await.unwrap())
    }

    fn header(revision: &str, version: u64) -> Page {
        Page::builder(
            header_type(),
            PageURI::parse(&format!("r/header:h@{}", version)).unwrap(),
        )
        .field("title", "H")
        .field("revision", revision)
        .build()
        .unwrap()
    }

    fn chunk(parent: &str) -> Page {
        Page::builder(chunk_type(), PageURI::parse("r/chunk:c@1").unwrap())
            .parent(PageURI::parse(parent).unwrap())
            .field("text", "body")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_store_registers_schema_on_demand() {
        let cache = cache().await;
        let page = header("current", 1);
        assert!(cache.store(&page, None).await.unwrap());

        let read = cache
            .get("header", &PageURI::parse("r/header:h@1").unwrap())
            .await
            .unwrap();
        assert_eq!(read.unwrap(), page);
    }

    #[tokio::test]
    async fn test_validator_invalidates_on_read() {
        let cache = cache().await;
        cache.store(&header("stale", 1), None).await.unwrap();

        cache.register_validator("header", |page: Page| async move {
            Ok(page.get("revision").and_then(|v| v.as_str()) == Some("current"))
        });

        let uri = PageURI::parse("r/header:h@1").unwrap();
        assert!(cache.get("header", &uri).await.unwrap().is_none());
        // The validator verdict was persisted: even a stale read now sees
        // the row flagged invalid
        let raw = cache.get_ignoring_validity("header", &uri).await.unwrap();
        assert!(raw.is_some());
        assert!(cache.get("header", &uri).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ancestor_invalidation_propagates() {
        let cache = cache().await;
        cache.store(&header("stale", 1), None).await.unwrap();
        cache.store(&chunk("r/header:h@1"), None).await.unwrap();

        cache.register_validator("header", |page: Page| async move {
            Ok(page.get("revision").and_then(|v| v.as_str()) == Some("current"))
        });

        let chunk_uri = PageURI::parse("r/chunk:c@1").unwrap();
        assert!(cache.get("chunk", &chunk_uri).await.unwrap().is_none());

        // Both the ancestor and the child rows are now invalid
        let header_uri = PageURI::parse("r/header:h@1").unwrap();
        assert!(cache.get("header", &header_uri).await.unwrap().is_none());
        assert!(cache
            .find("chunk")
            .all()
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_hides_until_new_version() {
        let cache = cache().await;
        cache.store(&header("current", 1), None).await.unwrap();

        let uri = PageURI::parse("r/header:h@1").unwrap();
        assert!(cache.invalidate(&uri).await.unwrap());
        assert!(cache.get("header", &uri).await.unwrap().is_none());
        assert!(cache.get_latest("header", "r/header:h").await.unwrap().is_none());

        cache.store(&header("current", 2), None).await.unwrap();
        let latest = cache.get_latest("header", "r/header:h").await.unwrap().unwrap();
        assert_eq!(latest.uri().version(), PageVersion::Exact(2));
    }

    #[tokio::test]
    async fn test_query_builder_validates_results() {
        let cache = cache().await;
        cache.store(&header("current", 1), None).await.unwrap();
        cache.store(&header("stale", 2), None).await.unwrap();

        cache.register_validator("header", |page: Page| async move {
            Ok(page.get("revision").and_then(|v| v.as_str()) == Some("current"))
        });

        let all = cache
            .find("header")
            .filter(PageFilter::eq("title", "H"))
            .all()
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].uri().version(), PageVersion::Exact(1));

        // The failing row was auto-invalidated
        let stale_uri = PageURI::parse("r/header:h@2").unwrap();
        let raw = cache.get_ignoring_validity("header", &stale_uri).await.unwrap();
        assert!(raw.is_some());
        assert_eq!(cache.find("header").count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_latest_version_for_allocation() {
        let cache = cache().await;
        assert_eq!(cache.get_latest_version("header", "r/header:h").await.unwrap(), None);
        cache.store(&header("current", 1), None).await.unwrap();
        cache.store(&header("current", 2), None).await.unwrap();
        cache.invalidate(&PageURI::parse("r/header:h@2").unwrap()).await.unwrap();
        // Allocation input keeps counting invalidated versions
        assert_eq!(
            cache.get_latest_version("header", "r/header:h").await.unwrap(),
            Some(2)
        );
    }
}
