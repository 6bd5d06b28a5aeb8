//! Page Router
//!
//! Binds URI types to handler functions and implements read-through
//! caching: a `get_page` probes the cache first, dispatches to the handler
//! on a miss, and writes the produced page back. Version allocation for
//! "latest" requests never decreases; when two concurrent reads mint the
//! same new version, the losing writer retries with an incremented version
//! a bounded number of times.
//!
//! Cache failures never fail a read: probe errors fall back to the handler
//! and write-back errors are logged and swallowed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures::future::{try_join_all, BoxFuture};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{CacheError, PageCache};
use crate::models::{Page, PageType, PageURI, PageVersion, UriError};

/// Bounded number of mint-handler-store attempts on version conflicts
const MAX_STORE_ATTEMPTS: u32 = 3;

/// Boxed async handler: constructs the page for a URI of its declared type
pub type HandlerFn = Arc<dyn Fn(PageURI) -> BoxFuture<'static, anyhow::Result<Page>> + Send + Sync>;

/// Router operation errors
#[derive(Error, Debug)]
pub enum RouterError {
    /// No handler registered for the URI's type
    #[error("No handler registered for type: {0}")]
    NoHandler(String),

    /// A handler is already registered for this type
    #[error("Handler already registered for type: {0}")]
    AlreadyRegistered(String),

    /// The handler failed, or returned a page of the wrong type
    #[error("Handler for type '{type_name}' failed: {source}")]
    Handler {
        type_name: String,
        #[source]
        source: anyhow::Error,
    },

    /// Malformed URI while minting
    #[error(transparent)]
    Uri(#[from] UriError),
}

struct HandlerEntry {
    descriptor: Arc<PageType>,
    handler: HandlerFn,
    cache_enabled: bool,
}

/// Read-through router from URI types to page handlers
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use pagecore::cache::PageCache;
/// use pagecore::db::DatabaseService;
/// use pagecore::models::{FieldSpec, FieldType, Page, PageType, PageURI};
/// use pagecore::router::PageRouter;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = Arc::new(PageCache::new(DatabaseService::new_in_memory().await?));
/// let router = PageRouter::new(cache);
///
/// let doc = PageType::builder("doc")
///     .field(FieldSpec::required("title", FieldType::String))
///     .build()?;
///
/// let handler_type = doc.clone();
/// router
///     .register(doc, move |uri: PageURI| {
///         let descriptor = handler_type.clone();
///         async move {
///             Ok(Page::builder(descriptor, uri)
///                 .field("title", "T")
///                 .build()?)
///         }
///     }, true)
///     .await?;
///
/// let page = router.get_page(&PageURI::parse("r/doc:x@1")?, false).await?;
/// assert_eq!(page.get("title").and_then(|v| v.as_str()), Some("T"));
/// # Ok(())
/// # }
/// ```
pub struct PageRouter {
    cache: Arc<PageCache>,
    handlers: RwLock<HashMap<String, Arc<HandlerEntry>>>,
}

impl PageRouter {
    /// Create a router over the given cache
    pub fn new(cache: Arc<PageCache>) -> Self {
        Self {
            cache,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// The cache this router writes through
    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    /// Register a handler for the descriptor's type
    ///
    /// The descriptor is the handler's declared result type; routing is
    /// keyed by `descriptor.name`. With `cache` enabled the schema is
    /// registered eagerly so the table exists before the first read.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::AlreadyRegistered`] if the type already has a
    /// handler. The handler map is write-once per type.
    pub async fn register<F, Fut>(
        &self,
        descriptor: Arc<PageType>,
        handler: F,
        cache: bool,
    ) -> Result<(), RouterError>
    where
        F: Fn(PageURI) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Page>> + Send + 'static,
    {
        if self
            .handlers
            .read()
            .expect("handler map lock poisoned")
            .contains_key(&descriptor.name)
        {
            return Err(RouterError::AlreadyRegistered(descriptor.name.clone()));
        }

        if cache {
            // Schema creation failures surface later (and are swallowed) on
            // the store path; registration itself stays usable
            if let Err(e) = self.cache.ensure_registered(&descriptor).await {
                warn!(page_type = %descriptor.name, error = %e, "Error initializing cache schema");
            }
        }

        let wrapped: HandlerFn = Arc::new(move |uri| Box::pin(handler(uri)));
        let entry = Arc::new(HandlerEntry {
            descriptor: descriptor.clone(),
            handler: wrapped,
            cache_enabled: cache,
        });

        let mut handlers = self.handlers.write().expect("handler map lock poisoned");
        if handlers.contains_key(&descriptor.name) {
            return Err(RouterError::AlreadyRegistered(descriptor.name.clone()));
        }
        handlers.insert(descriptor.name.clone(), entry);
        debug!(page_type = %descriptor.name, cache_enabled = cache, "Registered handler");
        Ok(())
    }

    /// Whether caching is enabled for a type (default true)
    pub fn is_cache_enabled(&self, type_name: &str) -> bool {
        self.handlers
            .read()
            .expect("handler map lock poisoned")
            .get(type_name)
            .map(|entry| entry.cache_enabled)
            .unwrap_or(true)
    }

    fn handler_entry(&self, type_name: &str) -> Result<Arc<HandlerEntry>, RouterError> {
        self.handlers
            .read()
            .expect("handler map lock poisoned")
            .get(type_name)
            .cloned()
            .ok_or_else(|| RouterError::NoHandler(type_name.to_string()))
    }

    /// Retrieve a page, routing to the registered handler on a cache miss
    ///
    /// With `allow_stale` the cache probe ignores the validity flag and
    /// skips validators. Cache probe errors fall back to the handler.
    pub async fn get_page(&self, uri: &PageURI, allow_stale: bool) -> Result<Page, RouterError> {
        let entry = self.handler_entry(uri.type_name())?;

        if entry.cache_enabled {
            let probe = if allow_stale {
                self.cache
                    .get_ignoring_validity(&entry.descriptor.name, uri)
                    .await
            } else {
                self.cache.get(&entry.descriptor.name, uri).await
            };
            match probe {
                Ok(Some(page)) => {
                    debug!(uri = %uri, "Cache hit");
                    return Ok(page);
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(uri = %uri, error = %e, "Error checking cache, falling back to handler");
                }
            }
        }

        let minted = matches!(uri.version(), PageVersion::Latest);
        let mut attempt = 0;
        loop {
            attempt += 1;

            let resolved = if minted {
                self.create_page_uri(uri.type_name(), uri.root(), uri.id(), None)
                    .await?
            } else {
                uri.clone()
            };

            let page = self.call_handler(&entry, resolved).await?;

            if !entry.cache_enabled {
                return Ok(page);
            }

            match self.store_in_cache(&page).await {
                StoreOutcome::Done => return Ok(page),
                StoreOutcome::Conflict => {
                    if minted && attempt < MAX_STORE_ATTEMPTS {
                        debug!(uri = %page.uri(), attempt, "Version conflict storing page, retrying");
                        continue;
                    }
                    // A concurrent writer won; the page we produced is
                    // still the answer to this read
                    debug!(uri = %page.uri(), "Page already stored by a concurrent request");
                    return Ok(page);
                }
            }
        }
    }

    /// Issue `get_page` for each URI concurrently, preserving input order
    ///
    /// Fail-fast: the first error propagates.
    pub async fn get_pages(
        &self,
        uris: &[PageURI],
        allow_stale: bool,
    ) -> Result<Vec<Page>, RouterError> {
        try_join_all(uris.iter().map(|uri| self.get_page(uri, allow_stale))).await
    }

    /// Mint a URI for a type, allocating the next version when absent
    ///
    /// With caching disabled (or no cache rows yet) the version is 1, else
    /// one above the latest stored version. Cache access errors fall back
    /// to version 1.
    pub async fn create_page_uri(
        &self,
        type_name: &str,
        root: &str,
        id: &str,
        version: Option<u64>,
    ) -> Result<PageURI, RouterError> {
        if let Some(version) = version {
            return Ok(PageURI::new(root, type_name, id, PageVersion::Exact(version))?);
        }

        let version = if !self.is_cache_enabled(type_name) {
            1
        } else {
            let prefix = format!("{}/{}:{}", root, type_name, id);
            match self.cache.get_latest_version(type_name, &prefix).await {
                Ok(Some(latest)) => latest + 1,
                Ok(None) => 1,
                Err(e) => {
                    debug!(page_type = %type_name, error = %e, "Error accessing cache, using version 1");
                    1
                }
            }
        };

        Ok(PageURI::new(root, type_name, id, PageVersion::Exact(version))?)
    }

    /// Invoke the handler and check its output against the declared type
    async fn call_handler(
        &self,
        entry: &HandlerEntry,
        uri: PageURI,
    ) -> Result<Page, RouterError> {
        let page = (entry.handler)(uri).await.map_err(|source| RouterError::Handler {
            type_name: entry.descriptor.name.clone(),
            source,
        })?;

        if page.type_name() != entry.descriptor.name {
            return Err(RouterError::Handler {
                type_name: entry.descriptor.name.clone(),
                source: anyhow::anyhow!(
                    "handler returned a page of type '{}'",
                    page.type_name()
                ),
            });
        }

        Ok(page)
    }

    /// Write a handler-produced page back to the cache
    ///
    /// Version conflicts are reported for the retry loop; every other
    /// storage error is logged and swallowed so a successful handler call
    /// never fails the read.
    async fn store_in_cache(&self, page: &Page) -> StoreOutcome {
        match self
            .cache
            .get_ignoring_validity(page.type_name(), page.uri())
            .await
        {
            Ok(Some(_)) => return StoreOutcome::Conflict,
            Ok(None) => {}
            Err(e) => {
                debug!(uri = %page.uri(), error = %e, "Error probing cache before store");
            }
        }

        match self.cache.store(page, None).await {
            Ok(_) => {
                debug!(uri = %page.uri(), "Stored page in cache");
                StoreOutcome::Done
            }
            Err(CacheError::AlreadyExists(_)) => StoreOutcome::Conflict,
            Err(e) => {
                warn!(uri = %page.uri(), error = %e, "Error storing page in cache");
                StoreOutcome::Done
            }
        }
    }
}

enum StoreOutcome {
    /// Stored, or failed in a way that is swallowed
    Done,
    /// A row for this exact version already exists
    Conflict,
}
