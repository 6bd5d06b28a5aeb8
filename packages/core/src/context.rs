//! Server Context
//!
//! Central wiring point and single source of truth for caching and state:
//! owns the page cache and router, hosts registered services, and resolves
//! retriever references to pages through the same router path every other
//! read takes.
//!
//! There is no global singleton: construct a context once and thread it
//! (behind an `Arc`) through the services that need it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::cache::PageCache;
use crate::db::{DatabaseError, DatabaseService};
use crate::models::{Page, PageReference, PageType, PageURI, SearchResponse};
use crate::router::{PageRouter, RouterError};

/// A named service hosted by the context
pub trait Service: Send + Sync {
    /// Service name for registration
    fn name(&self) -> &str;
}

impl std::fmt::Debug for dyn Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service").field("name", &self.name()).finish()
    }
}

/// Produces page references for a search instruction
///
/// The retriever is an external collaborator (typically an agent loop);
/// the context only relies on this boundary contract.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Search for pages matching the instruction
    async fn search(&self, instruction: &str) -> anyhow::Result<Vec<PageReference>>;
}

/// Context operation errors
#[derive(Error, Debug)]
pub enum ContextError {
    /// A service with this name is already registered
    #[error("Service already registered: {0}")]
    ServiceAlreadyRegistered(String),

    /// No service with this name
    #[error("No service registered with name: {0}")]
    NoService(String),

    /// The context-level retriever can only be set once
    #[error("Retriever for this context is already set")]
    RetrieverAlreadySet,

    /// Search was called without any retriever available
    #[error("No retriever available; set one on the context or pass one to search")]
    NoRetriever,

    /// The retriever failed
    #[error("Search failed: {0}")]
    Search(#[source] anyhow::Error),

    /// Routing failure (no handler, handler error)
    #[error(transparent)]
    Router(#[from] RouterError),

    /// Database initialization failure
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Central server context owning one cache and one router
///
/// # Examples
///
/// ```no_run
/// use pagecore::context::ServerContext;
/// use pagecore::models::{FieldSpec, FieldType, Page, PageType, PageURI};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let context = ServerContext::create("acme", None).await?;
///
/// let doc = PageType::builder("doc")
///     .field(FieldSpec::required("title", FieldType::String))
///     .build()?;
/// let handler_type = doc.clone();
/// context
///     .route(doc, move |uri: PageURI| {
///         let descriptor = handler_type.clone();
///         async move {
///             Ok(Page::builder(descriptor, uri).field("title", "T").build()?)
///         }
///     }, true)
///     .await?;
///
/// let page = context.get_page(&PageURI::parse("acme/doc:x@1")?).await?;
/// assert_eq!(page.get("title").and_then(|v| v.as_str()), Some("T"));
/// # Ok(())
/// # }
/// ```
pub struct ServerContext {
    root: String,
    cache: Arc<PageCache>,
    router: Arc<PageRouter>,
    services: RwLock<HashMap<String, Arc<dyn Service>>>,
    retriever: RwLock<Option<Arc<dyn Retriever>>>,
}

impl ServerContext {
    /// Create a context with its own database
    ///
    /// With no path the database is in-memory (useful for tests and
    /// ephemeral runs).
    pub async fn create(
        root: impl Into<String>,
        db_path: Option<PathBuf>,
    ) -> Result<Self, ContextError> {
        let db = match db_path {
            Some(path) => DatabaseService::new(path).await?,
            None => DatabaseService::new_in_memory().await?,
        };
        let cache = Arc::new(PageCache::new(db));
        let router = Arc::new(PageRouter::new(cache.clone()));
        Ok(Self {
            root: root.into(),
            cache,
            router,
            services: RwLock::new(HashMap::new()),
            retriever: RwLock::new(None),
        })
    }

    /// The root namespace for this context
    pub fn root(&self) -> &str {
        &self.root
    }

    /// The page cache
    pub fn page_cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    /// The router
    pub fn router(&self) -> &Arc<PageRouter> {
        &self.router
    }

    /// Register a handler for a page type (see [`PageRouter::register`])
    pub async fn route<F, Fut>(
        &self,
        descriptor: Arc<PageType>,
        handler: F,
        cache: bool,
    ) -> Result<(), ContextError>
    where
        F: Fn(PageURI) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Page>> + Send + 'static,
    {
        self.router.register(descriptor, handler, cache).await?;
        Ok(())
    }

    /// Register a validator predicate for a page type
    pub fn register_validator<F, Fut>(&self, type_name: impl Into<String>, predicate: F)
    where
        F: Fn(Page) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.cache.register_validator(type_name, predicate);
    }

    /// Retrieve a page through the router's read-through path
    pub async fn get_page(&self, uri: &PageURI) -> Result<Page, ContextError> {
        Ok(self.router.get_page(uri, false).await?)
    }

    /// Retrieve several pages concurrently, preserving input order
    pub async fn get_pages(&self, uris: &[PageURI]) -> Result<Vec<Page>, ContextError> {
        Ok(self.router.get_pages(uris, false).await?)
    }

    /// Mint a URI under this context's root (see
    /// [`PageRouter::create_page_uri`])
    pub async fn create_page_uri(
        &self,
        type_name: &str,
        id: &str,
        version: Option<u64>,
    ) -> Result<PageURI, ContextError> {
        Ok(self
            .router
            .create_page_uri(type_name, &self.root, id, version)
            .await?)
    }

    /// Register a service; registration is write-once per name
    pub fn register_service(
        &self,
        name: impl Into<String>,
        service: Arc<dyn Service>,
    ) -> Result<(), ContextError> {
        let name = name.into();
        let mut services = self.services.write().expect("service map lock poisoned");
        if services.contains_key(&name) {
            return Err(ContextError::ServiceAlreadyRegistered(name));
        }
        services.insert(name.clone(), service);
        info!(service = %name, "Registered service");
        Ok(())
    }

    /// Get a service by name
    pub fn get_service(&self, name: &str) -> Result<Arc<dyn Service>, ContextError> {
        self.services
            .read()
            .expect("service map lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| ContextError::NoService(name.to_string()))
    }

    /// Names of all registered services, sorted
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .expect("service map lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Set the default retriever; can only be done once
    pub fn set_retriever(&self, retriever: Arc<dyn Retriever>) -> Result<(), ContextError> {
        let mut slot = self.retriever.write().expect("retriever lock poisoned");
        if slot.is_some() {
            return Err(ContextError::RetrieverAlreadySet);
        }
        *slot = Some(retriever);
        Ok(())
    }

    /// The default retriever, if set
    pub fn retriever(&self) -> Option<Arc<dyn Retriever>> {
        self.retriever
            .read()
            .expect("retriever lock poisoned")
            .clone()
    }

    /// Execute a search through a retriever
    ///
    /// Uses the passed retriever, falling back to the context default. With
    /// `resolve_references`, each reference's URI is resolved through
    /// [`get_pages`](Self::get_pages) and the page attached to the
    /// reference.
    pub async fn search(
        &self,
        instruction: &str,
        retriever: Option<Arc<dyn Retriever>>,
        resolve_references: bool,
    ) -> Result<SearchResponse, ContextError> {
        let active = retriever
            .or_else(|| self.retriever())
            .ok_or(ContextError::NoRetriever)?;

        let mut results = active
            .search(instruction)
            .await
            .map_err(ContextError::Search)?;

        if resolve_references {
            let uris: Vec<PageURI> = results.iter().map(|r| r.uri.clone()).collect();
            let pages = self.get_pages(&uris).await?;
            for (reference, page) in results.iter_mut().zip(pages) {
                reference.page = Some(page);
            }
        }

        Ok(SearchResponse::new(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldSpec, FieldType};

    struct StubService {
        name: String,
    }

    impl Service for StubService {
        fn name(&self) -> &str {
            &self.name
        }
    }

    struct StubRetriever {
        uris: Vec<&'static str>,
    }

    #[async_trait]
    impl Retriever for StubRetriever {
        async fn search(&self, _instruction: &str) -> anyhow::Result<Vec<PageReference>> {
            Ok(self
                .uris
                .iter()
                .map(|raw| {
                    PageReference::new(PageURI::parse(raw).unwrap()).with_score(0.5)
                })
                .collect())
        }
    }

    async fn context_with_doc_handler() -> ServerContext {
        let context = ServerContext::create("r", None).await.unwrap();
        let descriptor = PageType::builder("doc")
            .field(FieldSpec::required("title", FieldType::String))
            .build()
            .unwrap();
        let handler_type = descriptor.clone();
        context
            .route(
                descriptor,
                move |uri: PageURI| {
                    let descriptor = handler_type.clone();
                    async move {
                        let title = format!("doc {}", uri.id());
                        Ok(Page::builder(descriptor, uri).field("title", title).build()?)
                    }
                },
                true,
            )
            .await
            .unwrap();
        context
    }

    #[tokio::test]
    async fn test_service_registration_is_write_once() {
        let context = ServerContext::create("r", None).await.unwrap();
        let service = Arc::new(StubService {
            name: "mail".to_string(),
        });

        context.register_service("mail", service.clone()).unwrap();
        let err = context.register_service("mail", service).unwrap_err();
        assert!(matches!(err, ContextError::ServiceAlreadyRegistered(_)));

        assert_eq!(context.get_service("mail").unwrap().name(), "mail");
        assert!(matches!(
            context.get_service("ghost").unwrap_err(),
            ContextError::NoService(_)
        ));
        assert_eq!(context.service_names(), vec!["mail".to_string()]);
    }

    #[tokio::test]
    async fn test_search_without_retriever() {
        let context = ServerContext::create("r", None).await.unwrap();
        let err = context.search("anything", None, true).await.unwrap_err();
        assert!(matches!(err, ContextError::NoRetriever));
    }

    #[tokio::test]
    async fn test_search_resolves_references_in_order() {
        let context = context_with_doc_handler().await;
        context
            .set_retriever(Arc::new(StubRetriever {
                uris: vec!["r/doc:a@1", "r/doc:b@1"],
            }))
            .unwrap();

        let response = context.search("find docs", None, true).await.unwrap();
        assert_eq!(response.results.len(), 2);
        let first = response.results[0].page().unwrap();
        assert_eq!(first.get("title").and_then(|v| v.as_str()), Some("doc a"));
        let second = response.results[1].page().unwrap();
        assert_eq!(second.get("title").and_then(|v| v.as_str()), Some("doc b"));
    }

    #[tokio::test]
    async fn test_search_without_resolution_leaves_references_bare() {
        let context = context_with_doc_handler().await;
        let retriever = Arc::new(StubRetriever {
            uris: vec!["r/doc:a@1"],
        });

        let response = context
            .search("find docs", Some(retriever), false)
            .await
            .unwrap();
        assert_eq!(response.results.len(), 1);
        assert!(response.results[0].page().is_none());
    }

    #[tokio::test]
    async fn test_retriever_is_set_once() {
        let context = ServerContext::create("r", None).await.unwrap();
        let retriever = Arc::new(StubRetriever { uris: vec![] });
        context.set_retriever(retriever.clone()).unwrap();
        assert!(matches!(
            context.set_retriever(retriever).unwrap_err(),
            ContextError::RetrieverAlreadySet
        ));
    }

    #[tokio::test]
    async fn test_create_page_uri_uses_context_root() {
        let context = context_with_doc_handler().await;
        let uri = context.create_page_uri("doc", "x", None).await.unwrap();
        assert_eq!(uri.to_string(), "r/doc:x@1");
    }
}
