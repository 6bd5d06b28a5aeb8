//! Retriever Toolkit
//!
//! Exposes retrieval operations to upstream agents as named tools, with two
//! optional wrappers applied at invocation time:
//!
//! - **Caching**: a deterministic key is computed from the tool's name and
//!   its argument map; the raw result is retained while fresh (TTL and/or a
//!   caller-supplied staleness predicate).
//! - **Pagination**: tools returning a page sequence accept a `page`
//!   argument and return a cursor-based [`PaginatedResponse`], trimmed to a
//!   per-page token budget.
//!
//! Tools are registered through an explicit builder before the agent loop
//! starts; there is no registration after that.

mod tool;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

pub use tool::{PaginatedResponse, Tool, ToolArgs, ToolFn, ToolOutput, ToolResultKind};

use tool::paginate;

/// Staleness predicate for cached tool results: `true` means still fresh
pub type InvalidatorFn = Arc<dyn Fn(&str, &ToolOutput) -> bool + Send + Sync>;

/// Toolkit operation errors
#[derive(Error, Debug)]
pub enum ToolkitError {
    /// A tool with this name is already registered
    #[error("Tool already registered: {0}")]
    AlreadyRegistered(String),

    /// No tool with this name
    #[error("No tool registered with name: {0}")]
    UnknownTool(String),

    /// Registration options are inconsistent
    #[error("Invalid tool options for '{name}': {reason}")]
    InvalidOptions { name: String, reason: String },

    /// The `page` argument is not a non-negative integer
    #[error("Page number must be >= 0, got: {0}")]
    InvalidPageArg(serde_json::Value),

    /// A paginated tool produced no documents at all
    #[error("No matching documents found")]
    NoDocuments,

    /// The tool function failed, or produced the wrong result kind
    #[error("Tool execution failed - {0}")]
    Execution(#[from] anyhow::Error),
}

/// Registration options for a tool
#[derive(Default, Clone)]
pub struct ToolOptions {
    /// Retain raw results keyed by the argument map
    pub cache: bool,
    /// Time-to-live for cached results
    pub ttl: Option<Duration>,
    /// Staleness predicate for cached results
    pub invalidator: Option<InvalidatorFn>,
    /// Page size in documents; enables the pagination wrapper
    pub page_size: Option<usize>,
    /// Per-page token budget
    pub max_tokens: Option<usize>,
}

impl ToolOptions {
    /// No caching, no pagination
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable result caching
    pub fn with_cache(mut self) -> Self {
        self.cache = true;
        self
    }

    /// Enable result caching with a time-to-live
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.cache = true;
        self.ttl = Some(ttl);
        self
    }

    /// Set a staleness predicate (implies caching)
    pub fn with_invalidator(mut self, invalidator: InvalidatorFn) -> Self {
        self.cache = true;
        self.invalidator = Some(invalidator);
        self
    }

    /// Enable pagination with the given page size
    pub fn with_pagination(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Set the per-page token budget
    pub fn with_token_budget(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

struct CacheEntry {
    output: ToolOutput,
    stored_at: Instant,
}

/// Named, typed operations exposed to an upstream agent
pub struct Toolkit {
    tools: RwLock<HashMap<String, Arc<Tool>>>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    invalidators: RwLock<HashMap<String, InvalidatorFn>>,
    ttls: RwLock<HashMap<String, Option<Duration>>>,
}

impl Default for Toolkit {
    fn default() -> Self {
        Self::new()
    }
}

impl Toolkit {
    /// Create an empty toolkit
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
            invalidators: RwLock::new(HashMap::new()),
            ttls: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool
    ///
    /// `result_kind` declares what the function produces; pagination only
    /// applies to [`ToolResultKind::PageSequence`] tools (the wrapper
    /// creates the paginated response itself).
    ///
    /// # Errors
    ///
    /// - [`ToolkitError::AlreadyRegistered`] for a duplicate name
    /// - [`ToolkitError::InvalidOptions`] for a zero page size, or for
    ///   pagination over an already-paginated result kind
    pub fn register_tool<F, Fut>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        result_kind: ToolResultKind,
        options: ToolOptions,
        func: F,
    ) -> Result<(), ToolkitError>
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<ToolOutput>> + Send + 'static,
    {
        let name = name.into();

        if let Some(page_size) = options.page_size {
            if page_size < 1 {
                return Err(ToolkitError::InvalidOptions {
                    name,
                    reason: "page_size must be a positive integer".to_string(),
                });
            }
            if result_kind == ToolResultKind::Paginated {
                return Err(ToolkitError::InvalidOptions {
                    name,
                    reason: "pagination requires a page-sequence tool; the wrapper creates \
                             the paginated response"
                        .to_string(),
                });
            }
        }

        let mut tools = self.tools.write().expect("tool map lock poisoned");
        if tools.contains_key(&name) {
            return Err(ToolkitError::AlreadyRegistered(name));
        }

        let wrapped: ToolFn = Arc::new(move |args| Box::pin(func(args)));
        let tool = Arc::new(Tool {
            name: name.clone(),
            description: description.into(),
            result_kind,
            page_size: options.page_size,
            max_tokens: options.max_tokens,
            func: wrapped,
        });
        tools.insert(name.clone(), tool);

        if options.cache {
            self.ttls
                .write()
                .expect("ttl map lock poisoned")
                .insert(name.clone(), options.ttl);
            if let Some(invalidator) = options.invalidator {
                self.invalidators
                    .write()
                    .expect("invalidator map lock poisoned")
                    .insert(name.clone(), invalidator);
            }
        }

        debug!(tool = %name, "Registered tool");
        Ok(())
    }

    /// Look up a tool by name
    pub fn get_tool(&self, name: &str) -> Option<Arc<Tool>> {
        self.tools
            .read()
            .expect("tool map lock poisoned")
            .get(name)
            .cloned()
    }

    /// Names of all registered tools, sorted
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .expect("tool map lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Formatted one-line descriptions of every tool, for prompt surfaces
    pub fn formatted_descriptions(&self) -> String {
        let tools = self.tools.read().expect("tool map lock poisoned");
        let mut lines: Vec<String> = tools.values().map(|t| t.formatted_description()).collect();
        lines.sort();
        lines.join("\n")
    }

    /// Execute a tool and return its typed output
    ///
    /// Applies the caching wrapper (when registered with one) and the
    /// pagination wrapper (for paginated tools, consuming the `page`
    /// argument).
    pub async fn call(&self, name: &str, mut args: ToolArgs) -> Result<ToolOutput, ToolkitError> {
        let tool = self
            .get_tool(name)
            .ok_or_else(|| ToolkitError::UnknownTool(name.to_string()))?;

        let Some(page_size) = tool.page_size else {
            return self.call_raw(&tool, args).await;
        };

        let page = extract_page_arg(&mut args)?;
        let pages = match self.call_raw(&tool, args).await? {
            ToolOutput::Pages(pages) => pages,
            ToolOutput::Paginated(_) => {
                return Err(ToolkitError::Execution(anyhow::anyhow!(
                    "tool '{}' declared a page sequence but returned a paginated response",
                    tool.name
                )))
            }
        };
        if pages.is_empty() {
            return Err(ToolkitError::NoDocuments);
        }

        Ok(ToolOutput::Paginated(paginate(
            &pages,
            page,
            page_size,
            tool.max_tokens,
        )))
    }

    /// Execute a tool and serialize the response to JSON
    ///
    /// The no-documents case becomes a structured error object rather than
    /// an error, matching the envelope upstream agents expect.
    pub async fn invoke(
        &self,
        name: &str,
        args: ToolArgs,
    ) -> Result<serde_json::Value, ToolkitError> {
        match self.call(name, args).await {
            Ok(ToolOutput::Pages(pages)) => Ok(json!({
                "documents": pages.iter().map(|p| p.to_json()).collect::<Vec<_>>(),
            })),
            Ok(ToolOutput::Paginated(response)) => Ok(response.to_json()),
            Err(ToolkitError::NoDocuments) => Ok(json!({
                "response_code": "error_no_documents_found",
                "references": [],
                "error_message": ToolkitError::NoDocuments.to_string(),
            })),
            Err(e) => Err(e),
        }
    }

    /// Run the inner function through the caching wrapper
    async fn call_raw(&self, tool: &Tool, args: ToolArgs) -> Result<ToolOutput, ToolkitError> {
        let cached = self
            .ttls
            .read()
            .expect("ttl map lock poisoned")
            .contains_key(&tool.name);
        if !cached {
            return self.run_checked(tool, args).await;
        }

        let key = cache_key(&tool.name, &args);

        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                if self.is_fresh(&tool.name, &key, entry) {
                    debug!(tool = %tool.name, "Tool cache hit");
                    return Ok(entry.output.clone());
                }
            }
        }

        let output = self.run_checked(tool, args).await?;
        self.cache.lock().await.insert(
            key,
            CacheEntry {
                output: output.clone(),
                stored_at: Instant::now(),
            },
        );
        Ok(output)
    }

    fn is_fresh(&self, tool_name: &str, key: &str, entry: &CacheEntry) -> bool {
        let ttl = self
            .ttls
            .read()
            .expect("ttl map lock poisoned")
            .get(tool_name)
            .cloned()
            .flatten();
        if let Some(ttl) = ttl {
            if entry.stored_at.elapsed() > ttl {
                return false;
            }
        }

        let invalidator = self
            .invalidators
            .read()
            .expect("invalidator map lock poisoned")
            .get(tool_name)
            .cloned();
        if let Some(invalidator) = invalidator {
            if !invalidator(key, &entry.output) {
                return false;
            }
        }

        true
    }

    /// Invoke the function and check the declared result kind
    async fn run_checked(&self, tool: &Tool, args: ToolArgs) -> Result<ToolOutput, ToolkitError> {
        let output = (tool.func)(args).await.map_err(ToolkitError::Execution)?;
        match (&output, tool.result_kind) {
            (ToolOutput::Pages(_), ToolResultKind::PageSequence)
            | (ToolOutput::Paginated(_), ToolResultKind::Paginated) => Ok(output),
            _ => Err(ToolkitError::Execution(anyhow::anyhow!(
                "tool '{}' returned a result of the wrong kind",
                tool.name
            ))),
        }
    }
}

/// Pop the `page` argument (default 0), rejecting negatives
fn extract_page_arg(args: &mut ToolArgs) -> Result<usize, ToolkitError> {
    match args.remove("page") {
        None => Ok(0),
        Some(value) => value
            .as_u64()
            .map(|v| v as usize)
            .ok_or(ToolkitError::InvalidPageArg(value)),
    }
}

/// Deterministic cache key from the tool's name and its argument map
///
/// The argument map serializes with sorted keys, so equal argument sets
/// hash equally regardless of construction order.
fn cache_key(tool_name: &str, args: &ToolArgs) -> String {
    let payload = json!({ "tool": tool_name, "args": args });
    let digest = Sha256::digest(payload.to_string().as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
