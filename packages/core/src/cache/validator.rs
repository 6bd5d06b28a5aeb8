//! Page Validation
//!
//! Holds per-type freshness predicates and evaluates them on read. A
//! predicate may suspend (it is allowed to do I/O) and may fail; failure is
//! treated as an invalid verdict, never propagated.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::models::Page;

/// Boxed async predicate: `true` means the page is still valid
pub type ValidatorFn = Arc<dyn Fn(Page) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync>;

/// Registry of per-type validator predicates
///
/// The registry is keyed by page type name, so a predicate is only ever
/// invoked on pages of the type it was registered for.
#[derive(Default)]
pub struct PageValidator {
    validators: RwLock<HashMap<String, ValidatorFn>>,
}

impl PageValidator {
    /// Create an empty validator registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a predicate for a page type
    ///
    /// A later registration for the same type replaces the earlier one.
    pub fn register<F, Fut>(&self, type_name: impl Into<String>, predicate: F)
    where
        F: Fn(Page) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let type_name = type_name.into();
        let wrapped: ValidatorFn = Arc::new(move |page| Box::pin(predicate(page)));
        self.validators
            .write()
            .expect("validator registry lock poisoned")
            .insert(type_name.clone(), wrapped);
        debug!(page_type = %type_name, "Registered validator");
    }

    /// Evaluate the page against its type's predicate
    ///
    /// Returns `true` when no predicate is registered. A predicate error is
    /// logged and treated as invalid.
    pub async fn is_valid(&self, page: &Page) -> bool {
        let validator = {
            let validators = self
                .validators
                .read()
                .expect("validator registry lock poisoned");
            validators.get(page.type_name()).cloned()
        };

        let Some(validator) = validator else {
            return true;
        };

        match validator(page.clone()).await {
            Ok(valid) => {
                if !valid {
                    debug!(uri = %page.uri(), "Page failed validation");
                }
                valid
            }
            Err(e) => {
                warn!(uri = %page.uri(), error = %e, "Validator error; treating page as invalid");
                false
            }
        }
    }

    /// Whether a predicate is registered for the given type
    pub fn has_validator(&self, type_name: &str) -> bool {
        self.validators
            .read()
            .expect("validator registry lock poisoned")
            .contains_key(type_name)
    }

    /// Whether any predicate is registered at all
    pub fn has_any_validator(&self) -> bool {
        !self
            .validators
            .read()
            .expect("validator registry lock poisoned")
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldSpec, FieldType, PageType, PageURI};
    use std::sync::Arc;

    fn page(type_name: &str, revision: &str) -> Page {
        let descriptor = PageType::builder(type_name)
            .field(FieldSpec::required("revision", FieldType::String))
            .build()
            .unwrap();
        Page::builder(
            descriptor,
            PageURI::parse(&format!("r/{}:x@1", type_name)).unwrap(),
        )
        .field("revision", revision)
        .build()
        .unwrap()
    }

    #[tokio::test]
    async fn test_no_validator_means_valid() {
        let validator = PageValidator::new();
        assert!(validator.is_valid(&page("doc", "current")).await);
        assert!(!validator.has_any_validator());
    }

    #[tokio::test]
    async fn test_predicate_verdict() {
        let validator = PageValidator::new();
        validator.register("doc", |page: Page| async move {
            Ok(page.get("revision").and_then(|v| v.as_str()) == Some("current"))
        });

        assert!(validator.is_valid(&page("doc", "current")).await);
        assert!(!validator.is_valid(&page("doc", "stale")).await);
        assert!(validator.has_validator("doc"));
        assert!(!validator.has_validator("email"));
    }

    #[tokio::test]
    async fn test_predicate_only_sees_its_own_type() {
        let validator = PageValidator::new();
        validator.register("doc", |_page: Page| async move { Ok(false) });

        // A different type has no registered predicate and reads as valid
        assert!(validator.is_valid(&page("email", "anything")).await);
    }

    #[tokio::test]
    async fn test_predicate_error_is_invalid() {
        let validator = PageValidator::new();
        validator.register("doc", |_page: Page| async move {
            Err(anyhow::anyhow!("upstream check failed"))
        });
        assert!(!validator.is_valid(&page("doc", "current")).await);
    }

    #[tokio::test]
    async fn test_predicate_may_capture_state() {
        let validator = PageValidator::new();
        let allowed = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let captured = allowed.clone();
        validator.register("doc", move |_page: Page| {
            let captured = captured.clone();
            async move { Ok(captured.load(std::sync::atomic::Ordering::SeqCst)) }
        });

        assert!(validator.is_valid(&page("doc", "x")).await);
        allowed.store(false, std::sync::atomic::Ordering::SeqCst);
        assert!(!validator.is_valid(&page("doc", "x")).await);
    }
}
