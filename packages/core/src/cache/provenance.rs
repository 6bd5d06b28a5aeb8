//! Provenance Tracking
//!
//! Validates parent/child relationships at write time and answers lineage
//! queries at read time. Parent links always point from a child to a page
//! of a *different* type with a fixed version, and the resulting graph is
//! kept acyclic by construction.

use std::collections::HashSet;
use std::sync::Arc;

use crate::cache::error::CacheError;
use crate::cache::schema::SchemaRegistry;
use crate::cache::storage::PageStorage;
use crate::db::{DatabaseError, DatabaseService};
use crate::models::{Page, PageURI};

/// Relationship validation and lineage queries
pub struct ProvenanceManager {
    db: DatabaseService,
    storage: Arc<PageStorage>,
    registry: Arc<SchemaRegistry>,
}

impl ProvenanceManager {
    /// Create a manager over the shared database, storage, and registry
    pub fn new(
        db: DatabaseService,
        storage: Arc<PageStorage>,
        registry: Arc<SchemaRegistry>,
    ) -> Self {
        Self {
            db,
            storage,
            registry,
        }
    }

    /// Validate that a page may take the given parent
    ///
    /// Checks, in order: the parent exists (ignoring validity), the child
    /// does not exist yet, the types differ, the parent has a fixed
    /// version, and the link closes no cycle.
    pub async fn validate_relationship(
        &self,
        page: &Page,
        parent_uri: &PageURI,
    ) -> Result<(), CacheError> {
        let parent_page = self
            .find_page_by_uri(parent_uri)
            .await?
            .ok_or_else(|| CacheError::MissingParent(parent_uri.clone()))?;

        if self.find_page_by_uri(page.uri()).await?.is_some() {
            return Err(CacheError::ChildExists(page.uri().clone()));
        }

        if parent_page.type_name() == page.type_name() {
            return Err(CacheError::SameTypeParent(page.type_name().to_string()));
        }

        if !parent_uri.version().is_storable() {
            return Err(CacheError::UnversionedParent(parent_uri.clone()));
        }

        self.check_for_cycles(page.uri(), parent_uri).await
    }

    /// Walk the parent chain upward from `parent_uri`; reaching `child_uri`
    /// (or revisiting any URI) means the new link would close a cycle
    async fn check_for_cycles(
        &self,
        child_uri: &PageURI,
        parent_uri: &PageURI,
    ) -> Result<(), CacheError> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut current = Some(parent_uri.clone());

        while let Some(uri) = current {
            if uri == *child_uri || !visited.insert(uri.to_string()) {
                return Err(CacheError::Cycle {
                    child: child_uri.clone(),
                    parent: parent_uri.clone(),
                });
            }
            current = self.parent_of(&uri).await?;
        }

        Ok(())
    }

    /// Read the parent link of a URI from the relationships table
    async fn parent_of(&self, uri: &PageURI) -> Result<Option<PageURI>, CacheError> {
        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                "SELECT target_uri FROM page_relationships
                 WHERE source_uri = ?1 AND relationship_type = 'parent'",
                [uri.to_string()],
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to read parent of {}: {}", uri, e))
            })?;

        match rows.next().await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to read parent of {}: {}", uri, e))
        })? {
            Some(row) => {
                let target: String = row.get(0).map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to read target_uri: {}", e))
                })?;
                Ok(Some(PageURI::parse(&target)?))
            }
            None => Ok(None),
        }
    }

    /// Every page whose parent link points at the given URI
    ///
    /// Children are returned regardless of validity and regardless of their
    /// type.
    pub async fn get_children(&self, parent_uri: &PageURI) -> Result<Vec<Page>, CacheError> {
        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                "SELECT source_uri FROM page_relationships
                 WHERE target_uri = ?1 AND relationship_type = 'parent'",
                [parent_uri.to_string()],
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!(
                    "Failed to read children of {}: {}",
                    parent_uri, e
                ))
            })?;

        let mut children = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to read children: {}", e))
        })? {
            let source: String = row.get(0).map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to read source_uri: {}", e))
            })?;
            let child_uri = PageURI::parse(&source)?;
            if let Some(page) = self.find_page_by_uri(&child_uri).await? {
                children.push(page);
            }
        }

        Ok(children)
    }

    /// The chain from the root ancestor down to the given URI, inclusive
    ///
    /// Walks parent links upward, then reverses into root-to-leaf order.
    /// Missing intermediate pages are skipped silently (they may have been
    /// rewritten); the chain is finite by the acyclicity invariant, with a
    /// visited guard against corrupted data.
    pub async fn get_lineage(&self, page_uri: &PageURI) -> Result<Vec<Page>, CacheError> {
        let mut lineage = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut current = Some(page_uri.clone());

        while let Some(uri) = current {
            if !visited.insert(uri.to_string()) {
                break;
            }
            if let Some(page) = self.find_page_by_uri(&uri).await? {
                lineage.push(page);
            }
            current = self.parent_of(&uri).await?;
        }

        lineage.reverse();
        Ok(lineage)
    }

    /// Find a page by URI across all registered types, ignoring validity
    pub async fn find_page_by_uri(&self, uri: &PageURI) -> Result<Option<Page>, CacheError> {
        for entry in self.registry.registered().await {
            if let Some(page) = self
                .storage
                .get(&entry.descriptor.name, uri, true)
                .await?
            {
                return Ok(Some(page));
            }
        }
        Ok(None)
    }
}
