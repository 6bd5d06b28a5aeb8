//! Schema Registry
//!
//! Derives a persistent table from each page type descriptor and creates it
//! exactly once. The registry is keyed by type name and shared by storage,
//! provenance, and query.
//!
//! Every page table carries the same frame around the declared fields:
//! `(uri_prefix, version)` as primary key, a `valid` flag, the universal
//! `parent_uri` column, bookkeeping timestamps, and a `_schema_signature`
//! string summarizing the field list. On re-registration with a differing
//! signature the registry logs a warning and keeps the existing table;
//! migrations are external.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cache::error::CacheError;
use crate::db::DatabaseService;
use crate::models::{FieldSpec, FieldType, PageType, StorageHint};

/// Opaque table descriptor handed to storage and query
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    /// SQL table name (`<type_lowercased>_pages`)
    pub table_name: String,
    /// Signature of the field list the table was created with
    pub signature: String,
}

/// A registered page type: its descriptor plus the derived table
#[derive(Debug)]
pub struct RegisteredType {
    /// The page type descriptor
    pub descriptor: Arc<PageType>,
    /// The derived table
    pub table: TableDescriptor,
}

impl RegisteredType {
    /// Declared field column names, in descriptor order
    pub fn field_columns(&self) -> impl Iterator<Item = &str> {
        self.descriptor.fields.iter().map(|f| f.name.as_str())
    }
}

/// Map a field spec to its SQL column type
fn column_type(spec: &FieldSpec) -> &'static str {
    match (&spec.field_type, spec.storage) {
        (FieldType::String, StorageHint::LargeText) => "TEXT",
        (FieldType::String, _) => "VARCHAR",
        (FieldType::Integer, _) => "INTEGER",
        (FieldType::Float, _) => "REAL",
        (FieldType::Boolean, _) => "BOOLEAN",
        // Decimals are stored as canonical strings; a NUMERIC column would
        // coerce them through floats and lose precision
        (FieldType::Decimal, _) => "TEXT",
        (FieldType::Timestamp, _) => "DATETIME",
        (FieldType::Uri, _) => "VARCHAR",
        (FieldType::List(_) | FieldType::Map | FieldType::Record(_), _) => "JSON",
    }
}

/// Generate the CREATE TABLE statement for a page type
fn table_ddl(descriptor: &PageType) -> String {
    let mut columns = vec![
        "uri_prefix TEXT NOT NULL".to_string(),
        "version INTEGER NOT NULL".to_string(),
        "valid BOOLEAN NOT NULL DEFAULT TRUE".to_string(),
        "parent_uri TEXT".to_string(),
    ];

    for spec in &descriptor.fields {
        let nullability = if spec.nullable { "" } else { " NOT NULL" };
        columns.push(format!("{} {}{}", spec.name, column_type(spec), nullability));
    }

    columns.push("created_at DATETIME NOT NULL".to_string());
    columns.push("updated_at DATETIME NOT NULL".to_string());
    columns.push("_schema_signature TEXT NOT NULL".to_string());
    columns.push("PRIMARY KEY (uri_prefix, version)".to_string());

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        descriptor.table_name(),
        columns.join(",\n    ")
    )
}

/// Registry of page types and their derived tables
pub struct SchemaRegistry {
    db: DatabaseService,
    types: RwLock<HashMap<String, Arc<RegisteredType>>>,
}

impl SchemaRegistry {
    /// Create an empty registry over the given database
    pub fn new(db: DatabaseService) -> Self {
        Self {
            db,
            types: RwLock::new(HashMap::new()),
        }
    }

    /// Idempotently register a page type, creating its table if missing
    ///
    /// Safe under concurrent registration of the same type: a double
    /// register returns the existing entry. Re-registration with a
    /// differing schema signature logs a warning and keeps the existing
    /// table.
    pub async fn ensure_registered(
        &self,
        descriptor: &Arc<PageType>,
    ) -> Result<Arc<RegisteredType>, CacheError> {
        if let Some(existing) = self.types.read().await.get(&descriptor.name) {
            self.check_signature(existing, descriptor);
            return Ok(existing.clone());
        }

        let mut types = self.types.write().await;
        // Re-check under the write lock: another task may have registered
        // the type between our read and write acquisitions
        if let Some(existing) = types.get(&descriptor.name) {
            self.check_signature(existing, descriptor);
            return Ok(existing.clone());
        }

        let conn = self.db.connect_with_timeout().await?;
        conn.execute(&table_ddl(descriptor), ())
            .await
            .map_err(|e| {
                crate::db::DatabaseError::sql_execution(format!(
                    "Failed to create table '{}': {}",
                    descriptor.table_name(),
                    e
                ))
            })?;
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_valid ON {}(valid)",
                descriptor.table_name(),
                descriptor.table_name()
            ),
            (),
        )
        .await
        .map_err(|e| {
            crate::db::DatabaseError::sql_execution(format!(
                "Failed to create validity index for '{}': {}",
                descriptor.table_name(),
                e
            ))
        })?;

        let entry = Arc::new(RegisteredType {
            descriptor: descriptor.clone(),
            table: TableDescriptor {
                table_name: descriptor.table_name(),
                signature: descriptor.schema_signature(),
            },
        });
        types.insert(descriptor.name.clone(), entry.clone());
        debug!(page_type = %descriptor.name, table = %entry.table.table_name, "Registered page type");

        Ok(entry)
    }

    fn check_signature(&self, existing: &RegisteredType, descriptor: &PageType) {
        let incoming = descriptor.schema_signature();
        if existing.table.signature != incoming {
            warn!(
                page_type = %descriptor.name,
                "Schema change detected; keeping existing table (migrations are external)"
            );
        }
    }

    /// Look up the registered entry for a type name
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotRegistered`] if the type was never
    /// registered.
    pub async fn table_for(&self, type_name: &str) -> Result<Arc<RegisteredType>, CacheError> {
        self.types
            .read()
            .await
            .get(type_name)
            .cloned()
            .ok_or_else(|| CacheError::NotRegistered(type_name.to_string()))
    }

    /// Snapshot of every registered type
    ///
    /// Used by cross-type operations (invalidation, provenance lookups).
    pub async fn registered(&self) -> Vec<Arc<RegisteredType>> {
        self.types.read().await.values().cloned().collect()
    }

    /// Whether the given type name is registered
    pub async fn is_registered(&self, type_name: &str) -> bool {
        self.types.read().await.contains_key(type_name)
    }
}
