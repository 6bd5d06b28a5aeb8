//! Page Record
//!
//! A page is a typed, versioned record identified by a [`PageURI`]. Every
//! page carries its descriptor, the two universal fields (`uri`,
//! `parent_uri`), and a value map validated against the descriptor.
//!
//! Pages are immutable once built: a new revision of an entity is a new page
//! with a higher version, never a mutation of an existing one.
//!
//! # Examples
//!
//! ```rust
//! use pagecore::models::{FieldSpec, FieldType, Page, PageType, PageURI};
//!
//! let doc = PageType::builder("doc")
//!     .field(FieldSpec::required("title", FieldType::String))
//!     .field(FieldSpec::optional("word_count", FieldType::Integer))
//!     .build()
//!     .unwrap();
//!
//! let page = Page::builder(doc, PageURI::parse("r/doc:x@1").unwrap())
//!     .field("title", "Quarterly report")
//!     .field("word_count", 1250i64)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(page.get("title").and_then(|v| v.as_str()), Some("Quarterly report"));
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use super::field::{FieldValue, PageType};
use super::uri::PageURI;

/// Validation errors for page construction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    /// URI type component does not match the descriptor name
    #[error("URI type '{uri_type}' does not match page type '{descriptor}'")]
    TypeNameMismatch { descriptor: String, uri_type: String },

    /// Field is not declared by the descriptor
    #[error("Unknown field '{field}' for page type '{type_name}'")]
    UnknownField { type_name: String, field: String },

    /// Value does not match the declared semantic type
    #[error("Field '{field}' does not match declared type {expected}")]
    TypeMismatch { field: String, expected: String },

    /// Null assigned to a non-nullable field
    #[error("Field '{field}' is not nullable")]
    NullNotAllowed { field: String },

    /// Required field absent at build time
    #[error("Missing required field '{field}'")]
    MissingField { field: String },
}

/// Typed, versioned page record
#[derive(Debug, Clone)]
pub struct Page {
    descriptor: Arc<PageType>,
    uri: PageURI,
    parent_uri: Option<PageURI>,
    fields: BTreeMap<String, FieldValue>,
    /// Non-persisted metadata consumed by pagination token budgets
    token_count: Option<u32>,
}

impl Page {
    /// Start building a page for the given descriptor and URI
    pub fn builder(descriptor: Arc<PageType>, uri: PageURI) -> PageBuilder {
        PageBuilder {
            descriptor,
            uri,
            parent_uri: None,
            fields: BTreeMap::new(),
            token_count: None,
        }
    }

    /// Page identity
    pub fn uri(&self) -> &PageURI {
        &self.uri
    }

    /// Provenance parent, if any
    pub fn parent_uri(&self) -> Option<&PageURI> {
        self.parent_uri.as_ref()
    }

    /// The page type descriptor
    pub fn descriptor(&self) -> &Arc<PageType> {
        &self.descriptor
    }

    /// Page type name (equals `uri().type_name()`)
    pub fn type_name(&self) -> &str {
        &self.descriptor.name
    }

    /// Field value by name
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// All field values, in field-name order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Token-count metadata for pagination budgets (never persisted)
    pub fn token_count(&self) -> Option<u32> {
        self.token_count
    }

    /// Set the token-count metadata
    pub fn set_token_count(&mut self, token_count: u32) {
        self.token_count = Some(token_count);
    }

    /// Render the page payload as a JSON object
    ///
    /// Includes `uri` and `parent_uri` alongside the declared fields. Used by
    /// the toolkit when serializing tool responses.
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        object.insert(
            "uri".to_string(),
            serde_json::Value::String(self.uri.to_string()),
        );
        object.insert(
            "parent_uri".to_string(),
            match &self.parent_uri {
                Some(parent) => serde_json::Value::String(parent.to_string()),
                None => serde_json::Value::Null,
            },
        );
        for (name, value) in &self.fields {
            object.insert(name.clone(), crate::cache::serialization::field_to_json(value));
        }
        serde_json::Value::Object(object)
    }
}

impl PartialEq for Page {
    /// Token-count metadata is excluded: it is derived, not part of identity.
    fn eq(&self, other: &Self) -> bool {
        self.descriptor.name == other.descriptor.name
            && self.uri == other.uri
            && self.parent_uri == other.parent_uri
            && self.fields == other.fields
    }
}

/// Builder validating field assignments against the descriptor
pub struct PageBuilder {
    descriptor: Arc<PageType>,
    uri: PageURI,
    parent_uri: Option<PageURI>,
    fields: BTreeMap<String, FieldValue>,
    token_count: Option<u32>,
}

impl PageBuilder {
    /// Set the provenance parent
    pub fn parent(mut self, parent_uri: PageURI) -> Self {
        self.parent_uri = Some(parent_uri);
        self
    }

    /// Set an optional provenance parent
    pub fn maybe_parent(mut self, parent_uri: Option<PageURI>) -> Self {
        self.parent_uri = parent_uri;
        self
    }

    /// Assign a field value
    ///
    /// Unknown names and type mismatches are reported at [`build`](Self::build).
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Set token-count metadata
    pub fn token_count(mut self, token_count: u32) -> Self {
        self.token_count = Some(token_count);
        self
    }

    /// Validate against the descriptor and produce the page
    ///
    /// # Errors
    ///
    /// Returns [`PageError`] if the URI type does not match the descriptor,
    /// a field is unknown, a value mismatches its declared type, null is
    /// assigned to a non-nullable field, or a required field is missing.
    /// Nullable fields left unset default to [`FieldValue::Null`].
    pub fn build(self) -> Result<Page, PageError> {
        if self.uri.type_name() != self.descriptor.name {
            return Err(PageError::TypeNameMismatch {
                descriptor: self.descriptor.name.clone(),
                uri_type: self.uri.type_name().to_string(),
            });
        }

        let mut fields = BTreeMap::new();
        for (name, value) in self.fields {
            let spec = self.descriptor.field(&name).ok_or_else(|| {
                PageError::UnknownField {
                    type_name: self.descriptor.name.clone(),
                    field: name.clone(),
                }
            })?;
            if value.is_null() && !spec.nullable {
                return Err(PageError::NullNotAllowed { field: name });
            }
            if !value.matches_type(&spec.field_type) {
                return Err(PageError::TypeMismatch {
                    field: name,
                    expected: spec.field_type.token(),
                });
            }
            fields.insert(name, value);
        }

        for spec in &self.descriptor.fields {
            if !fields.contains_key(&spec.name) {
                if spec.nullable {
                    fields.insert(spec.name.clone(), FieldValue::Null);
                } else {
                    return Err(PageError::MissingField {
                        field: spec.name.clone(),
                    });
                }
            }
        }

        Ok(Page {
            descriptor: self.descriptor,
            uri: self.uri,
            parent_uri: self.parent_uri,
            fields,
            token_count: self.token_count,
        })
    }
}
