//! Field Model and Page Type Descriptors
//!
//! Page types are declared through explicit descriptors rather than derived
//! from language-level reflection: a [`PageType`] lists every payload field
//! with its semantic type, nullability, and storage hint. The schema registry
//! consumes only descriptors, and all descriptors are registered before the
//! first request is served.
//!
//! Two fields are universal and implicit on every page: `uri` (identity) and
//! `parent_uri` (optional provenance link). They never appear in a
//! descriptor's field list.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use super::uri::PageURI;

/// Column names reserved by the storage layer
pub(crate) const RESERVED_FIELD_NAMES: [&str; 8] = [
    "uri",
    "parent_uri",
    "uri_prefix",
    "version",
    "valid",
    "created_at",
    "updated_at",
    "_schema_signature",
];

/// Errors raised while building a page type descriptor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// Type names become table names, so they are restricted to
    /// `[a-zA-Z][a-zA-Z0-9_]*`
    #[error("Invalid page type name '{0}': must start with a letter and contain only alphanumeric characters and underscores")]
    InvalidTypeName(String),

    /// Field name collides with a reserved storage column
    #[error("Field name '{0}' is reserved")]
    ReservedFieldName(String),

    /// Field names become column names, same restriction as type names
    #[error("Invalid field name '{0}': must start with a letter and contain only alphanumeric characters and underscores")]
    InvalidFieldName(String),

    /// The same field was declared twice
    #[error("Duplicate field name '{0}'")]
    DuplicateField(String),

    /// The `LargeText` storage hint only applies to string fields
    #[error("Storage hint 'large text' is only valid for string fields, got '{0}'")]
    InvalidStorageHint(String),
}

/// Storage hint for a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageHint {
    /// Let the column mapping pick the default storage type
    #[default]
    Default,
    /// Store a string field as large text instead of varchar
    LargeText,
}

/// Semantic type of a page field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// UTF-8 text
    String,
    /// 64-bit signed integer
    Integer,
    /// 64-bit float
    Float,
    /// Boolean
    Boolean,
    /// Arbitrary-precision decimal
    Decimal,
    /// Timestamp with timezone, normalized to UTC
    Timestamp,
    /// A page URI, stored in canonical string form
    Uri,
    /// Ordered sequence of a single element type
    List(Box<FieldType>),
    /// Mapping from string keys to arbitrary JSON values
    Map,
    /// Nested record with its own declared field list
    Record(Arc<RecordSchema>),
}

impl FieldType {
    /// Short token used in schema signatures
    pub fn token(&self) -> String {
        match self {
            FieldType::String => "string".to_string(),
            FieldType::Integer => "integer".to_string(),
            FieldType::Float => "float".to_string(),
            FieldType::Boolean => "boolean".to_string(),
            FieldType::Decimal => "decimal".to_string(),
            FieldType::Timestamp => "timestamp".to_string(),
            FieldType::Uri => "uri".to_string(),
            FieldType::List(item) => format!("list<{}>", item.token()),
            FieldType::Map => "map".to_string(),
            FieldType::Record(schema) => format!("record<{}>", schema.name),
        }
    }
}

/// Declaration of a single page field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// Field (and column) name
    pub name: String,
    /// Semantic type
    pub field_type: FieldType,
    /// Whether the stored column accepts NULL
    pub nullable: bool,
    /// Optional storage hint
    pub storage: StorageHint,
}

impl FieldSpec {
    /// A required (non-nullable) field
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            storage: StorageHint::Default,
        }
    }

    /// An optional (nullable) field
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
            storage: StorageHint::Default,
        }
    }

    /// Set the storage hint
    pub fn with_storage(mut self, storage: StorageHint) -> Self {
        self.storage = storage;
        self
    }

    fn signature_token(&self) -> String {
        let type_token = match (&self.field_type, self.storage) {
            (FieldType::String, StorageHint::LargeText) => "text".to_string(),
            (other, _) => other.token(),
        };
        format!("{}:{}:{}", self.name, type_token, self.nullable)
    }
}

/// Field list for a nested record type
///
/// A record is not a page: it has no URI and no table of its own. Its schema
/// exists so JSON blobs can be validated back into typed values on read,
/// including nested [`PageURI`] fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    /// Record type name (used in signatures and error messages)
    pub name: String,
    /// Declared fields
    pub fields: Vec<FieldSpec>,
}

impl RecordSchema {
    /// Build a record schema, validating field names
    pub fn new(
        name: impl Into<String>,
        fields: Vec<FieldSpec>,
    ) -> Result<Arc<Self>, DescriptorError> {
        let name = name.into();
        validate_ident(&name).map_err(|_| DescriptorError::InvalidTypeName(name.clone()))?;
        validate_fields(&fields)?;
        Ok(Arc::new(Self { name, fields }))
    }

    /// Look up a field spec by name
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Descriptor for a concrete page type
///
/// The descriptor's `name` is simultaneously the URI `type` component, the
/// routing key, and the source of the table name (`<name>_pages`).
///
/// # Examples
///
/// ```rust
/// use pagecore::models::{FieldSpec, FieldType, PageType, StorageHint};
///
/// let doc = PageType::builder("doc")
///     .field(FieldSpec::required("title", FieldType::String))
///     .field(
///         FieldSpec::required("body", FieldType::String)
///             .with_storage(StorageHint::LargeText),
///     )
///     .field(FieldSpec::optional("word_count", FieldType::Integer))
///     .build()
///     .unwrap();
///
/// assert_eq!(doc.name, "doc");
/// assert_eq!(doc.table_name(), "doc_pages");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PageType {
    /// Type name (URI type component and routing key)
    pub name: String,
    /// Declared payload fields
    pub fields: Vec<FieldSpec>,
}

impl PageType {
    /// Start building a descriptor
    pub fn builder(name: impl Into<String>) -> PageTypeBuilder {
        PageTypeBuilder {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Table name for this page type
    pub fn table_name(&self) -> String {
        format!("{}_pages", self.name.to_lowercase())
    }

    /// Look up a field spec by name
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Signature string summarizing the field list
    ///
    /// Used to detect schema drift between runs: re-registration with a
    /// differing signature logs a warning and keeps the existing table.
    pub fn schema_signature(&self) -> String {
        let mut tokens: Vec<String> = self.fields.iter().map(FieldSpec::signature_token).collect();
        tokens.sort();
        tokens.join("|")
    }
}

/// Builder for [`PageType`] descriptors
pub struct PageTypeBuilder {
    name: String,
    fields: Vec<FieldSpec>,
}

impl PageTypeBuilder {
    /// Add a field declaration
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Finish, validating names and hints
    pub fn build(self) -> Result<Arc<PageType>, DescriptorError> {
        validate_ident(&self.name)
            .map_err(|_| DescriptorError::InvalidTypeName(self.name.clone()))?;
        validate_fields(&self.fields)?;
        Ok(Arc::new(PageType {
            name: self.name,
            fields: self.fields,
        }))
    }
}

fn validate_ident(name: &str) -> Result<(), ()> {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return Err(()),
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(())
    }
}

fn validate_fields(fields: &[FieldSpec]) -> Result<(), DescriptorError> {
    let mut seen: Vec<&str> = Vec::new();
    for spec in fields {
        if RESERVED_FIELD_NAMES.contains(&spec.name.as_str()) {
            return Err(DescriptorError::ReservedFieldName(spec.name.clone()));
        }
        validate_ident(&spec.name)
            .map_err(|_| DescriptorError::InvalidFieldName(spec.name.clone()))?;
        if seen.contains(&spec.name.as_str()) {
            return Err(DescriptorError::DuplicateField(spec.name.clone()));
        }
        if spec.storage == StorageHint::LargeText && spec.field_type != FieldType::String {
            return Err(DescriptorError::InvalidStorageHint(spec.name.clone()));
        }
        seen.push(&spec.name);
    }
    Ok(())
}

/// Runtime value of a page field
///
/// `Null` is only legal for nullable fields; the page builder and the
/// deserializer both enforce this against the descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Absent value for a nullable field
    Null,
    /// UTF-8 text
    String(String),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit float
    Float(f64),
    /// Boolean
    Boolean(bool),
    /// Arbitrary-precision decimal
    Decimal(Decimal),
    /// Timestamp, normalized to UTC
    Timestamp(DateTime<Utc>),
    /// Page URI
    Uri(PageURI),
    /// Ordered sequence
    List(Vec<FieldValue>),
    /// String-keyed mapping of arbitrary JSON values
    Map(serde_json::Map<String, serde_json::Value>),
    /// Nested record
    Record(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Whether this value is assignable to the given semantic type
    ///
    /// `Null` matches any type here; nullability is checked separately
    /// against the field spec.
    pub fn matches_type(&self, field_type: &FieldType) -> bool {
        match (self, field_type) {
            (FieldValue::Null, _) => true,
            (FieldValue::String(_), FieldType::String) => true,
            (FieldValue::Integer(_), FieldType::Integer) => true,
            (FieldValue::Float(_), FieldType::Float) => true,
            (FieldValue::Boolean(_), FieldType::Boolean) => true,
            (FieldValue::Decimal(_), FieldType::Decimal) => true,
            (FieldValue::Timestamp(_), FieldType::Timestamp) => true,
            (FieldValue::Uri(_), FieldType::Uri) => true,
            (FieldValue::List(items), FieldType::List(item_type)) => {
                items.iter().all(|v| v.matches_type(item_type))
            }
            (FieldValue::Map(_), FieldType::Map) => true,
            (FieldValue::Record(fields), FieldType::Record(schema)) => fields
                .iter()
                .all(|(name, value)| match schema.field(name) {
                    Some(spec) => value.matches_type(&spec.field_type),
                    None => false,
                }),
            _ => false,
        }
    }

    /// String accessor
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer accessor
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Float accessor
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean accessor
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Decimal accessor
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            FieldValue::Decimal(v) => Some(*v),
            _ => None,
        }
    }

    /// Timestamp accessor
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// URI accessor
    pub fn as_uri(&self) -> Option<&PageURI> {
        match self {
            FieldValue::Uri(u) => Some(u),
            _ => None,
        }
    }

    /// List accessor
    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Record accessor
    pub fn as_record(&self) -> Option<&BTreeMap<String, FieldValue>> {
        match self {
            FieldValue::Record(fields) => Some(fields),
            _ => None,
        }
    }

    /// Whether this is the null value
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<PageURI> for FieldValue {
    fn from(value: PageURI) -> Self {
        FieldValue::Uri(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

impl From<Decimal> for FieldValue {
    fn from(value: Decimal) -> Self {
        FieldValue::Decimal(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_type() -> Arc<PageType> {
        PageType::builder("doc")
            .field(FieldSpec::required("title", FieldType::String))
            .field(FieldSpec::optional("word_count", FieldType::Integer))
            .build()
            .unwrap()
    }

    #[test]
    fn test_table_name_lowercased() {
        let t = PageType::builder("CalendarEvent")
            .field(FieldSpec::required("summary", FieldType::String))
            .build()
            .unwrap();
        assert_eq!(t.table_name(), "calendarevent_pages");
    }

    #[test]
    fn test_reserved_field_names_rejected() {
        for reserved in ["uri", "parent_uri", "valid", "version", "uri_prefix"] {
            let result = PageType::builder("doc")
                .field(FieldSpec::required(reserved, FieldType::String))
                .build();
            assert!(
                matches!(result, Err(DescriptorError::ReservedFieldName(_))),
                "expected rejection for '{}'",
                reserved
            );
        }
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let result = PageType::builder("doc")
            .field(FieldSpec::required("title", FieldType::String))
            .field(FieldSpec::optional("title", FieldType::String))
            .build();
        assert!(matches!(result, Err(DescriptorError::DuplicateField(_))));
    }

    #[test]
    fn test_invalid_names_rejected() {
        assert!(PageType::builder("2doc")
            .field(FieldSpec::required("title", FieldType::String))
            .build()
            .is_err());
        assert!(PageType::builder("doc")
            .field(FieldSpec::required("has space", FieldType::String))
            .build()
            .is_err());
    }

    #[test]
    fn test_large_text_hint_only_for_strings() {
        let result = PageType::builder("doc")
            .field(
                FieldSpec::required("count", FieldType::Integer)
                    .with_storage(StorageHint::LargeText),
            )
            .build();
        assert!(matches!(result, Err(DescriptorError::InvalidStorageHint(_))));
    }

    #[test]
    fn test_schema_signature_is_order_independent() {
        let a = PageType::builder("doc")
            .field(FieldSpec::required("title", FieldType::String))
            .field(FieldSpec::optional("word_count", FieldType::Integer))
            .build()
            .unwrap();
        let b = PageType::builder("doc")
            .field(FieldSpec::optional("word_count", FieldType::Integer))
            .field(FieldSpec::required("title", FieldType::String))
            .build()
            .unwrap();
        assert_eq!(a.schema_signature(), b.schema_signature());
    }

    #[test]
    fn test_schema_signature_tracks_hint_and_nullability() {
        let plain = doc_type();
        let hinted = PageType::builder("doc")
            .field(
                FieldSpec::required("title", FieldType::String)
                    .with_storage(StorageHint::LargeText),
            )
            .field(FieldSpec::optional("word_count", FieldType::Integer))
            .build()
            .unwrap();
        assert_ne!(plain.schema_signature(), hinted.schema_signature());
    }

    #[test]
    fn test_matches_type() {
        let uri = PageURI::parse("r/doc:x@1").unwrap();
        assert!(FieldValue::from("hello").matches_type(&FieldType::String));
        assert!(FieldValue::from(3i64).matches_type(&FieldType::Integer));
        assert!(!FieldValue::from(3i64).matches_type(&FieldType::Float));
        assert!(FieldValue::Uri(uri).matches_type(&FieldType::Uri));
        assert!(FieldValue::List(vec![FieldValue::from(1i64), FieldValue::from(2i64)])
            .matches_type(&FieldType::List(Box::new(FieldType::Integer))));
        assert!(!FieldValue::List(vec![FieldValue::from("x")])
            .matches_type(&FieldType::List(Box::new(FieldType::Integer))));
        assert!(FieldValue::Null.matches_type(&FieldType::Boolean));
    }

    #[test]
    fn test_record_matches_declared_fields_only() {
        let schema = RecordSchema::new(
            "attachment",
            vec![
                FieldSpec::required("file_name", FieldType::String),
                FieldSpec::optional("source", FieldType::Uri),
            ],
        )
        .unwrap();

        let mut fields = BTreeMap::new();
        fields.insert("file_name".to_string(), FieldValue::from("a.txt"));
        assert!(FieldValue::Record(fields.clone())
            .matches_type(&FieldType::Record(schema.clone())));

        fields.insert("unknown".to_string(), FieldValue::from(1i64));
        assert!(!FieldValue::Record(fields).matches_type(&FieldType::Record(schema)));
    }
}
