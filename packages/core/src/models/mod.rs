//! Data Structures
//!
//! Core data model: page URIs, field descriptors and values, the universal
//! [`Page`] record, and retriever references.

mod field;
mod page;
mod reference;
mod uri;

pub use field::{
    DescriptorError, FieldSpec, FieldType, FieldValue, PageType, PageTypeBuilder, RecordSchema,
    StorageHint,
};
pub use page::{Page, PageBuilder, PageError};
pub use reference::{PageReference, SearchResponse};
pub use uri::{PageURI, PageVersion, UriError};
