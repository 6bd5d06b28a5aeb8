//! Tool Wrapper with Pagination Support
//!
//! A tool is a named async callable with typed named arguments. It returns
//! either an ordered sequence of pages or a ready-made paginated response;
//! the declared result kind is checked against what the function actually
//! produces.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;

use crate::models::Page;

/// Named arguments for a tool invocation
pub type ToolArgs = serde_json::Map<String, serde_json::Value>;

/// What a tool function produces
#[derive(Debug, Clone)]
pub enum ToolOutput {
    /// Ordered sequence of pages (the pagination wrapper slices these)
    Pages(Vec<Page>),
    /// A ready-made paginated response
    Paginated(PaginatedResponse),
}

/// Declared result kind of a tool, checked at invocation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolResultKind {
    /// The function returns `ToolOutput::Pages`
    PageSequence,
    /// The function returns `ToolOutput::Paginated`
    Paginated,
}

/// Boxed async tool function
pub type ToolFn =
    Arc<dyn Fn(ToolArgs) -> BoxFuture<'static, anyhow::Result<ToolOutput>> + Send + Sync>;

/// Cursor-bearing slice of a longer result sequence
///
/// The JSON wire form has keys `documents`, `page_number`, `has_next_page`,
/// `total_documents`, and `token_count`, plus `next_cursor` when a next
/// page exists.
#[derive(Debug, Clone, PartialEq)]
pub struct PaginatedResponse {
    /// The pages of this slice
    pub documents: Vec<Page>,
    /// 0-based page number
    pub page_number: usize,
    /// Whether any page after this one would be non-empty
    pub has_next_page: bool,
    /// Length of the full sequence, when known
    pub total_documents: Option<usize>,
    /// Summed token counts of the returned pages, when known
    pub token_count: Option<usize>,
    /// Opaque cursor for the next page, when one exists
    pub next_cursor: Option<String>,
}

impl PaginatedResponse {
    /// JSON wire form of this response
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        object.insert(
            "documents".to_string(),
            serde_json::Value::Array(self.documents.iter().map(Page::to_json).collect()),
        );
        object.insert("page_number".to_string(), json!(self.page_number));
        object.insert("has_next_page".to_string(), json!(self.has_next_page));
        object.insert("total_documents".to_string(), json!(self.total_documents));
        object.insert("token_count".to_string(), json!(self.token_count));
        if let Some(cursor) = &self.next_cursor {
            object.insert("next_cursor".to_string(), json!(cursor));
        }
        serde_json::Value::Object(object)
    }
}

/// Select one page slice of the full sequence, honoring a token budget
///
/// The slice is `[page*page_size, (page+1)*page_size)`. With a token
/// budget, the slice is trimmed from the right to the longest prefix whose
/// summed per-page token counts stay within budget - but the first element
/// of the slice is always admitted, even over budget. `has_next_page` is
/// true iff any element of the full sequence comes after the last returned
/// one.
pub(crate) fn paginate(
    pages: &[Page],
    page: usize,
    page_size: usize,
    max_tokens: Option<usize>,
) -> PaginatedResponse {
    let total = pages.len();
    let start = (page * page_size).min(total);
    let end = (start + page_size).min(total);
    let slice = &pages[start..end];

    let mut documents: Vec<Page> = Vec::new();
    let mut tokens = 0usize;

    match max_tokens {
        Some(budget) => {
            for (index, candidate) in slice.iter().enumerate() {
                let cost = candidate.token_count().unwrap_or(0) as usize;
                if index == 0 || tokens + cost <= budget {
                    documents.push(candidate.clone());
                    tokens += cost;
                } else {
                    break;
                }
            }
        }
        None => {
            documents = slice.to_vec();
            tokens = documents
                .iter()
                .map(|p| p.token_count().unwrap_or(0) as usize)
                .sum();
        }
    }

    let has_next_page = start + documents.len() < total;
    PaginatedResponse {
        documents,
        page_number: page,
        has_next_page,
        total_documents: Some(total),
        token_count: Some(tokens),
        next_cursor: has_next_page.then(|| (page + 1).to_string()),
    }
}

/// A registered tool: the function plus its declaration
pub struct Tool {
    /// Tool name (unique within a toolkit)
    pub name: String,
    /// Human-readable description for the upstream agent
    pub description: String,
    /// Declared result kind
    pub result_kind: ToolResultKind,
    /// Page size when the pagination wrapper is active
    pub page_size: Option<usize>,
    /// Per-page token budget when set
    pub max_tokens: Option<usize>,
    pub(crate) func: ToolFn,
}

impl Tool {
    /// Whether the pagination wrapper applies to this tool
    pub fn is_paginated(&self) -> bool {
        self.page_size.is_some()
    }

    /// One-line description including pagination parameters
    pub fn formatted_description(&self) -> String {
        let mut description = format!("- {}: {}", self.name, self.description);
        if let Some(page_size) = self.page_size {
            description.push_str(&format!(" (Paginated with {} items per page", page_size));
            if let Some(max_tokens) = self.max_tokens {
                description.push_str(&format!(", max {} tokens", max_tokens));
            }
            description.push(')');
        }
        description
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldSpec, FieldType, PageType, PageURI};
    use std::sync::Arc as StdArc;

    fn pages(count: usize, tokens: u32) -> Vec<Page> {
        let descriptor: StdArc<PageType> = PageType::builder("doc")
            .field(FieldSpec::required("title", FieldType::String))
            .build()
            .unwrap();
        (0..count)
            .map(|i| {
                Page::builder(
                    descriptor.clone(),
                    PageURI::parse(&format!("r/doc:item-{}@1", i)).unwrap(),
                )
                .field("title", format!("doc {}", i))
                .token_count(tokens)
                .build()
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_plain_slicing_without_budget() {
        let all = pages(23, 100);
        let response = paginate(&all, 0, 10, None);
        assert_eq!(response.documents.len(), 10);
        assert_eq!(response.page_number, 0);
        assert!(response.has_next_page);
        assert_eq!(response.total_documents, Some(23));
        assert_eq!(response.token_count, Some(1000));
        assert_eq!(response.next_cursor.as_deref(), Some("1"));

        let last = paginate(&all, 2, 10, None);
        assert_eq!(last.documents.len(), 3);
        assert!(!last.has_next_page);
        assert!(last.next_cursor.is_none());
    }

    #[test]
    fn test_token_budget_trims_slice() {
        let all = pages(23, 100);

        // Budget admits two 100-token pages; the page after index 21 was
        // never returned, so a next page exists
        let first = paginate(&all, 0, 10, Some(250));
        assert_eq!(first.documents.len(), 2);
        assert_eq!(first.token_count, Some(200));
        assert!(first.has_next_page);

        let third = paginate(&all, 2, 10, Some(250));
        assert_eq!(third.documents.len(), 2);
        assert_eq!(third.documents[0].uri().id(), "item-20");
        assert_eq!(third.documents[1].uri().id(), "item-21");
        assert!(third.has_next_page, "index 22 was never returned");
    }

    #[test]
    fn test_first_element_always_admitted() {
        let all = pages(5, 1000);
        let response = paginate(&all, 0, 3, Some(10));
        assert_eq!(response.documents.len(), 1);
        assert_eq!(response.token_count, Some(1000));
        assert!(response.has_next_page);
    }

    #[test]
    fn test_exact_budget_fit() {
        let all = pages(4, 100);
        let response = paginate(&all, 0, 4, Some(400));
        assert_eq!(response.documents.len(), 4);
        assert!(!response.has_next_page);
    }

    #[test]
    fn test_page_beyond_range_is_empty() {
        let all = pages(3, 10);
        let response = paginate(&all, 5, 10, None);
        assert!(response.documents.is_empty());
        assert!(!response.has_next_page);
        assert_eq!(response.total_documents, Some(3));
    }

    #[test]
    fn test_json_wire_form() {
        let all = pages(2, 10);
        let response = paginate(&all, 0, 10, None);
        let json = response.to_json();

        assert_eq!(json["documents"].as_array().unwrap().len(), 2);
        assert_eq!(json["page_number"], 0);
        assert_eq!(json["has_next_page"], false);
        assert_eq!(json["total_documents"], 2);
        assert_eq!(json["token_count"], 20);
        assert_eq!(json["documents"][0]["uri"], "r/doc:item-0@1");
    }
}
