//! Page References and Search Responses
//!
//! A reference is what a retriever returns: a URI plus optional relevance
//! metadata. After resolution it also carries the resolved page.

use serde::Serialize;

use super::page::Page;
use super::uri::PageURI;

/// Reference to a page, produced by a retriever
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageReference {
    /// URI of the referenced page
    pub uri: PageURI,

    /// Optional relevance score
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    /// Optional explanation of why this page is relevant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,

    /// Resolved page, populated by reference resolution
    #[serde(skip_serializing)]
    pub page: Option<Page>,
}

impl PageReference {
    /// Reference with no relevance metadata
    pub fn new(uri: PageURI) -> Self {
        Self {
            uri,
            score: None,
            explanation: None,
            page: None,
        }
    }

    /// Set the relevance score
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    /// Set the explanation
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    /// The resolved page
    ///
    /// Returns `None` until the reference has been resolved.
    pub fn page(&self) -> Option<&Page> {
        self.page.as_ref()
    }
}

/// Response wrapper for a search call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    /// References produced by the retriever, in retriever order
    pub results: Vec<PageReference>,
}

impl SearchResponse {
    /// Wrap a list of references
    pub fn new(results: Vec<PageReference>) -> Self {
        Self { results }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_builder() {
        let uri = PageURI::parse("r/doc:x@1").unwrap();
        let reference = PageReference::new(uri.clone())
            .with_score(0.87)
            .with_explanation("matched sender");

        assert_eq!(reference.uri, uri);
        assert_eq!(reference.score, Some(0.87));
        assert_eq!(reference.explanation.as_deref(), Some("matched sender"));
        assert!(reference.page().is_none());
    }
}
