//! Page URI Types
//!
//! A `PageURI` identifies a typed, versioned page. The canonical wire form is
//! `root/type:id@version`; a URI without the `@version` suffix denotes
//! "latest" and only resolves to a concrete version during retrieval.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing or constructing a [`PageURI`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UriError {
    /// URI string does not match `root/type:id[@version]`
    #[error("Malformed page URI: {0}")]
    Malformed(String),

    /// A required component (root, type, or id) is empty
    #[error("Page URI has empty {component}: {uri}")]
    EmptyComponent { component: &'static str, uri: String },

    /// The id contains a reserved character (`@` or `:`)
    #[error("Page id contains reserved character '{found}': {id}")]
    ReservedCharacter { found: char, id: String },

    /// The version suffix is not a non-negative integer
    #[error("Invalid version in page URI: {0}")]
    InvalidVersion(String),
}

/// Version component of a [`PageURI`]
///
/// Stored pages always carry `Exact(v)` with `v >= 1`. `Latest` is a request
/// sentinel: it means "whichever version is newest at read time" and never
/// appears in a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageVersion {
    /// Resolve to the newest version at read time
    Latest,
    /// A fixed version number
    Exact(u64),
}

impl PageVersion {
    /// Return the fixed version number, or `None` for `Latest`
    pub fn number(&self) -> Option<u64> {
        match self {
            PageVersion::Latest => None,
            PageVersion::Exact(v) => Some(*v),
        }
    }

    /// Whether this is a fixed version usable in a stored record (`>= 1`)
    pub fn is_storable(&self) -> bool {
        matches!(self, PageVersion::Exact(v) if *v >= 1)
    }
}

impl fmt::Display for PageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageVersion::Latest => write!(f, "latest"),
            PageVersion::Exact(v) => write!(f, "{}", v),
        }
    }
}

/// Four-part identifier for a page
///
/// - `root`: opaque tenant/namespace prefix
/// - `type_name`: routes to a handler and a storage schema
/// - `id`: entity identifier within the type (must not contain `@` or `:`)
/// - `version`: fixed number or [`PageVersion::Latest`]
///
/// Two URIs are equal iff all four components are equal; equality of two
/// `Latest` URIs is intentional (they denote the same read-time resolution).
///
/// # Examples
///
/// ```rust
/// use pagecore::models::{PageURI, PageVersion};
///
/// let uri = PageURI::parse("acme/email:msg-42@3").unwrap();
/// assert_eq!(uri.root(), "acme");
/// assert_eq!(uri.type_name(), "email");
/// assert_eq!(uri.id(), "msg-42");
/// assert_eq!(uri.version(), PageVersion::Exact(3));
/// assert_eq!(uri.prefix(), "acme/email:msg-42");
/// assert_eq!(uri.to_string(), "acme/email:msg-42@3");
///
/// let latest = PageURI::parse("acme/email:msg-42").unwrap();
/// assert_eq!(latest.version(), PageVersion::Latest);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageURI {
    root: String,
    type_name: String,
    id: String,
    version: PageVersion,
}

impl PageURI {
    /// Construct a URI from components, validating the id
    pub fn new(
        root: impl Into<String>,
        type_name: impl Into<String>,
        id: impl Into<String>,
        version: PageVersion,
    ) -> Result<Self, UriError> {
        let root = root.into();
        let type_name = type_name.into();
        let id = id.into();

        let uri_hint = format!("{}/{}:{}", root, type_name, id);
        if root.is_empty() {
            return Err(UriError::EmptyComponent {
                component: "root",
                uri: uri_hint,
            });
        }
        if type_name.is_empty() {
            return Err(UriError::EmptyComponent {
                component: "type",
                uri: uri_hint,
            });
        }
        if id.is_empty() {
            return Err(UriError::EmptyComponent {
                component: "id",
                uri: uri_hint,
            });
        }
        if let Some(found) = id.chars().find(|c| *c == '@' || *c == ':') {
            return Err(UriError::ReservedCharacter { found, id });
        }

        Ok(Self {
            root,
            type_name,
            id,
            version,
        })
    }

    /// Parse the canonical wire form `root/type:id[@version]`
    ///
    /// # Errors
    ///
    /// Returns [`UriError`] for missing components, reserved characters in
    /// the id, or a non-numeric version suffix.
    pub fn parse(input: &str) -> Result<Self, UriError> {
        let (body, version) = match input.rsplit_once('@') {
            Some((body, version_str)) => {
                if version_str.is_empty() {
                    return Err(UriError::InvalidVersion(input.to_string()));
                }
                let number: u64 = version_str
                    .parse()
                    .map_err(|_| UriError::InvalidVersion(input.to_string()))?;
                (body, PageVersion::Exact(number))
            }
            None => (input, PageVersion::Latest),
        };

        let (root, rest) = body
            .split_once('/')
            .ok_or_else(|| UriError::Malformed(input.to_string()))?;
        let (type_name, id) = rest
            .split_once(':')
            .ok_or_else(|| UriError::Malformed(input.to_string()))?;

        Self::new(root, type_name, id, version)
    }

    /// Opaque namespace prefix
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Page type component (routing and schema key)
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Entity identifier within the type
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Version component
    pub fn version(&self) -> PageVersion {
        self.version
    }

    /// The version-less `root/type:id` prefix used as primary key material
    pub fn prefix(&self) -> String {
        format!("{}/{}:{}", self.root, self.type_name, self.id)
    }

    /// Copy of this URI with a different version
    pub fn with_version(&self, version: PageVersion) -> Self {
        Self {
            version,
            ..self.clone()
        }
    }
}

impl fmt::Display for PageURI {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            PageVersion::Latest => write!(f, "{}", self.prefix()),
            PageVersion::Exact(v) => write!(f, "{}@{}", self.prefix(), v),
        }
    }
}

impl FromStr for PageURI {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for PageURI {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PageURI {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        PageURI::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_versioned() {
        let uri = PageURI::parse("tenant/doc:alpha@7").unwrap();
        assert_eq!(uri.root(), "tenant");
        assert_eq!(uri.type_name(), "doc");
        assert_eq!(uri.id(), "alpha");
        assert_eq!(uri.version(), PageVersion::Exact(7));
    }

    #[test]
    fn test_parse_latest() {
        let uri = PageURI::parse("tenant/doc:alpha").unwrap();
        assert_eq!(uri.version(), PageVersion::Latest);
        assert_eq!(uri.to_string(), "tenant/doc:alpha");
    }

    #[test]
    fn test_display_round_trip() {
        for raw in ["r/doc:x@1", "r/doc:x", "a/b:c-d.e@12"] {
            let uri = PageURI::parse(raw).unwrap();
            assert_eq!(uri.to_string(), raw);
            assert_eq!(PageURI::parse(&uri.to_string()).unwrap(), uri);
        }
    }

    #[test]
    fn test_prefix_excludes_version() {
        let uri = PageURI::parse("r/doc:x@5").unwrap();
        assert_eq!(uri.prefix(), "r/doc:x");
    }

    #[test]
    fn test_rejects_missing_components() {
        assert!(PageURI::parse("no-slash:id@1").is_err());
        assert!(PageURI::parse("root/no-colon@1").is_err());
        assert!(PageURI::parse("/doc:x@1").is_err());
        assert!(PageURI::parse("root/:x@1").is_err());
        assert!(PageURI::parse("root/doc:@1").is_err());
    }

    #[test]
    fn test_rejects_reserved_characters_in_id() {
        let err = PageURI::new("r", "doc", "a:b", PageVersion::Latest).unwrap_err();
        assert!(matches!(err, UriError::ReservedCharacter { found: ':', .. }));
    }

    #[test]
    fn test_rejects_bad_version() {
        assert!(matches!(
            PageURI::parse("r/doc:x@"),
            Err(UriError::InvalidVersion(_))
        ));
        assert!(matches!(
            PageURI::parse("r/doc:x@one"),
            Err(UriError::InvalidVersion(_))
        ));
        assert!(matches!(
            PageURI::parse("r/doc:x@-1"),
            Err(UriError::InvalidVersion(_))
        ));
    }

    #[test]
    fn test_latest_uris_compare_equal() {
        let a = PageURI::parse("r/doc:x").unwrap();
        let b = PageURI::parse("r/doc:x").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, a.with_version(PageVersion::Exact(1)));
    }

    #[test]
    fn test_version_is_storable() {
        assert!(PageVersion::Exact(1).is_storable());
        assert!(!PageVersion::Exact(0).is_storable());
        assert!(!PageVersion::Latest.is_storable());
    }

    #[test]
    fn test_serde_as_string() {
        let uri = PageURI::parse("r/doc:x@2").unwrap();
        let json = serde_json::to_string(&uri).unwrap();
        assert_eq!(json, "\"r/doc:x@2\"");
        let back: PageURI = serde_json::from_str(&json).unwrap();
        assert_eq!(back, uri);
    }
}
