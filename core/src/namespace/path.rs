//! Slash-separated document paths.
//!
//! Parses paths like `sales/north` or `/employees/avgSalary/` into token
//! sequences. The empty sequence is the document root. Registry keys use
//! the canonical `/`-joined form without leading or trailing slashes.

use std::fmt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};


/// An ordered sequence of non-empty name tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath {
    tokens: Vec<String>,
}

impl DocPath {
    /// The document root.
    pub fn root() -> Self {
        DocPath { tokens: Vec::new() }
    }

    /// Parse a slash-joined string.
    ///
    /// Leading, trailing and repeated slashes are dropped, so `"/a//b/"`
    /// parses to `a/b` and `""` or `"/"` parse to the root.
    pub fn parse(input: &str) -> Self {
        let tokens = input
            .split('/')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
        DocPath { tokens }
    }

    /// Parse the remainder of a URL path after stripping `prefix`.
    ///
    /// Returns `None` when `url_path` does not start with `prefix` on a
    /// token boundary (`/model` matches `/model` and `/model/x`, not `/models`).
    pub fn from_url(url_path: &str, prefix: &str) -> Option<Self> {
        let path = url_path.split('?').next().unwrap_or("");
        let rest = path.strip_prefix(prefix)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        Some(DocPath::parse(rest))
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn is_root(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Canonical registry key: tokens joined by `/`.
    pub fn key(&self) -> String {
        self.tokens.join("/")
    }

    /// Last token, or `None` for the root.
    pub fn leaf(&self) -> Option<&str> {
        self.tokens.last().map(String::as_str)
    }

    /// Path with one more token appended.
    pub fn child(&self, token: &str) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.push(token.to_string());
        DocPath { tokens }
    }

    /// Token-aware prefix test: `sales` is a prefix of `sales/north`
    /// but not of `salesforce/x`. Every path starts with the root.
    pub fn starts_with(&self, prefix: &DocPath) -> bool {
        self.tokens.len() >= prefix.tokens.len()
            && self.tokens[..prefix.tokens.len()] == prefix.tokens[..]
    }

    /// The tokens after `prefix`, if `prefix` is a token-aware prefix.
    pub fn strip_prefix(&self, prefix: &DocPath) -> Option<DocPath> {
        if !self.starts_with(prefix) {
            return None;
        }
        Some(DocPath {
            tokens: self.tokens[prefix.tokens.len()..].to_vec(),
        })
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tokens.is_empty() {
            f.write_str("/")
        } else {
            f.write_str(&self.key())
        }
    }
}

impl From<&str> for DocPath {
    fn from(s: &str) -> Self {
        DocPath::parse(s)
    }
}

impl Serialize for DocPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key())
    }
}

impl<'de> Deserialize<'de> for DocPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(DocPath::parse(&s))
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
