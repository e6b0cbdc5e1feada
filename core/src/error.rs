//! Error taxonomy shared by every gator component.

use thiserror::Error;

use crate::script::ScriptError;


pub type Result<T> = std::result::Result<T, Error>;


#[derive(Debug, Error)]
pub enum Error {
    /// A path token was absent from the tree.
    #[error("path '{path}' not found (missing element '{token}')")]
    PathNotFound { path: String, token: String },

    /// A path token indexes into a scalar or sequence.
    #[error("path element '{token}' of '{path}' does not point to an object")]
    NotTraversable { path: String, token: String },

    /// Root can only be replaced by a mapping.
    #[error("expected JSON object for root model update, got {found}")]
    InvalidRootAssignment { found: &'static str },

    #[error("circular dependency while resolving '{0}'")]
    CircularDependency(String),

    #[error("invalid transformation at '{path}': {reason}")]
    InvalidTransformationDefinition { path: String, reason: String },

    #[error("script evaluation failed: {0}")]
    ScriptEvaluation(#[from] ScriptError),

    #[error("no match in the nodes list for '{0}'")]
    UnknownNode(String),

    #[error("bus transport failure: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unsupported Content-Type: {0}, only application/json is supported")]
    UnsupportedMediaType(String),

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("method {0} not supported")]
    MethodNotAllowed(String),

    #[error("no such endpoint: {0}")]
    NoRoute(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("shared state lock poisoned")]
    Poisoned,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// True for the "nothing stored here" family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::PathNotFound { .. } | Error::UnknownNode(_))
    }
}

impl From<ureq::Error> for Error {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::Status(code, resp) => {
                let body = resp.into_string().unwrap_or_default();
                Error::Http(format!("status {}: {}", code, body.trim()))
            }
            ureq::Error::Transport(t) => Error::Http(t.to_string()),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::Poisoned
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_family() {
        let e = Error::PathNotFound { path: "a/b".into(), token: "b".into() };
        assert!(e.is_not_found());
        assert!(Error::UnknownNode("x".into()).is_not_found());
        assert!(!Error::CircularDependency("a".into()).is_not_found());
    }

    #[test]
    fn display_mentions_path() {
        let e = Error::NotTraversable { path: "a/b/c".into(), token: "b".into() };
        assert_eq!(
            e.to_string(),
            "path element 'b' of 'a/b/c' does not point to an object"
        );
    }

    #[test]
    fn script_error_converts() {
        let e: Error = ScriptError::Reference("north".into()).into();
        assert!(matches!(e, Error::ScriptEvaluation(_)));
        assert!(e.to_string().contains("north"));
    }
}
