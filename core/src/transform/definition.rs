//! Transformation definitions as they appear in the configuration document.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::namespace::DocPath;


/// A scripted expression bound to a path, with named parameter sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformationDef {
    pub implementation: String,
    /// Binding name → source path.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl TransformationDef {
    pub fn new(implementation: impl Into<String>) -> Self {
        TransformationDef {
            implementation: implementation.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Builder-style parameter registration.
    pub fn with_param(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), source.into());
        self
    }

    /// Parameter sources as parsed paths, in binding-name order.
    pub fn parameter_paths(&self) -> impl Iterator<Item = (&str, DocPath)> {
        self.parameters
            .iter()
            .map(|(name, source)| (name.as_str(), DocPath::parse(source)))
    }

    /// Reject definitions the engine cannot evaluate.
    pub fn validate(&self, path: &DocPath) -> Result<()> {
        let invalid = |reason: String| Error::InvalidTransformationDefinition {
            path: path.key(),
            reason,
        };
        if self.implementation.trim().is_empty() {
            return Err(invalid("implementation is empty".into()));
        }
        for (name, source) in &self.parameters {
            if !is_binding_name(name) {
                return Err(invalid(format!("parameter name '{}' is not an identifier", name)));
            }
            if name == "self" {
                return Err(invalid("parameter name 'self' is reserved".into()));
            }
            if source.trim().is_empty() {
                return Err(invalid(format!("parameter '{}' has an empty source path", name)));
            }
        }
        Ok(())
    }
}

fn is_binding_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}


/// Accepts `{implementation, parameters}` or a bare implementation string.
impl<'de> Deserialize<'de> for TransformationDef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Full {
            implementation: String,
            #[serde(default)]
            parameters: BTreeMap<String, String>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bare(String),
            Full(Full),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Bare(implementation) => Ok(TransformationDef::new(implementation)),
            Repr::Full(full) => Ok(TransformationDef {
                implementation: full.implementation,
                parameters: full.parameters,
            }),
        }
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserialize_full_form() {
        let def: TransformationDef = serde_json::from_value(json!({
            "implementation": "north + south",
            "parameters": {"north": "sales/north", "south": "sales/south"}
        }))
        .unwrap();
        assert_eq!(def.implementation, "north + south");
        assert_eq!(def.parameters["south"], "sales/south");
    }

    #[test]
    fn deserialize_bare_string() {
        let def: TransformationDef = serde_json::from_value(json!("self * 2")).unwrap();
        assert_eq!(def, TransformationDef::new("self * 2"));
    }

    #[test]
    fn parameters_default_to_empty() {
        let def: TransformationDef =
            serde_json::from_value(json!({"implementation": "1"})).unwrap();
        assert!(def.parameters.is_empty());
    }

    #[test]
    fn missing_implementation_is_rejected() {
        assert!(serde_json::from_value::<TransformationDef>(json!({"parameters": {}})).is_err());
    }

    #[test]
    fn serializes_as_full_object() {
        let def = TransformationDef::new("a").with_param("a", "x/y");
        assert_eq!(
            serde_json::to_value(&def).unwrap(),
            json!({"implementation": "a", "parameters": {"a": "x/y"}})
        );
    }

    #[test]
    fn validate_rejects_bad_definitions() {
        let path = DocPath::parse("sales/total");
        assert!(TransformationDef::new("  ").validate(&path).is_err());
        assert!(TransformationDef::new("x").with_param("1x", "a").validate(&path).is_err());
        assert!(TransformationDef::new("x").with_param("self", "a").validate(&path).is_err());
        assert!(TransformationDef::new("x").with_param("x", "").validate(&path).is_err());
        assert!(TransformationDef::new("x").with_param("x", "a/b").validate(&path).is_ok());
    }

    #[test]
    fn validate_error_names_path() {
        let err = TransformationDef::new("").validate(&DocPath::parse("a/b")).unwrap_err();
        assert!(err.to_string().contains("a/b"));
    }
}
