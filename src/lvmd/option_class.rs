//! Create-option registry
//!
//! Named packs of extra `lvcreate` arguments, applied when a request names
//! one. Unlike device classes there is no default; an unnamed request
//! resolves to an empty argument list.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashSet;

/// One named option pack as it appears in the daemon configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LvcreateOptionClass {
    pub name: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// Immutable name → option list mapping.
pub struct OptionClassRegistry {
    classes: Vec<LvcreateOptionClass>,
}

impl OptionClassRegistry {
    pub fn new(classes: Vec<LvcreateOptionClass>) -> Result<Self> {
        let mut names = HashSet::new();
        for oc in &classes {
            if oc.name.is_empty() {
                return Err(Error::Configuration(
                    "lvcreate option class with empty name".into(),
                ));
            }
            if !names.insert(oc.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "duplicate lvcreate option class: {}",
                    oc.name
                )));
            }
        }
        Ok(Self { classes })
    }

    /// Arguments for a named pack; the empty string resolves to none.
    pub fn resolve(&self, name: &str) -> Result<Vec<String>> {
        if name.is_empty() {
            return Ok(vec![]);
        }
        self.classes
            .iter()
            .find(|oc| oc.name == name)
            .map(|oc| oc.options.clone())
            .ok_or_else(|| Error::NotFound(format!("lvcreate option class {name}")))
    }
}
