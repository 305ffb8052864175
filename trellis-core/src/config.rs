//! Model Configuration
//!
//! A `ModelConfig` declares the stored defaults and the virtual attributes of
//! a model. Computed attributes carry functions and are therefore registered
//! in code with [`Model::add_computed`](crate::Model::add_computed).
//!
//! ```rust,ignore
//! let config = ModelConfig::from_json_str(r#"{
//!     "defaults": { "firstName": "Charlie", "payment": 100 },
//!     "virtuals": { "isSelected": false }
//! }"#)?;
//! let model = Model::from_config(config)?;
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ModelError, Result};

/// Declarative description of a model's stored and virtual attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Initial values of stored (persisted) attributes.
    #[serde(default)]
    pub defaults: IndexMap<String, Value>,

    /// Initial values of virtual (non-persisted) attributes.
    #[serde(default)]
    pub virtuals: IndexMap<String, Value>,
}

impl ModelConfig {
    /// Parse a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Check that no name is declared both stored and virtual.
    pub fn validate(&self) -> Result<()> {
        match self.virtuals.keys().find(|name| self.defaults.contains_key(*name)) {
            Some(name) => Err(ModelError::duplicate(name, "stored")),
            None => Ok(()),
        }
    }
}
