//! Charging event model
//!
//! The usage event handed to a balance operator. Filters address its fields
//! through `~*req.<Field>` and `~*opts.<Option>` paths.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Path prefix selecting event fields
pub const REQ_PREFIX: &str = "~*req.";

/// Path prefix selecting API options
pub const OPTS_PREFIX: &str = "~*opts.";

/// Usage event evaluated by filters and policy resolvers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChargingEvent {
    #[serde(rename = "Tenant")]
    pub tenant: String,

    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Event", default)]
    pub event: HashMap<String, Value>,

    #[serde(rename = "APIOpts", default)]
    pub api_opts: HashMap<String, Value>,
}

impl ChargingEvent {
    /// Create an empty event for a tenant
    pub fn new(tenant: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            id: id.into(),
            ..Default::default()
        }
    }

    /// Builder-style event field setter
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.event.insert(name.into(), value.into());
        self
    }

    /// Builder-style API option setter
    pub fn with_opt(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.api_opts.insert(name.into(), value.into());
        self
    }

    /// Resolve a `~*req.` or `~*opts.` path
    ///
    /// Returns `None` for unknown prefixes as well as missing fields.
    pub fn field(&self, path: &str) -> Option<&Value> {
        if let Some(name) = path.strip_prefix(REQ_PREFIX) {
            self.event.get(name)
        } else if let Some(name) = path.strip_prefix(OPTS_PREFIX) {
            self.api_opts.get(name)
        } else {
            None
        }
    }

    /// Resolve a path and render it as a string for comparisons
    pub fn field_as_string(&self, path: &str) -> Option<String> {
        self.field(path).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}
