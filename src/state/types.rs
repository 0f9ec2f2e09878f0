//! Entity state type definitions
//!
//! Defines the record kept per Home Assistant entity and its validation at
//! the store boundary.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Last known state of one hub entity
///
/// `state` is the canonical status string ("on", "off", "23.5", ...).
/// Everything else the hub sends at the top level (`last_changed`, `context`,
/// ...) is kept verbatim in `extra` so templates can reach it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    pub attributes: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EntityState {
    /// Create a record with no attributes
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes: Map::new(),
            extra: Map::new(),
        }
    }

    /// Builder helper used mostly by tests and fakes
    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Validate and convert a raw state object from the hub
    ///
    /// Requires a string `entity_id` and a `state` value. Non-string states
    /// are stringified, a missing `attributes` object becomes empty.
    pub fn from_json(value: Value) -> Result<Self> {
        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Err(Error::Protocol(format!(
                    "state record must be an object, got {}",
                    other
                )))
            }
        };

        let entity_id = match object.remove("entity_id") {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(other) => {
                return Err(Error::Protocol(format!(
                    "state record has invalid entity_id {}",
                    other
                )))
            }
            None => return Err(Error::Protocol("state record without entity_id".into())),
        };

        let state = match object.remove("state") {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => {
                return Err(Error::Protocol(format!(
                    "state record for '{}' has no state",
                    entity_id
                )))
            }
            Some(other) => other.to_string(),
        };

        let attributes = match object.remove("attributes") {
            Some(Value::Object(attrs)) => attrs,
            Some(Value::Null) | None => Map::new(),
            Some(other) => {
                return Err(Error::Protocol(format!(
                    "attributes of '{}' must be an object, got {}",
                    entity_id, other
                )))
            }
        };

        Ok(Self {
            entity_id,
            state,
            attributes,
            extra: object,
        })
    }

    /// Whether the canonical state is exactly "on"
    pub fn is_on(&self) -> bool {
        self.state == "on"
    }

    /// JSON view of the record, as exposed to templates
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Domain prefix of a domain-qualified identifier
///
/// Identifiers without a separator are their own domain.
pub fn domain_of(identifier: &str) -> &str {
    identifier
        .split_once('.')
        .map(|(domain, _)| domain)
        .unwrap_or(identifier)
}
