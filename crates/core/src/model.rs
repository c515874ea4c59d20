//! Entity model used for commit-time validation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Description of one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescription {
    /// Entity name
    pub name: String,

    /// Attributes that must be present and non-null
    #[serde(default)]
    pub required: Vec<String>,

    /// Attributes whose values must be unique across the entity
    #[serde(default)]
    pub unique: Vec<String>,
}

impl EntityDescription {
    /// Create an entity without constraints.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a required attribute.
    pub fn required(mut self, attribute: impl Into<String>) -> Self {
        self.required.push(attribute.into());
        self
    }

    /// Add a unique attribute.
    pub fn unique(mut self, attribute: impl Into<String>) -> Self {
        self.unique.push(attribute.into());
        self
    }
}

/// The set of entities a context chain knows about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    entities: BTreeMap<String, EntityDescription>,
}

impl Model {
    /// Create an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity.
    pub fn with_entity(mut self, entity: EntityDescription) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    /// Look up an entity.
    pub fn entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.get(name)
    }
}
