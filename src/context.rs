//! Publish Context
//!
//! The production context a pipeline call runs in. Callers build it and
//! pass it in; nothing here is cached between calls.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::model::{EntityRef, FieldMapping};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishContext {
    pub project: EntityRef,
    /// Shot or asset the work belongs to.
    pub entity: EntityRef,
    #[serde(default)]
    pub user: Option<EntityRef>,
    /// Fields the context contributes to template resolution (`Shot`, `Step`, ...).
    #[serde(default)]
    pub fields: FieldMapping,
}

impl PublishContext {
    pub fn new(project: EntityRef, entity: EntityRef) -> Self {
        Self {
            project,
            entity,
            user: None,
            fields: FieldMapping::new(),
        }
    }

    pub fn entity_name(&self) -> &str {
        self.entity.name.as_deref().unwrap_or("UNSET")
    }

    pub fn entity_value(&self) -> Value {
        json!(self.entity)
    }
}
