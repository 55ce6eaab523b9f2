//! Entity graph contracts
//!
//! Resolution reads the live topology through [`EntityGraph`] and never
//! mutates it. Entities are addressed by [`EntityId`]; parent and child
//! links are plain ids looked up in whatever arena backs the graph, so no
//! ownership cycles exist between nodes.

mod topology;
mod types;

pub use topology::{EntityDefinition, EntityNode, Topology};
pub use types::{
    SensorDescriptor, SensorKind, StaticTypeRegistry, TypeDescriptor, TypeKind, TypeLookupError,
    TypeRegistry,
};

use crate::error::ResolveError;
use crate::value::DslValue;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Entity identifier, unique for the life of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Generate new random ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    #[inline]
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Underlying UUID
    #[inline]
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity:{}", self.0)
    }
}

/// When an attribute value counts as ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    /// Any value other than absent or JSON `null`
    #[default]
    Present,
    /// Present and not `false`, `0`, `""`, `[]` or `{}`
    Truthy,
}

impl Readiness {
    /// Check a current attribute value
    #[must_use]
    pub fn is_ready(self, value: Option<&Value>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match self {
            Self::Present => !value.is_null(),
            Self::Truthy => match value {
                Value::Null => false,
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
                Value::String(s) => !s.is_empty(),
                Value::Array(a) => !a.is_empty(),
                Value::Object(o) => !o.is_empty(),
            },
        }
    }
}

/// Read-only view of the live entity graph
///
/// Implementations must be safe to query while the graph is being
/// modified. Scope searches are best-effort with respect to entities added
/// concurrently.
#[async_trait]
pub trait EntityGraph: Send + Sync + fmt::Debug {
    /// Whether the entity is currently managed
    fn contains(&self, id: EntityId) -> bool;

    /// Human readable name for logs
    fn display_name(&self, id: EntityId) -> Option<String>;

    /// Parent entity, `None` for an application root
    fn parent(&self, id: EntityId) -> Option<EntityId>;

    /// Immediate children in creation order
    fn children(&self, id: EntityId) -> Vec<EntityId>;

    /// Application root owning the entity
    fn application(&self, id: EntityId) -> Option<EntityId>;

    /// Every entity of an application, depth-first from the root
    fn application_entities(&self, application: EntityId) -> Vec<EntityId> {
        depth_first(self, application)
    }

    /// Configuration value, `None` when unset
    fn config(&self, id: EntityId, key: &str) -> Option<DslValue>;

    /// Declared type of the entity
    fn entity_type(&self, id: EntityId) -> Option<Arc<TypeDescriptor>>;

    /// Current attribute value, `None` when never published
    fn attribute(&self, id: EntityId, sensor: &str) -> Option<Value>;

    /// Suspend until the attribute satisfies `readiness`, then return it
    ///
    /// # Errors
    /// [`ResolveError::EntityNotManaged`] if the entity is unknown or is
    /// removed while waiting.
    async fn await_attribute(
        &self,
        id: EntityId,
        sensor: &SensorDescriptor,
        readiness: Readiness,
    ) -> Result<Value, ResolveError>;
}

/// Pre-order depth-first walk starting at and including `start`
pub fn depth_first<G>(graph: &G, start: EntityId) -> Vec<EntityId>
where
    G: EntityGraph + ?Sized,
{
    let mut visited = Vec::new();
    let mut stack = vec![start];
    while let Some(id) = stack.pop() {
        if !graph.contains(id) {
            continue;
        }
        visited.push(id);
        stack.extend(graph.children(id).into_iter().rev());
    }
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn present_rejects_null_and_absent() {
        assert!(!Readiness::Present.is_ready(None));
        assert!(!Readiness::Present.is_ready(Some(&Value::Null)));
        assert!(Readiness::Present.is_ready(Some(&json!(false))));
        assert!(Readiness::Present.is_ready(Some(&json!(""))));
    }

    #[test]
    fn truthy_rejects_empty_values() {
        for value in [json!(false), json!(0), json!(""), json!([]), json!({})] {
            assert!(!Readiness::Truthy.is_ready(Some(&value)), "{value}");
        }
        assert!(Readiness::Truthy.is_ready(Some(&json!("jdbc:x"))));
        assert!(Readiness::Truthy.is_ready(Some(&json!(3))));
    }

    #[test]
    fn entity_ids_are_unique() {
        assert_ne!(EntityId::new(), EntityId::new());
    }
}
