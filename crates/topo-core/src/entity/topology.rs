//! In-memory entity arena
//!
//! Nodes live in a [`DashMap`] keyed by [`EntityId`]. Each attribute is a
//! `tokio::sync::watch` channel, so waiting for readiness is a subscription
//! rather than a poll loop.

use super::{EntityGraph, EntityId, Readiness, SensorDescriptor, TypeDescriptor};
use crate::error::ResolveError;
use crate::settings::DEFAULT_PLAN_ID_KEY;
use crate::value::DslValue;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

/// Single entity in the arena
#[derive(Debug)]
pub struct EntityNode {
    id: EntityId,
    display_name: String,
    entity_type: Arc<TypeDescriptor>,
    parent: Option<EntityId>,
    application: EntityId,
    children: RwLock<Vec<EntityId>>,
    config: DashMap<String, DslValue>,
    attributes: DashMap<String, watch::Sender<Option<Value>>>,
}

impl EntityNode {
    /// Entity ID
    #[inline]
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Display name
    #[inline]
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Declared type
    #[inline]
    #[must_use]
    pub fn entity_type(&self) -> &Arc<TypeDescriptor> {
        &self.entity_type
    }

    /// Subscribe to an attribute, creating its channel if needed
    fn subscribe(&self, sensor: &str) -> watch::Receiver<Option<Value>> {
        self.attributes
            .entry(sensor.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    fn publish(&self, sensor: &str, value: Option<Value>) {
        self.attributes
            .entry(sensor.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(value);
    }
}

/// Blueprint for a new entity
#[derive(Debug, Clone)]
pub struct EntityDefinition {
    entity_type: Arc<TypeDescriptor>,
    display_name: Option<String>,
    config: Vec<(String, DslValue)>,
    attributes: Vec<(String, Value)>,
}

impl EntityDefinition {
    /// Entity of the given type
    #[must_use]
    pub fn new(entity_type: Arc<TypeDescriptor>) -> Self {
        Self {
            entity_type,
            display_name: None,
            config: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Set display name
    #[inline]
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Set plan id under the default plan id key
    #[inline]
    #[must_use]
    pub fn with_plan_id(self, plan_id: impl Into<String>) -> Self {
        self.with_config(DEFAULT_PLAN_ID_KEY, DslValue::from(plan_id.into()))
    }

    /// Add a config entry
    #[inline]
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<DslValue>) -> Self {
        self.config.push((key.into(), value.into()));
        self
    }

    /// Add an initial attribute value
    #[inline]
    #[must_use]
    pub fn with_attribute(mut self, sensor: impl Into<String>, value: Value) -> Self {
        self.attributes.push((sensor.into(), value));
        self
    }
}

/// Arena-backed entity graph
#[derive(Debug, Default)]
pub struct Topology {
    entities: DashMap<EntityId, Arc<EntityNode>>,
    applications: RwLock<Vec<EntityId>>,
}

impl Topology {
    /// Create empty topology
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an application root
    pub fn create_application(&self, definition: EntityDefinition) -> EntityId {
        let id = EntityId::new();
        self.insert(id, None, id, definition);
        self.applications.write().push(id);
        id
    }

    /// Create a child of an existing entity
    ///
    /// # Errors
    /// [`ResolveError::EntityNotManaged`] if `parent` is unknown.
    pub fn add_child(
        &self,
        parent: EntityId,
        definition: EntityDefinition,
    ) -> Result<EntityId, ResolveError> {
        let parent_node = self.node(parent).ok_or(ResolveError::EntityNotManaged(parent))?;
        let id = EntityId::new();
        self.insert(id, Some(parent), parent_node.application, definition);
        parent_node.children.write().push(id);
        Ok(id)
    }

    fn insert(
        &self,
        id: EntityId,
        parent: Option<EntityId>,
        application: EntityId,
        definition: EntityDefinition,
    ) {
        let display_name = definition
            .display_name
            .unwrap_or_else(|| format!("{}:{}", definition.entity_type.name, id.as_uuid()));
        let node = EntityNode {
            id,
            display_name,
            entity_type: definition.entity_type,
            parent,
            application,
            children: RwLock::new(Vec::new()),
            config: definition.config.into_iter().collect(),
            attributes: DashMap::new(),
        };
        for (sensor, value) in definition.attributes {
            node.publish(&sensor, Some(value));
        }
        tracing::debug!(entity = %id, name = %node.display_name, parent = ?parent, "Entity created");
        self.entities.insert(id, Arc::new(node));
    }

    /// Remove an entity and its subtree
    ///
    /// Attribute waiters on removed entities fail with `EntityNotManaged`.
    pub fn remove(&self, id: EntityId) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        if let Some(parent) = node.parent.and_then(|p| self.node(p)) {
            parent.children.write().retain(|child| *child != id);
        }
        self.applications.write().retain(|app| *app != id);
        for descendant in super::depth_first(self, id) {
            self.entities.remove(&descendant);
        }
        tracing::debug!(entity = %id, "Entity removed");
        true
    }

    /// Set a config value
    ///
    /// # Errors
    /// [`ResolveError::EntityNotManaged`] if the entity is unknown.
    pub fn set_config(
        &self,
        id: EntityId,
        key: impl Into<String>,
        value: impl Into<DslValue>,
    ) -> Result<(), ResolveError> {
        let node = self.node(id).ok_or(ResolveError::EntityNotManaged(id))?;
        node.config.insert(key.into(), value.into());
        Ok(())
    }

    /// Publish an attribute value, waking any waiters
    ///
    /// # Errors
    /// [`ResolveError::EntityNotManaged`] if the entity is unknown.
    pub fn set_attribute(&self, id: EntityId, sensor: &str, value: Value) -> Result<(), ResolveError> {
        let node = self.node(id).ok_or(ResolveError::EntityNotManaged(id))?;
        node.publish(sensor, Some(value));
        tracing::trace!(entity = %id, sensor, "Attribute published");
        Ok(())
    }

    /// Clear an attribute back to absent
    ///
    /// # Errors
    /// [`ResolveError::EntityNotManaged`] if the entity is unknown.
    pub fn clear_attribute(&self, id: EntityId, sensor: &str) -> Result<(), ResolveError> {
        let node = self.node(id).ok_or(ResolveError::EntityNotManaged(id))?;
        node.publish(sensor, None);
        Ok(())
    }

    /// Look up a node
    #[must_use]
    pub fn node(&self, id: EntityId) -> Option<Arc<EntityNode>> {
        self.entities.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Application roots in creation order
    #[must_use]
    pub fn applications(&self) -> Vec<EntityId> {
        self.applications.read().clone()
    }

    /// Entities whose config under `key` is the literal string `plan_id`
    #[must_use]
    pub fn find_by_plan_id(&self, key: &str, plan_id: &str) -> Vec<EntityId> {
        self.applications()
            .into_iter()
            .flat_map(|app| self.application_entities(app))
            .filter(|id| {
                self.config(*id, key)
                    .is_some_and(|value| value.as_str() == Some(plan_id))
            })
            .collect()
    }

    /// Number of managed entities
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if topology is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[async_trait]
impl EntityGraph for Topology {
    fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    fn display_name(&self, id: EntityId) -> Option<String> {
        self.node(id).map(|node| node.display_name.clone())
    }

    fn parent(&self, id: EntityId) -> Option<EntityId> {
        self.node(id).and_then(|node| node.parent)
    }

    fn children(&self, id: EntityId) -> Vec<EntityId> {
        self.node(id)
            .map(|node| node.children.read().clone())
            .unwrap_or_default()
    }

    fn application(&self, id: EntityId) -> Option<EntityId> {
        self.node(id).map(|node| node.application)
    }

    fn config(&self, id: EntityId, key: &str) -> Option<DslValue> {
        self.node(id)
            .and_then(|node| node.config.get(key).map(|entry| entry.value().clone()))
    }

    fn entity_type(&self, id: EntityId) -> Option<Arc<TypeDescriptor>> {
        self.node(id).map(|node| Arc::clone(&node.entity_type))
    }

    fn attribute(&self, id: EntityId, sensor: &str) -> Option<Value> {
        let node = self.node(id)?;
        let sender = node.attributes.get(sensor)?;
        let current = sender.borrow().clone();
        current
    }

    async fn await_attribute(
        &self,
        id: EntityId,
        sensor: &SensorDescriptor,
        readiness: Readiness,
    ) -> Result<Value, ResolveError> {
        // The node must not be held across the await, otherwise removing the
        // entity would never close the channel.
        let mut receiver = self
            .node(id)
            .ok_or(ResolveError::EntityNotManaged(id))?
            .subscribe(&sensor.name);

        tracing::debug!(entity = %id, sensor = %sensor.name, "Waiting for attribute");
        let ready = receiver
            .wait_for(|value| readiness.is_ready(value.as_ref()))
            .await
            .map_err(|_| ResolveError::EntityNotManaged(id))?;
        let value: Option<Value> = (*ready).clone();
        Ok(value.unwrap_or(Value::Null))
    }
}
