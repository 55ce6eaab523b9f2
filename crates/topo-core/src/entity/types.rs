//! Type registry
//!
//! Entity types declare their sensors up front. The registry is injected
//! wherever a type name must be turned into a descriptor, which keeps
//! `sensor(type, name)` and `entitySpec` lookups testable without any
//! runtime class loading.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Alias hops followed before a lookup gives up
const MAX_ALIAS_HOPS: usize = 8;

/// What a registered type describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    /// Managed entity (services, clusters, applications)
    #[default]
    Entity,
    /// Policy attached to an entity
    Policy,
    /// Enricher attached to an entity
    Enricher,
    /// Anything else
    Other,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Entity => "entity",
            Self::Policy => "policy",
            Self::Enricher => "enricher",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Sensor flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Attribute with a current value
    #[default]
    Attribute,
    /// Event stream with no retained value
    Event,
}

/// Declared sensor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorDescriptor {
    /// Sensor name, e.g. `datastore.url`
    pub name: String,
    /// Attribute or event
    #[serde(default)]
    pub kind: SensorKind,
    /// Value type name, `object` when untyped
    #[serde(default = "untyped")]
    pub value_type: String,
    /// Human readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn untyped() -> String {
    SensorDescriptor::UNTYPED.to_string()
}

impl SensorDescriptor {
    /// Value type used for sensors synthesized at resolution time
    pub const UNTYPED: &'static str = "object";

    /// Attribute sensor
    #[inline]
    #[must_use]
    pub fn attribute(name: impl Into<String>, value_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SensorKind::Attribute,
            value_type: value_type.into(),
            description: None,
        }
    }

    /// Attribute sensor with no declared value type
    #[inline]
    #[must_use]
    pub fn untyped_attribute(name: impl Into<String>) -> Self {
        Self::attribute(name, Self::UNTYPED)
    }

    /// Event sensor
    #[inline]
    #[must_use]
    pub fn event(name: impl Into<String>, value_type: impl Into<String>) -> Self {
        Self {
            kind: SensorKind::Event,
            ..Self::attribute(name, value_type)
        }
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether this sensor carries a current value
    #[inline]
    #[must_use]
    pub fn is_attribute(&self) -> bool {
        self.kind == SensorKind::Attribute
    }
}

impl fmt::Display for SensorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.value_type)
    }
}

/// Registered type with its declared sensors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Fully qualified type name
    pub name: String,
    /// Entity, policy, ...
    #[serde(default)]
    pub kind: TypeKind,
    /// Declared sensors by name
    #[serde(default)]
    pub sensors: BTreeMap<String, SensorDescriptor>,
}

impl TypeDescriptor {
    /// Entity type with no sensors yet
    #[inline]
    #[must_use]
    pub fn entity(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Entity)
    }

    /// Type of the given kind
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            sensors: BTreeMap::new(),
        }
    }

    /// With a declared sensor
    #[must_use]
    pub fn with_sensor(mut self, sensor: SensorDescriptor) -> Self {
        self.sensors.insert(sensor.name.clone(), sensor);
        self
    }

    /// Declared sensor by name
    #[inline]
    #[must_use]
    pub fn sensor(&self, name: &str) -> Option<&SensorDescriptor> {
        self.sensors.get(name)
    }

    /// Declared attribute sensor by name, ignoring event sensors
    #[inline]
    #[must_use]
    pub fn attribute_sensor(&self, name: &str) -> Option<&SensorDescriptor> {
        self.sensor(name).filter(|s| s.is_attribute())
    }

    /// Whether this type describes an entity
    #[inline]
    #[must_use]
    pub fn is_entity(&self) -> bool {
        self.kind == TypeKind::Entity
    }
}

/// Type or sensor lookup failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeLookupError {
    /// No such type registered
    #[error("unknown type: {name}")]
    UnknownType { name: String },

    /// Type exists but is not an entity type
    #[error("type {name} is a {kind}, not an entity type")]
    NotAnEntityType { name: String, kind: TypeKind },

    /// Entity type does not declare the sensor
    #[error("sensor {sensor} not found on type {type_name}")]
    UndeclaredSensor { type_name: String, sensor: String },

    /// Alias chain loops or is too long
    #[error("alias chain for {name} exceeds {MAX_ALIAS_HOPS} hops")]
    AliasLoop { name: String },
}

/// Lookup of type descriptors by name
pub trait TypeRegistry: Send + Sync + fmt::Debug {
    /// Resolve a type name to its descriptor
    ///
    /// # Errors
    /// Returns [`TypeLookupError::UnknownType`] when nothing is registered
    /// under `name`.
    fn lookup(&self, name: &str) -> Result<Arc<TypeDescriptor>, TypeLookupError>;

    /// Resolve an entity type, rejecting policies and other non-entity types
    ///
    /// # Errors
    /// Unknown type, or a type that is not an entity type.
    fn lookup_entity(&self, name: &str) -> Result<Arc<TypeDescriptor>, TypeLookupError> {
        let descriptor = self.lookup(name)?;
        if !descriptor.is_entity() {
            return Err(TypeLookupError::NotAnEntityType {
                name: descriptor.name.clone(),
                kind: descriptor.kind,
            });
        }
        Ok(descriptor)
    }

    /// Resolve a sensor declared on an entity type
    ///
    /// # Errors
    /// Unknown type, non-entity type, or undeclared sensor.
    fn sensor(&self, type_name: &str, sensor: &str) -> Result<SensorDescriptor, TypeLookupError> {
        let descriptor = self.lookup_entity(type_name)?;
        descriptor
            .sensor(sensor)
            .cloned()
            .ok_or_else(|| TypeLookupError::UndeclaredSensor {
                type_name: descriptor.name.clone(),
                sensor: sensor.to_string(),
            })
    }
}

/// In-memory registry populated up front
#[derive(Debug, Default)]
pub struct StaticTypeRegistry {
    types: DashMap<String, Arc<TypeDescriptor>>,
    aliases: DashMap<String, String>,
}

impl StaticTypeRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type, replacing any previous one with the same name
    pub fn register(&self, descriptor: TypeDescriptor) -> Arc<TypeDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.types
            .insert(descriptor.name.clone(), Arc::clone(&descriptor));
        descriptor
    }

    /// Map a renamed type onto its current name
    pub fn alias(&self, old_name: impl Into<String>, new_name: impl Into<String>) {
        self.aliases.insert(old_name.into(), new_name.into());
    }

    /// Number of registered types
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn canonical_name(&self, name: &str) -> Result<String, TypeLookupError> {
        let mut current = name.to_string();
        for _ in 0..MAX_ALIAS_HOPS {
            match self.aliases.get(&current) {
                Some(next) => current = next.value().clone(),
                None => return Ok(current),
            }
        }
        Err(TypeLookupError::AliasLoop {
            name: name.to_string(),
        })
    }
}

impl TypeRegistry for StaticTypeRegistry {
    fn lookup(&self, name: &str) -> Result<Arc<TypeDescriptor>, TypeLookupError> {
        let canonical = self.canonical_name(name)?;
        self.types
            .get(&canonical)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TypeLookupError::UnknownType {
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> StaticTypeRegistry {
        let registry = StaticTypeRegistry::new();
        registry.register(
            TypeDescriptor::entity("org.example.Database")
                .with_sensor(SensorDescriptor::attribute("datastore.url", "string"))
                .with_sensor(SensorDescriptor::event("db.failover", "string")),
        );
        registry.register(TypeDescriptor::new("org.example.Restarter", TypeKind::Policy));
        registry
    }

    #[test]
    fn sensor_lookup_on_entity_type() {
        let sensor = registry().sensor("org.example.Database", "datastore.url").unwrap();
        assert_eq!(sensor.value_type, "string");
        assert!(sensor.is_attribute());
    }

    #[test]
    fn unknown_type_is_reported() {
        let err = registry().sensor("org.example.Missing", "x").unwrap_err();
        assert!(matches!(err, TypeLookupError::UnknownType { .. }));
    }

    #[test]
    fn non_entity_type_is_rejected() {
        let err = registry().sensor("org.example.Restarter", "x").unwrap_err();
        assert!(matches!(err, TypeLookupError::NotAnEntityType { kind: TypeKind::Policy, .. }));
    }

    #[test]
    fn undeclared_sensor_is_reported() {
        let err = registry().sensor("org.example.Database", "nope").unwrap_err();
        assert!(matches!(err, TypeLookupError::UndeclaredSensor { .. }));
    }

    #[test]
    fn aliases_are_followed() {
        let registry = registry();
        registry.alias("legacy.Database", "org.example.Database");
        assert_eq!(registry.lookup("legacy.Database").unwrap().name, "org.example.Database");
    }

    #[test]
    fn alias_loops_fail() {
        let registry = registry();
        registry.alias("a", "b");
        registry.alias("b", "a");
        assert!(matches!(registry.lookup("a"), Err(TypeLookupError::AliasLoop { .. })));
    }

    #[test]
    fn attribute_sensor_skips_events() {
        let registry = registry();
        let db = registry.lookup("org.example.Database").unwrap();
        assert!(db.attribute_sensor("db.failover").is_none());
        assert!(db.attribute_sensor("datastore.url").is_some());
    }
}
