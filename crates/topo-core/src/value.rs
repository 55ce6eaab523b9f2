//! Interpreted and resolved values
//!
//! [`DslValue`] is what interpretation produces and what configuration
//! stores. [`Resolved`] is what a resolution hands back.

use crate::deferred::DeferredValue;
use crate::entity::{EntityId, SensorDescriptor};
use crate::error::{ResolveError, ResolveResult};
use crate::task::TaskContext;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use topo_dsl::QuotedString;

/// Specification for an entity to be created later
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpec {
    /// Registered entity type name
    pub type_name: String,
    /// Config the new entity starts with
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl EntitySpec {
    /// Spec for the given type with no config
    #[inline]
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            config: Map::new(),
        }
    }

    /// JSON form
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({ "type": self.type_name, "config": self.config })
    }
}

/// Concrete outcome of a resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Resolved {
    /// Plain value
    Value(Value),
    /// Entity found by a scope search
    Entity(EntityId),
    /// Sensor descriptor
    Sensor(SensorDescriptor),
    /// Entity spec
    EntitySpec(EntitySpec),
}

impl Resolved {
    /// Plain value, if this is one
    #[inline]
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Entity, failing for anything else
    ///
    /// # Errors
    /// [`ResolveError::UnexpectedResult`] for non-entity results.
    pub fn into_entity(self) -> ResolveResult<EntityId> {
        match self {
            Self::Entity(id) => Ok(id),
            other => Err(ResolveError::unexpected("entity", other)),
        }
    }

    /// JSON rendering, used for formatting and output
    #[must_use]
    pub fn into_json(self) -> Value {
        match self {
            Self::Value(v) => v,
            Self::Entity(id) => Value::String(id.to_string()),
            Self::Sensor(sensor) => Value::String(sensor.name),
            Self::EntitySpec(spec) => spec.to_json(),
        }
    }
}

impl fmt::Display for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "value {v}"),
            Self::Entity(id) => write!(f, "{id}"),
            Self::Sensor(sensor) => write!(f, "sensor {sensor}"),
            Self::EntitySpec(spec) => write!(f, "entity spec for {}", spec.type_name),
        }
    }
}

/// Result of interpreting an expression
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DslValue {
    /// Literal, returned as is
    Value(Value),
    /// Resolved on every read
    Deferred(Arc<DeferredValue>),
    /// Sensor looked up at interpretation time
    Sensor(SensorDescriptor),
    /// Entity spec built at interpretation time
    EntitySpec(EntitySpec),
}

impl DslValue {
    /// Whether reading this value needs a resolution
    #[inline]
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    /// String literal, if this is one
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Value(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Deferred value, if this is one
    #[inline]
    #[must_use]
    pub fn as_deferred(&self) -> Option<&Arc<DeferredValue>> {
        match self {
            Self::Deferred(d) => Some(d),
            _ => None,
        }
    }

    /// Concrete form without resolving, `None` when deferred
    #[must_use]
    pub fn concrete(&self) -> Option<Resolved> {
        match self {
            Self::Value(v) => Some(Resolved::Value(v.clone())),
            Self::Sensor(s) => Some(Resolved::Sensor(s.clone())),
            Self::EntitySpec(s) => Some(Resolved::EntitySpec(s.clone())),
            Self::Deferred(_) => None,
        }
    }

    /// Read the value, resolving against the ambient context if deferred
    ///
    /// Literals never need a context.
    ///
    /// # Errors
    /// Any resolution failure.
    pub fn get(&self) -> ResolveResult<Resolved> {
        match self {
            Self::Deferred(d) => d.resolve(),
            other => Ok(other.concrete_or_null()),
        }
    }

    /// Read the value, resolving against `ctx` if deferred
    ///
    /// # Errors
    /// Any resolution failure.
    pub fn get_in(&self, ctx: &TaskContext) -> ResolveResult<Resolved> {
        match self {
            Self::Deferred(d) => d.resolve_in(ctx),
            other => Ok(other.concrete_or_null()),
        }
    }

    /// Read the value from inside a unit of work
    ///
    /// # Errors
    /// Any resolution failure.
    pub async fn get_async(&self, ctx: &TaskContext) -> ResolveResult<Resolved> {
        match self {
            Self::Deferred(d) => d.resolve_async(ctx).await,
            other => Ok(other.concrete_or_null()),
        }
    }

    fn concrete_or_null(&self) -> Resolved {
        self.concrete().unwrap_or(Resolved::Value(Value::Null))
    }
}

impl From<Value> for DslValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<String> for DslValue {
    fn from(value: String) -> Self {
        Self::Value(Value::String(value))
    }
}

impl From<&str> for DslValue {
    fn from(value: &str) -> Self {
        Self::Value(Value::String(value.to_string()))
    }
}

impl From<DeferredValue> for DslValue {
    fn from(value: DeferredValue) -> Self {
        Self::Deferred(Arc::new(value))
    }
}

impl From<Arc<DeferredValue>> for DslValue {
    fn from(value: Arc<DeferredValue>) -> Self {
        Self::Deferred(value)
    }
}

/// Canonical expression text; literals render quoted
impl fmt::Display for DslValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(Value::String(s)) => write!(f, "{}", QuotedString::quote(s)),
            Self::Value(v) => write!(f, "{}", QuotedString::quote(&v.to_string())),
            Self::Deferred(d) => write!(f, "{d}"),
            Self::Sensor(s) => write!(f, "sensor({})", QuotedString::quote(&s.name)),
            Self::EntitySpec(s) => write!(f, "entitySpec({})", QuotedString::quote(&s.type_name)),
        }
    }
}
