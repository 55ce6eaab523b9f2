//! Resolvers that read from a target entity
//!
//! The target is the resolved `component` when one is given, otherwise the
//! context entity.

use super::{DeferredValue, Resolver};
use crate::entity::{EntityId, SensorDescriptor};
use crate::error::{ResolveError, ResolveResult};
use crate::task::TaskContext;
use crate::value::Resolved;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use topo_dsl::QuotedString;

async fn resolve_target(
    component: Option<&Arc<DeferredValue>>,
    ctx: &TaskContext,
    what: &(dyn fmt::Display + Sync),
) -> ResolveResult<EntityId> {
    match component {
        Some(component) => component.resolve_async(ctx).await?.into_entity(),
        None => ctx.require_entity(what),
    }
}

fn write_call(
    f: &mut fmt::Formatter<'_>,
    component: Option<&Arc<DeferredValue>>,
    name: &str,
    arg: &str,
) -> fmt::Result {
    if let Some(component) = component {
        write!(f, "{component}.")?;
    }
    write!(f, "{name}({})", QuotedString::quote(arg))
}

/// Declared sensor on the entity's type, or an untyped one with that name
fn sensor_for(ctx: &TaskContext, entity: EntityId, name: &str) -> SensorDescriptor {
    ctx.graph()
        .entity_type(entity)
        .and_then(|t| t.attribute_sensor(name).cloned())
        .unwrap_or_else(|| SensorDescriptor::untyped_attribute(name))
}

/// Wait for an attribute to become ready and return its value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeWhenReady {
    /// Entity to read from; the context entity when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<Arc<DeferredValue>>,
    /// Attribute sensor name
    pub sensor_name: String,
}

impl AttributeWhenReady {
    /// Create resolver
    #[inline]
    #[must_use]
    pub fn new(component: Option<Arc<DeferredValue>>, sensor_name: impl Into<String>) -> Self {
        Self {
            component,
            sensor_name: sensor_name.into(),
        }
    }
}

impl Resolver for AttributeWhenReady {
    fn build(&self, ctx: TaskContext) -> BoxFuture<'static, ResolveResult<Resolved>> {
        let this = self.clone();
        async move {
            let entity = resolve_target(this.component.as_ref(), &ctx, &this).await?;
            let sensor = sensor_for(&ctx, entity, &this.sensor_name);
            let readiness = ctx.config().attribute_readiness;
            let wait = ctx.graph().await_attribute(entity, &sensor, readiness);

            let value = match ctx.config().attribute_wait_timeout() {
                Some(timeout) => tokio::time::timeout(timeout, wait).await.map_err(|_| {
                    ResolveError::AttributeTimeout {
                        entity,
                        sensor: sensor.name.clone(),
                        waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    }
                })??,
                None => wait.await?,
            };
            tracing::debug!(%entity, sensor = %sensor.name, "Attribute ready");
            Ok(Resolved::Value(value))
        }
        .boxed()
    }
}

impl fmt::Display for AttributeWhenReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_call(f, self.component.as_ref(), "attributeWhenReady", &self.sensor_name)
    }
}

/// Read a config key of the target entity
///
/// Deferred config values are resolved with the target as context entity.
/// Unset keys read as `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DslConfig {
    /// Entity to read from; the context entity when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<Arc<DeferredValue>>,
    /// Config key
    pub key: String,
}

impl DslConfig {
    /// Create resolver
    #[inline]
    #[must_use]
    pub fn new(component: Option<Arc<DeferredValue>>, key: impl Into<String>) -> Self {
        Self {
            component,
            key: key.into(),
        }
    }
}

impl Resolver for DslConfig {
    fn build(&self, ctx: TaskContext) -> BoxFuture<'static, ResolveResult<Resolved>> {
        let this = self.clone();
        async move {
            let entity = resolve_target(this.component.as_ref(), &ctx, &this).await?;
            match ctx.graph().config(entity, &this.key) {
                Some(value) => value.get_async(&ctx.with_entity(entity)).await,
                None => Ok(Resolved::Value(Value::Null)),
            }
        }
        .boxed()
    }
}

impl fmt::Display for DslConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_call(f, self.component.as_ref(), "config", &self.key)
    }
}

/// Sensor looked up on the target entity's type at resolution time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DslSensor {
    /// Entity whose type is consulted; the context entity when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<Arc<DeferredValue>>,
    /// Sensor name
    pub sensor_name: String,
}

impl DslSensor {
    /// Create resolver
    #[inline]
    #[must_use]
    pub fn new(component: Option<Arc<DeferredValue>>, sensor_name: impl Into<String>) -> Self {
        Self {
            component,
            sensor_name: sensor_name.into(),
        }
    }
}

impl Resolver for DslSensor {
    fn build(&self, ctx: TaskContext) -> BoxFuture<'static, ResolveResult<Resolved>> {
        let this = self.clone();
        async move {
            let entity = resolve_target(this.component.as_ref(), &ctx, &this).await?;
            let sensor = ctx
                .graph()
                .entity_type(entity)
                .and_then(|t| t.sensor(&this.sensor_name).cloned())
                .unwrap_or_else(|| SensorDescriptor::untyped_attribute(&this.sensor_name));
            Ok(Resolved::Sensor(sensor))
        }
        .boxed()
    }
}

impl fmt::Display for DslSensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_call(f, self.component.as_ref(), "sensor", &self.sensor_name)
    }
}
