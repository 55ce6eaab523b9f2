//! Scope resolver
//!
//! Finds an entity by plan id relative to a base entity. The base is the
//! context entity, or the result of resolving an enclosing component when
//! the reference was chained (`component("app").child("db")`).

use super::{DeferredValue, Resolver};
use crate::entity::{depth_first, EntityGraph, EntityId};
use crate::error::{ResolveError, ResolveResult};
use crate::settings::NotFoundPolicy;
use crate::task::TaskContext;
use crate::value::{DslValue, Resolved};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use topo_dsl::QuotedString;

/// Where a component search looks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Scope {
    /// Every entity of the base's application
    Global,
    /// Immediate children of the base
    Child,
    /// The base's parent, no id match
    Parent,
    /// Children of the base's parent, base included
    Sibling,
    /// Base and everything below it
    Descendant,
    /// The base itself, no id match
    This,
}

impl Scope {
    /// All scopes
    pub const ALL: [Scope; 6] = [
        Self::Global,
        Self::Child,
        Self::Parent,
        Self::Sibling,
        Self::Descendant,
        Self::This,
    ];

    /// Lower-camel name as written in expressions
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Child => "child",
            Self::Parent => "parent",
            Self::Sibling => "sibling",
            Self::Descendant => "descendant",
            Self::This => "this",
        }
    }

    /// Whether the scope selects a single entity without matching an id
    #[inline]
    #[must_use]
    pub fn ignores_id(self) -> bool {
        matches!(self, Self::Parent | Self::This)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown scope name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown scope '{0}', expected one of global, child, parent, sibling, descendant, this")]
pub struct UnknownScope(pub String);

impl FromStr for Scope {
    type Err = UnknownScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|scope| scope.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownScope(s.to_string()))
    }
}

/// Reference to a component by scope and plan id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DslComponent {
    /// Component the search is relative to; the context entity when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_component: Option<Arc<DeferredValue>>,
    /// Where to search
    pub scope: Scope,
    /// Plan id to match
    #[serde(default)]
    pub component_id: String,
}

impl DslComponent {
    /// Reference relative to the context entity
    #[inline]
    #[must_use]
    pub fn new(scope: Scope, component_id: impl Into<String>) -> Self {
        Self {
            scope_component: None,
            scope,
            component_id: component_id.into(),
        }
    }

    /// Reference relative to another component
    #[inline]
    #[must_use]
    pub fn relative_to(
        scope_component: Arc<DeferredValue>,
        scope: Scope,
        component_id: impl Into<String>,
    ) -> Self {
        Self {
            scope_component: Some(scope_component),
            ..Self::new(scope, component_id)
        }
    }
}

impl Resolver for DslComponent {
    fn build(&self, ctx: TaskContext) -> BoxFuture<'static, ResolveResult<Resolved>> {
        let this = self.clone();
        async move {
            let base = match &this.scope_component {
                Some(component) => component.resolve_async(&ctx).await?.into_entity()?,
                None => ctx.require_entity(&this)?,
            };
            find_component(&ctx, base, this.scope, &this.component_id)
                .await
                .map(Resolved::Entity)
        }
        .boxed()
    }
}

impl fmt::Display for DslComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(component) = &self.scope_component {
            write!(f, "{component}.")?;
        }
        let id = QuotedString::quote(&self.component_id);
        match self.scope {
            Scope::Global => write!(f, "component({id})"),
            Scope::This => f.write_str("self()"),
            Scope::Parent => f.write_str("parent()"),
            Scope::Child | Scope::Sibling | Scope::Descendant => {
                write!(f, "{}({id})", self.scope)
            }
        }
    }
}

/// Search for `id` in `scope` relative to `base`
///
/// Applies the configured [`NotFoundPolicy`]: fail on the first miss, or
/// re-run the search until a match or the timeout.
///
/// # Errors
/// [`ResolveError::ComponentNotFound`] naming the id and scope.
pub async fn find_component(
    ctx: &TaskContext,
    base: EntityId,
    scope: Scope,
    id: &str,
) -> ResolveResult<EntityId> {
    let graph = ctx.graph().as_ref();
    let key = ctx.config().plan_id_key.as_str();
    let not_found = || ResolveError::ComponentNotFound {
        id: id.to_string(),
        scope,
        context: Some(base),
    };

    match ctx.config().not_found {
        NotFoundPolicy::FailFast => search(graph, base, scope, id, key).ok_or_else(|| {
            tracing::debug!(%base, %scope, id, "Component not found");
            not_found()
        }),
        NotFoundPolicy::Poll {
            interval_ms,
            timeout_ms,
        } => {
            let deadline = Instant::now() + Duration::from_millis(timeout_ms);
            loop {
                if let Some(found) = search(graph, base, scope, id, key) {
                    return Ok(found);
                }
                if Instant::now() >= deadline {
                    tracing::debug!(%base, %scope, id, timeout_ms, "Component not found before timeout");
                    return Err(not_found());
                }
                tracing::trace!(%base, %scope, id, "Component not found yet, polling");
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;
            }
        }
    }
}

fn search(
    graph: &dyn EntityGraph,
    base: EntityId,
    scope: Scope,
    id: &str,
    key: &str,
) -> Option<EntityId> {
    let candidates = match scope {
        Scope::This => return Some(base),
        Scope::Parent => return graph.parent(base),
        Scope::Global => graph
            .application(base)
            .map(|app| graph.application_entities(app))
            .unwrap_or_default(),
        Scope::Child => graph.children(base),
        Scope::Sibling => graph
            .parent(base)
            .map(|parent| graph.children(parent))
            .unwrap_or_default(),
        Scope::Descendant => depth_first(graph, base),
    };
    candidates
        .into_iter()
        .find(|candidate| has_plan_id(graph, *candidate, key, id))
}

/// Only concrete string plan ids match; a deferred plan id is never resolved here
fn has_plan_id(graph: &dyn EntityGraph, entity: EntityId, key: &str, id: &str) -> bool {
    matches!(graph.config(entity, key), Some(DslValue::Value(serde_json::Value::String(s))) if s == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_parses_case_insensitively() {
        assert_eq!("GLOBAL".parse::<Scope>().unwrap(), Scope::Global);
        assert_eq!("Descendant".parse::<Scope>().unwrap(), Scope::Descendant);
        assert!("cousin".parse::<Scope>().is_err());
    }

    #[test]
    fn scope_round_trips_through_display() {
        for scope in Scope::ALL {
            assert_eq!(scope.to_string().parse::<Scope>().unwrap(), scope);
        }
    }

    #[test]
    fn component_display_is_canonical() {
        let db = Arc::new(DeferredValue::new(crate::deferred::DeferredKind::Component(
            DslComponent::new(Scope::Global, "app"),
        )));
        assert_eq!(db.to_string(), r#"component("app")"#);
        let child = DslComponent::relative_to(db, Scope::Child, "db");
        assert_eq!(child.to_string(), r#"component("app").child("db")"#);
        assert_eq!(DslComponent::new(Scope::Parent, "").to_string(), "parent()");
        assert_eq!(DslComponent::new(Scope::This, "").to_string(), "self()");
    }
}
