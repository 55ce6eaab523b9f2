//! YAML topology description
//!
//! ```yaml
//! types:
//!   - name: org.example.Database
//!     sensors:
//!       - name: datastore.url
//!         value_type: string
//! applications:
//!   - id: app
//!     type: org.example.Application
//!     children:
//!       - id: db
//!         type: org.example.Database
//!         config:
//!           port: 5432
//!           url: $brooklyn:formatString("pg://%s", attributeWhenReady("host.name"))
//!         attributes:
//!           host.name: db.local
//! ```
//!
//! Config strings starting with `$brooklyn:` are interpreted as expressions.

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use topo_core::{
    DslValue, EntityDefinition, EntityId, Interpreter, SensorDescriptor, StaticTypeRegistry,
    Topology, TypeDescriptor, TypeKind, TypeRegistry,
};

/// Marks a config string as an expression
pub(crate) const DSL_PREFIX: &str = "$brooklyn:";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TopologyFile {
    #[serde(default)]
    types: Vec<TypeEntry>,
    /// Old type name to current name
    #[serde(default)]
    aliases: BTreeMap<String, String>,
    applications: Vec<EntityEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TypeEntry {
    name: String,
    #[serde(default)]
    kind: TypeKind,
    #[serde(default)]
    sensors: Vec<SensorDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EntityEntry {
    /// Plan id
    id: Option<String>,
    #[serde(rename = "type")]
    entity_type: String,
    name: Option<String>,
    #[serde(default)]
    config: BTreeMap<String, Value>,
    #[serde(default)]
    attributes: BTreeMap<String, Value>,
    #[serde(default)]
    children: Vec<EntityEntry>,
}

/// Built topology plus the registry and interpreter used to build it
#[derive(Debug)]
pub(crate) struct LoadedTopology {
    pub(crate) topology: Arc<Topology>,
    pub(crate) interpreter: Interpreter,
}

impl TopologyFile {
    pub(crate) fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(text).context("invalid topology description")
    }

    pub(crate) fn from_path(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read topology {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Register types and create entities, plan ids stored under `plan_id_key`
    pub(crate) fn build(self, plan_id_key: &str) -> anyhow::Result<LoadedTopology> {
        let types = StaticTypeRegistry::new();
        for entry in self.types {
            let mut descriptor = TypeDescriptor::new(entry.name, entry.kind);
            for sensor in entry.sensors {
                descriptor = descriptor.with_sensor(sensor);
            }
            types.register(descriptor);
        }
        for (old, new) in self.aliases {
            types.alias(old, new);
        }
        let types = Arc::new(types);

        let loaded = LoadedTopology {
            topology: Arc::new(Topology::new()),
            interpreter: Interpreter::new(types),
        };
        for application in self.applications {
            add_entity(&loaded, plan_id_key, None, application)?;
        }
        tracing::info!(entities = loaded.topology.len(), "Topology loaded");
        Ok(loaded)
    }
}

fn add_entity(
    loaded: &LoadedTopology,
    plan_id_key: &str,
    parent: Option<EntityId>,
    entry: EntityEntry,
) -> anyhow::Result<EntityId> {
    let entity_type = loaded
        .interpreter
        .types()
        .lookup_entity(&entry.entity_type)
        .with_context(|| format!("entity type {}", entry.entity_type))?;

    let mut definition = EntityDefinition::new(entity_type);
    if let Some(name) = entry.name {
        definition = definition.named(name);
    }
    if let Some(plan_id) = entry.id {
        definition = definition.with_config(plan_id_key, plan_id);
    }
    for (key, value) in entry.config {
        let value = config_value(&loaded.interpreter, &key, value)?;
        definition = definition.with_config(key, value);
    }
    for (sensor, value) in entry.attributes {
        definition = definition.with_attribute(sensor, value);
    }

    let id = match parent {
        None => loaded.topology.create_application(definition),
        Some(parent) => loaded.topology.add_child(parent, definition)?,
    };
    for child in entry.children {
        add_entity(loaded, plan_id_key, Some(id), child)?;
    }
    Ok(id)
}

fn config_value(interpreter: &Interpreter, key: &str, value: Value) -> anyhow::Result<DslValue> {
    match value.as_str().and_then(|s| s.strip_prefix(DSL_PREFIX)) {
        Some(expression) => interpreter
            .parse_and_interpret(expression)
            .with_context(|| format!("config {key}")),
        None => Ok(DslValue::from(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use topo_core::{EntityGraph, DEFAULT_PLAN_ID_KEY};

    const SAMPLE: &str = r#"
types:
  - name: org.example.Application
  - name: org.example.Database
    sensors:
      - name: datastore.url
        value_type: string
  - name: org.example.Restarter
    kind: policy
aliases:
  org.example.OldDatabase: org.example.Database
applications:
  - id: app
    type: org.example.Application
    name: shop
    children:
      - id: db
        type: org.example.OldDatabase
        config:
          port: 5432
          url: $brooklyn:formatString("pg://%s", attributeWhenReady("host.name"))
        attributes:
          host.name: db.local
"#;

    #[test]
    fn builds_the_described_tree() {
        let loaded = TopologyFile::from_yaml_str(SAMPLE)
            .unwrap()
            .build(DEFAULT_PLAN_ID_KEY)
            .unwrap();
        let topology = &loaded.topology;
        assert_eq!(topology.len(), 2);

        let app = topology.applications()[0];
        assert_eq!(topology.display_name(app).as_deref(), Some("shop"));
        let db = topology.find_by_plan_id(DEFAULT_PLAN_ID_KEY, "db")[0];
        assert_eq!(topology.parent(db), Some(app));
        assert_eq!(
            topology.entity_type(db).unwrap().name,
            "org.example.Database"
        );
        assert_eq!(
            topology.attribute(db, "host.name"),
            Some(serde_json::json!("db.local"))
        );

        let url = topology.config(db, "url").unwrap();
        assert!(url.is_deferred());
        assert_eq!(
            url.to_string(),
            r#"formatString("pg://%s", attributeWhenReady("host.name"))"#
        );
        assert_eq!(
            topology.config(db, "port").unwrap().concrete().unwrap().into_json(),
            serde_json::json!(5432)
        );
    }

    #[test]
    fn policies_cannot_be_instantiated() {
        let text = r#"
types:
  - name: org.example.Restarter
    kind: policy
applications:
  - type: org.example.Restarter
"#;
        let err = TopologyFile::from_yaml_str(text)
            .unwrap()
            .build(DEFAULT_PLAN_ID_KEY)
            .unwrap_err();
        assert!(format!("{err:#}").contains("not an entity type"), "{err:#}");
    }

    #[test]
    fn bad_expressions_name_the_config_key() {
        let text = r#"
types:
  - name: org.example.Application
applications:
  - type: org.example.Application
    config:
      broken: $brooklyn:component("db"
"#;
        let err = TopologyFile::from_yaml_str(text)
            .unwrap()
            .build(DEFAULT_PLAN_ID_KEY)
            .unwrap_err();
        assert!(format!("{err:#}").starts_with("config broken"), "{err:#}");
    }

    #[test]
    fn demo_topology_loads() {
        let loaded = TopologyFile::from_yaml_str(include_str!("../demos/shop.yaml"))
            .unwrap()
            .build(DEFAULT_PLAN_ID_KEY)
            .unwrap();
        assert_eq!(loaded.topology.len(), 3);
        let web = loaded.topology.find_by_plan_id(DEFAULT_PLAN_ID_KEY, "web")[0];
        assert!(loaded
            .topology
            .config(web, "database.url")
            .is_some_and(|value| value.is_deferred()));
    }
}
