//! Testing utilities for Topo workspace
//!
//! Shared fixtures: a small type registry, a three-entity application and a
//! harness bundling them with a running execution runtime.

#![allow(missing_docs)]

use serde_json::json;
use std::sync::Arc;
use topo_core::{
    DslValue, EntityDefinition, EntityId, ExecutionRuntime, Interpreter, ResolveResult, Resolved,
    ResolverConfig, SensorDescriptor, StaticTypeRegistry, TaskContext, Topology, TypeDescriptor,
    TypeKind, TypeRegistry,
};

pub const APPLICATION_TYPE: &str = "org.example.Application";
pub const WEB_SERVER_TYPE: &str = "org.example.WebServer";
pub const DATABASE_TYPE: &str = "org.example.Database";
pub const RESTARTER_TYPE: &str = "org.example.Restarter";

pub fn sample_types() -> Arc<StaticTypeRegistry> {
    let types = StaticTypeRegistry::new();
    types.register(TypeDescriptor::entity(APPLICATION_TYPE));
    types.register(
        TypeDescriptor::entity(WEB_SERVER_TYPE)
            .with_sensor(SensorDescriptor::attribute("host.name", "string"))
            .with_sensor(SensorDescriptor::attribute("http.port", "integer")),
    );
    types.register(
        TypeDescriptor::entity(DATABASE_TYPE)
            .with_sensor(SensorDescriptor::attribute("datastore.url", "string"))
            .with_sensor(SensorDescriptor::event("datastore.failed", "string")),
    );
    types.register(TypeDescriptor::new(RESTARTER_TYPE, TypeKind::Policy));
    types.alias("org.example.LegacyDatabase", DATABASE_TYPE);
    Arc::new(types)
}

/// Application with children `db` (X) and `web` (Y)
#[derive(Debug, Clone)]
pub struct SampleTopology {
    pub topology: Arc<Topology>,
    pub app: EntityId,
    pub db: EntityId,
    pub web: EntityId,
}

impl SampleTopology {
    pub fn new(types: &StaticTypeRegistry) -> Self {
        let lookup = |name: &str| types.lookup(name).unwrap();
        let topology = Arc::new(Topology::new());
        let app = topology.create_application(
            EntityDefinition::new(lookup(APPLICATION_TYPE))
                .named("app")
                .with_plan_id("app"),
        );
        let db = topology
            .add_child(
                app,
                EntityDefinition::new(lookup(DATABASE_TYPE))
                    .named("db")
                    .with_plan_id("db")
                    .with_config("port", json!(5432)),
            )
            .unwrap();
        let web = topology
            .add_child(
                app,
                EntityDefinition::new(lookup(WEB_SERVER_TYPE))
                    .named("web")
                    .with_plan_id("web"),
            )
            .unwrap();
        Self {
            topology,
            app,
            db,
            web,
        }
    }
}

/// Runtime, topology and interpreter wired together
#[derive(Debug)]
pub struct Harness {
    pub runtime: ExecutionRuntime,
    pub types: Arc<StaticTypeRegistry>,
    pub sample: SampleTopology,
    pub interpreter: Interpreter,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ResolverConfig::default())
    }

    pub fn with_config(config: ResolverConfig) -> Self {
        let types = sample_types();
        let sample = SampleTopology::new(&types);
        let runtime = ExecutionRuntime::new(config).unwrap();
        let interpreter = Interpreter::new(types.clone());
        Self {
            runtime,
            types,
            sample,
            interpreter,
        }
    }

    pub fn ctx_for(&self, entity: EntityId) -> TaskContext {
        self.runtime
            .context(self.sample.topology.clone())
            .with_entity(entity)
    }

    pub fn entity_type(&self, name: &str) -> Arc<TypeDescriptor> {
        self.types.lookup(name).unwrap()
    }

    pub fn interpret(&self, text: &str) -> DslValue {
        self.interpreter.parse_and_interpret(text).unwrap()
    }

    pub fn resolve_from(&self, entity: EntityId, text: &str) -> ResolveResult<Resolved> {
        self.interpret(text).get_in(&self.ctx_for(entity))
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
