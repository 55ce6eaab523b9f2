//! Built-in DSL functions
//!
//! Top-level functions start a chain (`component("db")`). Methods continue
//! one (`.attributeWhenReady("url")`) and receive the previous link's value.
//! Only component references accept methods.

use super::Interpreter;
use crate::deferred::{
    concrete_all, AttributeWhenReady, DeferredKind, DeferredValue, DslComponent,
    DslConfig, DslFormatString, DslRegexReplacement, DslSensor, Scope,
};
use crate::error::{ResolveError, ResolveResult};
use crate::value::{DslValue, EntitySpec};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

/// Evaluated arguments of one call
#[derive(Debug, Clone)]
pub struct Arguments {
    function: String,
    values: Vec<DslValue>,
}

impl Arguments {
    /// Create argument list
    #[inline]
    #[must_use]
    pub fn new(function: impl Into<String>, values: Vec<DslValue>) -> Self {
        Self {
            function: function.into(),
            values,
        }
    }

    /// Name of the called function
    #[inline]
    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Number of arguments
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if there are no arguments
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Argument values
    #[inline]
    #[must_use]
    pub fn values(&self) -> &[DslValue] {
        &self.values
    }

    /// Take the argument values
    #[inline]
    #[must_use]
    pub fn into_values(self) -> Vec<DslValue> {
        self.values
    }

    /// Fail unless the argument count is in `counts`
    ///
    /// # Errors
    /// [`ResolveError::InvalidArguments`] with the expected count.
    pub fn check_count(&self, counts: RangeInclusive<usize>) -> ResolveResult<()> {
        if counts.contains(&self.len()) {
            return Ok(());
        }
        let expected = if counts.start() == counts.end() {
            format!("{}", counts.start())
        } else if *counts.end() == usize::MAX {
            format!("at least {}", counts.start())
        } else {
            format!("{} to {}", counts.start(), counts.end())
        };
        Err(self.invalid(format!(
            "expected {expected} argument(s), got {}",
            self.len()
        )))
    }

    /// String literal argument at `index`
    ///
    /// # Errors
    /// [`ResolveError::InvalidArguments`] when missing or not a string literal.
    pub fn string(&self, index: usize) -> ResolveResult<String> {
        match self.values.get(index) {
            Some(DslValue::Value(Value::String(s))) => Ok(s.clone()),
            Some(other) => Err(self.invalid(format!(
                "argument {} must be a string literal, got {other}",
                index + 1
            ))),
            None => Err(self.invalid(format!("missing argument {}", index + 1))),
        }
    }

    fn invalid(&self, message: String) -> ResolveError {
        ResolveError::invalid_arguments(&self.function, message)
    }
}

/// Top-level function
pub type DslFunction = fn(&Interpreter, Arguments) -> ResolveResult<DslValue>;

/// Method on a component reference
pub type DslMethod = fn(&Interpreter, &Arc<DeferredValue>, Arguments) -> ResolveResult<DslValue>;

/// Named functions and component methods
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, DslFunction>,
    methods: HashMap<String, DslMethod>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        methods.sort_unstable();
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .field("methods", &methods)
            .finish()
    }
}

impl FunctionRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create registry with the built-in function set
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("literal", literal);
        registry.register("self", self_component);
        registry.register("component", component);
        registry.register("entity", entity);
        registry.register("parent", parent);
        registry.register("child", child);
        registry.register("sibling", sibling);
        registry.register("descendant", descendant);
        registry.register("config", config);
        registry.register("attributeWhenReady", attribute_when_ready);
        registry.register("sensor", sensor);
        registry.register("formatString", format_string);
        registry.register("regexReplacement", regex_replacement);
        registry.register("entitySpec", entity_spec);

        registry.register_method("entity", entity_of);
        registry.register_method("component", component_of);
        registry.register_method("parent", parent_of);
        registry.register_method("child", child_of);
        registry.register_method("sibling", sibling_of);
        registry.register_method("descendant", descendant_of);
        registry.register_method("attributeWhenReady", attribute_when_ready_of);
        registry.register_method("config", config_of);
        registry.register_method("sensor", sensor_of);
        registry
    }

    /// Register a top-level function, replacing any with the same name
    pub fn register(&mut self, name: &str, function: DslFunction) {
        self.functions.insert(name.to_string(), function);
    }

    /// Register a component method, replacing any with the same name
    pub fn register_method(&mut self, name: &str, method: DslMethod) {
        self.methods.insert(name.to_string(), method);
    }

    /// Look up a top-level function
    #[inline]
    #[must_use]
    pub fn function(&self, name: &str) -> Option<DslFunction> {
        self.functions.get(name).copied()
    }

    /// Look up a component method
    #[inline]
    #[must_use]
    pub fn method(&self, name: &str) -> Option<DslMethod> {
        self.methods.get(name).copied()
    }

    /// Top-level function names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of top-level functions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

fn deferred(kind: DeferredKind) -> DslValue {
    DslValue::from(DeferredValue::new(kind))
}

fn component_ref(relative: Option<&Arc<DeferredValue>>, scope: Scope, id: String) -> DslValue {
    let id = if scope.ignores_id() { String::new() } else { id };
    let component = match relative {
        Some(base) => DslComponent::relative_to(Arc::clone(base), scope, id),
        None => DslComponent::new(scope, id),
    };
    deferred(DeferredKind::Component(component))
}

/// `component(id)` or `component(scope, id)`
fn scoped_component(relative: Option<&Arc<DeferredValue>>, args: &Arguments) -> ResolveResult<DslValue> {
    args.check_count(1..=2)?;
    if args.len() == 1 {
        return Ok(component_ref(relative, Scope::Global, args.string(0)?));
    }
    let scope = args
        .string(0)?
        .parse::<Scope>()
        .map_err(|e| ResolveError::invalid_arguments(args.function(), e.to_string()))?;
    Ok(component_ref(relative, scope, args.string(1)?))
}

fn scope_with_id(
    relative: Option<&Arc<DeferredValue>>,
    scope: Scope,
    args: &Arguments,
) -> ResolveResult<DslValue> {
    args.check_count(1..=1)?;
    Ok(component_ref(relative, scope, args.string(0)?))
}

fn literal(_: &Interpreter, args: Arguments) -> ResolveResult<DslValue> {
    args.check_count(1..=1)?;
    Ok(args.into_values().remove(0))
}

fn self_component(_: &Interpreter, args: Arguments) -> ResolveResult<DslValue> {
    args.check_count(0..=0)?;
    Ok(component_ref(None, Scope::This, String::new()))
}

fn component(_: &Interpreter, args: Arguments) -> ResolveResult<DslValue> {
    scoped_component(None, &args)
}

fn entity(_: &Interpreter, args: Arguments) -> ResolveResult<DslValue> {
    scope_with_id(None, Scope::Global, &args)
}

fn parent(_: &Interpreter, args: Arguments) -> ResolveResult<DslValue> {
    args.check_count(0..=0)?;
    Ok(component_ref(None, Scope::Parent, String::new()))
}

fn child(_: &Interpreter, args: Arguments) -> ResolveResult<DslValue> {
    scope_with_id(None, Scope::Child, &args)
}

fn sibling(_: &Interpreter, args: Arguments) -> ResolveResult<DslValue> {
    scope_with_id(None, Scope::Sibling, &args)
}

fn descendant(_: &Interpreter, args: Arguments) -> ResolveResult<DslValue> {
    scope_with_id(None, Scope::Descendant, &args)
}

fn config(_: &Interpreter, args: Arguments) -> ResolveResult<DslValue> {
    args.check_count(1..=1)?;
    Ok(deferred(DeferredKind::Config(DslConfig::new(None, args.string(0)?))))
}

fn attribute_when_ready(_: &Interpreter, args: Arguments) -> ResolveResult<DslValue> {
    args.check_count(1..=1)?;
    Ok(deferred(DeferredKind::AttributeWhenReady(
        AttributeWhenReady::new(None, args.string(0)?),
    )))
}

/// `sensor(name)` resolves against the context entity's type later;
/// `sensor(type, name)` is looked up in the registry now.
fn sensor(interpreter: &Interpreter, args: Arguments) -> ResolveResult<DslValue> {
    args.check_count(1..=2)?;
    if args.len() == 1 {
        return Ok(deferred(DeferredKind::Sensor(DslSensor::new(None, args.string(0)?))));
    }
    let type_name = args.string(0)?;
    let sensor_name = args.string(1)?;
    interpreter
        .types()
        .sensor(&type_name, &sensor_name)
        .map(DslValue::Sensor)
        .map_err(|source| ResolveError::type_lookup(format!("{type_name}/{sensor_name}"), source))
}

fn format_string(_: &Interpreter, args: Arguments) -> ResolveResult<DslValue> {
    args.check_count(1..=usize::MAX)?;
    let mut values = args.into_values();
    if let Some(concrete) = concrete_all(&values) {
        return DslFormatString::apply(&concrete).map(DslValue::from);
    }
    let pattern = values.remove(0);
    Ok(deferred(DeferredKind::FormatString(DslFormatString::new(
        pattern, values,
    ))))
}

fn regex_replacement(_: &Interpreter, args: Arguments) -> ResolveResult<DslValue> {
    args.check_count(3..=3)?;
    let values = args.into_values();
    if let Some(concrete) = concrete_all(&values) {
        return DslRegexReplacement::apply(&concrete).map(DslValue::from);
    }
    let [source, pattern, replacement]: [DslValue; 3] = values
        .try_into()
        .map_err(|_| ResolveError::invalid_arguments("regexReplacement", "expected 3 arguments"))?;
    Ok(deferred(DeferredKind::RegexReplacement(
        DslRegexReplacement::new(source, pattern, replacement),
    )))
}

/// `entitySpec("Type")` or `entitySpec({type: ..., config: {...}})`
fn entity_spec(interpreter: &Interpreter, args: Arguments) -> ResolveResult<DslValue> {
    args.check_count(1..=1)?;
    let (type_name, config) = match &args.values()[0] {
        DslValue::Value(Value::String(type_name)) => (type_name.clone(), Map::new()),
        DslValue::Value(Value::Object(map)) => {
            let type_name = map
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| ResolveError::invalid_arguments("entitySpec", "missing string 'type'"))?;
            let config = map
                .get("brooklyn.config")
                .or_else(|| map.get("config"))
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            (type_name.to_string(), config)
        }
        other => {
            return Err(ResolveError::invalid_arguments(
                "entitySpec",
                format!("expected a type name or map, got {other}"),
            ))
        }
    };
    let descriptor = interpreter
        .types()
        .lookup_entity(&type_name)
        .map_err(|source| ResolveError::type_lookup(&type_name, source))?;
    Ok(DslValue::EntitySpec(EntitySpec {
        type_name: descriptor.name.clone(),
        config,
    }))
}

fn entity_of(_: &Interpreter, base: &Arc<DeferredValue>, args: Arguments) -> ResolveResult<DslValue> {
    scope_with_id(Some(base), Scope::Global, &args)
}

fn component_of(_: &Interpreter, base: &Arc<DeferredValue>, args: Arguments) -> ResolveResult<DslValue> {
    scoped_component(Some(base), &args)
}

fn parent_of(_: &Interpreter, base: &Arc<DeferredValue>, args: Arguments) -> ResolveResult<DslValue> {
    args.check_count(0..=0)?;
    Ok(component_ref(Some(base), Scope::Parent, String::new()))
}

fn child_of(_: &Interpreter, base: &Arc<DeferredValue>, args: Arguments) -> ResolveResult<DslValue> {
    scope_with_id(Some(base), Scope::Child, &args)
}

fn sibling_of(_: &Interpreter, base: &Arc<DeferredValue>, args: Arguments) -> ResolveResult<DslValue> {
    scope_with_id(Some(base), Scope::Sibling, &args)
}

fn descendant_of(_: &Interpreter, base: &Arc<DeferredValue>, args: Arguments) -> ResolveResult<DslValue> {
    scope_with_id(Some(base), Scope::Descendant, &args)
}

fn attribute_when_ready_of(
    _: &Interpreter,
    base: &Arc<DeferredValue>,
    args: Arguments,
) -> ResolveResult<DslValue> {
    args.check_count(1..=1)?;
    Ok(deferred(DeferredKind::AttributeWhenReady(
        AttributeWhenReady::new(Some(Arc::clone(base)), args.string(0)?),
    )))
}

fn config_of(_: &Interpreter, base: &Arc<DeferredValue>, args: Arguments) -> ResolveResult<DslValue> {
    args.check_count(1..=1)?;
    Ok(deferred(DeferredKind::Config(DslConfig::new(
        Some(Arc::clone(base)),
        args.string(0)?,
    ))))
}

fn sensor_of(_: &Interpreter, base: &Arc<DeferredValue>, args: Arguments) -> ResolveResult<DslValue> {
    args.check_count(1..=1)?;
    Ok(deferred(DeferredKind::Sensor(DslSensor::new(
        Some(Arc::clone(base)),
        args.string(0)?,
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_builtin_set() {
        let registry = FunctionRegistry::with_defaults();
        for name in [
            "literal",
            "self",
            "component",
            "entity",
            "parent",
            "child",
            "sibling",
            "descendant",
            "config",
            "attributeWhenReady",
            "sensor",
            "formatString",
            "regexReplacement",
            "entitySpec",
        ] {
            assert!(registry.function(name).is_some(), "{name}");
        }
        assert!(registry.method("attributeWhenReady").is_some());
        assert!(registry.method("formatString").is_none());
    }

    #[test]
    fn argument_count_messages() {
        let args = Arguments::new("child", vec![]);
        let err = args.check_count(1..=1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid arguments to child: expected 1 argument(s), got 0"
        );
        let err = args.check_count(1..=usize::MAX).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn string_arguments_must_be_literals() {
        let args = Arguments::new("config", vec![DslValue::from(Value::from(3))]);
        assert!(matches!(
            args.string(0),
            Err(ResolveError::InvalidArguments { .. })
        ));
    }
}
