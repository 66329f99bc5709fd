//! Route table and the builder handlers use to declare their routes.
//!
//! A handler type implements [`HttpHandler::routes`] and declares each route
//! against a [`RouteScope`]: verb, path suffix, parameter bindings, and the
//! method that serves it. Binding happens once at bootstrap; duplicate
//! (method, template shape) pairs are rejected there, so request-time
//! matching is deterministic.
//!
//! The table never owns handler instances. Each entry keeps the handler's
//! [`BeanKey`] and resolves it from the container at request time.

use std::any::type_name;
use std::collections::HashSet;
use std::marker::PhantomData;

use axum::http::Method;
use serde_json::Value;
use thiserror::Error;

use super::problem::{self, Problem};
use super::template::PathTemplate;
use crate::container::{BeanKey, Container};

/// Where a parameter value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSource {
    Path,
    Query,
    Body,
}

/// Target type a raw parameter is converted into before the handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Str,
    Int,
    Float,
    Bool,
    Json,
}

#[derive(Debug, Clone)]
pub struct ParamBinding {
    pub source: ParamSource,
    pub name: String,
    pub ty: ParamType,
    pub required: bool,
}

/// Extracted, converted parameters handed to a handler method.
#[derive(Debug, Default)]
pub struct RouteRequest {
    args: serde_json::Map<String, Value>,
}

impl RouteRequest {
    pub(crate) fn new(args: serde_json::Map<String, Value>) -> Self {
        Self { args }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    fn require(&self, name: &str) -> Result<&Value, Problem> {
        // Required bindings are enforced before dispatch; a miss here means
        // the handler asked for a parameter it never declared.
        self.args.get(name).ok_or_else(|| {
            problem::internal_error(format!("parameter '{name}' was not bound for this route"))
        })
    }

    pub fn text(&self, name: &str) -> Result<&str, Problem> {
        self.require(name)?.as_str().ok_or_else(|| {
            problem::bad_request(format!("parameter '{name}' is not a string"))
        })
    }

    pub fn integer(&self, name: &str) -> Result<i64, Problem> {
        self.require(name)?.as_i64().ok_or_else(|| {
            problem::bad_request(format!("parameter '{name}' is not an integer"))
        })
    }

    pub fn number(&self, name: &str) -> Result<f64, Problem> {
        self.require(name)?.as_f64().ok_or_else(|| {
            problem::bad_request(format!("parameter '{name}' is not a number"))
        })
    }

    pub fn boolean(&self, name: &str) -> Result<bool, Problem> {
        self.require(name)?.as_bool().ok_or_else(|| {
            problem::bad_request(format!("parameter '{name}' is not a boolean"))
        })
    }

    pub fn json(&self, name: &str) -> Result<&Value, Problem> {
        self.require(name)
    }
}

type RouteHandlerFn = Box<dyn Fn(&Container, &RouteRequest) -> Result<Value, Problem> + Send + Sync>;

/// One bound route: verb, template, bindings, and the type-erased invoker.
pub struct RouteEntry {
    pub method: Method,
    pub template: PathTemplate,
    pub bindings: Vec<ParamBinding>,
    pub handler_type: &'static str,
    handler: RouteHandlerFn,
}

impl RouteEntry {
    pub fn invoke(&self, container: &Container, request: &RouteRequest) -> Result<Value, Problem> {
        (self.handler)(container, request)
    }
}

impl std::fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteEntry")
            .field("method", &self.method)
            .field("path", &self.template.raw())
            .field("handler", &self.handler_type)
            .finish()
    }
}

/// Structured errors raised while binding routes.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("duplicate route registration for {method} {path}")]
    DuplicateRoute { method: Method, path: String },
    #[error("invalid route template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },
    #[error("path binding '{name}' has no matching segment in '{template}'")]
    UnknownPathParam { name: String, template: String },
}

/// Handler types declare their routes through this trait; the marker macro
/// wires the call into bootstrap.
pub trait HttpHandler: Send + Sync + Sized + 'static {
    fn routes(routes: &mut RouteScope<'_, Self>);
}

/// All bound routes, plus the shape set used for duplicate detection.
/// Immutable once bootstrap finishes.
#[derive(Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    shapes: HashSet<(Method, String)>,
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind every route the handler type declares, under the given class-level
    /// prefix. Fails on the first invalid or duplicate route.
    pub fn bind<T: HttpHandler>(&mut self, prefix: &'static str) -> Result<(), RouteError> {
        let mut scope = RouteScope {
            table: self,
            prefix,
            key: BeanKey::of::<T>(),
            error: None,
            _handler: PhantomData,
        };
        T::routes(&mut scope);
        match scope.error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn insert(&mut self, mut entry: RouteEntry) -> Result<(), RouteError> {
        for binding in &entry.bindings {
            if binding.source == ParamSource::Path
                && !entry.template.param_names().any(|n| n == binding.name)
            {
                return Err(RouteError::UnknownPathParam {
                    name: binding.name.clone(),
                    template: entry.template.raw().to_string(),
                });
            }
        }

        // Template parameters without an explicit binding are bound as
        // required strings.
        let missing: Vec<String> = entry
            .template
            .param_names()
            .filter(|name| {
                !entry
                    .bindings
                    .iter()
                    .any(|b| b.source == ParamSource::Path && b.name == *name)
            })
            .map(String::from)
            .collect();
        for name in missing {
            entry.bindings.push(ParamBinding {
                source: ParamSource::Path,
                name,
                ty: ParamType::Str,
                required: true,
            });
        }

        if !self
            .shapes
            .insert((entry.method.clone(), entry.template.shape()))
        {
            return Err(RouteError::DuplicateRoute {
                method: entry.method.clone(),
                path: entry.template.raw().to_string(),
            });
        }

        tracing::debug!(
            method = %entry.method,
            path = entry.template.raw(),
            handler = entry.handler_type,
            "route bound"
        );
        self.entries.push(entry);
        Ok(())
    }

    /// First structural match wins; bind-time duplicate rejection makes the
    /// order irrelevant for equal shapes.
    pub fn match_route<'s, 'p>(
        &'s self,
        method: &Method,
        path: &'p str,
    ) -> Option<(&'s RouteEntry, Vec<(&'s str, &'p str)>)> {
        self.entries.iter().find_map(|entry| {
            if entry.method != *method {
                return None;
            }
            entry.template.capture(path).map(|captures| (entry, captures))
        })
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-handler view over the route table: carries the class-level prefix and
/// the handler's bean key into each declared route.
pub struct RouteScope<'t, T> {
    table: &'t mut RouteTable,
    prefix: &'static str,
    key: BeanKey,
    error: Option<RouteError>,
    _handler: PhantomData<fn() -> T>,
}

impl<T: HttpHandler> RouteScope<'_, T> {
    pub fn route(&mut self, method: Method, suffix: &str) -> RouteBuilder<'_, T> {
        RouteBuilder {
            prefix: self.prefix,
            key: self.key.clone(),
            sink: RouteSink {
                table: &mut *self.table,
                error: &mut self.error,
            },
            method,
            suffix: suffix.to_string(),
            bindings: Vec::new(),
            _handler: PhantomData,
        }
    }

    pub fn get(&mut self, suffix: &str) -> RouteBuilder<'_, T> {
        self.route(Method::GET, suffix)
    }

    pub fn post(&mut self, suffix: &str) -> RouteBuilder<'_, T> {
        self.route(Method::POST, suffix)
    }

    pub fn put(&mut self, suffix: &str) -> RouteBuilder<'_, T> {
        self.route(Method::PUT, suffix)
    }

    pub fn delete(&mut self, suffix: &str) -> RouteBuilder<'_, T> {
        self.route(Method::DELETE, suffix)
    }
}

struct RouteSink<'s> {
    table: &'s mut RouteTable,
    error: &'s mut Option<RouteError>,
}

/// Fluent builder for a single route. Finish with [`RouteBuilder::handle`].
pub struct RouteBuilder<'s, T> {
    prefix: &'static str,
    key: BeanKey,
    sink: RouteSink<'s>,
    method: Method,
    suffix: String,
    bindings: Vec<ParamBinding>,
    _handler: PhantomData<fn() -> T>,
}

impl<T: HttpHandler> RouteBuilder<'_, T> {
    pub fn path_param(self, name: &str) -> Self {
        self.path_param_typed(name, ParamType::Str)
    }

    pub fn path_param_typed(mut self, name: &str, ty: ParamType) -> Self {
        self.bindings.push(ParamBinding {
            source: ParamSource::Path,
            name: name.to_string(),
            ty,
            required: true,
        });
        self
    }

    pub fn query_param(self, name: &str) -> Self {
        self.query_param_typed(name, ParamType::Str, false)
    }

    pub fn query_param_typed(mut self, name: &str, ty: ParamType, required: bool) -> Self {
        self.bindings.push(ParamBinding {
            source: ParamSource::Query,
            name: name.to_string(),
            ty,
            required,
        });
        self
    }

    /// Bind the JSON request body under `name`.
    pub fn body_param(mut self, name: &str) -> Self {
        self.bindings.push(ParamBinding {
            source: ParamSource::Body,
            name: name.to_string(),
            ty: ParamType::Json,
            required: true,
        });
        self
    }

    /// Register the route with its serving method. Errors (bad template,
    /// duplicate shape) are reported by the surrounding `bind` call.
    pub fn handle<F>(self, handler: F)
    where
        F: Fn(&T, &RouteRequest) -> Result<Value, Problem> + Send + Sync + 'static,
    {
        let Self {
            prefix,
            key,
            sink,
            method,
            suffix,
            bindings,
            ..
        } = self;
        if sink.error.is_some() {
            return;
        }

        let path = join_path(prefix, &suffix);
        let template = match PathTemplate::parse(&path) {
            Ok(template) => template,
            Err(error) => {
                *sink.error = Some(error);
                return;
            }
        };

        let erased: RouteHandlerFn = Box::new(move |container, request| {
            let instance = container.resolve_key(&key).map_err(|error| {
                problem::internal_error(format!("handler unavailable: {error}"))
            })?;
            let instance = instance.downcast::<T>().map_err(|_| {
                problem::internal_error(format!(
                    "handler '{}' resolved to an unexpected type",
                    type_name::<T>()
                ))
            })?;
            handler(&instance, request)
        });

        let entry = RouteEntry {
            method,
            template,
            bindings,
            handler_type: type_name::<T>(),
            handler: erased,
        };
        if let Err(error) = sink.table.insert(entry) {
            *sink.error = Some(error);
        }
    }
}

fn join_path(prefix: &str, suffix: &str) -> String {
    if prefix.is_empty() {
        return suffix.to_string();
    }
    if suffix.is_empty() || suffix == "/" {
        return prefix.to_string();
    }
    format!("{}{}", prefix.trim_end_matches('/'), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct ItemsApi;

    impl ItemsApi {
        fn get_item(&self, req: &RouteRequest) -> Result<Value, Problem> {
            Ok(json!({ "id": req.text("id")? }))
        }

        fn list_items(&self, _req: &RouteRequest) -> Result<Value, Problem> {
            Ok(json!([]))
        }
    }

    impl HttpHandler for ItemsApi {
        fn routes(routes: &mut RouteScope<'_, Self>) {
            routes.get("/{id}").path_param("id").handle(Self::get_item);
            routes.get("/").handle(Self::list_items);
        }
    }

    struct RivalItemsApi;

    impl RivalItemsApi {
        fn get_item(&self, _req: &RouteRequest) -> Result<Value, Problem> {
            Ok(Value::Null)
        }
    }

    impl HttpHandler for RivalItemsApi {
        fn routes(routes: &mut RouteScope<'_, Self>) {
            // Same shape as ItemsApi's "/{id}" even though the name differs.
            routes.get("/{key}").handle(Self::get_item);
        }
    }

    #[test]
    fn binding_registers_prefixed_routes() {
        let mut table = RouteTable::new();
        table.bind::<ItemsApi>("/items").unwrap();

        assert_eq!(table.len(), 2);
        let (entry, captures) = table.match_route(&Method::GET, "/items/42").unwrap();
        assert_eq!(entry.template.raw(), "/items/{id}");
        assert_eq!(captures, vec![("id", "42")]);
        assert!(table.match_route(&Method::GET, "/items").is_some());
    }

    #[test]
    fn duplicate_shapes_are_rejected_at_bind_time() {
        let mut table = RouteTable::new();
        table.bind::<ItemsApi>("/items").unwrap();

        let err = table.bind::<RivalItemsApi>("/items").unwrap_err();
        match err {
            RouteError::DuplicateRoute { method, path } => {
                assert_eq!(method, Method::GET);
                assert_eq!(path, "/items/{key}");
            }
            other => panic!("expected DuplicateRoute, got: {other:?}"),
        }
    }

    #[test]
    fn unmatched_method_or_path_yields_none() {
        let mut table = RouteTable::new();
        table.bind::<ItemsApi>("/items").unwrap();

        assert!(table.match_route(&Method::POST, "/items/42").is_none());
        assert!(table.match_route(&Method::GET, "/nothing/42").is_none());
    }

    #[test]
    fn undeclared_template_params_get_string_bindings() {
        let mut table = RouteTable::new();
        table.bind::<RivalItemsApi>("/rivals").unwrap();

        let entry = &table.entries()[0];
        assert_eq!(entry.bindings.len(), 1);
        let binding = &entry.bindings[0];
        assert_eq!(binding.name, "key");
        assert_eq!(binding.source, ParamSource::Path);
        assert_eq!(binding.ty, ParamType::Str);
        assert!(binding.required);
    }

    struct StrayBindingApi;

    impl HttpHandler for StrayBindingApi {
        fn routes(routes: &mut RouteScope<'_, Self>) {
            routes
                .get("/fixed")
                .path_param("ghost")
                .handle(|_: &Self, _| Ok(Value::Null));
        }
    }

    #[test]
    fn stray_path_bindings_fail_the_bind() {
        let mut table = RouteTable::new();
        let err = table.bind::<StrayBindingApi>("").unwrap_err();
        assert!(matches!(err, RouteError::UnknownPathParam { .. }));
    }

    #[test]
    fn entries_resolve_their_handler_through_the_container() {
        let container = Container::new();
        container.register_instance(ItemsApi);

        let mut table = RouteTable::new();
        table.bind::<ItemsApi>("/items").unwrap();

        let (entry, captures) = table.match_route(&Method::GET, "/items/7").unwrap();
        let mut args = serde_json::Map::new();
        for (name, value) in captures {
            args.insert(name.to_string(), Value::String(value.to_string()));
        }
        let result = entry.invoke(&container, &RouteRequest::new(args)).unwrap();
        assert_eq!(result, json!({ "id": "7" }));
    }

    #[test]
    fn unregistered_handler_is_a_request_time_problem() {
        let container = Container::new();
        let mut table = RouteTable::new();
        table.bind::<ItemsApi>("/items").unwrap();

        let (entry, _) = table.match_route(&Method::GET, "/items/7").unwrap();
        let problem = entry
            .invoke(&container, &RouteRequest::default())
            .unwrap_err();
        assert_eq!(problem.status, 500);
    }
}
