//! Runtime assembly and the phased bootstrap sequence.
//!
//! Phase order: **scan → register → providers → routes**, then `serve`.
//! Bootstrap is synchronous and fail-fast: any configuration, construction,
//! or binding error aborts startup naming the offending type — nothing
//! partially starts. After bootstrap only the container and the provider
//! registry are mutated; the route table is immutable.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::catalog::{ScanReport, TypeCatalog};
use crate::container::{Container, ContainerError};
use crate::events::EventBus;
use crate::http::gateway;
use crate::http::routes::{RouteError, RouteTable};
use crate::providers::{ProviderError, ProviderRegistry};

/// Bootstrap configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Module-path prefix limiting discovery; empty scans everything linked.
    pub scan_root: String,
    /// Worker threads for async event delivery.
    pub event_workers: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scan_root: String::new(),
            event_workers: 8,
        }
    }
}

/// Structured errors for the bootstrap sequence.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("component registration failed for '{type_name}'")]
    Register {
        type_name: &'static str,
        #[source]
        source: ContainerError,
    },
    #[error("provider construction failed for '{type_name}'")]
    ProviderConstruction {
        type_name: &'static str,
        #[source]
        source: ContainerError,
    },
    #[error("provider registration failed for '{type_name}'")]
    ProviderRegistration {
        type_name: &'static str,
        #[source]
        source: ProviderError,
    },
    #[error("route binding failed for '{type_name}'")]
    Bind {
        type_name: &'static str,
        #[source]
        source: RouteError,
    },
    #[error("failed to start the event delivery pool")]
    EventPool(#[source] std::io::Error),
}

pub(crate) struct RuntimeInner {
    pub(crate) container: Container,
    pub(crate) providers: Arc<ProviderRegistry>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) routes: RouteTable,
}

/// The assembled runtime. Cloning is cheap; every clone shares the same
/// container, registries, and route table.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("container", &self.inner.container)
            .field("providers", &self.inner.providers)
            .field("routes", &self.inner.routes)
            .finish()
    }
}

impl Runtime {
    /// Run the full bootstrap sequence over the linked registrations.
    pub fn bootstrap(config: RuntimeConfig) -> Result<Self, BootstrapError> {
        tracing::info!(root = %config.scan_root, "Phase: scan");
        let report = TypeCatalog::scan(&config.scan_root);
        tracing::info!(
            components = report.components().count(),
            handlers = report.handlers().count(),
            providers = report.providers().count(),
            skipped = report.skipped().len(),
            "component scan complete"
        );
        Self::from_report(report, &config)
    }

    /// Assemble a runtime from an already-collected scan report, running the
    /// register → providers → routes phases. Fail-fast: the first error aborts
    /// and nothing partially starts.
    pub fn from_report(report: ScanReport, config: &RuntimeConfig) -> Result<Self, BootstrapError> {
        let container = Container::new();
        let providers = Arc::new(ProviderRegistry::new());
        let events =
            Arc::new(EventBus::new(config.event_workers).map_err(BootstrapError::EventPool)?);

        tracing::info!("Phase: register");
        // The registry and bus become resolvable beans before any component
        // factory can run, so components can inject them.
        container.register_arc(providers.clone());
        container.register_arc(events.clone());
        let mut registered = HashSet::new();
        for descriptor in report.descriptors() {
            let key = descriptor.bean_key();
            if !registered.insert(key.clone()) {
                continue;
            }
            let construct = descriptor.construct.ok_or(BootstrapError::Register {
                type_name: descriptor.type_name,
                source: ContainerError::NoSuitableConstructor {
                    type_name: descriptor.type_name,
                },
            })?;
            container.register_with_key(key, Box::new(move |c| construct(c)));
        }

        tracing::info!("Phase: providers");
        for descriptor in report.providers() {
            let instance = container.resolve_key(&descriptor.bean_key()).map_err(|source| {
                BootstrapError::ProviderConstruction {
                    type_name: descriptor.type_name,
                    source,
                }
            })?;
            providers
                .register_from_descriptor(descriptor, instance)
                .map_err(|source| BootstrapError::ProviderRegistration {
                    type_name: descriptor.type_name,
                    source,
                })?;
        }

        tracing::info!("Phase: routes");
        let mut routes = RouteTable::new();
        for descriptor in report.handlers() {
            let bind = descriptor.bind_routes.ok_or(BootstrapError::Bind {
                type_name: descriptor.type_name,
                source: RouteError::InvalidTemplate {
                    template: descriptor.route_prefix.to_string(),
                    reason: "handler registered without a route binder".to_string(),
                },
            })?;
            bind(&mut routes).map_err(|source| BootstrapError::Bind {
                type_name: descriptor.type_name,
                source,
            })?;
        }
        tracing::info!(routes = routes.len(), "bootstrap complete");

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                container,
                providers,
                events,
                routes,
            }),
        })
    }

    pub fn container(&self) -> &Container {
        &self.inner.container
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.inner.providers
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn routes(&self) -> &RouteTable {
        &self.inner.routes
    }

    /// The axum router serving this runtime: `/health` plus the route table.
    pub fn router(&self) -> axum::Router {
        gateway::router(self.inner.clone())
    }

    /// Serve until the cancellation token fires, then shut down gracefully.
    pub async fn serve(&self, addr: SocketAddr, cancel: CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        tracing::info!(addr = %local, routes = self.inner.routes.len(), "HTTP gateway listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;
        tracing::info!("HTTP gateway stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogBuilder, ComponentDescriptor, MarkerKind, Registrator};
    use crate::container::AnyInstance;
    use crate::http::routes::{HttpHandler, RouteRequest, RouteScope};
    use crate::http::Problem;
    use crate::providers::ProviderCategory;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::any::TypeId;
    use tower::ServiceExt;

    struct ClockTool;

    impl ClockTool {
        fn now(&self) -> &'static str {
            "epoch"
        }
    }

    struct StatusApi {
        tools: Arc<ProviderRegistry>,
    }

    impl StatusApi {
        fn status(&self, _req: &RouteRequest) -> Result<Value, Problem> {
            let clock = self
                .tools
                .get_as::<ClockTool>(ProviderCategory::Tool, "clock")
                .ok_or_else(|| crate::http::internal_error("clock tool missing"))?;
            Ok(json!({ "time": clock.now() }))
        }

        fn lookup(&self, req: &RouteRequest) -> Result<Value, Problem> {
            Ok(json!({ "id": req.text("id")? }))
        }

        fn fail(&self, _req: &RouteRequest) -> Result<Value, Problem> {
            Err(Problem::new(422, "Unprocessable", "rejected by handler"))
        }
    }

    impl HttpHandler for StatusApi {
        fn routes(routes: &mut RouteScope<'_, Self>) {
            routes.get("/").handle(Self::status);
            routes.get("/{id}").path_param("id").handle(Self::lookup);
            routes.post("/fail").handle(Self::fail);
        }
    }

    fn clock_registrator(builder: &mut CatalogBuilder) {
        builder.submit(ComponentDescriptor {
            type_id: TypeId::of::<ClockTool>(),
            type_name: std::any::type_name::<ClockTool>(),
            module_path: module_path!(),
            marker: MarkerKind::Provider(ProviderCategory::Tool),
            name: Some("clock"),
            metadata: &[("precision", "seconds")],
            route_prefix: "",
            construct: Some(|_| Ok(Arc::new(ClockTool) as AnyInstance)),
            bind_routes: None,
        });
    }

    fn status_api_registrator(builder: &mut CatalogBuilder) {
        builder.submit(ComponentDescriptor {
            type_id: TypeId::of::<StatusApi>(),
            type_name: std::any::type_name::<StatusApi>(),
            module_path: module_path!(),
            marker: MarkerKind::HttpHandler,
            name: None,
            metadata: &[],
            route_prefix: "/status",
            construct: Some(|c| {
                Ok(Arc::new(StatusApi {
                    tools: c.resolve::<ProviderRegistry>()?,
                }) as AnyInstance)
            }),
            bind_routes: Some(|table| table.bind::<StatusApi>("/status")),
        });
    }

    inventory::submit! { Registrator(clock_registrator) }
    inventory::submit! { Registrator(status_api_registrator) }

    fn bootstrapped() -> Runtime {
        Runtime::bootstrap(RuntimeConfig {
            scan_root: module_path!().to_string(),
            event_workers: 2,
        })
        .expect("bootstrap failed")
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn bootstrap_populates_the_provider_registry() {
        let runtime = bootstrapped();
        assert_eq!(runtime.providers().count_in_category(ProviderCategory::Tool), 1);
        let metadata = runtime
            .providers()
            .metadata(ProviderCategory::Tool, "clock")
            .unwrap();
        assert_eq!(metadata.get("precision").map(String::as_str), Some("seconds"));
    }

    #[test]
    fn scan_root_keeps_foreign_registrations_out() {
        let runtime = Runtime::bootstrap(RuntimeConfig {
            scan_root: "no_such_module".to_string(),
            event_workers: 1,
        })
        .expect("bootstrap failed");
        assert!(runtime.routes().is_empty());
        assert_eq!(runtime.providers().count_in_category(ProviderCategory::Tool), 0);
    }

    #[tokio::test]
    async fn health_is_served_even_with_zero_user_routes() {
        let runtime = Runtime::bootstrap(RuntimeConfig {
            scan_root: "no_such_module".to_string(),
            event_workers: 1,
        })
        .unwrap();

        let response = runtime
            .router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn bound_routes_dispatch_to_their_handler() {
        let runtime = bootstrapped();

        let response = runtime
            .router()
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "time": "epoch" }));
    }

    #[tokio::test]
    async fn path_parameters_reach_the_handler_as_strings() {
        let runtime = bootstrapped();

        let response = runtime
            .router()
            .oneshot(Request::get("/status/42").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "id": "42" }));
    }

    #[tokio::test]
    async fn unmatched_requests_return_404() {
        let runtime = bootstrapped();

        let response = runtime
            .router()
            .oneshot(Request::get("/absent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn handler_problems_map_to_their_status() {
        let runtime = bootstrapped();

        let response = runtime
            .router()
            .oneshot(Request::post("/status/fail").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["title"], "Unprocessable");
    }

    #[test]
    fn handler_instances_are_container_singletons() {
        let runtime = bootstrapped();
        let first = runtime.container().resolve::<StatusApi>().unwrap();
        let second = runtime.container().resolve::<StatusApi>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    struct Orphan;

    #[test]
    fn a_descriptor_without_a_constructor_aborts_bootstrap() {
        let mut builder = CatalogBuilder::default();
        builder.submit(ComponentDescriptor {
            type_id: TypeId::of::<Orphan>(),
            type_name: std::any::type_name::<Orphan>(),
            module_path: module_path!(),
            marker: MarkerKind::Component,
            name: None,
            metadata: &[],
            route_prefix: "",
            construct: None,
            bind_routes: None,
        });

        let err = Runtime::from_report(builder.finish(""), &RuntimeConfig::default()).unwrap_err();
        match err {
            BootstrapError::Register { type_name, source } => {
                assert!(type_name.ends_with("Orphan"));
                assert!(matches!(source, ContainerError::NoSuitableConstructor { .. }));
            }
            other => panic!("expected Register error, got: {other:?}"),
        }
    }

    struct PingApi;

    impl HttpHandler for PingApi {
        fn routes(routes: &mut RouteScope<'_, Self>) {
            routes.get("/ping").handle(|_: &Self, _| Ok(Value::Null));
        }
    }

    struct PongApi;

    impl HttpHandler for PongApi {
        fn routes(routes: &mut RouteScope<'_, Self>) {
            routes.get("/ping").handle(|_: &Self, _| Ok(Value::Null));
        }
    }

    #[test]
    fn duplicate_route_claims_abort_bootstrap() {
        fn descriptor<T: HttpHandler>(
            bind: crate::catalog::BindRoutesFn,
        ) -> ComponentDescriptor {
            ComponentDescriptor {
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
                module_path: module_path!(),
                marker: MarkerKind::HttpHandler,
                name: None,
                metadata: &[],
                route_prefix: "",
                construct: Some(|_| Ok(Arc::new(()) as AnyInstance)),
                bind_routes: Some(bind),
            }
        }

        let mut builder = CatalogBuilder::default();
        builder.submit(descriptor::<PingApi>(|t| t.bind::<PingApi>("")));
        builder.submit(descriptor::<PongApi>(|t| t.bind::<PongApi>("")));

        let err = Runtime::from_report(builder.finish(""), &RuntimeConfig::default()).unwrap_err();
        match err {
            BootstrapError::Bind { type_name, source } => {
                assert!(type_name.ends_with("PongApi"));
                assert!(matches!(source, RouteError::DuplicateRoute { .. }));
            }
            other => panic!("expected Bind error, got: {other:?}"),
        }
    }
}
