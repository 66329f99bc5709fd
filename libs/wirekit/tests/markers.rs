//! End-to-end marker flow: attribute macros → inventory registration →
//! catalog scan → bootstrapped runtime.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use wirekit::container::{Container, Injectable};
use wirekit::http::{HttpHandler, Problem, RouteRequest, RouteScope};
use wirekit::{component, http_handler, provider, service};
use wirekit::{ProviderCategory, Runtime, RuntimeConfig, TypeCatalog};

#[provider(category = memory, name = "scratch", ctor = ScratchMemory::default(), meta(capacity = "64"))]
#[derive(Default)]
pub struct ScratchMemory;

#[service]
pub struct GreeterService;

impl Injectable for GreeterService {
    fn construct(_container: &Container) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

impl GreeterService {
    fn greet(&self, name: &str) -> String {
        format!("hello {name}")
    }
}

#[component(name = "secondary")]
pub struct Counter(pub u64);

impl Injectable for Counter {
    fn construct(_container: &Container) -> anyhow::Result<Self> {
        Ok(Self(0))
    }
}

#[http_handler(prefix = "/greet")]
pub struct GreetApi {
    service: Arc<GreeterService>,
}

impl Injectable for GreetApi {
    fn construct(container: &Container) -> anyhow::Result<Self> {
        Ok(Self {
            service: container.resolve::<GreeterService>()?,
        })
    }
}

impl HttpHandler for GreetApi {
    fn routes(routes: &mut RouteScope<'_, Self>) {
        routes.get("/{name}").handle(Self::greet);
    }
}

impl GreetApi {
    fn greet(&self, req: &RouteRequest) -> Result<Value, Problem> {
        Ok(json!({ "greeting": self.service.greet(req.text("name")?) }))
    }
}

fn bootstrapped() -> Runtime {
    Runtime::bootstrap(RuntimeConfig {
        scan_root: module_path!().to_string(),
        event_workers: 1,
    })
    .expect("bootstrap failed")
}

#[test]
fn markers_land_in_the_catalog_grouped_by_kind() {
    let report = TypeCatalog::scan(module_path!());

    assert_eq!(report.providers().count(), 1);
    assert_eq!(report.handlers().count(), 1);
    // GreeterService (service) and Counter (component) both satisfy the
    // component filter.
    assert_eq!(report.components().count(), 2);
    assert!(report.skipped().is_empty());

    let provider = report.providers().next().unwrap();
    assert_eq!(provider.name, Some("scratch"));
    assert_eq!(provider.metadata, &[("capacity", "64")]);
}

#[test]
fn scanning_twice_is_idempotent() {
    let first = TypeCatalog::scan(module_path!());
    let second = TypeCatalog::scan(module_path!());
    assert_eq!(first.descriptors().len(), second.descriptors().len());
}

#[test]
fn provider_consts_mirror_the_marker() {
    assert_eq!(ScratchMemory::PROVIDER_CATEGORY, ProviderCategory::Memory);
    assert_eq!(ScratchMemory::PROVIDER_NAME, "scratch");
}

#[test]
fn bootstrap_wires_providers_and_named_components() {
    let runtime = bootstrapped();

    assert_eq!(
        runtime.providers().count_in_category(ProviderCategory::Memory),
        1
    );
    let metadata = runtime
        .providers()
        .metadata(ProviderCategory::Memory, "scratch")
        .unwrap();
    assert_eq!(metadata.get("capacity").map(String::as_str), Some("64"));

    // The named component resolves under its name, not the bare type key.
    assert!(runtime.container().resolve::<Counter>().is_err());
    assert!(runtime
        .container()
        .resolve_named::<Counter>("secondary")
        .is_ok());
}

#[tokio::test]
async fn marked_handler_serves_requests() {
    let runtime = bootstrapped();

    let response = runtime
        .router()
        .oneshot(Request::get("/greet/world").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body, json!({ "greeting": "hello world" }));
}
