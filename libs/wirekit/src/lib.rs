//! # WireKit — declarative application runtime
//!
//! A small composition root for services built out of declaratively marked
//! types:
//!
//! - **Container**: constructor-injected lazy singletons with cycle detection
//! - **Catalog**: discovery of marked types via compile-time registration
//!   tables (`inventory`)
//! - **Providers**: a category/name registry for pluggable implementations
//! - **Events**: in-process pub/sub with sync and pooled async delivery
//! - **HTTP**: marker-driven route binding served through axum
//!
//! ## Markers
//!
//! ```rust,ignore
//! use wirekit::{component, http_handler, provider};
//!
//! #[provider(category = tool, name = "search", meta(engine = "ddg"))]
//! pub struct SearchTool;
//!
//! #[component]
//! pub struct Indexer {
//!     tools: Arc<ProviderRegistry>,
//! }
//!
//! #[http_handler(prefix = "/search")]
//! pub struct SearchApi {
//!     indexer: Arc<Indexer>,
//! }
//! ```
//!
//! Marked types are discovered by [`Runtime::bootstrap`], which wires the
//! container, populates the provider registry, binds HTTP routes, and then
//! serves the result. The runtime is an explicit value — there is no global
//! registry to initialize or tear down.

pub use anyhow::Result;

// Re-export inventory for the generated registrators.
pub use inventory;

pub mod catalog;
pub mod container;
pub mod events;
pub mod http;
pub mod providers;
pub mod runtime;

pub use catalog::{
    CatalogBuilder, ComponentDescriptor, MarkerKind, Registrator, ScanReport, TypeCatalog,
};
pub use container::{BeanKey, Container, ContainerError, Injectable};
pub use events::{DeliveryMode, EventBus, SubscriptionHandle};
pub use http::{HttpHandler, ParamType, Problem, RouteRequest, RouteScope, RouteTable};
pub use providers::{ProviderCategory, ProviderError, ProviderRegistry};
pub use runtime::{BootstrapError, Runtime, RuntimeConfig};

// Re-export the marker macros.
pub use wirekit_macros::{component, http_handler, provider, service};
