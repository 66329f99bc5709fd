//! Discovery of declaratively marked types.
//!
//! The marker macros expand to `inventory::submit!` of a [`Registrator`] — a
//! function that feeds one [`ComponentDescriptor`] into a [`CatalogBuilder`].
//! [`TypeCatalog::scan`] drains the inventory, keeps descriptors whose
//! `module_path` sits under the requested root, and groups the rest of the
//! runtime's bootstrap around the result.
//!
//! A malformed registration (a provider without a name, a duplicate
//! (type, marker) pair) is logged and skipped; it never fails the scan.

use std::any::TypeId;
use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

use crate::container::{AnyInstance, BeanKey, Container};
use crate::http::routes::{RouteError, RouteTable};
use crate::providers::ProviderCategory;

/// Type-erased constructor attached to a descriptor by its marker macro.
pub type ConstructFn = fn(&Container) -> anyhow::Result<AnyInstance>;

/// Route binder attached to HTTP handler descriptors.
pub type BindRoutesFn = fn(&mut RouteTable) -> Result<(), RouteError>;

/// The marker a descriptor was discovered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    Component,
    /// A service is itself a component marker; it satisfies component
    /// filters transitively.
    Service,
    HttpHandler,
    Provider(ProviderCategory),
}

impl MarkerKind {
    pub fn is_component(&self) -> bool {
        matches!(self, MarkerKind::Component | MarkerKind::Service)
    }

    pub fn is_http_handler(&self) -> bool {
        matches!(self, MarkerKind::HttpHandler)
    }

    pub fn as_provider(&self) -> Option<ProviderCategory> {
        match self {
            MarkerKind::Provider(category) => Some(*category),
            _ => None,
        }
    }
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerKind::Component => f.write_str("component"),
            MarkerKind::Service => f.write_str("service"),
            MarkerKind::HttpHandler => f.write_str("http_handler"),
            MarkerKind::Provider(category) => write!(f, "provider/{category}"),
        }
    }
}

/// Everything the runtime knows about one marked type under one marker.
/// Immutable after creation.
pub struct ComponentDescriptor {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub module_path: &'static str,
    pub marker: MarkerKind,
    /// Instance name; required for provider markers, optional elsewhere.
    pub name: Option<&'static str>,
    /// Opaque marker attributes, passed through to the provider registry.
    pub metadata: &'static [(&'static str, &'static str)],
    /// Class-level path prefix for HTTP handlers.
    pub route_prefix: &'static str,
    pub construct: Option<ConstructFn>,
    pub bind_routes: Option<BindRoutesFn>,
}

impl ComponentDescriptor {
    /// The container key this descriptor registers and resolves under.
    pub fn bean_key(&self) -> BeanKey {
        BeanKey::from_parts(self.type_id, self.type_name, self.name)
    }
}

impl fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("type_name", &self.type_name)
            .field("marker", &self.marker)
            .field("name", &self.name)
            .field("route_prefix", &self.route_prefix)
            .field("has_construct", &self.construct.is_some())
            .field("has_bind_routes", &self.bind_routes.is_some())
            .finish()
    }
}

/// A registration the scan recorded and skipped.
#[derive(Debug, Clone, Error)]
#[error("malformed registration for '{type_name}': {reason}")]
pub struct MalformedComponent {
    pub type_name: &'static str,
    pub reason: String,
}

/// The function type submitted by the marker macros via `inventory::submit!`.
pub struct Registrator(pub fn(&mut CatalogBuilder));

inventory::collect!(Registrator);

/// Accumulates descriptors from registrators; validates as it goes.
#[derive(Default)]
pub struct CatalogBuilder {
    descriptors: Vec<ComponentDescriptor>,
    seen: HashSet<(TypeId, MarkerKind)>,
    skipped: Vec<MalformedComponent>,
}

impl CatalogBuilder {
    pub fn submit(&mut self, descriptor: ComponentDescriptor) {
        if descriptor.marker.as_provider().is_some() && descriptor.name.is_none() {
            self.skip(MalformedComponent {
                type_name: descriptor.type_name,
                reason: format!("marker '{}' requires a name", descriptor.marker),
            });
            return;
        }
        if descriptor.marker.is_http_handler() && descriptor.bind_routes.is_none() {
            self.skip(MalformedComponent {
                type_name: descriptor.type_name,
                reason: "http_handler marker without a route binder".to_string(),
            });
            return;
        }
        if !self.seen.insert((descriptor.type_id, descriptor.marker)) {
            self.skip(MalformedComponent {
                type_name: descriptor.type_name,
                reason: format!("duplicate registration under marker '{}'", descriptor.marker),
            });
            return;
        }
        self.descriptors.push(descriptor);
    }

    fn skip(&mut self, malformed: MalformedComponent) {
        tracing::warn!(
            component = malformed.type_name,
            reason = %malformed.reason,
            "skipping malformed registration"
        );
        self.skipped.push(malformed);
    }

    /// Close the builder, keeping descriptors whose module path sits under
    /// `root` (an empty root keeps everything).
    pub fn finish(self, root: &str) -> ScanReport {
        let (kept, outside): (Vec<_>, Vec<_>) = self
            .descriptors
            .into_iter()
            .partition(|d| module_under_root(d.module_path, root));
        if !outside.is_empty() {
            tracing::debug!(
                root,
                outside = outside.len(),
                "descriptors outside the scan root ignored"
            );
        }
        ScanReport {
            descriptors: kept,
            skipped: self.skipped,
        }
    }
}

/// Result of one scan: the surviving descriptors plus what was skipped.
#[derive(Debug)]
pub struct ScanReport {
    descriptors: Vec<ComponentDescriptor>,
    skipped: Vec<MalformedComponent>,
}

impl ScanReport {
    pub fn descriptors(&self) -> &[ComponentDescriptor] {
        &self.descriptors
    }

    /// Generic components, including service-marked types.
    pub fn components(&self) -> impl Iterator<Item = &ComponentDescriptor> {
        self.descriptors.iter().filter(|d| d.marker.is_component())
    }

    pub fn handlers(&self) -> impl Iterator<Item = &ComponentDescriptor> {
        self.descriptors.iter().filter(|d| d.marker.is_http_handler())
    }

    pub fn providers(&self) -> impl Iterator<Item = &ComponentDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.marker.as_provider().is_some())
    }

    pub fn skipped(&self) -> &[MalformedComponent] {
        &self.skipped
    }
}

/// Entry point for discovery over the process-wide registration table.
pub struct TypeCatalog;

impl TypeCatalog {
    /// Collect every linked registration whose module path sits under `root`
    /// (an empty root matches everything). Scanning is idempotent: the
    /// inventory is static, so repeated scans yield the same descriptors.
    pub fn scan(root: &str) -> ScanReport {
        let mut builder = CatalogBuilder::default();
        for registrator in inventory::iter::<Registrator> {
            registrator.0(&mut builder);
        }
        builder.finish(root)
    }
}

fn module_under_root(module_path: &str, root: &str) -> bool {
    root.is_empty()
        || module_path == root
        || (module_path.starts_with(root) && module_path[root.len()..].starts_with("::"))
}
