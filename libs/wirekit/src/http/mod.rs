//! HTTP surface: route templates, the route table, and the axum-backed
//! gateway that serves it.

pub mod gateway;
pub mod problem;
pub mod routes;
pub mod template;

pub use problem::{bad_request, internal_error, not_found, Problem};
pub use routes::{
    HttpHandler, ParamBinding, ParamSource, ParamType, RouteBuilder, RouteEntry, RouteError,
    RouteRequest, RouteScope, RouteTable,
};
pub use template::PathTemplate;
