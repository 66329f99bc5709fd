//! The axum-backed gateway serving the route table.
//!
//! Requests hit an explicit `/health` route first; everything else falls
//! through to the table dispatcher, which matches method + path, extracts
//! parameters per the route's bindings, resolves the owning handler from the
//! container, and serializes the result. Per-request failures become problem
//! responses — they never take the server down.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use super::problem::{self, Problem};
use super::routes::{ParamSource, ParamType, RouteRequest};
use crate::runtime::RuntimeInner;

/// Request bodies past this size are rejected before JSON parsing.
const BODY_LIMIT: usize = 2 * 1024 * 1024;

pub(crate) fn router(inner: Arc<RuntimeInner>) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(inner)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn dispatch(State(runtime): State<Arc<RuntimeInner>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let method = parts.method;
    let path = parts.uri.path().to_string();

    let Some((entry, captures)) = runtime.routes.match_route(&method, &path) else {
        return problem::not_found(format!("no route for {method} {path}")).into_response();
    };

    let query = parse_query(parts.uri.query());

    let body_value = if entry
        .bindings
        .iter()
        .any(|b| b.source == ParamSource::Body)
    {
        match axum::body::to_bytes(body, BODY_LIMIT).await {
            Ok(bytes) if bytes.is_empty() => None,
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => Some(value),
                Err(error) => {
                    return problem::bad_request(format!("request body is not valid JSON: {error}"))
                        .into_response()
                }
            },
            Err(error) => {
                return problem::bad_request(format!("failed to read request body: {error}"))
                    .into_response()
            }
        }
    } else {
        None
    };

    let mut args = serde_json::Map::new();
    for binding in &entry.bindings {
        let raw = match binding.source {
            ParamSource::Path => {
                let captured = captures
                    .iter()
                    .find(|(name, _)| *name == binding.name)
                    .map(|(_, value)| *value);
                match captured {
                    Some(value) => match urlencoding::decode(value) {
                        Ok(decoded) => Some(RawParam::Text(decoded.into_owned())),
                        Err(error) => {
                            return problem::bad_request(format!(
                                "path parameter '{}' is not valid UTF-8: {error}",
                                binding.name
                            ))
                            .into_response()
                        }
                    },
                    None => None,
                }
            }
            ParamSource::Query => query.get(&binding.name).cloned().map(RawParam::Text),
            ParamSource::Body => body_value.clone().map(RawParam::Json),
        };

        match raw {
            Some(raw) => match convert(raw, binding.ty) {
                Ok(value) => {
                    args.insert(binding.name.clone(), value);
                }
                Err(reason) => {
                    return problem::bad_request(format!(
                        "parameter '{}': {reason}",
                        binding.name
                    ))
                    .into_response()
                }
            },
            None if binding.required => {
                return problem::bad_request(format!(
                    "missing required parameter '{}'",
                    binding.name
                ))
                .into_response()
            }
            None => {}
        }
    }

    match entry.invoke(&runtime.container, &RouteRequest::new(args)) {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(problem) => log_and_respond(problem, &method, &path),
    }
}

fn log_and_respond(problem: Problem, method: &axum::http::Method, path: &str) -> Response {
    if problem.status >= 500 {
        tracing::error!(%method, path, status = problem.status, detail = %problem.detail, "handler failed");
    } else {
        tracing::debug!(%method, path, status = problem.status, detail = %problem.detail, "request rejected");
    }
    problem.into_response()
}

enum RawParam {
    Text(String),
    Json(Value),
}

fn convert(raw: RawParam, ty: ParamType) -> Result<Value, String> {
    let text = match raw {
        RawParam::Json(value) => return Ok(value),
        RawParam::Text(text) => text,
    };
    match ty {
        ParamType::Str => Ok(Value::String(text)),
        ParamType::Int => text
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("'{text}' is not an integer")),
        ParamType::Float => text
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| format!("'{text}' is not a number")),
        ParamType::Bool => match text.as_str() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(format!("'{text}' is not a boolean")),
        },
        ParamType::Json => {
            serde_json::from_str(&text).map_err(|_| format!("'{text}' is not valid JSON"))
        }
    }
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    let mut pairs = HashMap::new();
    let Some(query) = query else {
        return pairs;
    };
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let decode = |s: &str| {
            urlencoding::decode(&s.replace('+', " "))
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| s.to_string())
        };
        pairs.insert(decode(key), decode(value));
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_strings_decode_and_last_value_wins() {
        let pairs = parse_query(Some("a=1&b=hello+world&c=%2Ftmp&a=2&flag"));
        assert_eq!(pairs["a"], "2");
        assert_eq!(pairs["b"], "hello world");
        assert_eq!(pairs["c"], "/tmp");
        assert_eq!(pairs["flag"], "");
        assert!(parse_query(None).is_empty());
    }

    #[test]
    fn conversions_respect_the_target_type() {
        assert_eq!(
            convert(RawParam::Text("42".into()), ParamType::Int).unwrap(),
            Value::from(42)
        );
        assert_eq!(
            convert(RawParam::Text("true".into()), ParamType::Bool).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            convert(RawParam::Text("0".into()), ParamType::Bool).unwrap(),
            Value::Bool(false)
        );
        assert!(convert(RawParam::Text("maybe".into()), ParamType::Bool).is_err());
        assert!(convert(RawParam::Text("abc".into()), ParamType::Int).is_err());
        assert_eq!(
            convert(RawParam::Text(r#"{"k":1}"#.into()), ParamType::Json).unwrap(),
            serde_json::json!({ "k": 1 })
        );
    }
}
