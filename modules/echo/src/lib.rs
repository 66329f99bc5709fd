//! Built-in echo module: a `tool` provider, a message log service fed by the
//! event bus, and the `/echo` HTTP surface tying them together. Doubles as
//! the living example for the marker macros.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use wirekit::container::{Container, Injectable};
use wirekit::http::{HttpHandler, Problem, RouteRequest, RouteScope};
use wirekit::providers::ProviderError;
use wirekit::{component, http_handler, provider, service};
use wirekit::{DeliveryMode, EventBus, ParamType, ProviderRegistry};

/// Published for every message accepted through the API.
pub struct MessagePosted {
    pub text: String,
}

/// The simplest possible tool: repeats its input.
#[provider(category = tool, name = "echo", ctor = EchoTool, meta(version = "1"))]
pub struct EchoTool;

impl EchoTool {
    pub fn echo(&self, input: &str) -> String {
        input.to_string()
    }
}

/// Keeps the texts of recently posted messages, fed by a sync subscription.
#[service]
pub struct MessageLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Injectable for MessageLog {
    fn construct(container: &Container) -> anyhow::Result<Self> {
        let events = container.resolve::<EventBus>()?;
        let entries = Arc::new(Mutex::new(Vec::new()));
        let sink = entries.clone();
        events.subscribe::<MessagePosted, _>(DeliveryMode::Sync, move |event| {
            tracing::info!(text = %event.text, "message recorded");
            sink.lock().push(event.text.clone());
            Ok(())
        });
        Ok(Self { entries })
    }
}

impl MessageLog {
    pub fn recent(&self) -> Vec<String> {
        self.entries.lock().clone()
    }
}

/// Echoing with optional shouting, plus message fan-out over the bus.
#[component]
pub struct EchoService {
    tools: Arc<ProviderRegistry>,
    events: Arc<EventBus>,
}

impl Injectable for EchoService {
    fn construct(container: &Container) -> anyhow::Result<Self> {
        Ok(Self {
            tools: container.resolve::<ProviderRegistry>()?,
            events: container.resolve::<EventBus>()?,
        })
    }
}

impl EchoService {
    pub fn say(&self, text: &str, upper: bool) -> anyhow::Result<String> {
        let tool = self
            .tools
            .get_as::<EchoTool>(EchoTool::PROVIDER_CATEGORY, EchoTool::PROVIDER_NAME)
            .ok_or_else(|| ProviderError::NotFound {
                category: EchoTool::PROVIDER_CATEGORY,
                name: EchoTool::PROVIDER_NAME.to_string(),
            })?;
        let echoed = tool.echo(text);
        Ok(if upper { echoed.to_uppercase() } else { echoed })
    }

    pub fn post(&self, text: String) {
        self.events.publish(MessagePosted { text });
    }
}

/// The `/echo` HTTP surface.
#[http_handler(prefix = "/echo")]
pub struct EchoApi {
    service: Arc<EchoService>,
    log: Arc<MessageLog>,
}

impl Injectable for EchoApi {
    fn construct(container: &Container) -> anyhow::Result<Self> {
        Ok(Self {
            service: container.resolve::<EchoService>()?,
            log: container.resolve::<MessageLog>()?,
        })
    }
}

impl HttpHandler for EchoApi {
    fn routes(routes: &mut RouteScope<'_, Self>) {
        routes.get("/ping").handle(Self::ping);
        routes
            .get("/say/{text}")
            .path_param("text")
            .query_param_typed("upper", ParamType::Bool, false)
            .handle(Self::say);
        routes
            .post("/messages")
            .body_param("message")
            .handle(Self::post_message);
        routes.get("/messages").handle(Self::list_messages);
    }
}

impl EchoApi {
    fn ping(&self, _req: &RouteRequest) -> Result<Value, Problem> {
        Ok(json!({ "pong": true }))
    }

    fn say(&self, req: &RouteRequest) -> Result<Value, Problem> {
        let text = req.text("text")?;
        let upper = req
            .get("upper")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let echoed = self
            .service
            .say(text, upper)
            .map_err(|e| wirekit::http::internal_error(format!("echo failed: {e:#}")))?;
        Ok(json!({ "echo": echoed }))
    }

    fn post_message(&self, req: &RouteRequest) -> Result<Value, Problem> {
        let message = req.json("message")?;
        let text = match message {
            Value::String(text) => text.clone(),
            Value::Object(fields) => fields
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    wirekit::http::bad_request("message object needs a string 'text' field")
                })?,
            _ => {
                return Err(wirekit::http::bad_request(
                    "message must be a string or an object with a 'text' field",
                ))
            }
        };
        self.service.post(text);
        Ok(json!({ "accepted": true }))
    }

    fn list_messages(&self, _req: &RouteRequest) -> Result<Value, Problem> {
        Ok(json!({ "messages": self.log.recent() }))
    }
}
