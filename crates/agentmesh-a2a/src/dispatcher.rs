//! Capability dispatcher — turns one inbound message into one reply
//!
//! Every message ends in exactly one outbound message. The payload is either
//! a structured capability call (JSON object with a `capability` key, sent as
//! text or as a data part) or a free-text query. Free text runs on the quick
//! or heavy tier, or, when the async policy picks it, as a background task the
//! caller polls for.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use agentmesh_core::telemetry::sink_from_config;
use agentmesh_core::{
    AgentManifest, ExecutionEngine, MeshConfig, MeshError, MeshResult, ObservabilitySink,
    SpanRecord, Task, TaskStore,
};

use crate::builtins::{CardCapability, QueryAgent, register_builtins};
use crate::capability::{CapabilityHandler, FnCapability};
use crate::context::AgentContext;
use crate::protocol::{Message, Payload};

pub const NO_CONTENT: &str = "No processable content found in message";
pub const UNRECOGNIZED: &str = "No recognized capability or query in message";
pub const CANCEL_NOTICE: &str = "Task cancellation is not supported by this agent";

/// Decides whether a free-text query runs as a background task.
pub type AsyncPolicy = Arc<dyn Fn(&str) -> bool + Send + Sync>;

fn never_async() -> AsyncPolicy {
    Arc::new(|_| false)
}

pub struct DispatcherBuilder {
    card: AgentManifest,
    config: MeshConfig,
    engine: Option<Arc<dyn ExecutionEngine>>,
    sink: Option<Arc<dyn ObservabilitySink>>,
    async_policy: Option<AsyncPolicy>,
    handlers: Vec<Arc<dyn CapabilityHandler>>,
}

impl DispatcherBuilder {
    pub fn new(card: AgentManifest) -> Self {
        Self {
            card,
            config: MeshConfig::default(),
            engine: None,
            sink: None,
            async_policy: None,
            handlers: Vec::new(),
        }
    }

    pub fn config(mut self, config: MeshConfig) -> Self {
        self.config = config;
        self
    }

    pub fn engine(mut self, engine: impl ExecutionEngine + 'static) -> Self {
        self.engine = Some(Arc::new(engine));
        self
    }

    pub fn shared_engine(mut self, engine: Arc<dyn ExecutionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Overrides the sink `[telemetry]` would pick.
    pub fn sink(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn async_policy(mut self, policy: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.async_policy = Some(Arc::new(policy));
        self
    }

    pub fn capability(mut self, handler: impl CapabilityHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Registration order: built-ins, then card-declared capabilities that
    /// have no handler yet, then handlers added on the builder.
    pub fn build(self) -> Dispatcher {
        let sink = self
            .sink
            .unwrap_or_else(|| sink_from_config(&self.config.telemetry));
        let tasks = TaskStore::from_config(&self.config.tasks);
        let context = AgentContext::new(self.card, self.config, self.engine);

        register_builtins(&context);
        for descriptor in context.card().capabilities() {
            match CardCapability::from_descriptor(descriptor) {
                Some(cap) if !context.has_capability(cap.name()) => {
                    context.register(Arc::new(cap));
                }
                Some(_) => {}
                None => warn!("Skipping unnamed capability on card '{}'", context.card().name),
            }
        }
        for handler in self.handlers {
            context.register(handler);
        }

        info!(
            "Dispatcher for '{}' ready: {} capabilities, engine {}",
            context.card().name,
            context.capability_names().len(),
            if context.has_engine() { "attached" } else { "absent" }
        );

        Dispatcher {
            context: Arc::new(context),
            tasks,
            sink,
            async_policy: self.async_policy.unwrap_or_else(never_async),
        }
    }
}

/// Cheap to clone; clones share registry, caches and task store.
#[derive(Clone)]
pub struct Dispatcher {
    context: Arc<AgentContext>,
    tasks: TaskStore,
    sink: Arc<dyn ObservabilitySink>,
    async_policy: AsyncPolicy,
}

impl Dispatcher {
    pub fn builder(card: AgentManifest) -> DispatcherBuilder {
        DispatcherBuilder::new(card)
    }

    pub fn card(&self) -> &AgentManifest {
        self.context.card()
    }

    pub fn context(&self) -> &Arc<AgentContext> {
        &self.context
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    pub fn capability_names(&self) -> Vec<String> {
        self.context.capability_names()
    }

    pub fn register(&self, handler: impl CapabilityHandler + 'static) {
        self.context.register(Arc::new(handler));
    }

    /// Register a synchronous closure; it runs on the blocking pool.
    pub fn register_fn<F>(&self, name: &str, description: &str, f: F)
    where
        F: Fn(Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register(FnCapability::blocking(name, description, f));
    }

    /// Handle one inbound message. Never fails: errors become the reply text.
    pub async fn execute(&self, message: &Message) -> Message {
        let mut span = SpanRecord::begin("a2a.dispatch").attr("agent", &self.card().name);

        let (reply, error) = match self.route(message, &mut span).await {
            Ok(reply) => (reply, None),
            Err(e) => {
                warn!("Dispatch failed: {}", e);
                (format!("Error: {}", e), Some(e.to_string()))
            }
        };

        self.sink.record(span.finish(error));
        Message::agent_text(reply)
    }

    async fn route(&self, message: &Message, span: &mut SpanRecord) -> MeshResult<String> {
        let Some(payload) = message.payload() else {
            span.set_attr("route", "empty");
            return Ok(NO_CONTENT.to_string());
        };

        match payload {
            Payload::Text(text) => match structured(&text) {
                Some(call) => self.dispatch_structured(&call, span).await,
                None => self.dispatch_query(&text, span).await,
            },
            Payload::Data(Value::Object(call)) => self.dispatch_structured(&call, span).await,
            Payload::Data(other) => {
                debug!("Ignoring non-object data part: {}", other);
                span.set_attr("route", "unrecognized");
                Ok(unrecognized())
            }
        }
    }

    async fn dispatch_structured(
        &self,
        call: &Map<String, Value>,
        span: &mut SpanRecord,
    ) -> MeshResult<String> {
        if let Some(name) = call.get("capability").and_then(Value::as_str) {
            if let Some(handler) = self.context.handler(name) {
                span.set_attr("route", "capability");
                span.set_attr("capability", name);
                let args = match call.get("args") {
                    None | Some(Value::Null) => Map::new(),
                    Some(Value::Object(args)) => args.clone(),
                    Some(other) => {
                        return Err(MeshError::Invocation(format!(
                            "Arguments for {} must be an object, got {}",
                            name, other
                        )));
                    }
                };

                info!("Invoking capability {}", name);
                let outcome = AssertUnwindSafe(handler.invoke(&self.context, args))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("Capability {} panicked", name)));
                let value = match outcome {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("Capability {} failed: {:#}", name, e);
                        json!({ "error": format!("{:#}", e) })
                    }
                };
                return Ok(render(value));
            }
            debug!("No handler registered for capability {}", name);
        }

        // A structured `query` is only answered by an attached engine.
        if let Some(query) = call
            .get("query")
            .and_then(Value::as_str)
            .filter(|q| !q.trim().is_empty() && self.context.has_engine())
        {
            return self.dispatch_query(query, span).await;
        }

        span.set_attr("route", "unrecognized");
        Ok(unrecognized())
    }

    async fn dispatch_query(&self, query: &str, span: &mut SpanRecord) -> MeshResult<String> {
        if (self.async_policy)(query) {
            let context = Arc::clone(&self.context);
            let budget = context.config().dispatch.async_timeout();
            let owned = query.to_string();
            let id = self.tasks.start(query, async move {
                context.run_with_budget(&owned, budget).await
            });

            span.set_attr("route", "async");
            span.set_attr("task_id", &id);
            info!("Started background task {}", id);
            return Ok(format!(
                "Your request has been received and is being processed.\nTask ID: {}\nThis may take a few moments...",
                id
            ));
        }

        let tier = self.context.tier_for(query);
        let budget = self.context.budget(tier);
        span.set_attr("route", tier.as_str());
        span.set_attr("timeout_secs", budget.as_secs());
        self.context.run_with_budget(query, budget).await
    }

    /// Cancellation is acknowledged but never stops running work.
    pub fn cancel(&self) -> Message {
        info!("Cancellation requested for agent {}", self.card().name);
        self.sink.record(
            SpanRecord::begin("a2a.cancel")
                .attr("agent", &self.card().name)
                .finish(None),
        );
        Message::agent_text(CANCEL_NOTICE)
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        self.tasks.get(id)
    }

    /// Ask a peer agent something, by name. Same contract as `query_agent`.
    pub async fn query_other_agent(
        &self,
        agent_name: &str,
        query: Option<&str>,
        capability: Option<&str>,
        capability_args: Map<String, Value>,
    ) -> Value {
        let mut args = Map::new();
        args.insert("agent_name".into(), json!(agent_name));
        if let Some(query) = query {
            args.insert("query".into(), json!(query));
        }
        if let Some(capability) = capability {
            args.insert("capability".into(), json!(capability));
        }
        args.insert("capability_args".into(), Value::Object(capability_args));

        QueryAgent
            .invoke(&self.context, args)
            .await
            .unwrap_or_else(|e| json!({"error": e.to_string(), "agent": agent_name, "success": false}))
    }
}

/// A text payload counts as a structured call only if it is a JSON object
/// naming a `capability` or carrying a `query`.
fn structured(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) if map.contains_key("capability") || map.contains_key("query") => {
            Some(map)
        }
        _ => None,
    }
}

fn unrecognized() -> String {
    json!({ "error": UNRECOGNIZED }).to_string()
}

fn render(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}
