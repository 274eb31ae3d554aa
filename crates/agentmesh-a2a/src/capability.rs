//! Capability handlers and the registry the dispatcher routes through

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::debug;

use agentmesh_core::CapabilityDescriptor;

use crate::context::AgentContext;

/// A named unit of agent functionality, invoked with a JSON object of args.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn invoke(&self, ctx: &AgentContext, args: Map<String, Value>) -> Result<Value>;
}

type SyncFn = dyn Fn(Map<String, Value>) -> Result<Value> + Send + Sync;
type AsyncFn = dyn Fn(Map<String, Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync;

enum Invoke {
    Blocking(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

/// Closure-backed capability. Sync closures run on the blocking pool, so
/// callers always see the same async interface.
pub struct FnCapability {
    name: String,
    description: String,
    invoke: Invoke,
}

impl FnCapability {
    pub fn blocking<F>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            invoke: Invoke::Blocking(Arc::new(f)),
        }
    }

    pub fn from_async<F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            invoke: Invoke::Async(Arc::new(
                move |args: Map<String, Value>| -> BoxFuture<'static, Result<Value>> {
                    Box::pin(f(args))
                },
            )),
        }
    }
}

#[async_trait]
impl CapabilityHandler for FnCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, _ctx: &AgentContext, args: Map<String, Value>) -> Result<Value> {
        match &self.invoke {
            Invoke::Blocking(f) => {
                let f = Arc::clone(f);
                tokio::task::spawn_blocking(move || f(args))
                    .await
                    .with_context(|| format!("Capability {} panicked", self.name))?
            }
            Invoke::Async(f) => AssertUnwindSafe(f(args))
                .catch_unwind()
                .await
                .map_err(|_| anyhow!("Capability {} panicked", self.name))?,
        }
    }
}

/// Name → handler map. Registering an existing name replaces it.
pub struct CapabilityRegistry {
    handlers: HashMap<Arc<str>, Arc<dyn CapabilityHandler>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn CapabilityHandler>) {
        let name: Arc<str> = Arc::from(handler.name());
        debug!("Registered capability: {}", name);
        self.handlers.insert(name, handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CapabilityHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().map(|k| k.to_string()).collect();
        names.sort();
        names
    }

    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        self.names()
            .into_iter()
            .filter_map(|name| self.handlers.get(name.as_str()))
            .map(|h| CapabilityDescriptor::named(h.name()).with_description(h.description()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
