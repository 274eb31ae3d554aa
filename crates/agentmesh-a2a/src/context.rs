//! Per-agent state shared by the dispatcher and its capability handlers
//!
//! One [`AgentContext`] per dispatcher: it owns the capability registry, the
//! discovery cache, the known-agents cache and the optional execution engine.
//! Nothing here is process-global.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_util::FutureExt;
use reqwest::Client;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{debug, info, warn};

use agentmesh_core::{AgentManifest, ExecutionEngine, MeshConfig, MeshError, MeshResult};

use crate::capability::{CapabilityHandler, CapabilityRegistry};
use crate::discovery::{DiscoveryClient, http_client};
use crate::peer::PeerConnection;

/// Which synchronous timeout tier a free-text query gets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTier {
    Quick,
    Heavy,
}

impl QueryTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Heavy => "heavy",
        }
    }
}

pub struct AgentContext {
    card: AgentManifest,
    config: MeshConfig,
    registry: RwLock<CapabilityRegistry>,
    discovery: DiscoveryClient,
    known_agents: AsyncRwLock<HashMap<String, AgentManifest>>,
    engine: Option<Arc<dyn ExecutionEngine>>,
    http: Client,
}

impl AgentContext {
    pub(crate) fn new(
        card: AgentManifest,
        config: MeshConfig,
        engine: Option<Arc<dyn ExecutionEngine>>,
    ) -> Self {
        let http = http_client();
        let discovery = DiscoveryClient::with_client(config.discovery.clone(), http.clone());
        Self {
            card,
            config,
            registry: RwLock::new(CapabilityRegistry::new()),
            discovery,
            known_agents: AsyncRwLock::new(HashMap::new()),
            engine,
            http,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::new(
            AgentManifest::new("test-agent", "Agent used in unit tests"),
            MeshConfig::default(),
            None,
        )
    }

    pub fn card(&self) -> &AgentManifest {
        &self.card
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn discovery(&self) -> &DiscoveryClient {
        &self.discovery
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    // ── Capability registry ─────────────────────────────────────────

    pub fn register(&self, handler: Arc<dyn CapabilityHandler>) {
        let mut registry = self.registry.write().unwrap_or_else(|poisoned| {
            warn!("Capability registry lock was poisoned, recovering");
            poisoned.into_inner()
        });
        registry.register(handler);
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn CapabilityHandler>> {
        self.read_registry().get(name)
    }

    pub fn capability_names(&self) -> Vec<String> {
        self.read_registry().names()
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.read_registry().contains(name)
    }

    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, CapabilityRegistry> {
        self.registry.read().unwrap_or_else(|poisoned| {
            warn!("Capability registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    // ── Known peers ─────────────────────────────────────────────────

    /// Merge freshly discovered manifests into the known-agents cache.
    pub async fn remember_agents(&self, agents: &[AgentManifest]) {
        let mut known = self.known_agents.write().await;
        for agent in agents {
            known.insert(agent.name.clone(), agent.clone());
        }
        debug!("Known agents: {}", known.len());
    }

    pub async fn known_agent(&self, name: &str) -> Option<AgentManifest> {
        self.known_agents.read().await.get(name).cloned()
    }

    /// Known agents sorted by name
    pub async fn known_agents(&self) -> Vec<AgentManifest> {
        let mut agents: Vec<AgentManifest> =
            self.known_agents.read().await.values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    /// Open a connection to `manifest` using this agent's HTTP client.
    pub fn peer(&self, manifest: AgentManifest) -> PeerConnection {
        PeerConnection::with_client(manifest, self.http.clone())
            .with_timeout(self.config.peer.request_timeout())
    }

    // ── Free-text execution ─────────────────────────────────────────

    /// Trimmed, case-insensitive substring match against the quick phrases.
    pub fn tier_for(&self, query: &str) -> QueryTier {
        let query = query.trim().to_lowercase();
        let quick = self
            .config
            .dispatch
            .quick_phrases
            .iter()
            .any(|phrase| query.contains(&phrase.to_lowercase()));
        if quick {
            QueryTier::Quick
        } else {
            QueryTier::Heavy
        }
    }

    pub fn budget(&self, tier: QueryTier) -> Duration {
        match tier {
            QueryTier::Quick => self.config.dispatch.quick_timeout(),
            QueryTier::Heavy => self.config.dispatch.heavy_timeout(),
        }
    }

    /// Run a query under the budget of its tier.
    pub async fn run_query(&self, query: &str) -> MeshResult<String> {
        let budget = self.budget(self.tier_for(query));
        self.run_with_budget(query, budget).await
    }

    /// Hand `query` to the execution engine, abandoning it after `budget`.
    /// Without an engine the query is echoed back.
    pub async fn run_with_budget(&self, query: &str, budget: Duration) -> MeshResult<String> {
        let Some(engine) = &self.engine else {
            return Ok(format!("{} received query: {}", self.card.name, query));
        };

        info!(
            "Executing query with {}s timeout: {}",
            budget.as_secs(),
            preview(query)
        );
        let run = AssertUnwindSafe(engine.run(query)).catch_unwind();
        match tokio::time::timeout(budget, run).await {
            Ok(Ok(Ok(answer))) => Ok(answer),
            Ok(Ok(Err(e))) => {
                warn!("Execution engine error: {:#}", e);
                Err(MeshError::executor(format!("{:#}", e)))
            }
            Ok(Err(_)) => {
                warn!("Execution engine panicked: {}", preview(query));
                Err(MeshError::executor("execution engine panicked"))
            }
            Err(_) => {
                warn!(
                    "Query timed out after {}s: {}",
                    budget.as_secs(),
                    preview(query)
                );
                Err(MeshError::Timeout(budget))
            }
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}
