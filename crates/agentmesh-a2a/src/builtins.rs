//! Capabilities every agent carries
//!
//! `get_agent_info`, `discover_agents` and `query_agent` are registered on
//! every dispatcher before anything else. [`CardCapability`] backs
//! capabilities a card declares without supplying a handler.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use agentmesh_core::{AgentManifest, CapabilityDescriptor};

use crate::capability::CapabilityHandler;
use crate::context::AgentContext;

pub const GET_AGENT_INFO: &str = "get_agent_info";
pub const DISCOVER_AGENTS: &str = "discover_agents";
pub const QUERY_AGENT: &str = "query_agent";

pub(crate) fn register_builtins(ctx: &AgentContext) {
    ctx.register(Arc::new(GetAgentInfo));
    ctx.register(Arc::new(DiscoverAgents));
    ctx.register(Arc::new(QueryAgent));
}

fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn summary(agent: &AgentManifest) -> Value {
    json!({
        "name": agent.name,
        "description": agent.description,
        "capabilities": agent.capability_names(),
        "endpoint": agent.discovered_at,
    })
}

/// Run discovery, remember what it found, and list the agents offering
/// `capability` (all of them when `None`).
async fn discover(ctx: &AgentContext, refresh: bool, capability: Option<&str>) -> Value {
    let discovery = ctx.discovery();
    if refresh {
        discovery.clear_cache().await;
    }

    let agents = discovery.discover_from_config().await;
    ctx.remember_agents(&agents).await;

    let listed: Vec<Value> = agents
        .iter()
        .filter(|agent| capability.is_none_or(|cap| agent.has_capability(cap)))
        .map(summary)
        .collect();
    json!({ "count": listed.len(), "agents": listed })
}

pub struct GetAgentInfo;

#[async_trait]
impl CapabilityHandler for GetAgentInfo {
    fn name(&self) -> &str {
        GET_AGENT_INFO
    }

    fn description(&self) -> &str {
        "Describe this agent and list its capabilities"
    }

    async fn invoke(&self, ctx: &AgentContext, _args: Map<String, Value>) -> Result<Value> {
        let card = ctx.card();
        Ok(json!({
            "name": card.name,
            "description": card.description,
            "capabilities": ctx.capability_names(),
            "version": card.version,
        }))
    }
}

pub struct DiscoverAgents;

#[async_trait]
impl CapabilityHandler for DiscoverAgents {
    fn name(&self) -> &str {
        DISCOVER_AGENTS
    }

    fn description(&self) -> &str {
        "Find peer agents, optionally filtered by capability"
    }

    async fn invoke(&self, ctx: &AgentContext, args: Map<String, Value>) -> Result<Value> {
        let refresh = args.get("refresh").and_then(Value::as_bool).unwrap_or(false);
        Ok(discover(ctx, refresh, str_arg(&args, "capability")).await)
    }
}

enum PeerRequest<'a> {
    Capability(&'a str),
    Query(&'a str),
}

pub struct QueryAgent;

#[async_trait]
impl CapabilityHandler for QueryAgent {
    fn name(&self) -> &str {
        QUERY_AGENT
    }

    fn description(&self) -> &str {
        "Send a query or capability call to another agent"
    }

    async fn invoke(&self, ctx: &AgentContext, args: Map<String, Value>) -> Result<Value> {
        let Some(agent_name) = str_arg(&args, "agent_name") else {
            return Ok(json!({"error": "agent_name is required"}));
        };
        let request = match (str_arg(&args, "capability"), str_arg(&args, "query")) {
            (Some(capability), _) => PeerRequest::Capability(capability),
            (None, Some(query)) => PeerRequest::Query(query),
            (None, None) => {
                return Ok(json!({"error": "Either query or capability must be provided"}));
            }
        };

        let manifest = match ctx.known_agent(agent_name).await {
            Some(manifest) => Some(manifest),
            None => {
                debug!("Agent '{}' unknown, refreshing discovery", agent_name);
                discover(ctx, true, None).await;
                ctx.known_agent(agent_name).await
            }
        };
        let Some(manifest) = manifest else {
            return Ok(json!({"error": format!("Agent '{}' not found", agent_name)}));
        };

        let peer = ctx.peer(manifest);
        let outcome = match request {
            PeerRequest::Capability(capability) => {
                let capability_args = args
                    .get("capability_args")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                info!("Invoking {} on agent {}", capability, agent_name);
                peer.invoke_capability(capability, &capability_args).await
            }
            PeerRequest::Query(query) => {
                info!("Querying agent {}", agent_name);
                peer.send_task(query).await
            }
        };

        Ok(match outcome {
            Ok(response) => json!({
                "agent": agent_name,
                "response": response,
                "success": true,
            }),
            Err(e) => json!({
                "error": e.to_string(),
                "agent": agent_name,
                "success": false,
            }),
        })
    }
}

/// Handler for a capability the card declares but no code implements.
///
/// With an execution engine the call is phrased as a request and answered by
/// the engine; without one it reports itself as not implemented.
pub struct CardCapability {
    name: String,
    description: String,
}

impl CardCapability {
    pub fn from_descriptor(descriptor: &CapabilityDescriptor) -> Option<Self> {
        let name = descriptor.display_name()?;
        Some(Self {
            name: name.to_string(),
            description: descriptor.description.clone(),
        })
    }

    /// `"Please <description or name> key: value ..."`
    fn phrase(&self, args: &Map<String, Value>) -> String {
        let intent = if self.description.is_empty() {
            &self.name
        } else {
            &self.description
        };
        let mut request = format!("Please {}", intent);
        for (key, value) in args {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            request.push_str(&format!(" {}: {}", key, value));
        }
        request
    }
}

#[async_trait]
impl CapabilityHandler for CardCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, ctx: &AgentContext, args: Map<String, Value>) -> Result<Value> {
        if !ctx.has_engine() {
            return Ok(json!({
                "error": format!("Capability '{}' not implemented", self.name),
                "capability": self.name,
                "args": args,
            }));
        }
        let answer = ctx.run_query(&self.phrase(&args)).await?;
        Ok(Value::String(answer))
    }
}
