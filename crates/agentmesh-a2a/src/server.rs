//! A2A HTTP server — serves the agent card and JSON-RPC at the root path
//!
//! Routes:
//! - `GET /.well-known/agent-card.json` — this agent's card
//! - `POST /` — JSON-RPC `message/send`, `tasks/get`, `tasks/cancel`
//! - `POST /agent/discover` — peers this agent knows, filtered by capability

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use agentmesh_core::AgentManifest;
use agentmesh_core::manifest::AGENT_CARD_PATH;

use crate::dispatcher::Dispatcher;
use crate::protocol::*;

#[derive(Debug, Default, Deserialize)]
struct DiscoverQuery {
    #[serde(default)]
    capabilities: Vec<String>,
}

#[derive(Clone)]
pub struct A2aServer {
    dispatcher: Dispatcher,
}

impl A2aServer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn router(self) -> Router {
        Router::new()
            .route(AGENT_CARD_PATH, get(agent_card))
            .route("/", post(json_rpc))
            .route("/agent/discover", post(discover))
            .with_state(self)
    }

    /// Serve on an already-bound listener until the task is dropped.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr().context("Listener has no local address")?;
        info!(
            "A2A server for '{}' listening on http://{}",
            self.dispatcher.card().name,
            addr
        );
        axum::serve(listener, self.router())
            .await
            .context("A2A server stopped")
    }

    pub async fn bind(self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        self.serve(listener).await
    }

    /// Handle one JSON-RPC request. Every request gets a response.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone().unwrap_or(Value::Null);

        match request.method.as_str() {
            MESSAGE_SEND => {
                let params: MessageSendParams = match serde_json::from_value(request.params) {
                    Ok(params) => params,
                    Err(e) => {
                        return JsonRpcResponse::error(
                            id,
                            INVALID_PARAMS,
                            format!("Invalid params: {}", e),
                        );
                    }
                };
                debug!("message/send {}", params.message.message_id);
                let reply = self.dispatcher.execute(&params.message).await;
                respond(id, &reply)
            }

            TASKS_GET => {
                let params: TaskQueryParams = match serde_json::from_value(request.params) {
                    Ok(params) => params,
                    Err(e) => {
                        return JsonRpcResponse::error(
                            id,
                            INVALID_PARAMS,
                            format!("Invalid params: {}", e),
                        );
                    }
                };
                match self.dispatcher.task(&params.id) {
                    Some(task) => respond(id, &task),
                    None => JsonRpcResponse::error(id, TASK_NOT_FOUND, "Task not found"),
                }
            }

            TASKS_CANCEL => respond(id, &self.dispatcher.cancel()),

            _ => {
                warn!("A2A unknown method: {}", request.method);
                JsonRpcResponse::error(
                    id,
                    METHOD_NOT_FOUND,
                    format!("Unknown method: {}", request.method),
                )
            }
        }
    }

    /// Peers this agent has discovered that offer every capability in `required`.
    pub async fn known_agents(&self, required: &[String]) -> Vec<AgentManifest> {
        let context = self.dispatcher.context();
        let mut agents: BTreeMap<String, AgentManifest> =
            context.discovery().discovered().await.into_iter().collect();
        for agent in context.known_agents().await {
            agents.insert(agent.name.clone(), agent);
        }

        agents
            .into_values()
            .filter(|agent| required.iter().all(|cap| agent.has_capability(cap)))
            .collect()
    }
}

fn respond<T: Serialize>(id: Value, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Serialization failed: {}", e)),
    }
}

async fn agent_card(State(server): State<A2aServer>) -> Json<AgentManifest> {
    Json(server.dispatcher.card().clone())
}

async fn json_rpc(State(server): State<A2aServer>, body: String) -> Json<JsonRpcResponse> {
    let value: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) => {
            warn!("A2A parse error: {}", e);
            return Json(JsonRpcResponse::error(
                Value::Null,
                PARSE_ERROR,
                format!("Parse error: {}", e),
            ));
        }
    };
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            return Json(JsonRpcResponse::error(
                id,
                INVALID_REQUEST,
                format!("Invalid request: {}", e),
            ));
        }
    };
    Json(server.handle_request(request).await)
}

async fn discover(
    State(server): State<A2aServer>,
    Json(query): Json<DiscoverQuery>,
) -> Json<Value> {
    let agents = server.known_agents(&query.capabilities).await;
    debug!("Discovery endpoint returning {} agents", agents.len());
    Json(json!({ "agents": agents }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh_core::CapabilityDescriptor;

    fn server() -> A2aServer {
        let card = AgentManifest::new("inventory", "Tracks stock")
            .with_capability(CapabilityDescriptor::named("check_stock"));
        A2aServer::new(Dispatcher::builder(card).build())
    }

    fn request(method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(json!("r1")),
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn test_message_send() {
        let req = message_send_request("m1".into(), "r1".into(), "hello");
        let resp = server().handle_request(req).await;
        assert_eq!(resp.id, json!("r1"));
        let text = response_text(&resp.result.unwrap()).unwrap();
        assert_eq!(text, "inventory received query: hello");
    }

    #[tokio::test]
    async fn test_message_send_bad_params() {
        let resp = server()
            .handle_request(request(MESSAGE_SEND, json!({"msg": 1})))
            .await;
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_tasks_get_unknown() {
        let resp = server()
            .handle_request(request(TASKS_GET, json!({"id": "nope"})))
            .await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, TASK_NOT_FOUND);
        assert_eq!(err.message, "Task not found");
    }

    #[tokio::test]
    async fn test_tasks_get_known() {
        let server = server();
        let id = server.dispatcher().tasks().register("q");
        let resp = server
            .handle_request(request(TASKS_GET, json!({ "id": id })))
            .await;
        assert_eq!(resp.result.unwrap()["status"], "running");
    }

    #[tokio::test]
    async fn test_tasks_cancel() {
        let resp = server().handle_request(request(TASKS_CANCEL, json!({}))).await;
        let text = response_text(&resp.result.unwrap()).unwrap();
        assert_eq!(text, crate::dispatcher::CANCEL_NOTICE);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let resp = server().handle_request(request("tasks/resubscribe", json!({}))).await;
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_known_agents_filter() {
        let server = server();
        let context = server.dispatcher().context();
        context
            .remember_agents(&[
                AgentManifest::new("sales", "").with_capability(CapabilityDescriptor::named("revenue")),
                AgentManifest::new("product", ""),
            ])
            .await;

        assert_eq!(server.known_agents(&[]).await.len(), 2);
        let matching = server.known_agents(&["revenue".to_string()]).await;
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].name, "sales");
    }
}
