//! Connection to one discovered peer agent

use std::time::Duration;

use reqwest::Client;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use agentmesh_core::{AgentManifest, MeshError, MeshResult};

use crate::discovery::http_client;
use crate::protocol::{capability_call_text, message_send_request};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct PeerConnection {
    manifest: AgentManifest,
    http: Client,
    timeout: Duration,
}

impl PeerConnection {
    pub fn new(manifest: AgentManifest) -> Self {
        Self::with_client(manifest, http_client())
    }

    pub fn with_client(manifest: AgentManifest, http: Client) -> Self {
        Self {
            manifest,
            http,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn manifest(&self) -> &AgentManifest {
        &self.manifest
    }

    /// Where JSON-RPC calls go: the card's `endpoints.http`, else its `url`,
    /// else the base URL the card was discovered at.
    pub fn http_endpoint(&self) -> Option<String> {
        let non_empty = |s: &&String| !s.is_empty();
        self.manifest
            .endpoints
            .http
            .as_ref()
            .filter(non_empty)
            .cloned()
            .or_else(|| {
                self.manifest
                    .url
                    .as_ref()
                    .filter(non_empty)
                    .map(|url| url.trim_end_matches('/').to_string())
            })
            .or_else(|| self.manifest.discovered_at.clone().filter(|s| !s.is_empty()))
    }

    /// Send `text` as a `message/send` call.
    ///
    /// Only a missing endpoint is an `Err`. Transport failures, non-200
    /// replies and JSON-RPC errors come back as `{"error": ...}` values.
    pub async fn send_task(&self, text: &str) -> MeshResult<Value> {
        let endpoint = self
            .http_endpoint()
            .ok_or_else(|| MeshError::Connection(self.name().to_string()))?;
        let task_url = endpoint.trim_end_matches('/');

        let request = message_send_request(
            format!("msg-{}-{}", self.name(), uuid::Uuid::new_v4()),
            format!("req-{}", uuid::Uuid::new_v4()),
            text,
        );
        info!("Sending task to {} at {}", self.name(), task_url);

        let resp = match self
            .http
            .post(task_url)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                warn!("Task to {} timed out", self.name());
                return Ok(json!({"error": MeshError::Timeout(self.timeout).to_string()}));
            }
            Err(e) => {
                warn!("Error sending task to {}: {}", self.name(), e);
                return Ok(json!({"error": e.to_string()}));
            }
        };

        let status = resp.status();
        if !status.is_success() {
            warn!("Task request to {} failed: {}", self.name(), status);
            return Ok(json!({"error": format!("Request failed: {}", status.as_u16())}));
        }

        let mut body: Value = match resp.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Unreadable reply from {}: {}", self.name(), e);
                return Ok(json!({"error": format!("Invalid response: {}", e)}));
            }
        };

        if let Some(result) = body.get_mut("result").map(Value::take) {
            debug!("Reply from {}", self.name());
            return Ok(result);
        }
        if let Some(error) = body.get_mut("error").map(Value::take) {
            warn!("JSON-RPC error from {}: {}", self.name(), error);
            return Ok(json!({ "error": error }));
        }
        Ok(body)
    }

    /// Invoke a named capability; the call travels as the text of a task.
    pub async fn invoke_capability(
        &self,
        capability: &str,
        args: &Map<String, Value>,
    ) -> MeshResult<Value> {
        self.send_task(&capability_call_text(capability, args)).await
    }

    pub fn list_capabilities(&self) -> Vec<String> {
        self.manifest.advertised_names()
    }
}
