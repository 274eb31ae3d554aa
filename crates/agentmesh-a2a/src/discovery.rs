//! Discovery client — finds peer agents by fetching their cards
//!
//! Every fetch is independent: a peer that is down, slow or serving garbage
//! is logged and skipped, never surfaced to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use agentmesh_core::config::DiscoveryConfig;
use agentmesh_core::manifest::AGENT_CARD_PATH;
use agentmesh_core::{AgentManifest, MeshError, MeshResult};

const DISCOVER_PATH: &str = "/agent/discover";

/// Shared HTTP client. Timeouts are set per request, not here.
pub(crate) fn http_client() -> Client {
    Client::builder()
        .user_agent(concat!("agentmesh/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            warn!("Failed to build HTTP client ({}), using defaults", e);
            Client::new()
        })
}

/// Resolve `path` against `base` the way a browser would: an absolute path
/// replaces whatever path the base carries.
fn resolve(base: &str, path: &str) -> MeshResult<Url> {
    Url::parse(base)
        .and_then(|url| url.join(path))
        .map_err(|e| MeshError::Discovery {
            url: base.to_string(),
            reason: format!("invalid URL: {}", e),
        })
}

#[derive(Serialize)]
struct DiscoverRequest<'a> {
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    capabilities: &'a [String],
}

/// Cheap to clone; clones share one cache.
#[derive(Clone)]
pub struct DiscoveryClient {
    http: Client,
    config: DiscoveryConfig,
    cache: Arc<RwLock<HashMap<String, AgentManifest>>>,
}

impl DiscoveryClient {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self::with_client(config, http_client())
    }

    pub fn with_client(config: DiscoveryConfig, http: Client) -> Self {
        Self {
            http,
            config,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Fetch the card at `{base_url}/.well-known/agent-card.json`.
    ///
    /// On success the card is normalized, tagged with `base_url` and upserted
    /// into the cache under its name. Any failure yields `None` and leaves the
    /// cache untouched.
    pub async fn fetch_manifest(&self, base_url: &str) -> Option<AgentManifest> {
        match self.try_fetch(base_url).await {
            Ok(manifest) => {
                info!(
                    "Discovered agent '{}' at {} ({} capabilities)",
                    manifest.name,
                    base_url,
                    manifest.capabilities().len()
                );
                self.cache
                    .write()
                    .await
                    .insert(manifest.name.clone(), manifest.clone());
                Some(manifest)
            }
            Err(e) => {
                debug!("{}", e);
                None
            }
        }
    }

    async fn try_fetch(&self, base_url: &str) -> MeshResult<AgentManifest> {
        let fail = |reason: String| MeshError::Discovery {
            url: base_url.to_string(),
            reason,
        };

        let url = resolve(base_url, AGENT_CARD_PATH)?;
        debug!("Fetching agent card from {}", url);

        let resp = self
            .http
            .get(url)
            .timeout(self.config.timeout())
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(fail(format!("HTTP {}", resp.status())));
        }

        let value: Value = resp
            .json()
            .await
            .map_err(|e| fail(format!("unreadable card: {}", e)))?;
        AgentManifest::from_json(value, Some(base_url)).map_err(|e| fail(format!("{:#}", e)))
    }

    /// Probe `host` on every port concurrently. Successes come back in port order.
    pub async fn scan_ports(&self, host: &str, ports: &[u16]) -> Vec<AgentManifest> {
        let urls: Vec<String> = ports
            .iter()
            .map(|port| format!("http://{}:{}", host, port))
            .collect();
        self.fetch_all(&urls).await
    }

    /// Discover the configured host list, or scan the default ports when none
    /// is configured.
    pub async fn discover_from_config(&self) -> Vec<AgentManifest> {
        let urls = self.config.host_urls();
        if urls.is_empty() {
            debug!(
                "No discovery hosts configured, scanning {} on {:?}",
                self.config.default_host, self.config.default_ports
            );
            return self
                .scan_ports(&self.config.default_host, &self.config.default_ports)
                .await;
        }
        self.fetch_all(&urls).await
    }

    async fn fetch_all(&self, urls: &[String]) -> Vec<AgentManifest> {
        let found: Vec<AgentManifest> = join_all(urls.iter().map(|url| self.fetch_manifest(url)))
            .await
            .into_iter()
            .flatten()
            .collect();
        info!("Discovery found {} of {} agents", found.len(), urls.len());
        found
    }

    /// Cached agents offering `capability`, followed by matches among
    /// `extra_urls` that aren't already listed.
    pub async fn find_by_capability(
        &self,
        capability: &str,
        extra_urls: &[String],
    ) -> Vec<AgentManifest> {
        let mut matches: Vec<AgentManifest> = {
            let cache = self.cache.read().await;
            let mut cached: Vec<AgentManifest> = cache
                .values()
                .filter(|m| m.has_capability(capability))
                .cloned()
                .collect();
            cached.sort_by(|a, b| a.name.cmp(&b.name));
            cached
        };

        for url in extra_urls {
            if let Some(manifest) = self.fetch_manifest(url).await {
                if manifest.has_capability(capability)
                    && !matches.iter().any(|m| m.name == manifest.name)
                {
                    matches.push(manifest);
                }
            }
        }
        matches
    }

    /// Ask a running agent which peers it knows. Never fails: any problem
    /// is logged and yields an empty list.
    pub async fn query_discovery_endpoint(
        &self,
        agent_url: &str,
        required_capabilities: &[String],
    ) -> Vec<AgentManifest> {
        let url = match resolve(agent_url, DISCOVER_PATH) {
            Ok(url) => url,
            Err(e) => {
                warn!("{}", e);
                return Vec::new();
            }
        };

        let request = DiscoverRequest {
            capabilities: required_capabilities,
        };
        let resp = match self
            .http
            .post(url)
            .timeout(self.config.timeout())
            .json(&request)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Error querying discovery endpoint at {}: {}", agent_url, e);
                return Vec::new();
            }
        };

        if !resp.status().is_success() {
            warn!("Discovery endpoint returned {}", resp.status());
            return Vec::new();
        }

        let body: Value = match resp.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Discovery endpoint at {} sent bad JSON: {}", agent_url, e);
                return Vec::new();
            }
        };

        body.get("agents")
            .and_then(Value::as_array)
            .map(|agents| {
                agents
                    .iter()
                    .filter_map(|a| AgentManifest::from_json(a.clone(), None).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of the cache
    pub async fn discovered(&self) -> HashMap<String, AgentManifest> {
        self.cache.read().await.clone()
    }

    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
        info!("Cleared discovery cache");
    }
}
