//! End-to-end tests against real HTTP peers on loopback

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;

use agentmesh_a2a::protocol::{self, response_text};
use agentmesh_a2a::{A2aServer, DiscoveryClient, Dispatcher, PeerConnection};
use agentmesh_core::config::DiscoveryConfig;
use agentmesh_core::{AgentManifest, BlockingEngine, CapabilityDescriptor, MeshConfig, TaskStatus};

async fn spawn(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn spawn_agent(dispatcher: Dispatcher) -> String {
    spawn(A2aServer::new(dispatcher).router()).await
}

fn card_router(card: Value) -> Router {
    Router::new().route(
        "/.well-known/agent-card.json",
        get(move || {
            let card = card.clone();
            async move { Json(card) }
        }),
    )
}

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn port_of(base: &str) -> u16 {
    base.rsplit(':').next().unwrap().parse().unwrap()
}

fn client() -> DiscoveryClient {
    DiscoveryClient::new(DiscoveryConfig {
        timeout_secs: 2,
        ..DiscoveryConfig::default()
    })
}

#[tokio::test]
async fn fetch_manifest_normalizes_and_tags() {
    let base = spawn(card_router(json!({"name": "X", "capabilities": [{"name": "ping"}]}))).await;

    let client = client();
    let manifest = client.fetch_manifest(&base).await.unwrap();
    assert_eq!(manifest.capabilities(), &[CapabilityDescriptor::named("ping")]);
    assert_eq!(manifest.discovered_at.as_deref(), Some(base.as_str()));
    assert_eq!(client.cached_count().await, 1);
}

#[tokio::test]
async fn fetch_missing_card_is_none() {
    let base = spawn(Router::new()).await;
    let client = client();
    assert!(client.fetch_manifest(&base).await.is_none());
    assert_eq!(client.cached_count().await, 0);
}

#[tokio::test]
async fn refetch_overwrites_cache_entry() {
    let card = Arc::new(Mutex::new(json!({"name": "X", "version": "1.0.0"})));
    let served = Arc::clone(&card);
    let base = spawn(Router::new().route(
        "/.well-known/agent-card.json",
        get(move || {
            let card = served.lock().unwrap().clone();
            async move { Json(card) }
        }),
    ))
    .await;

    let client = client();
    client.fetch_manifest(&base).await.unwrap();
    client.fetch_manifest(&base).await.unwrap();
    assert_eq!(client.cached_count().await, 1);

    card.lock().unwrap()["version"] = json!("2.0.0");
    client.fetch_manifest(&base).await.unwrap();
    assert_eq!(client.discovered().await["X"].version, "2.0.0");
    assert_eq!(client.cached_count().await, 1);

    client.clear_cache().await;
    assert_eq!(client.cached_count().await, 0);
}

#[tokio::test]
async fn scan_skips_unreachable_port_and_keeps_order() {
    let first = spawn(card_router(json!({"name": "one"}))).await;
    let third = spawn(card_router(json!({"name": "three"}))).await;
    let ports = [port_of(&first), closed_port(), port_of(&third)];

    let found = client().scan_ports("127.0.0.1", &ports).await;
    let names: Vec<&str> = found.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["one", "three"]);
}

#[tokio::test]
async fn discover_from_configured_hosts() {
    let base = spawn(card_router(json!({"name": "sales"}))).await;
    let client = DiscoveryClient::new(DiscoveryConfig {
        hosts: format!("127.0.0.1:{}, 127.0.0.1:{}", port_of(&base), closed_port()),
        ..DiscoveryConfig::default()
    });
    let found = client.discover_from_config().await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "sales");
}

#[tokio::test]
async fn skills_and_capabilities_are_equivalent() {
    let via_skills = spawn(card_router(json!({
        "name": "a",
        "skills": [{"id": "ping", "name": "ping"}, {"id": "lookup", "name": "lookup"}]
    })))
    .await;
    let via_caps = spawn(card_router(json!({
        "name": "b",
        "capabilities": [{"name": "ping"}, {"name": "lookup"}]
    })))
    .await;

    let client = client();
    let a = client.fetch_manifest(&via_skills).await.unwrap();
    let b = client.fetch_manifest(&via_caps).await.unwrap();
    assert_eq!(
        PeerConnection::new(a).list_capabilities(),
        PeerConnection::new(b).list_capabilities()
    );

    let found = client.find_by_capability("lookup", &[]).await;
    let names: Vec<&str> = found.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[tokio::test]
async fn find_by_capability_checks_extra_urls() {
    let extra = spawn(card_router(json!({"name": "late", "skills": [{"id": "ping"}]}))).await;
    let client = client();
    assert!(client.find_by_capability("ping", &[]).await.is_empty());

    let found = client.find_by_capability("ping", &[extra]).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "late");
}

#[tokio::test]
async fn invoke_capability_sends_json_text() {
    let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
    let recorder = Arc::clone(&seen);
    let base = spawn(Router::new().route(
        "/",
        post(move |Json(body): Json<Value>| {
            recorder.lock().unwrap().push(body.clone());
            async move {
                Json(json!({
                    "jsonrpc": "2.0",
                    "id": body["id"],
                    "result": protocol::Message::agent_text("pong"),
                }))
            }
        }),
    ))
    .await;

    let peer = PeerConnection::new(AgentManifest::new("X", "").normalize(Some(&base)));
    let result = peer.invoke_capability("ping", &Map::new()).await.unwrap();
    assert_eq!(response_text(&result).as_deref(), Some("pong"));

    let bodies = seen.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    let body = &bodies[0];
    assert_eq!(body["method"], "message/send");
    assert_eq!(body["params"]["message"]["role"], "user");
    assert_eq!(
        body["params"]["message"]["parts"][0]["text"],
        r#"{"capability":"ping","args":{}}"#
    );
    assert!(body["id"].as_str().unwrap().starts_with("req-"));
    assert!(
        body["params"]["message"]["messageId"]
            .as_str()
            .unwrap()
            .starts_with("msg-X-")
    );
}

#[tokio::test]
async fn peer_http_failure_is_error_value() {
    let base = spawn(Router::new().route("/", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))).await;
    let peer = PeerConnection::new(AgentManifest::new("X", "").normalize(Some(&base)));
    let reply = peer.send_task("hi").await.unwrap();
    assert_eq!(reply, json!({"error": "Request failed: 500"}));
}

#[tokio::test]
async fn peer_jsonrpc_error_is_surfaced() {
    let base = spawn(Router::new().route(
        "/",
        post(|| async {
            Json(json!({"jsonrpc": "2.0", "id": "r", "error": {"code": -32601, "message": "nope"}}))
        }),
    ))
    .await;
    let peer = PeerConnection::new(AgentManifest::new("X", "").normalize(Some(&base)));
    let reply = peer.send_task("hi").await.unwrap();
    assert_eq!(reply, json!({"error": {"code": -32601, "message": "nope"}}));
}

#[tokio::test]
async fn peer_body_without_result_is_returned_whole() {
    let base = spawn(Router::new().route("/", post(|| async { Json(json!({"status": "ok"})) }))).await;
    let peer = PeerConnection::new(AgentManifest::new("X", "").normalize(Some(&base)));
    assert_eq!(peer.send_task("hi").await.unwrap(), json!({"status": "ok"}));
}

#[tokio::test]
async fn served_agent_answers_capability_calls() {
    let dispatcher = Dispatcher::builder(AgentManifest::new("inventory", "Tracks stock")).build();
    dispatcher.register_fn("check_stock", "Units on hand", |args| {
        Ok(json!({"sku": args.get("sku"), "qty": 7}))
    });
    let base = spawn_agent(dispatcher.clone()).await;

    let client = client();
    let card = client.fetch_manifest(&base).await.unwrap();
    assert_eq!(card.name, "inventory");
    let peer = PeerConnection::new(card);

    let mut args = Map::new();
    args.insert("sku".into(), json!("A-1"));
    let result = peer.invoke_capability("check_stock", &args).await.unwrap();
    let reply: Value = serde_json::from_str(&response_text(&result).unwrap()).unwrap();
    assert_eq!(reply, json!({"sku": "A-1", "qty": 7}));

    let result = peer.invoke_capability("unknown_x", &Map::new()).await.unwrap();
    let reply: Value = serde_json::from_str(&response_text(&result).unwrap()).unwrap();
    assert_eq!(reply, json!({"error": "No recognized capability or query in message"}));

    let result = peer.invoke_capability("get_agent_info", &Map::new()).await.unwrap();
    let info: Value = serde_json::from_str(&response_text(&result).unwrap()).unwrap();
    assert_eq!(info["capabilities"], json!(dispatcher.capability_names()));
}

#[tokio::test]
async fn raw_jsonrpc_errors() {
    let base = spawn_agent(Dispatcher::builder(AgentManifest::new("a", "")).build()).await;
    let http = reqwest::Client::new();

    let resp: Value = http
        .post(&base)
        .header("content-type", "application/json")
        .body("not json")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["error"]["code"], protocol::PARSE_ERROR);

    let resp: Value = http
        .post(&base)
        .json(&json!({"jsonrpc": "2.0", "id": 3, "method": "tasks/get", "params": {"id": "none"}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["id"], 3);
    assert_eq!(resp["error"]["code"], protocol::TASK_NOT_FOUND);
}

#[tokio::test]
async fn async_task_is_polled_over_http() {
    let dispatcher = Dispatcher::builder(AgentManifest::new("analyst", ""))
        .engine(BlockingEngine::new(|q| {
            std::thread::sleep(Duration::from_millis(50));
            Ok(format!("done: {}", q))
        }))
        .async_policy(|q| q.starts_with("report"))
        .build();
    let base = spawn_agent(dispatcher).await;
    let peer = PeerConnection::new(AgentManifest::new("analyst", "").normalize(Some(&base)));

    let ack = response_text(&peer.send_task("report on Q3").await.unwrap()).unwrap();
    let task_id = ack
        .lines()
        .find_map(|line| line.strip_prefix("Task ID: "))
        .unwrap()
        .to_string();

    let http = reqwest::Client::new();
    let mut task = Value::Null;
    for _ in 0..100 {
        let resp: Value = http
            .post(&base)
            .json(&json!({"jsonrpc": "2.0", "id": "p", "method": "tasks/get", "params": {"id": task_id}}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        task = resp["result"].clone();
        if task["status"] != "running" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(task["status"], json!(TaskStatus::Completed));
    assert_eq!(task["result"], "done: report on Q3");
}

#[tokio::test]
async fn query_agent_discovers_and_calls_peer() {
    let sales_card = AgentManifest::new("sales", "Sales analytics")
        .with_capability(CapabilityDescriptor::named("revenue").with_description("report revenue"));
    let sales = Dispatcher::builder(sales_card).build();
    sales.register_fn("revenue", "", |_| Ok(json!({"total": 1200})));
    let sales_url = spawn_agent(sales).await;

    let mut config = MeshConfig::default();
    config.discovery.hosts = format!("127.0.0.1:{}", port_of(&sales_url));
    config.discovery.timeout_secs = 2;
    let coordinator = Dispatcher::builder(AgentManifest::new("coordinator", ""))
        .config(config)
        .build();

    let reply = coordinator
        .query_other_agent("sales", None, Some("revenue"), Map::new())
        .await;
    assert_eq!(reply["success"], true);
    assert_eq!(reply["agent"], "sales");
    let text = response_text(&reply["response"]).unwrap();
    assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), json!({"total": 1200}));

    let missing = coordinator
        .query_other_agent("billing", Some("hi"), None, Map::new())
        .await;
    assert_eq!(missing, json!({"error": "Agent 'billing' not found"}));

    // The coordinator now advertises what it found.
    let coordinator_url = spawn_agent(coordinator.clone()).await;
    let listed = client()
        .query_discovery_endpoint(&coordinator_url, &["revenue".to_string()])
        .await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "sales");
    assert!(
        client()
            .query_discovery_endpoint(&coordinator_url, &["shipping".to_string()])
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn discover_agents_capability_filter() {
    let sales = spawn(card_router(json!({"name": "sales", "capabilities": [{"name": "revenue"}]}))).await;
    let product = spawn(card_router(json!({"name": "product", "skills": [{"id": "catalog"}]}))).await;

    let mut config = MeshConfig::default();
    config.discovery.hosts = format!("127.0.0.1:{},127.0.0.1:{}", port_of(&sales), port_of(&product));
    let dispatcher = Dispatcher::builder(AgentManifest::new("coordinator", ""))
        .config(config)
        .build();

    let ask = |text: &'static str| {
        let dispatcher = dispatcher.clone();
        async move {
            let reply = dispatcher
                .execute(&protocol::Message::user_text("m", text))
                .await;
            serde_json::from_str::<Value>(reply.first_text().unwrap()).unwrap()
        }
    };

    let all = ask(r#"{"capability":"discover_agents","args":{"refresh":true}}"#).await;
    assert_eq!(all["count"], 2);
    assert_eq!(all["agents"][0]["name"], "sales");
    assert_eq!(all["agents"][0]["endpoint"], json!(sales));

    let filtered = ask(r#"{"capability":"discover_agents","args":{"capability":"catalog"}}"#).await;
    assert_eq!(filtered["count"], 1);
    assert_eq!(filtered["agents"][0]["name"], "product");
    assert_eq!(filtered["agents"][0]["capabilities"], json!(["catalog"]));
}

#[tokio::test]
async fn agent_built_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let card_path = dir.path().join("agent-card.json");
    let config_path = dir.path().join("agentmesh.toml");
    std::fs::write(
        &card_path,
        r#"{"name": "product", "skills": [{"id": "catalog", "description": "list the catalog"}]}"#,
    )
    .unwrap();
    std::fs::write(&config_path, "[dispatch]\nquick_timeout_secs = 3\n").unwrap();

    let defaults = agentmesh_core::ManifestDefaults {
        name: "fallback".into(),
        description: String::new(),
        capabilities: Vec::new(),
        host: "localhost".into(),
        port: 8001,
    };
    let card = AgentManifest::load_or_default(&card_path, &defaults);
    let config = MeshConfig::load(&config_path).unwrap();
    assert_eq!(config.dispatch.quick_timeout_secs, 3);

    let dispatcher = Dispatcher::builder(card).config(config).build();
    assert_eq!(dispatcher.card().name, "product");
    assert!(dispatcher.capability_names().contains(&"catalog".to_string()));

    let base = spawn_agent(dispatcher).await;
    let served = client().fetch_manifest(&base).await.unwrap();
    assert_eq!(served.skills()[0].id.as_deref(), Some("catalog"));
}
