use async_trait::async_trait;
use axum::{routing::get, Router};
use fault_agent::{run_agent, Args as AgentArgs, ConfigSubscriber, RuleSource, TransportError, UpdateStream};
use fault_core::pb::{PayloadFormat, RuleSetUpdate};
use fault_core::{BackoffConfig, CertificateAuthority, ProxyServer, RuleStore, SidecarConfig, SubscriptionState};
use serde_json::Value;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

// Helper to find a free port
async fn get_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn start_upstream() -> u16 {
    let port = get_free_port().await;
    let app = Router::new()
        .route("/api/x", get(|| async { "upstream api" }))
        .route("/health", get(|| async { "upstream ok" }));
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

/// Control plane double: one subscription fed from a test-owned channel.
struct ChannelSource {
    updates: Mutex<Option<mpsc::UnboundedReceiver<RuleSetUpdate>>>,
}

#[async_trait]
impl RuleSource for ChannelSource {
    async fn subscribe(&self, _last_version: Option<String>) -> Result<UpdateStream, TransportError> {
        let updates = self.updates.lock().unwrap().take();
        match updates {
            Some(rx) => Ok(Box::pin(UnboundedReceiverStream::new(rx).map(Ok))),
            None => Err(TransportError::Connect("already subscribed".into())),
        }
    }
}

fn json_update(version: &str, rules: &str) -> RuleSetUpdate {
    RuleSetUpdate {
        version: version.to_string(),
        format: PayloadFormat::Json as i32,
        payload: format!(r#"{{"version": "{version}", "rules": {rules}}}"#).into_bytes(),
    }
}

fn proxied_client(proxy_port: u16) -> reqwest::Client {
    reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://127.0.0.1:{}", proxy_port)).unwrap())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_streamed_rules_drive_the_proxy() {
    let _ = tracing_subscriber::fmt::try_init();
    let cert_dir = tempfile::tempdir().unwrap();

    let upstream_port = start_upstream().await;
    let proxy_port = get_free_port().await;
    let admin_port = get_free_port().await;

    // 1. Subscriber fed by the fake control plane
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let store = Arc::new(RuleStore::new());
    let subscriber = ConfigSubscriber::new(
        ChannelSource {
            updates: Mutex::new(Some(updates_rx)),
        },
        store.clone(),
        BackoffConfig::default(),
    );
    let mut status = subscriber.status();
    tokio::spawn(subscriber.run());

    // 2. Proxy
    let config = SidecarConfig {
        listen_port: proxy_port,
        admin_port,
        ..Default::default()
    };
    let ca = CertificateAuthority::load_or_generate(cert_dir.path(), 30).unwrap();
    let server = ProxyServer::new(config, ca, store).with_subscriber_status(status.clone());
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!("Proxy failed: {}", e);
        }
    });
    tokio::time::sleep(Duration::from_millis(500)).await;

    let client = proxied_client(proxy_port);
    let target = format!("http://127.0.0.1:{}/api/x", upstream_port);

    // 3. Nothing published yet: passthrough
    let resp = client.get(&target).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    // 4. Abort rule arrives
    updates_tx
        .send(json_update(
            "v1",
            r#"[{"name": "api-down", "match": {"path": {"prefix": "/api"}},
                 "fault": {"percentage": 100, "abort": {"status": 503}}}]"#,
        ))
        .unwrap();
    status.wait_for(|s| s.updates_applied == 1).await.unwrap();
    let resp = client.get(&target).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 503);

    // 5. Broken update is ignored
    updates_tx
        .send(json_update(
            "v2",
            r#"[{"name": "bad", "fault": {"percentage": 150, "abort": {"status": 500}}}]"#,
        ))
        .unwrap();
    status.wait_for(|s| s.updates_rejected == 1).await.unwrap();
    let resp = client.get(&target).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 503);

    // 6. Empty rule set lifts the fault
    updates_tx.send(json_update("v3", "[]")).unwrap();
    status.wait_for(|s| s.updates_applied == 2).await.unwrap();
    let resp = client.get(&target).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().await.unwrap(), "upstream api");

    // 7. Admin view
    let health: Value = reqwest::get(format!("http://127.0.0.1:{}/health", admin_port))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["rule_set_version"], "v3");
    assert_eq!(health["subscriber"]["state"], "streaming");
    assert_eq!(health["subscriber"]["updates_rejected"], 1);
    assert_eq!(status.borrow().state, SubscriptionState::Streaming);
}

#[tokio::test]
async fn test_agent_serves_bootstrap_rules_while_control_plane_is_down() {
    let _ = tracing_subscriber::fmt::try_init();
    let cert_dir = tempfile::tempdir().unwrap();

    let upstream_port = start_upstream().await;
    let agent_port = get_free_port().await;
    let agent_admin_port = get_free_port().await;
    let dead_control_plane = get_free_port().await;

    let mut rules = tempfile::NamedTempFile::new().unwrap();
    rules
        .write_all(
            br#"{"version": "boot", "rules": [{"name": "api-teapot",
                "match": {"path": {"prefix": "/api"}, "method": {"exact": "GET"}},
                "fault": {"percentage": 100, "abort": {"status": 418, "body": "bootstrap"}}}]}"#,
        )
        .unwrap();

    let agent_args = AgentArgs {
        listen_addr: Some("127.0.0.1".to_string()),
        listen_port: Some(agent_port),
        admin_port: Some(agent_admin_port),
        control_plane_url: Some(format!("http://127.0.0.1:{}", dead_control_plane)),
        node_id: Some("e2e-node".to_string()),
        cert_dir: Some(cert_dir.path().to_string_lossy().to_string()),
        bootstrap_rules: Some(rules.path().to_path_buf()),
        backoff_base_ms: Some(50),
        backoff_max_ms: Some(200),
        ..Default::default()
    };

    // Spawn Agent
    tokio::spawn(async move {
        if let Err(e) = run_agent(agent_args).await {
            tracing::error!("Agent failed: {}", e);
        }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    let client = proxied_client(agent_port);
    let resp = client
        .get(format!("http://127.0.0.1:{}/api/x", upstream_port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 418);
    assert_eq!(resp.text().await.unwrap(), "bootstrap");

    let resp = client
        .get(format!("http://127.0.0.1:{}/health", upstream_port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "upstream ok");

    let health: Value = reqwest::get(format!("http://127.0.0.1:{}/health", agent_admin_port))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["rule_set_version"], "boot");
    assert_ne!(health["subscriber"]["state"], "streaming");
    assert!(health["subscriber"]["attempt"].as_u64().unwrap() >= 1);
}
