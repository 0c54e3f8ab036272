#![allow(dead_code)]
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use shipwright::config::model::ServerConfig;
use shipwright::orchestrator::Orchestrator;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub async fn wait_for_port(port: u16, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

pub async fn wait_for_port_release(port: u16, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Config suitable for tests: loopback, quick launch grace, short stop grace.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.server.host = "127.0.0.1".into();
    config.timeouts.launch_grace_ms = 1500;
    config.timeouts.terminate_grace_secs = 2;
    config
}

/// A running API server on a free port. Dropping it cancels the server.
pub struct TestServer {
    pub base: String,
    pub port: u16,
    pub orchestrator: Arc<Orchestrator>,
    pub client: reqwest::Client,
    cancel: CancellationToken,
    handle: Option<JoinHandle<anyhow::Result<()>>>,
}

impl TestServer {
    pub async fn start(mut config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        config.server.port = port;

        let orchestrator = Arc::new(Orchestrator::new(config).unwrap());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(shipwright::server::serve(
            orchestrator.clone(),
            listener,
            cancel.clone(),
        ));
        assert!(wait_for_port(port, Duration::from_secs(5)).await, "server did not start");

        Self {
            base: format!("http://127.0.0.1:{}", port),
            port,
            orchestrator,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(900))
                .build()
                .unwrap(),
            cancel,
            handle: Some(handle),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    pub async fn post_json(&self, path: &str, body: &serde_json::Value) -> reqwest::Response {
        self.client.post(self.url(path)).json(body).send().await.unwrap()
    }

    /// Stop the server and wait for every project to be torn down.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.await.unwrap().unwrap();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
