use serde_json::{json, Value};

use crate::common::{test_config, TestServer};

const PY_SERVER: &str = r#"import os
from http.server import BaseHTTPRequestHandler, HTTPServer


class Handler(BaseHTTPRequestHandler):
    def do_GET(self):
        body = ("hello from python " + self.path).encode()
        self.send_response(200)
        self.send_header("Content-Type", "text/plain")
        self.send_header("Content-Length", str(len(body)))
        self.end_headers()
        self.wfile.write(body)


HTTPServer((os.environ["HOST"], int(os.environ["PORT"])), Handler).serve_forever()
"#;

#[tokio::test]
async fn syntax_error_fails_and_registers_nothing() {
    let server = TestServer::start(test_config()).await;
    let resp = server
        .post_json(
            "/deploy-python",
            &json!({ "project_id": "bad", "files": { "app.py": "def broken(:\n    pass\n" } }),
        )
        .await;
    assert!(resp.status().is_client_error());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(!body["error"].as_str().unwrap().is_empty());

    let listing: Value = server.get("/python-projects").await.json().await.unwrap();
    assert_eq!(listing["count"], 0);
    server.shutdown().await;
}

#[tokio::test]
async fn python_server_is_proxied_and_logged() {
    let server = TestServer::start(test_config()).await;
    let resp = server
        .post_json("/deploy-python", &json!({ "project_id": "py1", "files": { "app.py": PY_SERVER } }))
        .await;
    assert_eq!(resp.status(), 200);

    let text = server.get("/python-app/py1/status").await.text().await.unwrap();
    assert_eq!(text, "hello from python /status");

    // BaseHTTPRequestHandler logs each request to stderr.
    let logs: Value = server.get("/python-logs/py1").await.json().await.unwrap();
    assert!(logs["lines"]
        .as_array()
        .unwrap()
        .iter()
        .any(|l| l.as_str().unwrap().contains("GET /status")));

    server.shutdown().await;
}

#[tokio::test]
async fn crashed_process_is_reaped_on_next_listing() {
    let server = TestServer::start(test_config()).await;
    let resp = server
        .post_json("/deploy-python", &json!({ "project_id": "crash", "files": { "app.py": PY_SERVER } }))
        .await;
    let body: Value = resp.json().await.unwrap();
    let pid = body["pid"].as_u64().unwrap() as i32;

    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), nix::sys::signal::Signal::SIGKILL).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let listing: Value = server.get("/python-projects").await.json().await.unwrap();
    assert_eq!(listing["count"], 0);
    assert_eq!(server.get("/python-app/crash/").await.status(), 404);
    server.shutdown().await;
}
