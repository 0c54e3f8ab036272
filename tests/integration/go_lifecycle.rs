use std::time::Duration;

use serde_json::{json, Value};

use crate::common::{test_config, wait_for_port_release, TestServer};

const GO_SERVER: &str = r#"package main

import (
	"fmt"
	"net/http"
	"os"
)

func main() {
	http.HandleFunc("/", func(w http.ResponseWriter, r *http.Request) {
		fmt.Fprintf(w, "hello from go %s %s", r.Method, r.URL.Path)
	})
	http.ListenAndServe(os.Getenv("HOST")+":"+os.Getenv("PORT"), nil)
}
"#;

fn deploy_body(id: &str) -> Value {
    json!({ "project_id": id, "files": { "main.go": GO_SERVER } })
}

#[tokio::test]
async fn deploy_proxy_stop_go_project() {
    let server = TestServer::start(test_config()).await;

    let resp = server.post_json("/deploy-go", &deploy_body("p1")).await;
    assert_eq!(resp.status(), 200);
    let deployed: Value = resp.json().await.unwrap();
    assert_eq!(deployed["success"], true);
    let port = deployed["port"].as_u64().unwrap();
    assert!(port >= 10000);
    assert!(deployed["url"].as_str().unwrap().ends_with("/go-app/p1/"));

    let text = server.get("/go-app/p1/").await.text().await.unwrap();
    assert_eq!(text, "hello from go GET /");
    let text = server.get("/go-app/p1/api/items?x=1").await.text().await.unwrap();
    assert_eq!(text, "hello from go GET /api/items");

    let listing: Value = server.get("/go-projects").await.json().await.unwrap();
    assert_eq!(listing["count"], 1);
    assert_eq!(listing["projects"][0]["status"], "running");
    assert_eq!(listing["projects"][0]["port"], port);

    let resp = server.client.post(server.url("/stop-go/p1")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(wait_for_port_release(port as u16, Duration::from_secs(5)).await);

    assert_eq!(server.get("/go-app/p1/").await.status(), 404);
    let resp = server.client.post(server.url("/stop-go/p1")).send().await.unwrap();
    assert_eq!(resp.status(), 404);

    server.shutdown().await;
}

#[tokio::test]
async fn redeploy_keeps_exactly_one_process() {
    let server = TestServer::start(test_config()).await;

    let first: Value = server.post_json("/deploy-go", &deploy_body("same")).await.json().await.unwrap();
    let first_pid = first["pid"].as_u64().unwrap() as u32;
    let second: Value = server.post_json("/deploy-go", &deploy_body("same")).await.json().await.unwrap();
    assert_eq!(second["success"], true);
    assert_ne!(second["pid"].as_u64().unwrap() as u32, first_pid);

    let listing: Value = server.get("/go-projects").await.json().await.unwrap();
    assert_eq!(listing["count"], 1);
    assert!(!shipwright::platform::is_process_alive(first_pid));

    server.shutdown().await;
}

#[tokio::test]
async fn concurrent_deploys_get_distinct_ports() {
    let server = TestServer::start(test_config()).await;

    let (a, b) = tokio::join!(
        server.post_json("/deploy-go", &deploy_body("left")),
        server.post_json("/deploy-go", &deploy_body("right")),
    );
    let a: Value = a.json().await.unwrap();
    let b: Value = b.json().await.unwrap();
    assert_eq!(a["success"], true);
    assert_eq!(b["success"], true);
    assert_ne!(a["port"], b["port"]);

    let ports: Vec<u16> = [&a, &b].iter().map(|v| v["port"].as_u64().unwrap() as u16).collect();
    server.shutdown().await;
    for port in ports {
        assert!(wait_for_port_release(port, Duration::from_secs(5)).await);
    }
}

#[tokio::test]
async fn compile_error_returns_build_output() {
    let server = TestServer::start(test_config()).await;
    let resp = server
        .post_json(
            "/deploy-go",
            &json!({ "project_id": "broken", "files": { "main.go": "package main\nfunc main() { undefinedCall() }\n" } }),
        )
        .await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["build_error"].as_str().unwrap().contains("undefined"));

    let listing: Value = server.get("/go-projects").await.json().await.unwrap();
    assert_eq!(listing["count"], 0);
    server.shutdown().await;
}
