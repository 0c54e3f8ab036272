use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use axum::response::Response;
use tracing::debug;

use crate::error::DeployError;
use crate::runtime::LOOPBACK;

/// Request headers never forwarded to a backend.
const STRIPPED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "upgrade",
    "transfer-encoding",
    "content-length",
    "content-encoding",
];

/// Response headers that describe the backend hop, not the payload.
const STRIPPED_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "upgrade",
    "transfer-encoding",
    "content-length",
];

fn is_stripped(name: &HeaderName, list: &[&str]) -> bool {
    list.iter().any(|h| name.as_str().eq_ignore_ascii_case(h))
}

/// One forwarded request, already split out of the inbound route.
#[derive(Debug)]
pub struct ProxyRequest<'a> {
    pub project_id: &'a str,
    /// Mount point of the project, e.g. `/go-app/p1`.
    pub prefix: &'a str,
    pub method: Method,
    /// Path below the mount point, without a leading slash.
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub headers: &'a HeaderMap,
    pub body: Bytes,
}

/// Relays HTTP traffic to project servers on the loopback interface.
#[derive(Debug, Clone)]
pub struct ReverseProxy {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReverseProxy {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }

    pub fn target_url(port: u16, path: &str, query: Option<&str>) -> String {
        let mut url = format!("http://{}:{}/{}", LOOPBACK, port, path.trim_start_matches('/'));
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(q);
        }
        url
    }

    /// Forward `req` to the server on `port` and stream its response back.
    ///
    /// Connection refused maps to `BackendUnreachable` (still starting),
    /// an elapsed timeout to `Timeout`, anything else to `BackendFailed`.
    pub async fn forward(&self, port: u16, req: ProxyRequest<'_>) -> Result<Response, DeployError> {
        let url = Self::target_url(port, req.path, req.query);
        debug!(project_id = req.project_id, port, method = %req.method, "proxy -> {}", url);

        let mut headers = HeaderMap::with_capacity(req.headers.len() + 1);
        for (name, value) in req.headers {
            if !is_stripped(name, STRIPPED_REQUEST_HEADERS) {
                headers.append(name.clone(), value.clone());
            }
        }
        if let Ok(prefix) = req.prefix.parse() {
            headers.insert("x-forwarded-prefix", prefix);
        }
        if let Some(host) = req.headers.get("host") {
            headers.insert("x-forwarded-host", host.clone());
        }

        let upstream = self
            .client
            .request(req.method, &url)
            .headers(headers)
            .body(req.body)
            .send()
            .await
            .map_err(|e| self.classify(req.project_id, e))?;

        let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let mut response = Response::builder().status(status);
        if let Some(out) = response.headers_mut() {
            for (name, value) in upstream.headers() {
                if !is_stripped(name, STRIPPED_RESPONSE_HEADERS) {
                    out.append(name.clone(), value.clone());
                }
            }
        }

        response
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| DeployError::BackendFailed(e.to_string()))
    }

    fn classify(&self, project_id: &str, err: reqwest::Error) -> DeployError {
        if err.is_connect() {
            DeployError::BackendUnreachable(project_id.to_string())
        } else if err.is_timeout() {
            DeployError::Timeout {
                what: format!("request to project '{}'", project_id),
                after: self.timeout,
            }
        } else {
            DeployError::BackendFailed(err.to_string())
        }
    }
}
