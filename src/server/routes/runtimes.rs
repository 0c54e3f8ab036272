use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::DeployError;
use crate::proxy::ProxyRequest;
use crate::runtime::manager::StopResponse;
use crate::runtime::{DeployRequest, DeployResponse, ProjectListing, RuntimeKind};

use super::{json_body, AppState};

/// Largest request body relayed to a project.
const MAX_PROXY_BODY: usize = 32 * 1024 * 1024;

pub async fn deploy(
    State(state): State<AppState>,
    kind: RuntimeKind,
    body: Result<Json<DeployRequest>, JsonRejection>,
) -> Result<Json<DeployResponse>, DeployError> {
    let request = json_body(body)?;
    let manager = state.orchestrator.manager(kind)?;
    Ok(Json(manager.deploy(request).await?))
}

pub async fn stop(
    State(state): State<AppState>,
    kind: RuntimeKind,
    Path(project_id): Path<String>,
) -> Result<Json<StopResponse>, DeployError> {
    let manager = state.orchestrator.manager(kind)?;
    Ok(Json(manager.stop(&project_id).await?))
}

#[derive(Serialize)]
pub struct Listing {
    pub success: bool,
    pub runtime: RuntimeKind,
    pub count: usize,
    pub projects: Vec<ProjectListing>,
}

pub async fn list(State(state): State<AppState>, kind: RuntimeKind) -> Result<Json<Listing>, DeployError> {
    let projects = state.orchestrator.manager(kind)?.list().await;
    Ok(Json(Listing {
        success: true,
        runtime: kind,
        count: projects.len(),
        projects,
    }))
}

#[derive(Serialize)]
pub struct Logs {
    pub success: bool,
    pub project_id: String,
    pub lines: Vec<String>,
}

pub async fn logs(
    State(state): State<AppState>,
    kind: RuntimeKind,
    Path(project_id): Path<String>,
) -> Result<Json<Logs>, DeployError> {
    let lines = state.orchestrator.manager(kind)?.logs(&project_id)?;
    Ok(Json(Logs {
        success: true,
        project_id,
        lines,
    }))
}

/// Path below `/<kind>-app/<project_id>`, taken from the raw request path
/// so percent-escapes like `%2F` and `%3F` reach the backend untouched.
fn forwarded_path(raw: &str) -> &str {
    raw.trim_start_matches('/').splitn(3, '/').nth(2).unwrap_or_default()
}

pub async fn proxy(
    State(state): State<AppState>,
    kind: RuntimeKind,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
) -> Result<Response, DeployError> {
    let project_id = params.get("project_id").map(String::as_str).unwrap_or_default();
    let (parts, body) = request.into_parts();
    let path = forwarded_path(parts.uri.path());
    let body: Bytes = axum::body::to_bytes(body, MAX_PROXY_BODY)
        .await
        .map_err(|e| DeployError::invalid(format!("could not read request body: {}", e)))?;
    let prefix = format!("/{}-app/{}", kind, project_id);

    state
        .orchestrator
        .forward(
            kind,
            ProxyRequest {
                project_id,
                prefix: &prefix,
                method: parts.method,
                path,
                query: parts.uri.query(),
                headers: &parts.headers,
                body,
            },
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_path_keeps_escapes() {
        assert_eq!(forwarded_path("/go-app/p1"), "");
        assert_eq!(forwarded_path("/go-app/p1/"), "");
        assert_eq!(forwarded_path("/go-app/p1/api/items"), "api/items");
        assert_eq!(forwarded_path("/go-app/p1/search%3Fq=1"), "search%3Fq=1");
        assert_eq!(forwarded_path("/go-app/p1/doc%23frag"), "doc%23frag");
        assert_eq!(forwarded_path("/go-app/p1/files/a%2Fb"), "files/a%2Fb");
        assert_eq!(forwarded_path("/go-app/p%31/x"), "x");
    }
}
