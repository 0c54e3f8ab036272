pub mod android;
pub mod pages;
pub mod runtimes;
pub mod status;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::Uri;
use axum::routing::{any, get, post};
use axum::{Json, Router};

use crate::error::DeployError;
use crate::orchestrator::Orchestrator;
use crate::runtime::{DeployRequest, RuntimeKind};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Unwrap a JSON body, turning malformed input into a 400 with our error shape.
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, DeployError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| DeployError::invalid(format!("invalid request body: {}", e.body_text())))
}

async fn not_found(uri: Uri) -> DeployError {
    DeployError::NotFound(format!("route '{}'", uri.path()))
}

fn runtime_routes(router: Router<AppState>, kind: RuntimeKind) -> Router<AppState> {
    let proxy = move |state: State<AppState>, path: Path<HashMap<String, String>>, req: Request| {
        runtimes::proxy(state, kind, path, req)
    };
    router
        .route(
            &format!("/deploy-{}", kind),
            post(
                move |state: State<AppState>, body: Result<Json<DeployRequest>, JsonRejection>| {
                    runtimes::deploy(state, kind, body)
                },
            ),
        )
        .route(
            &format!("/stop-{}/{{project_id}}", kind),
            post(move |state: State<AppState>, path: Path<String>| runtimes::stop(state, kind, path)),
        )
        .route(
            &format!("/{}-projects", kind),
            get(move |state: State<AppState>| runtimes::list(state, kind)),
        )
        .route(
            &format!("/{}-logs/{{project_id}}", kind),
            get(move |state: State<AppState>, path: Path<String>| runtimes::logs(state, kind, path)),
        )
        .route(&format!("/{}-app/{{project_id}}", kind), any(proxy))
        .route(&format!("/{}-app/{{project_id}}/", kind), any(proxy))
        .route(&format!("/{}-app/{{project_id}}/{{*path}}", kind), any(proxy))
}

pub fn router(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(status::health))
        .route("/runtime-status", get(status::runtime_status))
        .route("/deploy-pages", post(pages::deploy))
        .route("/pages/attach-domain", post(pages::attach_domain))
        .route("/build-android", post(android::build))
        .route("/download-apk/{project_id}", get(android::download))
        .route("/android-builds", get(android::list));

    RuntimeKind::ALL
        .into_iter()
        .fold(router, runtime_routes)
        .fallback(not_found)
        .with_state(state)
}
