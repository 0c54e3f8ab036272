use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use crate::error::DeployError;
use crate::pages::{AttachDomainRequest, DomainReport, PagesDeployRequest, PagesDeployResponse};

use super::{json_body, AppState};

pub async fn deploy(
    State(state): State<AppState>,
    body: Result<Json<PagesDeployRequest>, JsonRejection>,
) -> Result<Json<PagesDeployResponse>, DeployError> {
    let request = json_body(body)?;
    Ok(Json(state.orchestrator.pages().deploy(request).await?))
}

pub async fn attach_domain(
    State(state): State<AppState>,
    body: Result<Json<AttachDomainRequest>, JsonRejection>,
) -> Result<Json<DomainReport>, DeployError> {
    let request = json_body(body)?;
    Ok(Json(state.orchestrator.pages().attach_domain(request).await?))
}
