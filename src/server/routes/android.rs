use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tokio_util::io::ReaderStream;

use crate::android::{AndroidBuildRequest, AndroidBuildResponse, ApkArtifact};
use crate::error::DeployError;

use super::{json_body, AppState};

pub async fn build(
    State(state): State<AppState>,
    body: Result<Json<AndroidBuildRequest>, JsonRejection>,
) -> Result<Json<AndroidBuildResponse>, DeployError> {
    let request = json_body(body)?;
    Ok(Json(state.orchestrator.android().build(request).await?))
}

pub async fn download(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Response, DeployError> {
    let artifact = state.orchestrator.android().artifact(&project_id)?;
    let file = match tokio::fs::File::open(&artifact.path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DeployError::NotFound(format!("apk for project '{}'", project_id)));
        }
        Err(e) => return Err(e.into()),
    };
    Ok((
        [
            (header::CONTENT_TYPE, "application/vnd.android.package-archive".to_string()),
            (header::CONTENT_LENGTH, artifact.size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", artifact.file_name()),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

#[derive(Serialize)]
pub struct BuildListing {
    pub success: bool,
    pub count: usize,
    pub builds: Vec<BuildEntry>,
}

#[derive(Serialize)]
pub struct BuildEntry {
    #[serde(flatten)]
    pub artifact: ApkArtifact,
    pub download_url: String,
    pub age_secs: u64,
}

pub async fn list(State(state): State<AppState>) -> Json<BuildListing> {
    let android = state.orchestrator.android();
    let builds: Vec<BuildEntry> = android
        .store()
        .list()
        .into_iter()
        .map(|artifact| BuildEntry {
            download_url: android.download_url(&artifact.project_id),
            age_secs: artifact.age().as_secs(),
            artifact,
        })
        .collect();
    Json(BuildListing {
        success: true,
        count: builds.len(),
        builds,
    })
}
