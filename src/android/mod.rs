pub mod artifacts;
pub mod scaffold;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::build::{self, BuildPlan, Step};
use crate::config::model::AndroidConfig;
use crate::error::DeployError;
use crate::runtime::validate_project_id;
use crate::toolchain::{Tool, Toolchain};
use crate::workspace::{FileTree, Workspace};

pub use artifacts::{ApkArtifact, ArtifactStore};
use scaffold::AppIdentity;

/// Hard upper bound on one Gradle build.
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(600);

const APK_OUTPUT_DIR: &str = "app/build/outputs/apk";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AndroidBuildRequest {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub files: FileTree,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub package_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AndroidBuildResponse {
    pub success: bool,
    pub project_id: String,
    pub download_url: String,
    pub apk_size: u64,
    pub app_name: String,
    pub package_name: String,
    /// The Gradle skeleton was generated around the submitted files.
    pub scaffolded: bool,
    pub expires_in_secs: u64,
}

/// Every `.apk` under `dir`, sorted for a stable pick.
fn collect_apks(dir: &Path, found: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_apks(&path, found)?;
        } else if path.extension().is_some_and(|e| e == "apk") {
            found.push(path);
        }
    }
    Ok(())
}

/// The built APK, preferring a debug variant.
pub fn find_apk(root: &Path) -> Option<PathBuf> {
    let dir = root.join(APK_OUTPUT_DIR);
    if !dir.is_dir() {
        return None;
    }
    let mut found = Vec::new();
    if let Err(e) = collect_apks(&dir, &mut found) {
        warn!(error = %e, "failed to scan apk output");
    }
    found.sort();
    let debug = found
        .iter()
        .position(|p| p.file_name().is_some_and(|n| n.to_string_lossy().contains("debug")));
    match debug {
        Some(i) => Some(found.swap_remove(i)),
        None => found.into_iter().next(),
    }
}

/// One-shot APK builds; results live in the artifact store until they expire.
#[derive(Debug, Clone)]
pub struct AndroidDriver {
    toolchain: Toolchain,
    store: ArtifactStore,
    public_base: String,
}

impl AndroidDriver {
    pub fn new(config: &AndroidConfig, toolchain: Toolchain, public_base: &str) -> Self {
        Self {
            store: ArtifactStore::new(config.artifact_dir(), config.artifact_ttl()),
            toolchain,
            public_base: public_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn download_url(&self, project_id: &str) -> String {
        format!("{}/download-apk/{}", self.public_base, project_id)
    }

    pub async fn build(&self, request: AndroidBuildRequest) -> Result<AndroidBuildResponse, DeployError> {
        validate_project_id(&request.project_id)?;
        if request.files.is_empty() {
            return Err(DeployError::invalid("files must contain at least one file"));
        }
        let identity = AppIdentity::resolve(
            &request.project_id,
            request.app_name.as_deref(),
            request.package_name.as_deref(),
        )?;

        let project_id = request.project_id;
        let result = self.build_apk(&project_id, request.files, identity).await;
        if let Err(e) = &result {
            warn!(project_id = %project_id, runtime = "android", error = %e, "android build failed");
        }
        result
    }

    async fn build_apk(
        &self,
        project_id: &str,
        files: FileTree,
        identity: AppIdentity,
    ) -> Result<AndroidBuildResponse, DeployError> {
        info!(project_id, runtime = "android", phase = "materialize", "android build started");
        let workspace = Workspace::materialize(&format!("android-{}", project_id), &files.into_map())?;

        let own_wrapper = workspace.contains("gradlew");
        let mut tools = vec![Tool::Java, Tool::AndroidSdk];
        if !own_wrapper {
            tools.push(Tool::Gradle);
        }
        self.toolchain.require(&tools).await?;

        let scaffolded = !scaffold::has_build_descriptor(workspace.path());
        if scaffolded {
            scaffold::scaffold(workspace.path(), &identity, self.toolchain.android_home())?;
        } else if own_wrapper {
            scaffold::make_executable(&workspace.join("gradlew"))?;
        }

        let mut step = Step::new(
            "gradle assembleDebug",
            "./gradlew",
            &["assembleDebug", "--no-daemon", "--console=plain"],
            BUILD_TIMEOUT,
        );
        if let Some(sdk) = self.toolchain.android_home() {
            let sdk = sdk.to_string_lossy();
            step = step.env("ANDROID_HOME", &sdk).env("ANDROID_SDK_ROOT", &sdk);
        }
        let plan = BuildPlan {
            build: vec![step],
            output: Some(APK_OUTPUT_DIR.into()),
            ..Default::default()
        };

        info!(project_id, runtime = "android", phase = "build", scaffolded, "running gradle");
        let built = build::build(workspace.path(), &plan).await?.into_result()?;

        let apk = find_apk(workspace.path()).ok_or_else(|| DeployError::BuildFailed {
            message: "gradle finished but produced no APK".to_string(),
            output: built.combined(),
        })?;
        let artifact = self.store.insert(project_id, &identity, &apk)?;

        Ok(AndroidBuildResponse {
            success: true,
            project_id: project_id.to_string(),
            download_url: self.download_url(project_id),
            apk_size: artifact.size,
            app_name: identity.app_name,
            package_name: identity.package_name,
            scaffolded,
            expires_in_secs: self.store.ttl().as_secs(),
        })
    }

    /// A live artifact, after purging expired ones.
    pub fn artifact(&self, project_id: &str) -> Result<ApkArtifact, DeployError> {
        self.store
            .get(project_id)
            .ok_or_else(|| DeployError::NotFound(format!("apk for project '{}'", project_id)))
    }
}
