use std::future::Future;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use regex::Regex;
use tracing::{info, warn};

use crate::build::{run_step, Step, StepOutput};
use crate::error::DeployError;

/// Output fragments that mark a failure worth retrying.
const TRANSIENT_MARKERS: &[&str] = &[
    "service unavailable",
    "bad gateway",
    "gateway timeout",
    "rate limit",
    "too many requests",
    "timed out",
    "timeout",
    "etimedout",
    "econnreset",
    "socket hang up",
];

static PAGES_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://[A-Za-z0-9][A-Za-z0-9.-]*\.pages\.dev\b[^\s)\]]*")
        .expect("pages url regex must compile")
});

/// Retryable HTTP status codes, standing alone rather than inside ids or hashes.
static TRANSIENT_STATUS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:429|50[234])\b").expect("transient status regex must compile"));

static DEPLOYMENT_HASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{8}$").expect("hash label regex must compile"));

pub fn is_transient(output: &str) -> bool {
    let lower = output.to_ascii_lowercase();
    TRANSIENT_STATUS_RE.is_match(&lower) || TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

/// First `*.pages.dev` URL printed by the deploy command.
pub fn parse_deployment_url(stdout: &str) -> Option<String> {
    PAGES_URL_RE
        .find(stdout)
        .map(|m| m.as_str().trim_end_matches(['.', ',', '/']).to_string())
}

/// Project-level address for a deployment URL: drops a leading 8-hex-char
/// deployment label when at least three labels remain, otherwise returns
/// the URL unchanged.
pub fn stable_url(deployment_url: &str) -> String {
    let Some(rest) = deployment_url.strip_prefix("https://") else {
        return deployment_url.to_string();
    };
    let (host, path) = rest.split_once('/').map_or((rest, ""), |(h, p)| (h, p));
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() >= 4 && DEPLOYMENT_HASH_RE.is_match(labels[0]) {
        let mut url = format!("https://{}", labels[1..].join("."));
        if !path.is_empty() {
            url.push('/');
            url.push_str(path);
        }
        return url;
    }
    deployment_url.to_string()
}

/// A failed CLI or API call, tagged with whether retrying could help.
#[derive(Debug, Clone)]
pub struct ExternalFailure {
    pub message: String,
    pub output: String,
    pub transient: bool,
}

impl ExternalFailure {
    fn from_output(what: &str, out: &StepOutput) -> Self {
        let output = out.combined();
        Self {
            message: format!("{} failed (exit code {:?})", what, out.code),
            transient: is_transient(&output),
            output,
        }
    }
}

impl From<ExternalFailure> for DeployError {
    fn from(f: ExternalFailure) -> Self {
        DeployError::Deploy {
            message: f.message,
            output: f.output,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub delay: Duration,
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// attempts run out.
pub async fn retry_transient<T, F, Fut>(what: &str, policy: RetryPolicy, op: F) -> Result<T, ExternalFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExternalFailure>>,
{
    let retries = policy.attempts.saturating_sub(1) as usize;
    op.retry(
        ConstantBuilder::default()
            .with_delay(policy.delay)
            .with_max_times(retries),
    )
    .when(|e: &ExternalFailure| e.transient)
    .notify(|e: &ExternalFailure, dur: Duration| {
        warn!(operation = what, "{}; retrying in {:?}", e.message, dur);
    })
    .await
}

/// Thin driver for the `wrangler` CLI, run through `npx`.
#[derive(Debug, Clone)]
pub struct Wrangler {
    account_id: String,
    api_token: String,
    timeout: Duration,
}

impl Wrangler {
    pub fn new(account_id: &str, api_token: &str, timeout: Duration) -> Self {
        Self {
            account_id: account_id.to_string(),
            api_token: api_token.to_string(),
            timeout,
        }
    }

    fn step(&self, label: &str, args: &[&str]) -> Step {
        let mut full = vec!["--yes", "wrangler"];
        full.extend_from_slice(args);
        Step::new(label, "npx", &full, self.timeout)
            .env("CLOUDFLARE_ACCOUNT_ID", &self.account_id)
            .env("CLOUDFLARE_API_TOKEN", &self.api_token)
            .env("WRANGLER_SEND_METRICS", "false")
            .env("CI", "true")
    }

    /// Create the Pages project; an existing project counts as success.
    pub async fn ensure_project(&self, workspace: &Path, project: &str) -> Result<(), DeployError> {
        let step = self.step(
            "pages project create",
            &["pages", "project", "create", project, "--production-branch", "main"],
        );
        let out = run_step(&step, workspace).await?;
        if out.success {
            info!(project, "pages project created");
            return Ok(());
        }
        if out.combined().to_ascii_lowercase().contains("already exists") {
            info!(project, "pages project already exists");
            return Ok(());
        }
        Err(ExternalFailure::from_output("pages project create", &out).into())
    }

    /// One upload attempt; returns the deployment URL.
    pub async fn deploy_once(
        &self,
        workspace: &Path,
        output_dir: &Path,
        project: &str,
        branch: &str,
    ) -> Result<String, ExternalFailure> {
        let dir = output_dir.to_string_lossy();
        let step = self.step(
            "pages deploy",
            &["pages", "deploy", &*dir, "--project-name", project, "--branch", branch, "--commit-dirty=true"],
        );
        let out = match run_step(&step, workspace).await {
            Ok(out) => out,
            Err(DeployError::Timeout { what, after }) => {
                return Err(ExternalFailure {
                    message: format!("{} timed out after {}s", what, after.as_secs()),
                    output: String::new(),
                    transient: true,
                });
            }
            Err(e) => {
                return Err(ExternalFailure {
                    message: e.to_string(),
                    output: String::new(),
                    transient: false,
                });
            }
        };
        if !out.success {
            return Err(ExternalFailure::from_output("pages deploy", &out));
        }
        parse_deployment_url(&out.stdout)
            .or_else(|| parse_deployment_url(&out.stderr))
            .ok_or_else(|| ExternalFailure {
                message: "deploy succeeded but printed no pages.dev URL".to_string(),
                output: out.combined(),
                transient: false,
            })
    }

    /// Upload with retry on transient failures.
    pub async fn deploy(
        &self,
        workspace: &Path,
        output_dir: &Path,
        project: &str,
        branch: &str,
        policy: RetryPolicy,
    ) -> Result<String, DeployError> {
        let url = retry_transient("pages deploy", policy, move || {
            self.deploy_once(workspace, output_dir, project, branch)
        })
        .await?;
        Ok(url)
    }
}
