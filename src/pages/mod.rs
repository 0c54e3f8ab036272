pub mod dns;
pub mod site;
pub mod wrangler;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::build;
use crate::config::model::{CloudflareConfig, PagesConfig, TimeoutConfig};
use crate::error::DeployError;
use crate::toolchain::{Tool, Toolchain};
use crate::workspace::{FileTree, Workspace};

use dns::{CloudflareApi, DnsOutcome, DomainOutcome, CLOUDFLARE_API};
use site::SiteFramework;
use wrangler::{retry_transient, stable_url, RetryPolicy, Wrangler};

/// Longest project name Pages accepts.
const MAX_PROJECT_NAME: usize = 58;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PagesDeployRequest {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub subdomain: Option<String>,
    #[serde(default)]
    pub files: FileTree,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub cf_account_id: Option<String>,
    #[serde(default)]
    pub cf_api_token: Option<String>,
    #[serde(default)]
    pub cf_zone_id: Option<String>,
    #[serde(default)]
    pub custom_domain: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PagesDeployResponse {
    pub success: bool,
    /// The stable project address; constant across redeploys.
    pub url: String,
    pub deployment_url: String,
    pub stable_url: String,
    pub project_name: String,
    pub custom_domain: Option<String>,
    pub environment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_warning: Option<String>,
    pub framework: SiteFramework,
    pub spa_fallback: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub repairs: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttachDomainRequest {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub custom_domain: String,
    #[serde(default)]
    pub cf_account_id: Option<String>,
    #[serde(default)]
    pub cf_api_token: Option<String>,
    #[serde(default)]
    pub cf_zone_id: Option<String>,
}

/// What happened during the best-effort domain step.
#[derive(Debug, Clone, Serialize)]
pub struct DomainReport {
    pub success: bool,
    pub project_name: String,
    pub custom_domain: String,
    /// `created`, `updated`, `unchanged`, `skipped` or `failed`.
    pub dns_record: &'static str,
    pub attached: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployPhase {
    Materializing,
    Building,
    ProjectEnsuring,
    Deploying,
    DomainAttaching,
    Done,
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeployPhase::Materializing => "materializing",
            DeployPhase::Building => "building",
            DeployPhase::ProjectEnsuring => "project-ensuring",
            DeployPhase::Deploying => "deploying",
            DeployPhase::DomainAttaching => "domain-attaching",
            DeployPhase::Done => "done",
        })
    }
}

/// Credentials for one request: request fields win over configuration.
#[derive(Debug, Clone)]
struct Credentials {
    account_id: String,
    api_token: String,
    zone_id: Option<String>,
}

fn pick(request: &Option<String>, configured: &Option<String>) -> Option<String> {
    request
        .as_deref()
        .or(configured.as_deref())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Lowercase, `[a-z0-9-]` only, no leading or trailing dashes.
pub fn sanitize_project_name(raw: &str) -> Result<String, DeployError> {
    let mapped: String = raw
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let mut name = String::with_capacity(mapped.len());
    for c in mapped.chars() {
        if c == '-' && name.ends_with('-') {
            continue;
        }
        name.push(c);
    }
    let name: String = name.trim_matches('-').chars().take(MAX_PROJECT_NAME).collect();
    let name = name.trim_end_matches('-').to_string();
    if name.is_empty() {
        return Err(DeployError::invalid("project_name is required"));
    }
    Ok(name)
}

/// Branch and canonical environment label. Production deploys go to
/// `main`; everything else to `preview`.
pub fn branch_for(environment: Option<&str>) -> (&'static str, &'static str) {
    match environment.map(|e| e.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("production") | Some("prod") | Some("main") => ("main", "production"),
        Some(_) => ("preview", "preview"),
    }
}

fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, r)| r);
    rest.split('/').next().unwrap_or(rest)
}

/// Static-site deploys to Cloudflare Pages.
#[derive(Debug, Clone)]
pub struct PagesDriver {
    cloudflare: CloudflareConfig,
    pages: PagesConfig,
    timeouts: TimeoutConfig,
    toolchain: Toolchain,
    api_base: String,
}

impl PagesDriver {
    pub fn new(cloudflare: CloudflareConfig, pages: PagesConfig, timeouts: TimeoutConfig, toolchain: Toolchain) -> Self {
        Self {
            cloudflare,
            pages,
            timeouts,
            toolchain,
            api_base: CLOUDFLARE_API.to_string(),
        }
    }

    /// Point REST calls at another Cloudflare API root.
    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.to_string();
        self
    }

    fn credentials(
        &self,
        account_id: &Option<String>,
        api_token: &Option<String>,
        zone_id: &Option<String>,
    ) -> Result<Credentials, DeployError> {
        let account_id = pick(account_id, &self.cloudflare.account_id)
            .ok_or_else(|| DeployError::invalid("Cloudflare account id missing (cf_account_id or CLOUDFLARE_ACCOUNT_ID)"))?;
        let api_token = pick(api_token, &self.cloudflare.api_token)
            .ok_or_else(|| DeployError::invalid("Cloudflare API token missing (cf_api_token or CLOUDFLARE_API_TOKEN)"))?;
        Ok(Credentials {
            account_id,
            api_token,
            zone_id: pick(zone_id, &self.cloudflare.zone_id),
        })
    }

    /// `custom_domain` when given, else `<subdomain>.<base_domain>`.
    fn custom_domain(&self, request: &PagesDeployRequest) -> Option<String> {
        if let Some(domain) = request.custom_domain.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            return Some(domain.to_ascii_lowercase());
        }
        let sub = request.subdomain.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let base = self.cloudflare.base_domain.as_deref()?;
        Some(format!("{}.{}", sub.to_ascii_lowercase(), base.trim_matches('.')))
    }

    fn deploy_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.pages.deploy_attempts.max(1),
            delay: Duration::from_secs(self.pages.deploy_backoff_secs),
        }
    }

    fn domain_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.pages.domain_attempts.max(1),
            delay: Duration::from_secs(self.pages.domain_backoff_secs),
        }
    }

    pub async fn deploy(&self, request: PagesDeployRequest) -> Result<PagesDeployResponse, DeployError> {
        let raw_name = if request.project_name.trim().is_empty() {
            request.subdomain.clone().unwrap_or_default()
        } else {
            request.project_name.clone()
        };
        let project = sanitize_project_name(&raw_name)?;
        if request.files.is_empty() {
            return Err(DeployError::invalid("files must contain at least one file"));
        }
        let creds = self.credentials(&request.cf_account_id, &request.cf_api_token, &request.cf_zone_id)?;
        let (branch, environment) = branch_for(request.environment.as_deref());
        let custom_domain = self.custom_domain(&request);

        let result = self
            .run(&project, request.files, &creds, branch, custom_domain.as_deref())
            .await;
        match result {
            Ok(done) => Ok(PagesDeployResponse {
                success: true,
                url: done.stable_url.clone(),
                deployment_url: done.deployment_url,
                stable_url: done.stable_url,
                project_name: project,
                custom_domain,
                environment: environment.to_string(),
                domain_warning: done.domain_warning,
                framework: done.framework,
                spa_fallback: done.spa_fallback,
                repairs: done.repairs,
            }),
            Err(e) => {
                warn!(project = %project, error = %e, "pages deploy failed");
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        project: &str,
        files: FileTree,
        creds: &Credentials,
        branch: &str,
        custom_domain: Option<&str>,
    ) -> Result<Deployed, DeployError> {
        self.toolchain.require(&[Tool::Node, Tool::Npm]).await?;

        info!(project, phase = %DeployPhase::Materializing, "pages deploy started");
        let workspace = Workspace::materialize(&format!("pages-{}", project), &files.into_map())?;

        info!(project, phase = %DeployPhase::Building);
        let plan = site::prepare(workspace.path(), &self.timeouts)?;
        let built = build::build(workspace.path(), &plan.build).await?.into_result()?;
        if !plan.output_dir.is_dir() {
            return Err(DeployError::BuildFailed {
                message: format!("build produced no '{}' directory", plan.framework.output_dir()),
                output: built.combined(),
            });
        }
        let spa_fallback = plan.spa && site::ensure_spa_fallback(&plan.output_dir)?;
        if spa_fallback {
            info!(project, "added SPA fallback _redirects");
        }

        let wrangler = Wrangler::new(&creds.account_id, &creds.api_token, self.timeouts.deploy_cli());
        info!(project, phase = %DeployPhase::ProjectEnsuring);
        wrangler.ensure_project(workspace.path(), project).await?;

        info!(project, branch, phase = %DeployPhase::Deploying);
        let deployment_url = wrangler
            .deploy(workspace.path(), &plan.output_dir, project, branch, self.deploy_policy())
            .await?;
        let stable = stable_url(&deployment_url);
        info!(project, deployment_url = %deployment_url, stable_url = %stable, "pages deployed");

        let domain_warning = match custom_domain {
            Some(domain) => {
                info!(project, domain, phase = %DeployPhase::DomainAttaching);
                let report = self.attach(creds, project, domain, &format!("{}.pages.dev", project)).await;
                (!report.warnings.is_empty()).then(|| report.warnings.join("; "))
            }
            None => None,
        };

        info!(project, phase = %DeployPhase::Done, "pages deploy finished");
        Ok(Deployed {
            deployment_url,
            stable_url: stable,
            domain_warning,
            framework: plan.framework,
            spa_fallback,
            repairs: built.repairs.into_iter().map(|r| r.description).collect(),
        })
    }

    /// Manual retry of the domain step for an already deployed project.
    pub async fn attach_domain(&self, request: AttachDomainRequest) -> Result<DomainReport, DeployError> {
        let project = sanitize_project_name(&request.project_name)?;
        let domain = request.custom_domain.trim().to_ascii_lowercase();
        if domain.is_empty() {
            return Err(DeployError::invalid("custom_domain is required"));
        }
        let creds = self.credentials(&request.cf_account_id, &request.cf_api_token, &request.cf_zone_id)?;
        let target = format!("{}.pages.dev", project);
        Ok(self.attach(&creds, &project, &domain, &target).await)
    }

    /// CNAME upsert then domain attach. Never fails; problems become warnings.
    async fn attach(&self, creds: &Credentials, project: &str, domain: &str, target: &str) -> DomainReport {
        let mut report = DomainReport {
            success: false,
            project_name: project.to_string(),
            custom_domain: domain.to_string(),
            dns_record: "skipped",
            attached: false,
            warnings: Vec::new(),
        };

        let api = match CloudflareApi::new(&self.api_base, &creds.api_token, self.timeouts.domain_cli()) {
            Ok(api) => api,
            Err(e) => {
                report.warnings.push(format!("could not build API client: {}", e));
                return report;
            }
        };
        let policy = self.domain_policy();

        match creds.zone_id.as_deref() {
            Some(zone) => {
                let api = &api;
                let upsert = retry_transient("dns upsert", policy, move || api.upsert_cname(zone, domain, host_of(target))).await;
                match upsert {
                    Ok(outcome) => {
                        report.dns_record = match outcome {
                            DnsOutcome::Created => "created",
                            DnsOutcome::Updated => "updated",
                            DnsOutcome::Unchanged => "unchanged",
                        };
                    }
                    Err(f) => {
                        warn!(project, domain, error = %f.message, "DNS record not written");
                        report.dns_record = "failed";
                        report.warnings.push(format!("DNS: {} {}", f.message, f.output).trim().to_string());
                    }
                }
            }
            None => info!(project, domain, "no zone id, skipping DNS record"),
        }

        let api = &api;
        let account = creds.account_id.as_str();
        let attach = retry_transient("domain attach", policy, move || api.attach_pages_domain(account, project, domain)).await;
        match attach {
            Ok(DomainOutcome::Attached) | Ok(DomainOutcome::AlreadyAttached) => report.attached = true,
            Err(f) => {
                warn!(project, domain, error = %f.message, "custom domain not attached");
                report.warnings.push(format!("domain: {} {}", f.message, f.output).trim().to_string());
            }
        }

        report.success = report.attached;
        report
    }
}

struct Deployed {
    deployment_url: String,
    stable_url: String,
    domain_warning: Option<String>,
    framework: SiteFramework,
    spa_fallback: bool,
    repairs: Vec<String>,
}
