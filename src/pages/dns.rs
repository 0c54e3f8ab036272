use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::wrangler::ExternalFailure;

pub const CLOUDFLARE_API: &str = "https://api.cloudflare.com/client/v4";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    id: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsOutcome {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainOutcome {
    Attached,
    AlreadyAttached,
}

fn failure(what: &str, status: Option<reqwest::StatusCode>, detail: String) -> ExternalFailure {
    let transient = match status {
        Some(s) => s.is_server_error() || s == reqwest::StatusCode::TOO_MANY_REQUESTS,
        None => true,
    };
    ExternalFailure {
        message: match status {
            Some(s) => format!("{} failed with HTTP {}", what, s.as_u16()),
            None => format!("{} failed", what),
        },
        output: detail,
        transient,
    }
}

/// Minimal Cloudflare REST client for DNS records and Pages custom domains.
#[derive(Debug, Clone)]
pub struct CloudflareApi {
    client: reqwest::Client,
    base: String,
    token: String,
}

impl CloudflareApi {
    pub fn new(base: &str, token: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            base: base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        what: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<(reqwest::StatusCode, Envelope<T>), ExternalFailure> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| failure(what, None, e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| failure(what, Some(status), e.to_string()))?;
        let envelope: Envelope<T> = serde_json::from_str(&text)
            .map_err(|_| failure(what, Some(status), text.clone()))?;
        Ok((status, envelope))
    }

    fn errors_text(errors: &[ApiMessage]) -> String {
        errors
            .iter()
            .map(|e| format!("[{}] {}", e.code, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Point `name` at `target` with a proxied CNAME, creating or updating
    /// the record as needed.
    pub async fn upsert_cname(&self, zone_id: &str, name: &str, target: &str) -> Result<DnsOutcome, ExternalFailure> {
        let url = format!("{}/zones/{}/dns_records", self.base, zone_id);
        let (status, found) = self
            .call::<Vec<DnsRecord>>(
                "DNS lookup",
                self.client.get(&url).query(&[("type", "CNAME"), ("name", name)]),
            )
            .await?;
        if !found.success {
            return Err(failure("DNS lookup", Some(status), Self::errors_text(&found.errors)));
        }

        let body = json!({
            "type": "CNAME",
            "name": name,
            "content": target,
            "proxied": true,
            "ttl": 1,
        });

        let existing = found.result.unwrap_or_default().into_iter().next();
        let (what, request, outcome) = match existing {
            Some(record) if record.content.eq_ignore_ascii_case(target) => {
                debug!(name, target, "CNAME already correct");
                return Ok(DnsOutcome::Unchanged);
            }
            Some(record) => (
                "DNS update",
                self.client.put(format!("{}/{}", url, record.id)).json(&body),
                DnsOutcome::Updated,
            ),
            None => ("DNS create", self.client.post(&url).json(&body), DnsOutcome::Created),
        };

        let (status, written) = self.call::<serde_json::Value>(what, request).await?;
        if !written.success {
            return Err(failure(what, Some(status), Self::errors_text(&written.errors)));
        }
        info!(name, target, outcome = ?outcome, "CNAME upserted");
        Ok(outcome)
    }

    /// Attach `domain` to a Pages project; an existing attachment is success.
    pub async fn attach_pages_domain(
        &self,
        account_id: &str,
        project: &str,
        domain: &str,
    ) -> Result<DomainOutcome, ExternalFailure> {
        let url = format!("{}/accounts/{}/pages/projects/{}/domains", self.base, account_id, project);
        let (status, envelope) = self
            .call::<serde_json::Value>(
                "domain attach",
                self.client.post(&url).json(&json!({ "name": domain })),
            )
            .await?;
        if envelope.success {
            info!(project, domain, "custom domain attached");
            return Ok(DomainOutcome::Attached);
        }
        let detail = Self::errors_text(&envelope.errors);
        if detail.to_ascii_lowercase().contains("already") {
            debug!(project, domain, "custom domain already attached");
            return Ok(DomainOutcome::AlreadyAttached);
        }
        Err(failure("domain attach", Some(status), detail))
    }
}
