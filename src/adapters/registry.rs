//! Public container registry client (OCI distribution API).
//!
//! Public registries hand out anonymous pull tokens:
//! `GET /token/?scope=repository:{alias}/{repo}:pull`, then
//! `GET /v2/{alias}/{repo}/tags/list?n=100` with that bearer token.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::{trim_base_url, TagSource};
use crate::config::Settings;

/// Upper bound on tags fetched per repository
pub const MAX_TAGS: usize = 100;

/// Registry API client
pub struct RegistryClient {
    base_url: String,
    /// Registry namespace (the public gallery alias, e.g. `harness`)
    alias: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

impl RegistryClient {
    /// Create a new registry client
    pub fn new(base_url: &str, alias: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build registry HTTP client")?;
        Ok(Self {
            base_url: trim_base_url(base_url),
            alias: alias.into(),
            client,
        })
    }

    /// Create from resolved settings
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            &settings.registry_base_url,
            settings.registry_alias.clone(),
            settings.http_timeout,
        )
    }

    fn scope(&self, repository: &str) -> String {
        format!("repository:{}/{}:pull", self.alias, repository)
    }

    fn token_url(&self) -> String {
        format!("{}/token/", self.base_url)
    }

    fn tags_url(&self, repository: &str) -> String {
        format!("{}/v2/{}/{}/tags/list", self.base_url, self.alias, repository)
    }

    /// Fetch an anonymous pull token for one repository
    async fn pull_token(&self, repository: &str) -> Result<String> {
        let response = self
            .client
            .get(self.token_url())
            .query(&[("scope", self.scope(repository))])
            .send()
            .await
            .with_context(|| format!("Failed to request registry token for {}", repository))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Registry token error ({}): {}", status, text);
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("Failed to parse registry token response")?;
        Ok(token.token)
    }
}

#[async_trait]
impl TagSource for RegistryClient {
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let token = self.pull_token(repository).await?;

        let response = self
            .client
            .get(self.tags_url(repository))
            .query(&[("n", MAX_TAGS)])
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("Failed to list tags for {}", repository))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Registry tag list error ({}): {}", status, text);
        }

        let list: TagList = response
            .json()
            .await
            .with_context(|| format!("Failed to parse tag list for {}", repository))?;

        let mut tags = list.tags.unwrap_or_default();
        tags.truncate(MAX_TAGS);
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let client =
            RegistryClient::new("https://public.ecr.aws/", "harness", Duration::from_secs(5))
                .unwrap();
        assert_eq!(client.token_url(), "https://public.ecr.aws/token/");
        assert_eq!(
            client.tags_url("ci-addon"),
            "https://public.ecr.aws/v2/harness/ci-addon/tags/list"
        );
        assert_eq!(client.scope("ci-addon"), "repository:harness/ci-addon:pull");
    }
}
