//! Harness platform client.
//!
//! Two endpoints, both authenticated with an `X-API-KEY` header:
//! - GET  /gateway/ci/execution-config/get-default-config (default CI images)
//! - POST /pipeline/api/pipeline/execute/{pipeline} (YAML runtime input)

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{trim_base_url, DefaultConfigSource, PipelineLauncher};
use crate::config::Settings;
use crate::domain::NewImages;

const API_KEY_HEADER: &str = "X-API-KEY";

/// Build infrastructure whose defaults are queried
const DEFAULT_CONFIG_INFRA: &str = "K8";

/// Connection details for the Harness API
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub base_url: String,
    pub account_id: String,
    pub api_key: String,
    pub org_id: String,
    pub project_id: String,
    pub pipeline_id: String,
    /// Registry name passed to the pipeline as the `registry` variable
    pub container_registry: String,
    pub timeout: Duration,
}

impl From<&Settings> for HarnessConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            base_url: settings.harness_base_url.clone(),
            account_id: settings.account_id.clone(),
            api_key: settings.api_key.clone(),
            org_id: settings.org_id.clone(),
            project_id: settings.project_id.clone(),
            pipeline_id: settings.pipeline_id.clone(),
            container_registry: settings.container_registry.clone(),
            timeout: settings.http_timeout,
        }
    }
}

/// Harness API client
pub struct HarnessClient {
    config: HarnessConfig,
    client: reqwest::Client,
}

/// Runtime input document sent to the execute endpoint
#[derive(Debug, Serialize)]
struct ExecutionRequest<'a> {
    pipeline: PipelineInput<'a>,
}

#[derive(Debug, Serialize)]
struct PipelineInput<'a> {
    identifier: &'a str,
    variables: Vec<Variable<'a>>,
}

#[derive(Debug, Serialize)]
struct Variable<'a> {
    name: &'a str,
    value: String,
}

impl HarnessClient {
    /// Create a new client
    pub fn new(mut config: HarnessConfig) -> Result<Self> {
        config.base_url = trim_base_url(&config.base_url);
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build Harness HTTP client")?;
        Ok(Self { config, client })
    }

    /// Create from resolved settings
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(HarnessConfig::from(settings))
    }

    fn default_config_url(&self) -> String {
        format!(
            "{}/gateway/ci/execution-config/get-default-config",
            self.config.base_url
        )
    }

    fn execute_url(&self) -> String {
        format!(
            "{}/pipeline/api/pipeline/execute/{}",
            self.config.base_url, self.config.pipeline_id
        )
    }

    /// Render the YAML runtime input for a set of new images
    pub fn execution_payload(&self, images: &NewImages) -> Result<String> {
        let request = ExecutionRequest {
            pipeline: PipelineInput {
                identifier: &self.config.pipeline_id,
                variables: vec![
                    Variable {
                        name: "registry",
                        value: self.config.container_registry.clone(),
                    },
                    Variable {
                        name: "is_retry",
                        value: "false".to_string(),
                    },
                    Variable {
                        name: "modify_default",
                        value: "true".to_string(),
                    },
                    Variable {
                        name: "new_images",
                        value: images.to_pipeline_value(),
                    },
                ],
            },
        };

        serde_yaml::to_string(&request).context("Failed to render pipeline runtime input")
    }
}

/// Pull the string entries out of a default-config response's `data` field.
///
/// Anything that is not an object of strings counts as absent.
pub fn parse_default_config(body: &Value) -> BTreeMap<String, String> {
    body.get("data")
        .and_then(Value::as_object)
        .map(|data| {
            data.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Execution id from an execute response: last path segment of `data.executionUrl`
pub fn parse_execution_id(body: &Value) -> String {
    body.get("data")
        .and_then(|d| d.get("executionUrl"))
        .and_then(Value::as_str)
        .and_then(|url| url.rsplit('/').next())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl DefaultConfigSource for HarnessClient {
    async fn default_images(&self) -> Result<BTreeMap<String, String>> {
        let response = self
            .client
            .get(self.default_config_url())
            .query(&[
                ("accountIdentifier", self.config.account_id.as_str()),
                ("infra", DEFAULT_CONFIG_INFRA),
            ])
            .header(API_KEY_HEADER, self.config.api_key.as_str())
            .send()
            .await
            .context("Failed to request Harness default image config")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Harness default config error ({}): {}", status, text);
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse Harness default config response")?;

        let images = parse_default_config(&body);
        debug!(entries = images.len(), "Fetched default image config");
        Ok(images)
    }
}

#[async_trait]
impl PipelineLauncher for HarnessClient {
    async fn execute(&self, images: &NewImages) -> Result<String> {
        let payload = self.execution_payload(images)?;

        let response = self
            .client
            .post(self.execute_url())
            .query(&[
                ("accountIdentifier", self.config.account_id.as_str()),
                ("orgIdentifier", self.config.org_id.as_str()),
                ("projectIdentifier", self.config.project_id.as_str()),
            ])
            .header(API_KEY_HEADER, self.config.api_key.as_str())
            .header(reqwest::header::CONTENT_TYPE, "application/yaml")
            .body(payload)
            .send()
            .await
            .context("Failed to send Harness pipeline execution request")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Harness pipeline execution error ({}): {}", status, text);
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse Harness pipeline execution response")?;

        Ok(parse_execution_id(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config() -> HarnessConfig {
        HarnessConfig {
            base_url: "https://app.harness.io/".to_string(),
            account_id: "acct".to_string(),
            api_key: "key".to_string(),
            org_id: "default".to_string(),
            project_id: "ci".to_string(),
            pipeline_id: "image_sync".to_string(),
            container_registry: "registry.example.com".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_urls() {
        let client = HarnessClient::new(test_config()).unwrap();
        assert_eq!(
            client.default_config_url(),
            "https://app.harness.io/gateway/ci/execution-config/get-default-config"
        );
        assert_eq!(
            client.execute_url(),
            "https://app.harness.io/pipeline/api/pipeline/execute/image_sync"
        );
    }

    #[test]
    fn test_execution_payload_shape() {
        let client = HarnessClient::new(test_config()).unwrap();
        let images: NewImages = [("harness/ci-addon", "1.16.4"), ("harness/ci-lite-engine", "1.16.5")]
            .into_iter()
            .collect();

        let yaml = client.execution_payload(&images).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(doc["pipeline"]["identifier"].as_str(), Some("image_sync"));

        let variables = doc["pipeline"]["variables"].as_sequence().unwrap();
        let pairs: Vec<(&str, &str)> = variables
            .iter()
            .map(|v| (v["name"].as_str().unwrap(), v["value"].as_str().unwrap()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("registry", "registry.example.com"),
                ("is_retry", "false"),
                ("modify_default", "true"),
                (
                    "new_images",
                    "harness/ci-addon:1.16.4,harness/ci-lite-engine:1.16.5"
                ),
            ]
        );
    }

    #[test]
    fn test_parse_default_config() {
        let body = json!({
            "status": "SUCCESS",
            "data": {
                "addonTag": "harness/ci-addon:1.16.4",
                "liteEngineTag": "harness/ci-lite-engine:1.16.5",
                "enabled": true
            }
        });
        let parsed = parse_default_config(&body);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["addonTag"], "harness/ci-addon:1.16.4");
    }

    #[test]
    fn test_parse_default_config_shape_surprises() {
        assert!(parse_default_config(&json!({})).is_empty());
        assert!(parse_default_config(&json!({"data": null})).is_empty());
        assert!(parse_default_config(&json!({"data": ["a"]})).is_empty());
        assert!(parse_default_config(&json!("text")).is_empty());
    }

    #[test]
    fn test_parse_execution_id() {
        let body = json!({
            "data": {
                "executionUrl": "https://app.harness.io/ng/account/acct/ci/orgs/default/projects/ci/pipelines/image_sync/executions/abc123"
            }
        });
        assert_eq!(parse_execution_id(&body), "abc123");
        assert_eq!(parse_execution_id(&json!({"data": {}})), "");
        assert_eq!(parse_execution_id(&json!({})), "");
    }
}
