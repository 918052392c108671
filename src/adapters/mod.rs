//! Adapter interfaces for external systems.
//!
//! The reconciler talks to three collaborators: the Harness default-image
//! configuration, a public container registry, and the Harness pipeline
//! execution API. Each sits behind a trait so runs can be exercised without
//! the network.

pub mod harness;
pub mod registry;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::NewImages;

pub use harness::HarnessClient;
pub use registry::RegistryClient;

/// Source of the default image configuration (config key -> image reference)
#[async_trait]
pub trait DefaultConfigSource: Send + Sync {
    async fn default_images(&self) -> Result<BTreeMap<String, String>>;
}

/// Lists the tags published for a repository
#[async_trait]
pub trait TagSource: Send + Sync {
    /// `repository` is the bare name, e.g. `ci-addon`
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>>;
}

/// Starts a pipeline execution for a set of new images
#[async_trait]
pub trait PipelineLauncher: Send + Sync {
    /// Returns the execution id reported by the remote side
    async fn execute(&self, images: &NewImages) -> Result<String>;
}

/// Strip trailing slashes so paths can be appended with `format!`
pub(crate) fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
