//! Reconciliation run.
//!
//! Correlates the default image config, the registry's latest tags and the
//! checkpoint store for every target image, then triggers the pipeline when
//! anything moved. Every remote failure degrades to "no data" and is logged;
//! nothing here aborts the run.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{DefaultConfigSource, PipelineLauncher, TagSource};
use crate::config::{CommitMode, Settings, VersionPolicy};
use crate::domain::{ImageOutcome, NewImages};

use super::checkpoint::CheckpointStore;
use super::version::{latest_tag, reference_repository, reference_tag, repository_name, SemVer};

/// Per-run knobs taken from settings
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub target_images: Vec<String>,
    /// Explicit image -> default-config key table
    pub image_config_keys: BTreeMap<String, String>,
    pub version_policy: VersionPolicy,
    pub commit_mode: CommitMode,
}

impl ReconcileOptions {
    pub fn new(target_images: Vec<String>) -> Self {
        Self {
            target_images,
            image_config_keys: BTreeMap::new(),
            version_policy: VersionPolicy::default(),
            commit_mode: CommitMode::default(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            target_images: settings.target_images.clone(),
            image_config_keys: settings.image_config_keys.clone(),
            version_policy: settings.version_policy,
            commit_mode: settings.commit_mode,
        }
    }
}

/// Result of the pipeline trigger step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Nothing new, no call made
    NotNeeded,
    Triggered { execution_id: String },
    Failed { error: String },
}

impl TriggerOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Triggered { .. })
    }
}

/// Everything a run decided
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub run_id: Uuid,
    /// Per-image decisions in target-list order
    pub outcomes: Vec<(String, ImageOutcome)>,
    pub new_images: NewImages,
    pub trigger: TriggerOutcome,
}

impl ReconcileReport {
    pub fn outcome(&self, image: &str) -> Option<&ImageOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == image)
            .map(|(_, outcome)| outcome)
    }
}

/// Find the default-config entry describing an image.
///
/// An explicit key table entry is an exact lookup and wins outright. Otherwise
/// entries are scanned in key order: a value whose repository part equals the
/// image name is preferred, then the first value containing the image name.
pub fn find_config_entry<'a>(
    defaults: &'a BTreeMap<String, String>,
    image: &str,
    explicit_keys: &BTreeMap<String, String>,
) -> Option<(&'a str, &'a str)> {
    if let Some(key) = explicit_keys.get(image) {
        return defaults
            .get_key_value(key)
            .map(|(k, v)| (k.as_str(), v.as_str()));
    }

    let exact = defaults.iter().find(|(_, value)| {
        let repo = reference_repository(value);
        repo == image || repo.ends_with(&format!("/{}", image))
    });

    exact
        .or_else(|| defaults.iter().find(|(_, value)| value.contains(image)))
        .map(|(k, v)| (k.as_str(), v.as_str()))
}

/// Decide whether `latest` is a version this system has not acted on yet
pub fn is_new_version(policy: VersionPolicy, latest: &str, last_processed: Option<&str>) -> bool {
    match (policy, last_processed) {
        (_, None) => true,
        (VersionPolicy::Changed, Some(last)) => latest != last,
        (VersionPolicy::Newer, Some(last)) => match (SemVer::parse(latest), SemVer::parse(last)) {
            (Some(latest), Some(last)) => latest > last,
            // An unreadable checkpoint never blocks a valid tag
            (Some(_), None) => true,
            (None, _) => false,
        },
    }
}

/// Drives one reconciliation run
pub struct Reconciler {
    config_source: Arc<dyn DefaultConfigSource>,
    tags: Arc<dyn TagSource>,
    store: Arc<dyn CheckpointStore>,
    launcher: Arc<dyn PipelineLauncher>,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(
        config_source: Arc<dyn DefaultConfigSource>,
        tags: Arc<dyn TagSource>,
        store: Arc<dyn CheckpointStore>,
        launcher: Arc<dyn PipelineLauncher>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            config_source,
            tags,
            store,
            launcher,
            options,
        }
    }

    /// Default image config, or an empty map when the fetch fails
    async fn default_images(&self) -> BTreeMap<String, String> {
        match self.config_source.default_images().await {
            Ok(images) => images,
            Err(e) => {
                error!(error = %format!("{:#}", e), "Error getting default images");
                BTreeMap::new()
            }
        }
    }

    /// Latest strict version of an image, `None` when absent or unreachable
    pub async fn latest_version(&self, image: &str) -> Option<String> {
        let repository = repository_name(image);
        match self.tags.list_tags(repository).await {
            Ok(tags) => latest_tag(&tags),
            Err(e) => {
                error!(image, error = %format!("{:#}", e), "Error checking registry for image");
                None
            }
        }
    }

    /// Last processed version; store errors count as "never processed"
    fn last_processed(&self, image: &str) -> Option<String> {
        match self.store.last_version(image) {
            Ok(version) => version,
            Err(e) => {
                error!(image, error = %e, "Error getting last processed version");
                None
            }
        }
    }

    /// Write a checkpoint, reporting success as a flag
    fn commit(&self, image: &str, version: &str) -> bool {
        match self.store.record_version(image, version) {
            Ok(()) => {
                debug!(image, version, "Checkpoint updated");
                true
            }
            Err(e) => {
                error!(image, version, error = %e, "Error updating processed version");
                false
            }
        }
    }

    async fn trigger(&self, new_images: &NewImages) -> TriggerOutcome {
        match self.launcher.execute(new_images).await {
            Ok(execution_id) => {
                info!(%execution_id, "Successfully triggered pipeline");
                TriggerOutcome::Triggered { execution_id }
            }
            Err(e) => {
                let error = format!("{:#}", e);
                error!(%error, "Error triggering pipeline");
                TriggerOutcome::Failed { error }
            }
        }
    }

    /// Run one reconciliation pass over all target images
    #[instrument(skip(self), fields(run_id = tracing::field::Empty))]
    pub async fn reconcile(&self) -> ReconcileReport {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        info!(images = self.options.target_images.len(), "Starting reconciliation");

        let defaults = self.default_images().await;
        let mut new_images = NewImages::new();
        let mut outcomes = Vec::with_capacity(self.options.target_images.len());

        for image in &self.options.target_images {
            let Some((field_key, reference)) =
                find_config_entry(&defaults, image, &self.options.image_config_keys)
            else {
                warn!(image = %image, "Could not find field key for image");
                outcomes.push((image.clone(), ImageOutcome::Skipped));
                continue;
            };

            let current = reference_tag(reference);
            let latest = self.latest_version(image).await;
            let last_processed = self.last_processed(image);

            info!(
                image = %image,
                field_key,
                current = current.unwrap_or("-"),
                latest = latest.as_deref().unwrap_or("-"),
                last_processed = last_processed.as_deref().unwrap_or("-"),
                "Checked image"
            );

            let outcome = match latest {
                None => ImageOutcome::NoVersion,
                Some(latest)
                    if !is_new_version(
                        self.options.version_policy,
                        &latest,
                        last_processed.as_deref(),
                    ) =>
                {
                    ImageOutcome::UpToDate { version: latest }
                }
                Some(latest) => {
                    new_images.insert(image.clone(), latest.clone());
                    let checkpointed = match self.options.commit_mode {
                        CommitMode::BeforeTrigger => Some(self.commit(image, &latest)),
                        CommitMode::AfterTrigger => None,
                    };
                    ImageOutcome::New {
                        version: latest,
                        previous: last_processed,
                        checkpointed,
                    }
                }
            };
            outcomes.push((image.clone(), outcome));
        }

        if new_images.is_empty() {
            info!("No new images found");
            return ReconcileReport {
                run_id,
                outcomes,
                new_images,
                trigger: TriggerOutcome::NotNeeded,
            };
        }

        info!(count = new_images.len(), "New images found");
        for update in new_images.iter() {
            info!(image = %update.image, version = %update.version, "New image version");
        }
        let trigger = self.trigger(&new_images).await;

        if self.options.commit_mode == CommitMode::AfterTrigger && trigger.succeeded() {
            for (image, outcome) in outcomes.iter_mut() {
                if let ImageOutcome::New {
                    version,
                    checkpointed,
                    ..
                } = outcome
                {
                    *checkpointed = Some(self.commit(image, version));
                }
            }
        }

        ReconcileReport {
            run_id,
            outcomes,
            new_images,
            trigger,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_find_entry_by_substring() {
        let d = defaults(&[
            ("addonTag", "harness/ci-addon:1.16.4"),
            ("liteEngineTag", "harness/ci-lite-engine:1.16.5"),
        ]);
        let none = BTreeMap::new();

        assert_eq!(
            find_config_entry(&d, "harness/ci-addon", &none),
            Some(("addonTag", "harness/ci-addon:1.16.4"))
        );
        assert_eq!(find_config_entry(&d, "harness/drone-git", &none), None);
    }

    #[test]
    fn test_find_entry_prefers_exact_repository() {
        // "harness/ci-addon" is a substring of "harness/ci-addon-rootless"
        let d = defaults(&[
            ("aAddonRootless", "harness/ci-addon-rootless:1.0.0"),
            ("zAddon", "harness/ci-addon:1.16.4"),
        ]);
        let none = BTreeMap::new();

        assert_eq!(
            find_config_entry(&d, "harness/ci-addon", &none),
            Some(("zAddon", "harness/ci-addon:1.16.4"))
        );
    }

    #[test]
    fn test_find_entry_with_registry_prefix() {
        let d = defaults(&[("addonTag", "docker.io/harness/ci-addon:1.16.4")]);
        assert_eq!(
            find_config_entry(&d, "harness/ci-addon", &BTreeMap::new()),
            Some(("addonTag", "docker.io/harness/ci-addon:1.16.4"))
        );
    }

    #[test]
    fn test_explicit_key_wins() {
        let d = defaults(&[
            ("addonTag", "harness/ci-addon:1.16.4"),
            ("pinnedAddon", "mirror/addon:1.0.0"),
        ]);
        let keys = defaults(&[("harness/ci-addon", "pinnedAddon")]);
        assert_eq!(
            find_config_entry(&d, "harness/ci-addon", &keys),
            Some(("pinnedAddon", "mirror/addon:1.0.0"))
        );

        // Explicit key pointing nowhere does not fall back to scanning
        let keys = defaults(&[("harness/ci-addon", "missingKey")]);
        assert_eq!(find_config_entry(&d, "harness/ci-addon", &keys), None);
    }

    #[test]
    fn test_changed_policy() {
        assert!(is_new_version(VersionPolicy::Changed, "1.2.3", None));
        assert!(is_new_version(VersionPolicy::Changed, "1.2.3", Some("1.2.2")));
        assert!(!is_new_version(VersionPolicy::Changed, "1.2.3", Some("1.2.3")));
        // A registry rollback still counts as a change
        assert!(is_new_version(VersionPolicy::Changed, "1.2.2", Some("1.2.3")));
    }

    #[test]
    fn test_newer_policy() {
        assert!(is_new_version(VersionPolicy::Newer, "1.2.3", None));
        assert!(is_new_version(VersionPolicy::Newer, "2.10.0", Some("2.9.9")));
        assert!(!is_new_version(VersionPolicy::Newer, "1.2.2", Some("1.2.3")));
        assert!(!is_new_version(VersionPolicy::Newer, "1.2.3", Some("1.2.3")));
        assert!(!is_new_version(VersionPolicy::Newer, "01.2.3", Some("1.2.3")));
        assert!(is_new_version(VersionPolicy::Newer, "1.0.0", Some("garbage")));
    }
}
