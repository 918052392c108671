//! Configuration for image-watcher.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (HARNESS_ACCOUNT_ID, TARGET_IMAGES, ...)
//! 2. Config file (`--config <file>` or IMAGE_WATCHER_CONFIG), YAML
//! 3. Defaults
//!
//! Resolution goes through a key lookup function so tests can supply their
//! own environment instead of mutating the process one.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TARGET_IMAGES: &str = "harness/ci-addon,harness/ci-lite-engine";
pub const DEFAULT_CHECKPOINT_STORE: &str = "harness-ci-image-versions";
pub const DEFAULT_HARNESS_BASE_URL: &str = "https://app.harness.io";
pub const DEFAULT_REGISTRY_BASE_URL: &str = "https://public.ecr.aws";
pub const DEFAULT_REGISTRY_ALIAS: &str = "harness";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Cannot determine home directory for the checkpoint database; set CHECKPOINT_DB")]
    NoHomeDir,
}

/// When a run counts the latest registry tag as new
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionPolicy {
    /// Any difference from the checkpoint (string inequality)
    #[default]
    Changed,
    /// Only versions strictly greater than the checkpoint
    Newer,
}

impl FromStr for VersionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "changed" => Ok(Self::Changed),
            "newer" => Ok(Self::Newer),
            other => Err(format!("expected 'changed' or 'newer', got '{}'", other)),
        }
    }
}

/// When checkpoints are written relative to the pipeline trigger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitMode {
    /// As soon as a new version is detected
    #[default]
    BeforeTrigger,
    /// Only once the pipeline trigger succeeded
    AfterTrigger,
}

impl FromStr for CommitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "before-trigger" => Ok(Self::BeforeTrigger),
            "after-trigger" => Ok(Self::AfterTrigger),
            other => Err(format!(
                "expected 'before-trigger' or 'after-trigger', got '{}'",
                other
            )),
        }
    }
}

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub harness: HarnessSection,
    pub registry: RegistrySection,
    pub target_images: Option<Vec<String>>,
    /// Explicit image -> default-config key table
    pub image_config_keys: BTreeMap<String, String>,
    pub checkpoints: CheckpointSection,
    pub version_policy: Option<VersionPolicy>,
    pub http_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HarnessSection {
    pub account_id: Option<String>,
    pub api_key: Option<String>,
    pub org_id: Option<String>,
    pub project_id: Option<String>,
    pub pipeline_id: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    /// Registry name handed to the pipeline
    pub container_registry: Option<String>,
    pub base_url: Option<String>,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckpointSection {
    pub store_name: Option<String>,
    pub database: Option<PathBuf>,
    pub commit: Option<CommitMode>,
}

/// Fully resolved settings for one run
#[derive(Clone)]
pub struct Settings {
    pub account_id: String,
    pub api_key: String,
    pub org_id: String,
    pub project_id: String,
    pub pipeline_id: String,
    pub container_registry: String,
    pub target_images: Vec<String>,
    pub image_config_keys: BTreeMap<String, String>,
    pub checkpoint_store: String,
    pub checkpoint_db: PathBuf,
    pub harness_base_url: String,
    pub registry_base_url: String,
    pub registry_alias: String,
    pub http_timeout: Duration,
    pub version_policy: VersionPolicy,
    pub commit_mode: CommitMode,
    /// Path to config file (if one was used)
    pub config_file: Option<PathBuf>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("account_id", &self.account_id)
            .field("api_key", &"<redacted>")
            .field("org_id", &self.org_id)
            .field("project_id", &self.project_id)
            .field("pipeline_id", &self.pipeline_id)
            .field("container_registry", &self.container_registry)
            .field("target_images", &self.target_images)
            .field("image_config_keys", &self.image_config_keys)
            .field("checkpoint_store", &self.checkpoint_store)
            .field("checkpoint_db", &self.checkpoint_db)
            .field("harness_base_url", &self.harness_base_url)
            .field("registry_base_url", &self.registry_base_url)
            .field("registry_alias", &self.registry_alias)
            .field("http_timeout", &self.http_timeout)
            .field("version_policy", &self.version_policy)
            .field("commit_mode", &self.commit_mode)
            .field("config_file", &self.config_file)
            .finish()
    }
}

/// Load and parse a config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Split a comma-separated image list, dropping blanks
pub fn parse_image_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `image=key,image=key` into a lookup table
pub fn parse_config_keys(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut keys = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (image, key) = pair
            .split_once('=')
            .map(|(i, k)| (i.trim(), k.trim()))
            .filter(|(i, k)| !i.is_empty() && !k.is_empty())
            .ok_or_else(|| ConfigError::Invalid {
                key: "IMAGE_CONFIG_KEYS",
                reason: format!("expected image=key, got '{}'", pair),
            })?;
        keys.insert(image.to_string(), key.to_string());
    }
    Ok(keys)
}

/// Config file named by `config_path` or IMAGE_WATCHER_CONFIG, if any.
///
/// `config_path` wins over IMAGE_WATCHER_CONFIG.
fn read_sources(config_path: Option<&Path>) -> Result<(ConfigFile, Option<PathBuf>), ConfigError> {
    let path = config_path
        .map(Path::to_path_buf)
        .or_else(|| non_empty(std::env::var("IMAGE_WATCHER_CONFIG").ok()).map(PathBuf::from));

    let file = match &path {
        Some(p) => load_config_file(p)?,
        None => ConfigFile::default(),
    };
    Ok((file, path))
}

/// Where checkpoints live. Needs no remote credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLocation {
    pub store_name: String,
    pub database: PathBuf,
}

impl StoreLocation {
    /// Resolve from the process environment and an optional config file
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (file, _) = read_sources(config_path)?;
        Self::resolve(&file.checkpoints, |key: &str| std::env::var(key).ok())
    }

    /// Resolve from a config file section and an environment lookup
    pub fn resolve<F>(section: &CheckpointSection, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| non_empty(lookup(key));

        let store_name = var("CHECKPOINT_STORE_NAME")
            .or_else(|| var("DYNAMODB_TABLE_NAME"))
            .or_else(|| non_empty(section.store_name.clone()))
            .unwrap_or_else(|| DEFAULT_CHECKPOINT_STORE.to_string());

        let database = match var("CHECKPOINT_DB")
            .map(PathBuf::from)
            .or_else(|| section.database.clone())
        {
            Some(path) => path,
            None => dirs::home_dir()
                .ok_or(ConfigError::NoHomeDir)?
                .join(".image-watcher")
                .join("checkpoints.db"),
        };

        Ok(Self {
            store_name,
            database,
        })
    }
}

impl Settings {
    /// Load settings from the process environment and an optional config file
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (file, path) = read_sources(config_path)?;
        let mut settings = Self::resolve(file, |key: &str| std::env::var(key).ok())?;
        settings.config_file = path;
        Ok(settings)
    }

    /// Resolve settings from a parsed config file and an environment lookup
    pub fn resolve<F>(file: ConfigFile, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| non_empty(lookup(key));

        let required = |key: &'static str, fallback: Option<String>| {
            var(key)
                .or_else(|| non_empty(fallback))
                .ok_or(ConfigError::Missing(key))
        };

        let account_id = required("HARNESS_ACCOUNT_ID", file.harness.account_id)?;
        let api_key = required("HARNESS_API_KEY", file.harness.api_key)?;
        let org_id = required("HARNESS_ORG_ID", file.harness.org_id)?;
        let project_id = required("HARNESS_PROJECT_ID", file.harness.project_id)?;
        let pipeline_id = required("HARNESS_PIPELINE_ID", file.harness.pipeline_id)?;
        let container_registry =
            required("CONTAINER_REGISTRY", file.registry.container_registry)?;

        let target_images = match var("TARGET_IMAGES") {
            Some(raw) => parse_image_list(&raw),
            None => file
                .target_images
                .map(|list| {
                    list.iter()
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_else(|| parse_image_list(DEFAULT_TARGET_IMAGES)),
        };
        if target_images.is_empty() {
            return Err(ConfigError::Invalid {
                key: "TARGET_IMAGES",
                reason: "no target images configured".to_string(),
            });
        }

        // Environment table entries override file entries per image
        let mut image_config_keys = file.image_config_keys;
        if let Some(raw) = var("IMAGE_CONFIG_KEYS") {
            image_config_keys.extend(parse_config_keys(&raw)?);
        }

        let store = StoreLocation::resolve(&file.checkpoints, &lookup)?;

        let http_timeout_secs = match var("HTTP_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                key: "HTTP_TIMEOUT_SECS",
                reason: e.to_string(),
            })?,
            None => file.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        };

        let version_policy = match var("VERSION_POLICY") {
            Some(raw) => raw
                .parse()
                .map_err(|reason| ConfigError::Invalid {
                    key: "VERSION_POLICY",
                    reason,
                })?,
            None => file.version_policy.unwrap_or_default(),
        };

        let commit_mode = match var("CHECKPOINT_COMMIT") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                key: "CHECKPOINT_COMMIT",
                reason,
            })?,
            None => file.checkpoints.commit.unwrap_or_default(),
        };

        Ok(Self {
            account_id,
            api_key,
            org_id,
            project_id,
            pipeline_id,
            container_registry,
            target_images,
            image_config_keys,
            checkpoint_store: store.store_name,
            checkpoint_db: store.database,
            harness_base_url: var("HARNESS_BASE_URL")
                .or_else(|| non_empty(file.harness.base_url))
                .unwrap_or_else(|| DEFAULT_HARNESS_BASE_URL.to_string()),
            registry_base_url: var("REGISTRY_BASE_URL")
                .or_else(|| non_empty(file.registry.base_url))
                .unwrap_or_else(|| DEFAULT_REGISTRY_BASE_URL.to_string()),
            registry_alias: var("REGISTRY_ALIAS")
                .or_else(|| non_empty(file.registry.alias))
                .unwrap_or_else(|| DEFAULT_REGISTRY_ALIAS.to_string()),
            http_timeout: Duration::from_secs(http_timeout_secs),
            version_policy,
            commit_mode,
            config_file: None,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("HARNESS_ACCOUNT_ID", "acct"),
            ("HARNESS_API_KEY", "pat.secret"),
            ("HARNESS_ORG_ID", "default"),
            ("HARNESS_PROJECT_ID", "ci"),
            ("HARNESS_PIPELINE_ID", "image_sync"),
            ("CONTAINER_REGISTRY", "registry.example.com"),
            ("CHECKPOINT_DB", "/tmp/checkpoints.db"),
        ])
    }

    fn resolve_with(env: &HashMap<&'static str, &'static str>) -> Result<Settings, ConfigError> {
        Settings::resolve(ConfigFile::default(), |k| env.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn test_defaults() {
        let settings = resolve_with(&base_env()).unwrap();

        assert_eq!(
            settings.target_images,
            vec!["harness/ci-addon", "harness/ci-lite-engine"]
        );
        assert_eq!(settings.checkpoint_store, "harness-ci-image-versions");
        assert_eq!(settings.harness_base_url, DEFAULT_HARNESS_BASE_URL);
        assert_eq!(settings.registry_base_url, DEFAULT_REGISTRY_BASE_URL);
        assert_eq!(settings.registry_alias, "harness");
        assert_eq!(settings.http_timeout, Duration::from_secs(30));
        assert_eq!(settings.version_policy, VersionPolicy::Changed);
        assert_eq!(settings.commit_mode, CommitMode::BeforeTrigger);
        assert!(settings.image_config_keys.is_empty());
    }

    #[test]
    fn test_missing_required_setting() {
        let mut env = base_env();
        env.remove("HARNESS_API_KEY");
        let err = resolve_with(&env).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("HARNESS_API_KEY")));

        // Blank counts as missing
        env.insert("HARNESS_API_KEY", "  ");
        assert!(matches!(
            resolve_with(&env).unwrap_err(),
            ConfigError::Missing("HARNESS_API_KEY")
        ));
    }

    #[test]
    fn test_target_images_are_trimmed() {
        let mut env = base_env();
        env.insert("TARGET_IMAGES", " a/x , ,a/y,");
        let settings = resolve_with(&env).unwrap();
        assert_eq!(settings.target_images, vec!["a/x", "a/y"]);
    }

    #[test]
    fn test_legacy_store_name_variable() {
        let mut env = base_env();
        env.insert("DYNAMODB_TABLE_NAME", "legacy-table");
        assert_eq!(resolve_with(&env).unwrap().checkpoint_store, "legacy-table");

        env.insert("CHECKPOINT_STORE_NAME", "new-table");
        assert_eq!(resolve_with(&env).unwrap().checkpoint_store, "new-table");
    }

    #[test]
    fn test_policies_from_env() {
        let mut env = base_env();
        env.insert("VERSION_POLICY", "Newer");
        env.insert("CHECKPOINT_COMMIT", "after-trigger");
        let settings = resolve_with(&env).unwrap();
        assert_eq!(settings.version_policy, VersionPolicy::Newer);
        assert_eq!(settings.commit_mode, CommitMode::AfterTrigger);

        env.insert("VERSION_POLICY", "sometimes");
        assert!(matches!(
            resolve_with(&env).unwrap_err(),
            ConfigError::Invalid {
                key: "VERSION_POLICY",
                ..
            }
        ));
    }

    #[test]
    fn test_parse_config_keys() {
        let keys =
            parse_config_keys("harness/ci-addon=addonTag, harness/ci-lite-engine = liteEngineTag")
                .unwrap();
        assert_eq!(keys.get("harness/ci-addon"), Some(&"addonTag".to_string()));
        assert_eq!(
            keys.get("harness/ci-lite-engine"),
            Some(&"liteEngineTag".to_string())
        );

        assert!(parse_config_keys("harness/ci-addon").is_err());
        assert!(parse_config_keys("=addonTag").is_err());
        assert!(parse_config_keys("").unwrap().is_empty());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let settings = resolve_with(&base_env()).unwrap();
        let debug = format!("{:?}", settings);
        assert!(!debug.contains("pat.secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_config_file_with_env_override() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("image-watcher.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
harness:
  account_id: file-acct
  api_key: file-key
  org_id: default
  project_id: ci
  pipeline_id: image_sync
registry:
  container_registry: registry.example.com
  alias: other
target_images:
  - harness/ci-addon
  - harness/drone-git
image_config_keys:
  harness/ci-addon: addonTag
checkpoints:
  store_name: file-store
  database: /var/lib/image-watcher/state.db
  commit: after-trigger
version_policy: newer
http_timeout_secs: 5
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        let env = HashMap::from([("HARNESS_ACCOUNT_ID", "env-acct")]);
        let settings =
            Settings::resolve(parsed, |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(settings.account_id, "env-acct");
        assert_eq!(settings.api_key, "file-key");
        assert_eq!(settings.registry_alias, "other");
        assert_eq!(
            settings.target_images,
            vec!["harness/ci-addon", "harness/drone-git"]
        );
        assert_eq!(
            settings.image_config_keys.get("harness/ci-addon"),
            Some(&"addonTag".to_string())
        );
        assert_eq!(settings.checkpoint_store, "file-store");
        assert_eq!(
            settings.checkpoint_db,
            PathBuf::from("/var/lib/image-watcher/state.db")
        );
        assert_eq!(settings.commit_mode, CommitMode::AfterTrigger);
        assert_eq!(settings.version_policy, VersionPolicy::Newer);
        assert_eq!(settings.http_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_store_location_needs_no_credentials() {
        let env = HashMap::from([
            ("DYNAMODB_TABLE_NAME", "legacy-table"),
            ("CHECKPOINT_DB", "/tmp/state.db"),
        ]);
        let location = StoreLocation::resolve(&CheckpointSection::default(), |k| {
            env.get(k).map(|v| v.to_string())
        })
        .unwrap();
        assert_eq!(location.store_name, "legacy-table");
        assert_eq!(location.database, PathBuf::from("/tmp/state.db"));

        // Full settings still insist on the remote values
        assert!(matches!(
            Settings::resolve(ConfigFile::default(), |k| env.get(k).map(|v| v.to_string())),
            Err(ConfigError::Missing("HARNESS_ACCOUNT_ID"))
        ));
    }

    #[test]
    fn test_store_location_from_file_section() {
        let section = CheckpointSection {
            store_name: Some("file-store".to_string()),
            database: Some(PathBuf::from("/var/lib/image-watcher/state.db")),
            commit: None,
        };
        let location = StoreLocation::resolve(&section, |_| None).unwrap();
        assert_eq!(location.store_name, "file-store");
        assert_eq!(
            location.database,
            PathBuf::from("/var/lib/image-watcher/state.db")
        );
    }

    #[test]
    fn test_unreadable_config_file() {
        let err = load_config_file(Path::new("/nonexistent/image-watcher.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
