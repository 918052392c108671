//! Command-line interface for image-watcher.
//!
//! Provides one-shot reconciliation runs plus commands to inspect and
//! correct the checkpoint store.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::config::{Settings, StoreLocation};
use crate::core::{CheckpointStore, SqliteCheckpointStore};
use crate::handler::{self, InvocationContext};

/// image-watcher - triggers a pipeline when new CI images are published
#[derive(Parser, Debug)]
#[command(name = "image-watcher")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file (environment variables take precedence)
    #[arg(short, long, global = true, env = "IMAGE_WATCHER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one reconciliation and print the invocation response
    Run {
        /// JSON trigger event to pass through (defaults to `{}`)
        #[arg(short, long)]
        event: Option<PathBuf>,
    },

    /// List stored checkpoints
    Checkpoints,

    /// Delete the checkpoint of one image so the next run reports it again
    Reset {
        /// Image name, e.g. harness/ci-addon
        image: String,
    },

    /// Show resolved configuration (API key redacted)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = self.config.as_deref();
        match self.command {
            Commands::Run { event } => run_once(config, event.as_deref()).await,
            Commands::Checkpoints => list_checkpoints(config),
            Commands::Reset { image } => reset_checkpoint(config, &image),
            Commands::Config => show_config(config),
        }
    }
}

/// Read the trigger event, `{}` when none is given
fn read_event(path: Option<&Path>) -> Result<Value> {
    let Some(path) = path else {
        return Ok(Value::Object(Default::default()));
    };

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read event file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Event file is not valid JSON: {}", path.display()))
}

/// Run one reconciliation
async fn run_once(config: Option<&Path>, event_path: Option<&Path>) -> Result<()> {
    let event = read_event(event_path)?;
    let ctx = InvocationContext::default();

    let response = handler::handle(&event, &ctx, config).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if !response.is_success() {
        std::process::exit(1);
    }

    Ok(())
}

/// Open the checkpoint store without resolving any remote settings
fn open_store(config: Option<&Path>) -> Result<SqliteCheckpointStore> {
    let location = StoreLocation::load(config)?;
    SqliteCheckpointStore::open(&location.database, &location.store_name).with_context(|| {
        format!(
            "Failed to open checkpoint store: {}",
            location.database.display()
        )
    })
}

/// List stored checkpoints
fn list_checkpoints(config: Option<&Path>) -> Result<()> {
    let store = open_store(config)?;
    let checkpoints = store.list()?;

    if checkpoints.is_empty() {
        println!("No checkpoints found");
        return Ok(());
    }

    println!("{:<40} {:<16} {}", "IMAGE", "VERSION", "PROCESSED AT");
    println!("{}", "-".repeat(85));

    for checkpoint in checkpoints {
        println!(
            "{:<40} {:<16} {}",
            checkpoint.image_name,
            checkpoint.version,
            checkpoint.processed_at.to_rfc3339()
        );
    }

    Ok(())
}

/// Delete one checkpoint
fn reset_checkpoint(config: Option<&Path>, image: &str) -> Result<()> {
    let store = open_store(config)?;

    if store.remove(image)? {
        println!("Removed checkpoint for {}", image);
    } else {
        println!("No checkpoint stored for {}", image);
    }

    Ok(())
}

/// Print resolved configuration
fn show_config(config: Option<&Path>) -> Result<()> {
    let cfg = Settings::load(config)?;

    println!("image-watcher configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - environment and defaults)".to_string())
    );
    println!();
    println!("Harness:");
    println!("  Base URL:     {}", cfg.harness_base_url);
    println!("  Account:      {}", cfg.account_id);
    println!("  Organization: {}", cfg.org_id);
    println!("  Project:      {}", cfg.project_id);
    println!("  Pipeline:     {}", cfg.pipeline_id);
    println!("  API key:      <redacted>");
    println!();
    println!("Registry:");
    println!("  Base URL:           {}", cfg.registry_base_url);
    println!("  Alias:              {}", cfg.registry_alias);
    println!("  Pipeline registry:  {}", cfg.container_registry);
    println!();
    println!("Target images:");
    for image in &cfg.target_images {
        match cfg.image_config_keys.get(image) {
            Some(key) => println!("  {} (config key: {})", image, key),
            None => println!("  {}", image),
        }
    }
    println!();
    println!("Checkpoints:");
    println!("  Store:    {}", cfg.checkpoint_store);
    println!("  Database: {}", cfg.checkpoint_db.display());
    println!("  Commit:   {:?}", cfg.commit_mode);
    println!();
    println!("Version policy: {:?}", cfg.version_policy);
    println!("HTTP timeout:   {}s", cfg.http_timeout.as_secs());

    Ok(())
}
