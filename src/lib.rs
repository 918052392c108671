//! image-watcher - CI image release watcher
//!
//! Polls a public container registry for new `MAJOR.MINOR.PATCH` tags of a
//! fixed set of images, compares them with the Harness default image config
//! and a local checkpoint store, and triggers a Harness pipeline with the new
//! tags when something changed.
//!
//! # Modules
//!
//! - `adapters`: Harness and registry HTTP clients
//! - `core`: Version ordering, checkpoint store, reconciler
//! - `domain`: Per-run results
//! - `handler`: Invocation entry point (status code + JSON body)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # One reconciliation run (schedule it externally, e.g. cron)
//! image-watcher run
//!
//! # Inspect or correct stored checkpoints
//! image-watcher checkpoints
//! image-watcher reset harness/ci-addon
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod handler;

// Re-export main types at crate root for convenience
pub use config::Settings;
pub use core::{ReconcileReport, Reconciler, TriggerOutcome};
pub use domain::{ImageOutcome, NewImages};
pub use handler::{handle, InvocationContext, InvocationResponse};
