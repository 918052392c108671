//! Core reconciliation logic.
//!
//! This module contains:
//! - Version: strict `MAJOR.MINOR.PATCH` parsing and ordering
//! - Checkpoint: persisted last-processed versions
//! - Reconciler: the per-run decision flow

pub mod checkpoint;
pub mod reconciler;
pub mod version;

// Re-export commonly used types
pub use checkpoint::{
    Checkpoint, CheckpointError, CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore,
};
pub use reconciler::{
    find_config_entry, is_new_version, ReconcileOptions, ReconcileReport, Reconciler,
    TriggerOutcome,
};
pub use version::{latest_tag, SemVer};
