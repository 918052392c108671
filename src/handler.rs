//! Invocation entry point.
//!
//! One call = one reconciliation run. The trigger event is opaque; the
//! response mirrors a function-as-a-service result: a status code plus a JSON
//! body string. Anything that escapes the run (bad configuration, an
//! unopenable checkpoint store) becomes a 500 with the error text.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::adapters::{HarnessClient, RegistryClient};
use crate::config::Settings;
use crate::core::{
    ReconcileOptions, ReconcileReport, Reconciler, SqliteCheckpointStore, TriggerOutcome,
};

pub const MSG_NO_NEW_IMAGES: &str = "No new images found";
pub const MSG_TRIGGERED: &str = "Pipeline triggered successfully";
pub const MSG_TRIGGER_FAILED: &str = "Failed to trigger pipeline";

/// Metadata about the invocation
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub request_id: String,
}

impl Default for InvocationContext {
    fn default() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Status code plus JSON body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

impl InvocationResponse {
    fn new(status_code: u16, body: &Value) -> Self {
        Self {
            status_code,
            body: body.to_string(),
        }
    }

    /// 500 response carrying the error text
    pub fn error(err: &anyhow::Error) -> Self {
        Self::new(500, &json!({ "message": format!("Error: {:#}", err) }))
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    /// Parsed body, `Value::Null` if it is not JSON
    pub fn body_json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

impl From<&ReconcileReport> for InvocationResponse {
    fn from(report: &ReconcileReport) -> Self {
        let message = match report.trigger {
            TriggerOutcome::NotNeeded => {
                return Self::new(200, &json!({ "message": MSG_NO_NEW_IMAGES }));
            }
            TriggerOutcome::Triggered { .. } => MSG_TRIGGERED,
            TriggerOutcome::Failed { .. } => MSG_TRIGGER_FAILED,
        };
        Self::new(
            200,
            &json!({
                "message": message,
                "new_images": report.new_images,
            }),
        )
    }
}

/// Wire the production collaborators from settings
pub fn build_reconciler(settings: &Settings) -> Result<Reconciler> {
    let harness = Arc::new(HarnessClient::from_settings(settings)?);
    let registry = Arc::new(RegistryClient::from_settings(settings)?);
    let store = SqliteCheckpointStore::open(&settings.checkpoint_db, &settings.checkpoint_store)
        .with_context(|| {
            format!(
                "Failed to open checkpoint store '{}' at {}",
                settings.checkpoint_store,
                settings.checkpoint_db.display()
            )
        })?;

    Ok(Reconciler::new(
        harness.clone(),
        registry,
        Arc::new(store),
        harness,
        ReconcileOptions::from_settings(settings),
    ))
}

/// Run one reconciliation with an already-built reconciler
pub async fn handle_with(reconciler: &Reconciler) -> InvocationResponse {
    let report = reconciler.reconcile().await;
    InvocationResponse::from(&report)
}

/// Full invocation: load settings, wire collaborators, reconcile
pub async fn handle(
    event: &Value,
    ctx: &InvocationContext,
    config_path: Option<&Path>,
) -> InvocationResponse {
    info!(request_id = %ctx.request_id, "Invocation started");
    debug!(%event, "Trigger event");

    let reconciler = match Settings::load(config_path)
        .map_err(anyhow::Error::from)
        .and_then(|settings| build_reconciler(&settings))
    {
        Ok(reconciler) => reconciler,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Error in handler");
            return InvocationResponse::error(&e);
        }
    };

    handle_with(&reconciler).await
}
