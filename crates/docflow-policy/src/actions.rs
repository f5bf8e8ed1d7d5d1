//! Action execution for matched policies.
//!
//! Handlers are dispatched through an explicit registry keyed by action
//! kind. Failures are independent: a failing action is recorded and the
//! rest of the list still runs. Lifecycle events stream to the event sink
//! fire-and-forget; a sink failure never fails an action.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use docflow_core::{
    defaults, ActionKind, ActionSpec, Error, EventSink, PipelineEvent, RemoteStorage, Result,
};

use crate::variables::{interpolate, interpolate_json};

/// Mutable execution context threaded through an action list.
///
/// `rename` updates `filename` (and the stored file), `move` updates
/// `document_path`; later actions in the same list see the current state.
#[derive(Debug)]
pub struct ActionContext {
    pub ingestion_id: Uuid,
    pub owner_id: Uuid,
    /// Current logical file name.
    pub filename: String,
    /// Current on-disk location, when the document is stored locally.
    pub document_path: Option<PathBuf>,
    /// Interpolation variables derived from extracted fields.
    pub vars: HashMap<String, String>,
}

/// Result of one executed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: String,
    pub success: bool,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    /// Synthetic note attached without running a handler.
    pub fn note(detail: impl Into<String>) -> Self {
        Self {
            action: "note".to_string(),
            success: true,
            detail: detail.into(),
            error: None,
        }
    }
}

/// One action implementation, dispatched by kind through the registry.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Action type this handler serves.
    fn kind(&self) -> ActionKind;

    /// Execute against the raw config. Returns a human-readable detail line.
    async fn execute(&self, ctx: &mut ActionContext, config: &JsonValue) -> Result<String>;
}

/// Dispatch table from action kind to handler.
pub struct ActionRegistry {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with every built-in handler wired against the given
    /// remote-storage collaborator.
    pub fn with_defaults(remote: Arc<dyn RemoteStorage>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RenameHandler));
        registry.register(Arc::new(MoveHandler));
        registry.register(Arc::new(CopyHandler));
        registry.register(Arc::new(GdriveUploadHandler::new(Arc::clone(&remote))));
        registry.register(Arc::new(SheetAppendHandler::new(remote)));
        registry.register(Arc::new(LogCsvHandler));
        registry.register(Arc::new(NotifyHandler));
        registry.register(Arc::new(WebhookHandler::new()));
        registry
    }

    /// Add or replace the handler for its kind.
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a policy's action list in order.
pub struct ActionRunner {
    registry: Arc<ActionRegistry>,
    events: Arc<dyn EventSink>,
}

impl ActionRunner {
    pub fn new(registry: Arc<ActionRegistry>, events: Arc<dyn EventSink>) -> Self {
        Self { registry, events }
    }

    #[instrument(skip(self, actions, ctx), fields(subsystem = "policy", component = "actions", op = "run_all", action_count = actions.len(), ingestion_id = %ctx.ingestion_id))]
    pub async fn run_all(
        &self,
        actions: &[ActionSpec],
        ctx: &mut ActionContext,
    ) -> Vec<ActionOutcome> {
        let mut outcomes = Vec::with_capacity(actions.len());
        for spec in actions {
            outcomes.push(self.run_one(spec, ctx).await);
        }
        outcomes
    }

    async fn run_one(&self, spec: &ActionSpec, ctx: &mut ActionContext) -> ActionOutcome {
        let kind = spec.action_type;
        self.emit(ctx, "action.started", json!({"action": kind.as_str()}));

        let Some(handler) = self.registry.get(kind) else {
            warn!(action = kind.as_str(), "No handler registered for action");
            self.emit(
                ctx,
                "action.failed",
                json!({"action": kind.as_str(), "error": "no handler registered"}),
            );
            return ActionOutcome {
                action: kind.as_str().to_string(),
                success: false,
                detail: String::new(),
                error: Some("no handler registered".to_string()),
            };
        };

        let start = Instant::now();
        match handler.execute(ctx, &spec.config).await {
            Ok(detail) => {
                info!(
                    action = kind.as_str(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    success = true,
                    "Action executed"
                );
                self.emit(
                    ctx,
                    "action.executed",
                    json!({"action": kind.as_str(), "detail": detail}),
                );
                ActionOutcome {
                    action: kind.as_str().to_string(),
                    success: true,
                    detail,
                    error: None,
                }
            }
            Err(e) => {
                warn!(
                    action = kind.as_str(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    success = false,
                    error = %e,
                    "Action failed"
                );
                self.emit(
                    ctx,
                    "action.failed",
                    json!({"action": kind.as_str(), "error": e.to_string()}),
                );
                ActionOutcome {
                    action: kind.as_str().to_string(),
                    success: false,
                    detail: String::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn emit(&self, ctx: &ActionContext, kind: &str, details: JsonValue) {
        let events = Arc::clone(&self.events);
        let event = PipelineEvent::new(
            Some(ctx.ingestion_id),
            Some(ctx.owner_id),
            kind,
            "actions",
            details,
        );
        tokio::spawn(async move {
            if let Err(e) = events.log_event(event).await {
                debug!(error = %e, "Event emission failed");
            }
        });
    }
}

fn config_str<'a>(config: &'a JsonValue, key: &str) -> Result<&'a str> {
    config
        .get(key)
        .and_then(JsonValue::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::InvalidInput(format!("action config needs a \"{}\" string", key)))
}

fn no_stored_file() -> Error {
    Error::Action("document has no stored file".to_string())
}

/// Renames the document from an interpolated pattern, preserving the
/// original extension.
pub struct RenameHandler;

#[async_trait]
impl ActionHandler for RenameHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::Rename
    }

    async fn execute(&self, ctx: &mut ActionContext, config: &JsonValue) -> Result<String> {
        let pattern = config_str(config, "pattern")?;
        // Keep the result a plain file name.
        let base = interpolate(pattern, &ctx.vars)
            .replace('/', "-")
            .replace('\\', "-");
        if base.trim().is_empty() {
            return Err(Error::Action(
                "rename pattern produced an empty name".to_string(),
            ));
        }
        let extension = match ctx.filename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => format!(".{}", ext),
            _ => String::new(),
        };
        let new_filename = format!("{}{}", base, extension);
        if let Some(path) = &ctx.document_path {
            let target = path.with_file_name(&new_filename);
            fs::rename(path, &target).await?;
            ctx.document_path = Some(target);
        }
        ctx.filename = new_filename.clone();
        Ok(format!("Renamed to {}", new_filename))
    }
}

/// Moves the stored document into an interpolated destination directory.
pub struct MoveHandler;

#[async_trait]
impl ActionHandler for MoveHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::Move
    }

    async fn execute(&self, ctx: &mut ActionContext, config: &JsonValue) -> Result<String> {
        let destination = config_str(config, "destination")?;
        let source = ctx.document_path.clone().ok_or_else(no_stored_file)?;
        let dir = PathBuf::from(interpolate(destination, &ctx.vars));
        fs::create_dir_all(&dir).await?;
        let target = dir.join(&ctx.filename);
        // rename fails across filesystems; fall back to copy + remove.
        if fs::rename(&source, &target).await.is_err() {
            fs::copy(&source, &target).await?;
            fs::remove_file(&source).await?;
        }
        ctx.document_path = Some(target.clone());
        Ok(format!("Moved to {}", target.display()))
    }
}

/// Copies the stored document into an interpolated destination directory.
pub struct CopyHandler;

#[async_trait]
impl ActionHandler for CopyHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::Copy
    }

    async fn execute(&self, ctx: &mut ActionContext, config: &JsonValue) -> Result<String> {
        let destination = config_str(config, "destination")?;
        let source = ctx.document_path.clone().ok_or_else(no_stored_file)?;
        let dir = PathBuf::from(interpolate(destination, &ctx.vars));
        fs::create_dir_all(&dir).await?;
        let target = dir.join(&ctx.filename);
        fs::copy(&source, &target).await?;
        Ok(format!("Copied to {}", target.display()))
    }
}

/// Uploads the stored document to the remote-storage collaborator.
pub struct GdriveUploadHandler {
    remote: Arc<dyn RemoteStorage>,
}

impl GdriveUploadHandler {
    pub fn new(remote: Arc<dyn RemoteStorage>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl ActionHandler for GdriveUploadHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::CopyToGdrive
    }

    async fn execute(&self, ctx: &mut ActionContext, config: &JsonValue) -> Result<String> {
        let folder = interpolate(config_str(config, "folder")?, &ctx.vars);
        let source = ctx.document_path.clone().ok_or_else(no_stored_file)?;
        let reference = self
            .remote
            .upload_file(source.to_string_lossy().as_ref(), &folder)
            .await?;
        Ok(format!("Uploaded to {}", reference))
    }
}

/// Appends a row of interpolated cells to a spreadsheet.
pub struct SheetAppendHandler {
    remote: Arc<dyn RemoteStorage>,
}

impl SheetAppendHandler {
    pub fn new(remote: Arc<dyn RemoteStorage>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl ActionHandler for SheetAppendHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::AppendToGoogleSheet
    }

    async fn execute(&self, ctx: &mut ActionContext, config: &JsonValue) -> Result<String> {
        let sheet_id = config_str(config, "sheet_id")?;
        let columns = config
            .get("columns")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| {
                Error::InvalidInput("action config needs a \"columns\" array".to_string())
            })?;
        let row: Vec<String> = columns
            .iter()
            .map(|cell| match cell {
                JsonValue::String(s) => interpolate(s, &ctx.vars),
                other => other.to_string(),
            })
            .collect();
        self.remote.append_sheet_row(sheet_id, &row).await?;
        Ok(format!("Appended {} cells to sheet {}", row.len(), sheet_id))
    }
}

/// Appends a row to a CSV file, writing the header when the file is created.
pub struct LogCsvHandler;

#[async_trait]
impl ActionHandler for LogCsvHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::LogCsv
    }

    async fn execute(&self, ctx: &mut ActionContext, config: &JsonValue) -> Result<String> {
        let path = PathBuf::from(interpolate(config_str(config, "path")?, &ctx.vars));
        let columns = config
            .get("columns")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| {
                Error::InvalidInput("action config needs a \"columns\" array".to_string())
            })?;
        let templates: Vec<&str> = columns.iter().filter_map(JsonValue::as_str).collect();
        if templates.len() != columns.len() {
            return Err(Error::InvalidInput(
                "csv columns must be strings".to_string(),
            ));
        }

        // Header cells are the column templates with the braces stripped.
        let header = templates
            .iter()
            .map(|t| csv_cell(&t.replace(['{', '}'], "")))
            .collect::<Vec<_>>()
            .join(",");
        let row = templates
            .iter()
            .map(|t| csv_cell(&interpolate(t, &ctx.vars)))
            .collect::<Vec<_>>()
            .join(",");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let write_header = fs::metadata(&path).await.is_err();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if write_header {
            file.write_all(format!("{}\n", header).as_bytes()).await?;
        }
        file.write_all(format!("{}\n", row).as_bytes()).await?;
        Ok(format!("Logged row to {}", path.display()))
    }
}

fn csv_cell(value: &str) -> String {
    if value.contains(|c| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Emits a structured notification log line.
pub struct NotifyHandler;

#[async_trait]
impl ActionHandler for NotifyHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::Notify
    }

    async fn execute(&self, ctx: &mut ActionContext, config: &JsonValue) -> Result<String> {
        let message = interpolate(config_str(config, "message")?, &ctx.vars);
        info!(
            subsystem = "policy",
            component = "actions",
            op = "notify",
            ingestion_id = %ctx.ingestion_id,
            owner_id = %ctx.owner_id,
            filename = %ctx.filename,
            "{}",
            message
        );
        Ok(message)
    }
}

/// POSTs an interpolated JSON payload to a configured URL.
pub struct WebhookHandler {
    client: Client,
}

impl WebhookHandler {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(defaults::WEBHOOK_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

impl Default for WebhookHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionHandler for WebhookHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::Webhook
    }

    async fn execute(&self, ctx: &mut ActionContext, config: &JsonValue) -> Result<String> {
        let url = interpolate(config_str(config, "url")?, &ctx.vars);
        let payload = match config.get("payload") {
            Some(template) => interpolate_json(template, &ctx.vars),
            None => json!({
                "ingestion_id": ctx.ingestion_id,
                "filename": ctx.filename,
                "fields": ctx.vars,
            }),
        };

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Action(format!("webhook request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Action(format!("webhook returned {}", status)));
        }
        Ok(format!("Webhook {} returned {}", url, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_core::{NoOpEventSink, NoOpRemoteStorage};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx_with(vars: &[(&str, &str)], document_path: Option<PathBuf>, filename: &str) -> ActionContext {
        ActionContext {
            ingestion_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            filename: filename.to_string(),
            document_path,
            vars: vars
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn runner() -> ActionRunner {
        ActionRunner::new(
            Arc::new(ActionRegistry::with_defaults(Arc::new(NoOpRemoteStorage))),
            Arc::new(NoOpEventSink),
        )
    }

    fn spec(action_type: ActionKind, config: JsonValue) -> ActionSpec {
        ActionSpec {
            action_type,
            config,
        }
    }

    async fn seed_file(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, b"document bytes").await.unwrap();
        path
    }

    struct RecordingRemote {
        rows: Mutex<Vec<(String, Vec<String>)>>,
    }

    #[async_trait]
    impl RemoteStorage for RecordingRemote {
        async fn upload_file(
            &self,
            local_path: &str,
            remote_folder: &str,
        ) -> docflow_core::Result<String> {
            Ok(format!("drive://{}/{}", remote_folder, local_path))
        }

        async fn append_sheet_row(
            &self,
            sheet_id: &str,
            values: &[String],
        ) -> docflow_core::Result<()> {
            self.rows
                .lock()
                .unwrap()
                .push((sheet_id.to_string(), values.to_vec()));
            Ok(())
        }
    }

    struct RecordingSink {
        kinds: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn log_event(&self, event: PipelineEvent) -> docflow_core::Result<()> {
            self.kinds.lock().unwrap().push(event.kind);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_rename_preserves_extension() {
        let dir = TempDir::new().unwrap();
        let path = seed_file(&dir, "scan.pdf").await;
        let mut ctx = ctx_with(
            &[("document_type", "invoice"), ("year", "2026")],
            Some(path.clone()),
            "scan.pdf",
        );
        let outcomes = runner()
            .run_all(
                &[spec(
                    ActionKind::Rename,
                    json!({"pattern": "{document_type}_{year}"}),
                )],
                &mut ctx,
            )
            .await;
        assert!(outcomes[0].success);
        assert_eq!(ctx.filename, "invoice_2026.pdf");
        assert!(dir.path().join("invoice_2026.pdf").exists());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_rename_sanitizes_separators() {
        let dir = TempDir::new().unwrap();
        let path = seed_file(&dir, "scan.pdf").await;
        let mut ctx = ctx_with(&[("issuer", "Acme/Europe")], Some(path), "scan.pdf");
        let outcomes = runner()
            .run_all(
                &[spec(ActionKind::Rename, json!({"pattern": "{issuer}"}))],
                &mut ctx,
            )
            .await;
        assert!(outcomes[0].success);
        assert_eq!(ctx.filename, "Acme-Europe.pdf");
    }

    #[tokio::test]
    async fn test_rename_without_stored_file_updates_name_only() {
        let mut ctx = ctx_with(&[("year", "2026")], None, "scan.pdf");
        let outcomes = runner()
            .run_all(
                &[spec(ActionKind::Rename, json!({"pattern": "doc_{year}"}))],
                &mut ctx,
            )
            .await;
        assert!(outcomes[0].success);
        assert_eq!(ctx.filename, "doc_2026.pdf");
    }

    #[tokio::test]
    async fn test_move_creates_destination_and_updates_path() {
        let dir = TempDir::new().unwrap();
        let path = seed_file(&dir, "scan.pdf").await;
        let dest = dir.path().join("{document_type}s");
        let mut ctx = ctx_with(
            &[("document_type", "invoice")],
            Some(path.clone()),
            "scan.pdf",
        );
        let outcomes = runner()
            .run_all(
                &[spec(
                    ActionKind::Move,
                    json!({"destination": dest.to_string_lossy()}),
                )],
                &mut ctx,
            )
            .await;
        assert!(outcomes[0].success);
        let moved = dir.path().join("invoices").join("scan.pdf");
        assert!(moved.exists());
        assert!(!path.exists());
        assert_eq!(ctx.document_path.as_deref(), Some(moved.as_path()));
    }

    #[tokio::test]
    async fn test_copy_leaves_source_in_place() {
        let dir = TempDir::new().unwrap();
        let path = seed_file(&dir, "scan.pdf").await;
        let dest = dir.path().join("backup");
        let mut ctx = ctx_with(&[], Some(path.clone()), "scan.pdf");
        let outcomes = runner()
            .run_all(
                &[spec(
                    ActionKind::Copy,
                    json!({"destination": dest.to_string_lossy()}),
                )],
                &mut ctx,
            )
            .await;
        assert!(outcomes[0].success);
        assert!(path.exists());
        assert!(dest.join("scan.pdf").exists());
        assert_eq!(ctx.document_path.as_deref(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_move_requires_stored_file() {
        let mut ctx = ctx_with(&[], None, "scan.pdf");
        let outcomes = runner()
            .run_all(
                &[spec(ActionKind::Move, json!({"destination": "/tmp/nowhere"}))],
                &mut ctx,
            )
            .await;
        assert!(!outcomes[0].success);
        assert!(outcomes[0]
            .error
            .as_deref()
            .unwrap()
            .contains("no stored file"));
    }

    #[tokio::test]
    async fn test_log_csv_writes_header_once() {
        let dir = TempDir::new().unwrap();
        let csv_path = dir.path().join("ledger.csv");
        let config = json!({
            "path": csv_path.to_string_lossy(),
            "columns": ["{issuer}", "{total}"]
        });
        let mut ctx = ctx_with(&[("issuer", "Acme"), ("total", "99.50")], None, "a.pdf");
        runner()
            .run_all(&[spec(ActionKind::LogCsv, config.clone())], &mut ctx)
            .await;
        runner()
            .run_all(&[spec(ActionKind::LogCsv, config)], &mut ctx)
            .await;

        let content = fs::read_to_string(&csv_path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["issuer,total", "Acme,99.50", "Acme,99.50"]);
    }

    #[tokio::test]
    async fn test_log_csv_quotes_cells() {
        let dir = TempDir::new().unwrap();
        let csv_path = dir.path().join("ledger.csv");
        let mut ctx = ctx_with(&[("issuer", "Acme, Inc."), ("total", "1000")], None, "a.pdf");
        runner()
            .run_all(
                &[spec(
                    ActionKind::LogCsv,
                    json!({"path": csv_path.to_string_lossy(), "columns": ["{issuer}", "{total}"]}),
                )],
                &mut ctx,
            )
            .await;
        let content = fs::read_to_string(&csv_path).await.unwrap();
        assert!(content.contains(r#""Acme, Inc.",1000"#));
    }

    #[tokio::test]
    async fn test_notify_returns_interpolated_message() {
        let mut ctx = ctx_with(&[("issuer", "Acme")], None, "a.pdf");
        let outcomes = runner()
            .run_all(
                &[spec(
                    ActionKind::Notify,
                    json!({"message": "New document from {issuer}"}),
                )],
                &mut ctx,
            )
            .await;
        assert!(outcomes[0].success);
        assert_eq!(outcomes[0].detail, "New document from Acme");
    }

    #[tokio::test]
    async fn test_webhook_posts_interpolated_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/hook"))
            .and(body_partial_json(json!({"issuer": "Acme"})))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut ctx = ctx_with(&[("issuer", "Acme")], None, "a.pdf");
        let outcomes = runner()
            .run_all(
                &[spec(
                    ActionKind::Webhook,
                    json!({
                        "url": format!("{}/hook", server.uri()),
                        "payload": {"issuer": "{issuer}"}
                    }),
                )],
                &mut ctx,
            )
            .await;
        assert!(outcomes[0].success);
        assert!(outcomes[0].detail.contains("200"));
    }

    #[tokio::test]
    async fn test_webhook_failure_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut ctx = ctx_with(&[], None, "a.pdf");
        let outcomes = runner()
            .run_all(
                &[spec(ActionKind::Webhook, json!({"url": server.uri()}))],
                &mut ctx,
            )
            .await;
        assert!(!outcomes[0].success);
        assert!(outcomes[0].error.as_deref().unwrap().contains("500"));
    }

    #[tokio::test]
    async fn test_missing_config_key_is_failure() {
        let mut ctx = ctx_with(&[], None, "a.pdf");
        let outcomes = runner()
            .run_all(&[spec(ActionKind::Rename, json!({}))], &mut ctx)
            .await;
        assert!(!outcomes[0].success);
        assert!(outcomes[0].error.as_deref().unwrap().contains("pattern"));
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_later_actions() {
        let mut ctx = ctx_with(&[], None, "a.pdf");
        let outcomes = runner()
            .run_all(
                &[
                    spec(ActionKind::Move, json!({"destination": "/tmp/nowhere"})),
                    spec(ActionKind::Notify, json!({"message": "still running"})),
                ],
                &mut ctx,
            )
            .await;
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].success);
        assert!(outcomes[1].success);
        assert_eq!(outcomes[1].detail, "still running");
    }

    #[tokio::test]
    async fn test_gdrive_upload_delegates_to_remote() {
        let dir = TempDir::new().unwrap();
        let path = seed_file(&dir, "scan.pdf").await;
        let registry = ActionRegistry::with_defaults(Arc::new(RecordingRemote {
            rows: Mutex::new(Vec::new()),
        }));
        let runner = ActionRunner::new(Arc::new(registry), Arc::new(NoOpEventSink));
        let mut ctx = ctx_with(&[("year", "2026")], Some(path), "scan.pdf");
        let outcomes = runner
            .run_all(
                &[spec(
                    ActionKind::CopyToGdrive,
                    json!({"folder": "Invoices/{year}"}),
                )],
                &mut ctx,
            )
            .await;
        assert!(outcomes[0].success);
        assert!(outcomes[0].detail.contains("drive://Invoices/2026/"));
    }

    #[tokio::test]
    async fn test_sheet_append_records_interpolated_row() {
        let remote = Arc::new(RecordingRemote {
            rows: Mutex::new(Vec::new()),
        });
        let registry = ActionRegistry::with_defaults(Arc::clone(&remote) as Arc<dyn RemoteStorage>);
        let runner = ActionRunner::new(Arc::new(registry), Arc::new(NoOpEventSink));
        let mut ctx = ctx_with(&[("issuer", "Acme"), ("total", "99.50")], None, "a.pdf");
        let outcomes = runner
            .run_all(
                &[spec(
                    ActionKind::AppendToGoogleSheet,
                    json!({"sheet_id": "ledger-1", "columns": ["{issuer}", "{total}", 7]}),
                )],
                &mut ctx,
            )
            .await;
        assert!(outcomes[0].success);
        let rows = remote.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "ledger-1");
        assert_eq!(rows[0].1, vec!["Acme", "99.50", "7"]);
    }

    #[tokio::test]
    async fn test_empty_registry_reports_missing_handler() {
        let runner = ActionRunner::new(Arc::new(ActionRegistry::new()), Arc::new(NoOpEventSink));
        let mut ctx = ctx_with(&[], None, "a.pdf");
        let outcomes = runner
            .run_all(
                &[spec(ActionKind::Notify, json!({"message": "hi"}))],
                &mut ctx,
            )
            .await;
        assert!(!outcomes[0].success);
        assert!(outcomes[0]
            .error
            .as_deref()
            .unwrap()
            .contains("no handler registered"));
    }

    #[tokio::test]
    async fn test_lifecycle_events_are_emitted() {
        let sink = Arc::new(RecordingSink {
            kinds: Mutex::new(Vec::new()),
        });
        let runner = ActionRunner::new(
            Arc::new(ActionRegistry::with_defaults(Arc::new(NoOpRemoteStorage))),
            Arc::clone(&sink) as Arc<dyn EventSink>,
        );
        let mut ctx = ctx_with(&[], None, "a.pdf");
        runner
            .run_all(
                &[spec(ActionKind::Notify, json!({"message": "hi"}))],
                &mut ctx,
            )
            .await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        let kinds = sink.kinds.lock().unwrap();
        assert!(kinds.contains(&"action.started".to_string()));
        assert!(kinds.contains(&"action.executed".to_string()));
    }

    #[test]
    fn test_csv_cell_quoting() {
        assert_eq!(csv_cell("plain"), "plain");
        assert_eq!(csv_cell("a,b"), "\"a,b\"");
        assert_eq!(csv_cell("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_action_outcome_note() {
        let note = ActionOutcome::note("Moved to /_Needs_Review");
        assert_eq!(note.action, "note");
        assert!(note.success);
        assert!(note.error.is_none());
    }
}
