//! Docflow ingestion runner
//!
//! Feed one document through the full pipeline against a live Postgres
//! database and model gateway, or re-run a stored ingestion.
//!
//! Usage:
//!   cargo run --bin docflow-ingest -- --file invoice.pdf
//!   cargo run --bin docflow-ingest -- --file scan.png --owner <uuid> --source dropzone
//!   cargo run --bin docflow-ingest -- --rerun <ingestion-uuid>

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::warn;
use uuid::Uuid;

use docflow_core::{
    EventSink, IngestionRepository, LanguageModelService, NoOpRemoteStorage, NoOpWorkQueue,
    SourceKind,
};
use docflow_db::Database;
use docflow_inference::HttpModelGateway;
use docflow_pipeline::{pdftotext_available, IncomingDocument, Orchestrator};
use docflow_policy::{chat_options_from_env, ActionRegistry, ActionRunner, PolicyCache, PolicyEngine};
use docflow_retrieval::ChunkIndexer;

#[derive(Debug)]
struct Args {
    file: Option<PathBuf>,
    owner: Uuid,
    source: SourceKind,
    rerun: Option<Uuid>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            file: None,
            owner: Uuid::nil(),
            source: SourceKind::Upload,
            rerun: None,
        }
    }
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();
    let mut result = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--file" | "-f" => {
                i += 1;
                if i < args.len() {
                    result.file = Some(PathBuf::from(&args[i]));
                }
            }
            "--owner" | "-o" => {
                i += 1;
                if i < args.len() {
                    result.owner = args[i]
                        .parse()
                        .with_context(|| format!("invalid owner id: {}", args[i]))?;
                }
            }
            "--source" | "-s" => {
                i += 1;
                if i < args.len() {
                    result.source = SourceKind::parse(&args[i])
                        .ok_or_else(|| anyhow::anyhow!("unknown source: {}", args[i]))?;
                }
            }
            "--rerun" | "-r" => {
                i += 1;
                if i < args.len() {
                    result.rerun = Some(
                        args[i]
                            .parse()
                            .with_context(|| format!("invalid ingestion id: {}", args[i]))?,
                    );
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                anyhow::bail!("unknown argument: {other} (try --help)");
            }
        }
        i += 1;
    }

    Ok(result)
}

fn print_help() {
    println!(
        r#"
Docflow Ingestion Runner

Usage: cargo run --bin docflow-ingest -- [OPTIONS]

Options:
  -f, --file <PATH>     Document to ingest
  -o, --owner <UUID>    Owner id (default: the nil UUID)
  -s, --source <KIND>   upload, dropzone, email, url (default: upload)
  -r, --rerun <UUID>    Re-run a stored ingestion instead of ingesting a file
  -h, --help            Print help

Environment Variables:
  DATABASE_URL            Postgres connection string (required)
  DOCFLOW_GATEWAY_URL     Model gateway base URL (default: http://127.0.0.1:8811)
  DOCFLOW_CHAT_PROVIDER   Chat provider (default: ollama)
  DOCFLOW_CHAT_MODEL      Chat model (default: gpt-oss:20b)
  DOCFLOW_EMBED_PROVIDER  Embedding provider (default: ollama)
  DOCFLOW_EMBED_MODEL     Embedding model (default: nomic-embed-text)
  RUST_LOG                Log filter (default: docflow=debug)

Examples:
  cargo run --bin docflow-ingest -- --file invoice.pdf
  cargo run --bin docflow-ingest -- --file scan.png --source dropzone
  cargo run --bin docflow-ingest -- --rerun 01921f3e-1234-7abc-8def-0123456789ab
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "docflow=debug".into());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = parse_args()?;

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let db = Database::connect(&database_url).await?;
    let Database {
        ingestions,
        policies,
        chunks,
        events,
        ..
    } = db;
    let events: Arc<dyn EventSink> = Arc::new(events);

    let models: Arc<dyn LanguageModelService> = Arc::new(HttpModelGateway::from_env());
    let engine = Arc::new(PolicyEngine::new(
        Arc::clone(&models),
        ActionRunner::new(
            Arc::new(ActionRegistry::with_defaults(Arc::new(NoOpRemoteStorage))),
            Arc::clone(&events),
        ),
        chat_options_from_env(),
    ));
    let indexer = Arc::new(ChunkIndexer::new(Arc::new(chunks), Arc::clone(&models)));
    let orchestrator = Orchestrator::new(
        Arc::new(ingestions) as Arc<dyn IngestionRepository>,
        PolicyCache::new(Arc::new(policies)),
        engine,
        models,
        indexer,
        Arc::new(NoOpWorkQueue),
        events,
    );

    if !pdftotext_available().await {
        warn!("pdftotext not found on PATH; PDF documents will route to the OCR queue");
    }

    let outcome = if let Some(ingestion_id) = args.rerun {
        orchestrator.rerun(ingestion_id).await?
    } else {
        let file = args
            .file
            .ok_or_else(|| anyhow::anyhow!("either --file or --rerun is required (try --help)"))?;
        let data = tokio::fs::read(&file)
            .await
            .with_context(|| format!("reading {}", file.display()))?;
        let filename = file
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("document")
            .to_string();
        let file_path = tokio::fs::canonicalize(&file).await.ok();
        orchestrator
            .ingest(IncomingDocument {
                owner_id: args.owner,
                source: args.source,
                filename,
                mime_type: "application/octet-stream".to_string(),
                data,
                file_path,
            })
            .await?
    };

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    // Indexing and event writes run detached; give them a moment to land
    // before the runtime shuts down.
    tokio::time::sleep(Duration::from_secs(1)).await;
    Ok(())
}
