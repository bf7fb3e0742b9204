//! OCR Field Extractor - rule-driven field extraction from scanned document images.

use clap::{Parser, Subcommand};
use ocr_field_extractor::server::{self, AppState};
use ocr_field_extractor::upload::UploadLimits;
use ocr_field_extractor::{ocr, BatchOrchestrator, Document, RuleStore, Settings};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Extract fields from scanned invoices and purchase requests
#[derive(Parser)]
#[command(name = "ocr-field-extractor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service (default)
    Serve,

    /// Extract fields from local image files and print JSON
    Extract {
        /// Rule set to apply (default: DEFAULT_RULE_SET)
        #[arg(short, long)]
        rules: Option<String>,

        /// Image files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "ocr_field_extractor=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let settings = Settings::from_env()?;

    // Rule sets are validated here; a bad rule stops startup
    let rules = RuleStore::load_from_dir(&settings.rules_dir, &settings.default_rule_set)?;
    info!(
        "Loaded {} rule sets: {:?} (default: {})",
        rules.list().len(),
        rules.list(),
        rules.default_name()
    );

    let recognizer = ocr::create_recognizer(&settings.ocr)?;
    info!(
        "OCR backend: {} ({} workers, unit timeout {:?})",
        recognizer.name(),
        settings.pipeline.max_workers,
        settings.pipeline.unit_timeout
    );
    let orchestrator = BatchOrchestrator::from_settings(&settings.pipeline, recognizer);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(settings, rules, orchestrator).await,
        Commands::Extract { rules: name, files } => {
            extract_files(&rules, &orchestrator, name.as_deref(), files).await
        }
    }
}

async fn serve(
    settings: Settings,
    rules: RuleStore,
    orchestrator: BatchOrchestrator,
) -> anyhow::Result<()> {
    let state = AppState {
        rules: Arc::new(rules),
        orchestrator,
        upload_dir: settings.upload_dir.clone(),
        limits: UploadLimits {
            max_files: settings.max_files,
            max_file_bytes: settings.max_file_bytes,
        },
    };

    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!("Server listening on http://{}", settings.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Run one batch over files on disk; identifiers are the file names.
async fn extract_files(
    rules: &RuleStore,
    orchestrator: &BatchOrchestrator,
    rule_set: Option<&str>,
    files: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let rule_set = match rule_set {
        Some(name) => rules.get(name).ok_or_else(|| {
            anyhow::anyhow!("Unknown rule set: {}. Available: {:?}", name, rules.list())
        })?,
        None => rules.default_set(),
    };

    let mut documents = Vec::with_capacity(files.len());
    for path in &files {
        documents.push(Document::from_path(path).await?);
    }

    let fields = orchestrator.run_batch(documents, rule_set).await?;
    println!("{}", serde_json::to_string_pretty(&json!({ "fields": fields }))?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
