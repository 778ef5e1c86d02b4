use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use esg_audit::corpus::FileCorpusProvider;
use esg_audit::ollama::{OllamaClient, OllamaReasoner};
use esg_audit::reasoning::cancellation;
use esg_audit::{AppConfig, AuditPipeline};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Markdown,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "esg-audit")]
#[command(about = "Evaluate a long document for ESG compliance findings and write one report")]
struct Cli {
    /// Document to audit (.pdf, .txt with form-feed page breaks, .json or .jsonl pages)
    document: PathBuf,
    #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
    format: OutputFormat,
    /// Write the report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    concurrency: Option<usize>,
    #[arg(long)]
    max_attempts: Option<u32>,
    #[arg(long)]
    chunk_size: Option<usize>,
    #[arg(long)]
    overlap: Option<usize>,
    #[arg(long)]
    token_budget: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = AppConfig::from_env();
    if let Some(model) = cli.model {
        config.models.reasoning_model = model;
    }
    let pipeline_config = &mut config.pipeline;
    if let Some(value) = cli.concurrency {
        pipeline_config.concurrency = value;
    }
    if let Some(value) = cli.max_attempts {
        pipeline_config.max_attempts = value;
    }
    if let Some(value) = cli.chunk_size {
        pipeline_config.chunk_size = value;
    }
    if let Some(value) = cli.overlap {
        pipeline_config.chunk_overlap = value;
    }
    if let Some(value) = cli.token_budget {
        pipeline_config.token_budget = value;
    }

    let reasoner = OllamaReasoner::new(
        OllamaClient::new(config.models.ollama_base_url.clone()),
        &config.models,
    );
    tracing::info!(model = reasoner.model(), "using reasoning model");

    let pipeline = AuditPipeline::new(config.pipeline.clone(), Arc::new(reasoner))?;

    let (cancel_handle, cancel) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling outstanding evaluations");
            cancel_handle.cancel();
        }
    });

    let audit = pipeline
        .run_document(&FileCorpusProvider, &cli.document, &cancel)
        .await
        .with_context(|| format!("audit of {} failed", cli.document.display()))?;

    tracing::info!(
        chunks = audit.chunk_count,
        evaluated = audit.evaluated_count,
        discarded = audit.discarded_count,
        failed = audit.failures.len(),
        batches = audit.batch_count,
        "audit complete"
    );

    let rendered = match cli.format {
        OutputFormat::Markdown => format!("{}\n", audit.report.text),
        OutputFormat::Json => serde_json::to_string_pretty(&audit)?,
    };

    match cli.output {
        Some(path) => tokio::fs::write(&path, rendered)
            .await
            .with_context(|| format!("failed writing report to {}", path.display()))?,
        None => print!("{rendered}"),
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
