//! CLI binary for medbill-extract.
//!
//! A thin shim over the library crate: `serve` runs the HTTP service, the
//! other subcommands run the same pipeline locally.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use medbill_extract::config::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use medbill_extract::server::{self, DEFAULT_MAX_UPLOAD_BYTES};
use medbill_extract::{
    extract_url, inspect, keepalive, AppState, ExtractionConfig, ExtractionResponse,
    PageSelection, ServerConfig,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service on 0.0.0.0:8000
  GROQ_API_KEY=gsk_... bill-extract serve

  # Upload a bill
  curl -F file=@bill.pdf http://localhost:8000/extract-bill-data

  # Extract locally, print the response JSON
  bill-extract extract bill.pdf --pages 1-3 --pretty

  # Inspect PDF metadata (no API key needed)
  bill-extract inspect bill.pdf

  # Keep a deployed instance awake
  bill-extract keep-alive --url https://my-service.example.com/

ENVIRONMENT VARIABLES:
  GROQ_API_KEY               Groq API key (required for serve/extract)
  GROQ_BASE_URL              OpenAI-compatible base URL
  PORT / HOST                Listener address (default 0.0.0.0:8000)
  BILL_EXTRACT_MODEL         Vision model ID
  BILL_EXTRACT_CONCURRENCY   Concurrent model calls per request
  BILL_EXTRACT_DPI           PDF rendering DPI
  BILL_EXTRACT_MAX_PAGES     Page ceiling per document
  BILL_EXTRACT_MAX_RETRIES   Retries per page on transient errors
  BILL_EXTRACT_API_TIMEOUT   Per-call model timeout (seconds)
  BILL_EXTRACT_MAX_UPLOAD_MB Request body limit (MiB)
  RUST_LOG                   Log filter (default: info)

  A .env file in the working directory is loaded first.

SYSTEM DEPENDENCIES:
  poppler-utils (pdfinfo, pdftoppm) for PDF input.
"#;

/// Extract line items from medical bills using a vision language model.
#[derive(Parser, Debug)]
#[command(
    name = "bill-extract",
    version,
    about = "Extract line items from medical bill PDFs and images using a vision LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "BILL_EXTRACT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "BILL_EXTRACT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve(ServeArgs),
    /// Extract one document locally and print the response JSON.
    Extract(ExtractArgs),
    /// Print PDF metadata without calling the model.
    Inspect {
        /// Local file path or HTTP/HTTPS URL.
        input: String,
    },
    /// Ping a deployed instance periodically so it is not idled.
    KeepAlive(KeepAliveArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Bind address.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Bind port.
    #[arg(long, env = "PORT", default_value_t = 8000)]
    port: u16,

    /// Request body limit in MiB.
    #[arg(long, env = "BILL_EXTRACT_MAX_UPLOAD_MB", default_value_t = DEFAULT_MAX_UPLOAD_BYTES / (1024 * 1024))]
    max_upload_mb: usize,

    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Local PDF/image path or HTTP/HTTPS URL.
    input: String,

    /// Page selection: all, 5, 3-15, or 1,3,5.
    #[arg(long, default_value = "all")]
    pages: String,

    /// Pretty-print the JSON.
    #[arg(long)]
    pretty: bool,

    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Groq API key.
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// OpenAI-compatible API base URL.
    #[arg(long, env = "GROQ_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Vision model ID.
    #[arg(long, env = "BILL_EXTRACT_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Number of concurrent model calls per document.
    #[arg(short, long, env = "BILL_EXTRACT_CONCURRENCY", default_value_t = 3)]
    concurrency: usize,

    /// Rendering DPI (72–400).
    #[arg(long, env = "BILL_EXTRACT_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Maximum pages processed per document.
    #[arg(long, env = "BILL_EXTRACT_MAX_PAGES", default_value_t = 50)]
    max_pages: usize,

    /// Retries per page on transient model errors.
    #[arg(long, env = "BILL_EXTRACT_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "BILL_EXTRACT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Path to a text file containing a custom extraction prompt.
    #[arg(long, env = "BILL_EXTRACT_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct KeepAliveArgs {
    /// URL to ping (usually the service root).
    #[arg(long, env = "KEEP_ALIVE_URL")]
    url: String,

    /// Seconds between pings.
    #[arg(long, default_value_t = keepalive::DEFAULT_INTERVAL_SECS)]
    interval: u64,

    /// Per-ping timeout in seconds.
    #[arg(long, default_value_t = keepalive::DEFAULT_TIMEOUT_SECS)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve(args) => run_serve(args).await,
        Command::Extract(args) => run_extract(args, cli.quiet).await,
        Command::Inspect { input } => run_inspect(&input).await,
        Command::KeepAlive(args) => keepalive::run(
            &args.url,
            Duration::from_secs(args.interval.max(1)),
            Duration::from_secs(args.timeout.max(1)),
        )
        .await
        .context("Keep-alive monitor failed"),
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    if args.model.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
        bail!("GROQ_API_KEY is not set; the service cannot reach the vision model");
    }

    let max_upload_bytes = args.max_upload_mb.max(1) * 1024 * 1024;
    let mut config = build_config(&args.model, PageSelection::All).await?;
    // URL documents get the same ceiling as uploads.
    config.max_document_bytes = max_upload_bytes;
    info!(
        "Model {} via {} (concurrency {}, {} DPI)",
        config.model, config.base_url, config.concurrency, config.dpi
    );

    let server_config = ServerConfig {
        host: args.host,
        port: args.port,
        max_upload_bytes,
    };
    let state = Arc::new(AppState { config });

    server::serve(state, &server_config)
        .await
        .with_context(|| format!("Server on {}:{} failed", server_config.host, server_config.port))
}

async fn run_extract(args: ExtractArgs, quiet: bool) -> Result<()> {
    let pages: PageSelection = args.pages.parse().context("Invalid --pages")?;
    let config = build_config(&args.model, pages).await?;

    let output = extract_url(&args.input, &config)
        .await
        .context("Extraction failed")?;

    if !quiet {
        eprintln!(
            "{} {} items from {} page(s) in {}ms  {}",
            green("✔"),
            bold(&output.data.total_item_count.to_string()),
            output.stats.processed_pages,
            output.stats.total_duration_ms,
            dim(&format!("{} tokens", output.token_usage.total_tokens)),
        );
    }

    let response = ExtractionResponse::success(output);
    let json = if args.pretty {
        serde_json::to_string_pretty(&response)
    } else {
        serde_json::to_string(&response)
    }
    .context("Failed to serialise output")?;
    println!("{json}");
    Ok(())
}

async fn run_inspect(input: &str) -> Result<()> {
    let meta = inspect(input).await.context("Failed to inspect document")?;

    println!("File:         {}", input);
    if let Some(ref t) = meta.title {
        println!("Title:        {}", t);
    }
    if let Some(ref a) = meta.author {
        println!("Author:       {}", a);
    }
    println!("Pages:        {}", meta.page_count);
    if !meta.pdf_version.is_empty() {
        println!("PDF Version:  {}", meta.pdf_version);
    }
    println!("Encrypted:    {}", meta.is_encrypted);
    if let Some(ref p) = meta.producer {
        println!("Producer:     {}", p);
    }
    if let Some(ref c) = meta.creator {
        println!("Creator:      {}", c);
    }
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(args: &ModelArgs, pages: PageSelection) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .base_url(&args.base_url)
        .model(&args.model)
        .concurrency(args.concurrency)
        .dpi(args.dpi)
        .max_pages(args.max_pages)
        .max_retries(args.max_retries)
        .api_timeout_secs(args.api_timeout)
        .pages(pages);

    if let Some(ref key) = args.api_key {
        builder = builder.api_key(key);
    }
    if let Some(ref path) = args.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}
