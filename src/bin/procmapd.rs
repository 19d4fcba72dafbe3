//! Server binary for procmap.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionConfig`, wires the store, worker pool, and router together,
//! and serves the API.

use anyhow::{Context, Result};
use clap::Parser;
use procmap::server::{router, AppState};
use procmap::{resolve_generator, ConversionConfig, MemoryJobStore, WorkerPool};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on the default address with backend auto-detection
  export OPENAI_API_KEY=sk-...
  procmapd

  # Explicit provider and model, more workers
  procmapd --provider anthropic --model claude-sonnet-4-20250514 --workers 8

  # OpenAI-compatible gateway instead of an SDK provider
  PROCMAP_LLM_ENDPOINT=https://gateway.internal/v1/chat/completions \
  PROCMAP_API_KEY=... procmapd

  # Drive a conversion
  curl -F file=@procedure.pdf http://127.0.0.1:4000/api/process/upload
  curl http://127.0.0.1:4000/api/process/<id>/status
  curl http://127.0.0.1:4000/api/process/<id>/result

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  PROCMAP_LLM_PROVIDER    Override provider (openai, anthropic, gemini, ollama)
  PROCMAP_MODEL           Override model ID
  PROCMAP_LLM_ENDPOINT    OpenAI-compatible chat-completions URL (REST backend)
  PROCMAP_API_KEY         Credential for PROCMAP_LLM_ENDPOINT

The server fails at startup when no LLM backend is configured — a missing
credential is a configuration error, not something to discover per upload.
"#;

/// Convert office documents to BPMN 2.0 process diagrams over HTTP.
#[derive(Parser, Debug)]
#[command(
    name = "procmapd",
    version,
    about = "Document-to-BPMN conversion service",
    long_about = "Accepts PDF, DOCX, XLSX, CSV, and plain-text uploads, extracts their text, \
asks an LLM to describe the business processes inside, and serves the resulting BPMN 2.0 \
diagrams. Supports OpenAI, Anthropic, Google Gemini, Azure OpenAI, any OpenAI-compatible \
endpoint (Ollama, vLLM, LiteLLM, etc.), and a raw REST gateway.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to bind, host:port.
    #[arg(short, long, env = "PROCMAP_ADDR", default_value = "127.0.0.1:4000")]
    addr: String,

    /// Directory for uploaded documents (one subdirectory per job).
    #[arg(short, long, env = "PROCMAP_DATA_DIR", default_value = "./storage")]
    data_dir: PathBuf,

    /// Worker pool size for background conversions.
    #[arg(short, long, env = "PROCMAP_WORKERS", default_value_t = 4)]
    workers: usize,

    /// LLM model ID (e.g. gpt-4.1-nano, claude-sonnet-4-20250514).
    #[arg(long, env = "PROCMAP_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "PROCMAP_LLM_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set."
    )]
    provider: Option<String>,

    /// Max LLM output tokens per call.
    #[arg(long, env = "PROCMAP_MAX_TOKENS", default_value_t = 3000)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PROCMAP_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Retries per LLM call on transient failure.
    #[arg(long, env = "PROCMAP_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-LLM-call timeout in seconds.
    #[arg(long, env = "PROCMAP_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PROCMAP_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Serve extracted diagrams without the XML well-formedness gate
    /// (historic fallback behaviour).
    #[arg(long, env = "PROCMAP_NO_VALIDATE")]
    no_validate: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PROCMAP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PROCMAP_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let config = build_config(&cli).await?;

    // Fail fast: a server without a backend would accept uploads it can
    // never finish.
    let generator = resolve_generator(&config).context("LLM backend configuration")?;

    tokio::fs::create_dir_all(&cli.data_dir)
        .await
        .with_context(|| format!("Failed to create data directory {:?}", cli.data_dir))?;

    // ── Wire store, workers, router ──────────────────────────────────────
    let store = Arc::new(MemoryJobStore::new());
    let config = Arc::new(config);
    let pool = WorkerPool::start(
        store.clone(),
        generator.clone(),
        config.clone(),
        cli.workers.max(1),
    );

    let app = router(AppState {
        store,
        queue: pool.queue(),
        generator,
        config,
        data_dir: cli.data_dir.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&cli.addr)
        .await
        .with_context(|| format!("Failed to bind {}", cli.addr))?;
    tracing::info!("procmapd listening on http://{}", cli.addr);

    axum::serve(listener, app)
        .await
        .context("Server terminated")?;

    pool.shutdown().await;
    Ok(())
}

/// Map CLI args to `ConversionConfig`.
async fn build_config(cli: &Cli) -> Result<ConversionConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ConversionConfig::builder()
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .validate_xml(!cli.no_validate);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}
