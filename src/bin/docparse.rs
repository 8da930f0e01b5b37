//! CLI binary for edgequake-docparse.
//!
//! `docparse serve` (the default) runs the HTTP service; `docparse convert`
//! runs the same orchestrator against one local file.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_docparse::pipeline::rehost::local_image_refs;
use edgequake_docparse::{
    create_server, AppState, DocumentConverter, ParseMethod, PipelineProgressCallback,
    PipelineStage, ProgressCallback, ServiceConfig, StorageConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner that logs one line per finished pipeline stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading document…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: PipelineStage) {
        self.bar.set_prefix("Parsing");
        self.bar.set_message(format!("{stage}…"));
    }

    fn on_stage_complete(&self, stage: PipelineStage, elapsed_ms: u64) {
        self.bar.println(format!(
            "  {} {:<9} {}",
            green("✓"),
            stage.as_str(),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
    }

    fn on_stage_error(&self, stage: PipelineStage, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!("  {} {:<9} {}", red("✗"), stage.as_str(), red(&msg)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the service on the default port (9010)
  docparse

  # Run with auth and object storage
  DOCPARSE_API_KEY=s3cret AK=... SK=... ENDPOINT=https://s3.example.com S3_BUCKET=docs \
    docparse serve --port 8080

  # Convert a local file to Markdown on stdout
  docparse convert report.pdf

  # Office document, forced OCR, write to a file, keep extracted images
  docparse convert deck.pptx --method ocr -o deck.md --images ./deck_images

  # Markdown plus structured content as JSON
  docparse convert paper.pdf --json > paper.json

ENDPOINTS:
  POST /parse_document/pdf       {url | base64, parse_method?}
  POST /parse_document/pdfdocs   {url | base64, file_name, parse_method?}
  POST /parse_document/docs      {url | base64, file_name}   (ppt, pptx, doc, docx)
  POST /parse_document           multipart: file, parse_method?
  GET  /health

ENVIRONMENT VARIABLES:
  AK, SK                  Object storage access / secret key
  ENDPOINT                S3-compatible endpoint URL
  S3_BUCKET               Bucket for rehosted images
  S3_REGION               Signing region (default: auto)
  S3_PUBLIC_BASE_URL      Serve images as {base}/{key} instead of presigned URLs
  S3_URL_EXPIRY_SECS      Presigned URL lifetime (default: 7 days)
  RUST_LOG                Log filter, overrides --verbose

  Image rehosting is disabled unless AK, SK, ENDPOINT and S3_BUCKET are all set.
  A .env file in the working directory is loaded at startup.

EXTERNAL TOOLS:
  soffice     office → PDF conversion (LibreOffice)
  tesseract   OCR of scanned pages
"#;

/// Convert PDF, PowerPoint and Word documents to Markdown.
#[derive(Parser, Debug)]
#[command(
    name = "docparse",
    version,
    about = "Document conversion service: PDF, PPT and Word documents to Markdown",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    service: ServiceArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCPARSE_VERBOSE")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default).
    Serve,

    /// Convert one local file.
    Convert {
        /// PDF, PPT, PPTX, DOC or DOCX file.
        file: PathBuf,

        /// Parse method.
        #[arg(short, long, value_enum, default_value = "auto")]
        method: MethodArg,

        /// Write Markdown to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output markdown and content list as JSON.
        #[arg(long)]
        json: bool,

        /// Copy extracted images into this directory.
        #[arg(long)]
        images: Option<PathBuf>,

        /// Disable the progress spinner.
        #[arg(long, env = "DOCPARSE_NO_PROGRESS")]
        no_progress: bool,
    },
}

#[derive(Args, Debug)]
struct ServiceArgs {
    /// Interface to bind.
    #[arg(long, global = true, env = "DOCPARSE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, global = true, env = "DOCPARSE_PORT", default_value_t = 9010)]
    port: u16,

    /// Disable the permissive CORS layer.
    #[arg(long, global = true, env = "DOCPARSE_NO_CORS")]
    no_cors: bool,

    /// Require `Authorization: Bearer <key>` on conversion endpoints.
    #[arg(long, global = true, env = "DOCPARSE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Office-to-PDF converter binary.
    #[arg(long, global = true, env = "DOCPARSE_CONVERTER", default_value = "soffice")]
    converter: String,

    /// OCR binary.
    #[arg(long, global = true, env = "DOCPARSE_OCR_PROGRAM", default_value = "tesseract")]
    ocr_program: String,

    /// OCR language.
    #[arg(long, global = true, env = "DOCPARSE_OCR_LANG", default_value = "eng")]
    ocr_lang: String,

    /// URL download timeout in seconds.
    #[arg(long, global = true, env = "DOCPARSE_DOWNLOAD_TIMEOUT", default_value_t = 60)]
    download_timeout: u64,

    /// Office-to-PDF subprocess timeout in seconds.
    #[arg(long, global = true, env = "DOCPARSE_CONVERSION_TIMEOUT", default_value_t = 180)]
    conversion_timeout: u64,

    /// Parsing pipeline timeout in seconds.
    #[arg(long, global = true, env = "DOCPARSE_PIPELINE_TIMEOUT", default_value_t = 600)]
    pipeline_timeout: u64,

    /// Timeout for the whole /docs flow in seconds.
    #[arg(long, global = true, env = "DOCPARSE_OFFICE_TIMEOUT", default_value_t = 300)]
    office_timeout: u64,

    /// Concurrent image uploads per request.
    #[arg(long, global = true, env = "DOCPARSE_UPLOAD_CONCURRENCY", default_value_t = 4)]
    upload_concurrency: usize,

    /// Maximum request body in MiB.
    #[arg(long, global = true, env = "DOCPARSE_MAX_BODY_MB", default_value_t = 100)]
    max_body_mb: usize,

    /// Parent directory for request workspaces (default: system temp).
    #[arg(long, global = true, env = "DOCPARSE_WORK_DIR")]
    work_dir: Option<PathBuf>,

    #[arg(long = "s3-access-key", global = true, env = "AK", hide_env_values = true, hide = true)]
    s3_access_key: Option<String>,

    #[arg(long = "s3-secret-key", global = true, env = "SK", hide_env_values = true, hide = true)]
    s3_secret_key: Option<String>,

    /// S3-compatible endpoint for image rehosting.
    #[arg(long = "s3-endpoint", global = true, env = "ENDPOINT")]
    s3_endpoint: Option<String>,

    /// Bucket for image rehosting.
    #[arg(long = "s3-bucket", global = true, env = "S3_BUCKET")]
    s3_bucket: Option<String>,

    #[arg(long = "s3-region", global = true, env = "S3_REGION")]
    s3_region: Option<String>,

    #[arg(long = "s3-public-base-url", global = true, env = "S3_PUBLIC_BASE_URL")]
    s3_public_base_url: Option<String>,

    #[arg(long = "s3-url-expiry-secs", global = true, env = "S3_URL_EXPIRY_SECS")]
    s3_url_expiry_secs: Option<u64>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum MethodArg {
    Auto,
    Ocr,
    Txt,
}

impl From<MethodArg> for ParseMethod {
    fn from(v: MethodArg) -> Self {
        match v {
            MethodArg::Auto => ParseMethod::Auto,
            MethodArg::Ocr => ParseMethod::Ocr,
            MethodArg::Txt => ParseMethod::Txt,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Serve);

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO logs during one-shot conversions.
    let quiet_convert = matches!(
        command,
        Command::Convert { json, no_progress, .. } if !json && !no_progress
    );
    let filter = if cli.verbose {
        "debug"
    } else if quiet_convert {
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

    match command {
        Command::Serve => serve(&cli.service).await,
        Command::Convert {
            file,
            method,
            output,
            json,
            images,
            no_progress,
        } => {
            let show_progress = !json && !no_progress;
            convert(&cli.service, file, method.into(), output, json, images, show_progress).await
        }
    }
}

async fn serve(args: &ServiceArgs) -> Result<()> {
    let config = build_config(args, None)?;
    let addr = config.bind_address();
    info!(?config, "Starting docparse");

    let state = AppState::from_config(config).context("Failed to initialise converter")?;
    let app = create_server(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped cleanly");
    Ok(())
}

async fn convert(
    args: &ServiceArgs,
    file: PathBuf,
    method: ParseMethod,
    output: Option<PathBuf>,
    json: bool,
    images: Option<PathBuf>,
    show_progress: bool,
) -> Result<()> {
    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(args, progress.clone().map(|cb| cb as ProgressCallback))?;
    let converter = DocumentConverter::new(config).context("Failed to initialise converter")?;

    if show_progress {
        eprintln!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting {} ({method})", file.display()))
        );
    }

    let start = Instant::now();
    let result = converter
        .convert_file(&file, method, images.as_deref())
        .await;
    if let Some(cb) = &progress {
        cb.finish();
    }
    let result = result.with_context(|| format!("Conversion of {} failed", file.display()))?;

    let rendered = if json {
        let value = serde_json::json!({
            "markdown": result.markdown,
            "content_list": result.content_list,
        });
        serde_json::to_string_pretty(&value).context("Failed to serialise output")? + "\n"
    } else {
        result.markdown.clone()
    };

    match &output {
        Some(path) => tokio::fs::write(path, rendered.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(rendered.as_bytes())
                .context("Failed to write to stdout")?;
        }
    }

    if show_progress {
        let target = output
            .as_ref()
            .map(|p| bold(&p.display().to_string()))
            .unwrap_or_else(|| "stdout".to_string());
        eprintln!(
            "{} {} blocks  {}ms  →  {}",
            green("✔"),
            result.content_list.len(),
            start.elapsed().as_millis(),
            target,
        );
        let local = local_image_refs(&result.markdown);
        if images.is_none() && !converter.storage_enabled() && !local.is_empty() {
            eprintln!(
                "{}",
                dim(&format!(
                    "   {} image reference(s) point at a removed workspace; pass --images <DIR> to keep them",
                    local.len()
                ))
            );
        }
    }

    Ok(())
}

/// Map CLI args to `ServiceConfig`.
fn build_config(args: &ServiceArgs, progress: Option<ProgressCallback>) -> Result<ServiceConfig> {
    let storage = StorageConfig::from_parts(
        args.s3_access_key.clone(),
        args.s3_secret_key.clone(),
        args.s3_endpoint.clone(),
        args.s3_bucket.clone(),
    )
    .map(|s| {
        let s = match &args.s3_region {
            Some(region) => s.with_region(region.as_str()),
            None => s,
        };
        let s = match args.s3_url_expiry_secs {
            Some(secs) => s.with_url_expiry_secs(secs),
            None => s,
        };
        match &args.s3_public_base_url {
            Some(base) => s.with_public_base_url(base.as_str()),
            None => s,
        }
    });

    let mut builder = ServiceConfig::builder()
        .host(args.host.as_str())
        .port(args.port)
        .enable_cors(!args.no_cors)
        .api_key(args.api_key.clone().unwrap_or_default())
        .converter_program(args.converter.as_str())
        .ocr_program(args.ocr_program.as_str())
        .ocr_language(args.ocr_lang.as_str())
        .download_timeout_secs(args.download_timeout)
        .conversion_timeout_secs(args.conversion_timeout)
        .pipeline_timeout_secs(args.pipeline_timeout)
        .office_timeout_secs(args.office_timeout)
        .upload_concurrency(args.upload_concurrency)
        .max_body_bytes(args.max_body_mb.saturating_mul(1024 * 1024))
        .storage(storage);

    if let Some(dir) = &args.work_dir {
        builder = builder.work_dir(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
