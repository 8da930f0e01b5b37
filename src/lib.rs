//! # edgequake-docparse
//!
//! Convert PDF, PowerPoint and Word documents into Markdown plus a
//! structured content list, served over HTTP.
//!
//! ## Pipeline Overview
//!
//! ```text
//! request (url | base64 | upload)
//!  │
//!  ├─ 1. Validate   source, file name, extension, parse method (no I/O)
//!  ├─ 2. Acquire    decode base64 or download the URL
//!  ├─ 3. Workspace  per-request temp dir, removed on every exit path
//!  ├─ 4. Normalize  office documents → PDF via headless soffice
//!  ├─ 5. Pipeline   classify → analyze → parse → emit (spawn_blocking, timeout)
//!  ├─ 6. Rehost     upload extracted images to S3, rewrite references
//!  └─ 7. Assemble   {success, message, data: {markdown, json}}
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docparse::{create_server, AppState, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder().port(9010).build()?;
//!     let addr = config.bind_address();
//!     let app = create_server(AppState::from_config(config)?);
//!     let listener = tokio::net::TcpListener::bind(addr).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! Or convert a single file without the server:
//!
//! ```rust,no_run
//! use edgequake_docparse::{DocumentConverter, ParseMethod, ServiceConfig};
//! use std::path::Path;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let converter = DocumentConverter::new(ServiceConfig::default())?;
//! let output = converter
//!     .convert_file(Path::new("report.pdf"), ParseMethod::Auto, None)
//!     .await?;
//! println!("{}", output.markdown);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docparse` binary (clap + anyhow + dotenvy + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when embedding only the library:
//! ```toml
//! edgequake-docparse = { version = "0.1", default-features = false }
//! ```
//!
//! ## External Tools
//!
//! | Tool | Used for | Config |
//! |------|----------|--------|
//! | `soffice` | PPT/PPTX/DOC/DOCX → PDF | `converter_program` |
//! | `tesseract` | OCR of scanned pages | `ocr_program`, `ocr_language` |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ParseMethod, ServiceConfig, ServiceConfigBuilder, StorageConfig};
pub use convert::{DocumentConverter, Endpoint, ParseRequest};
pub use error::{DocParseError, ErrorCategory, RehostError};
pub use output::{ContentBlock, ConversionOutput, ConversionResult, ResultData};
pub use pipeline::runner::PipelineStage;
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use server::{create_server, AppState};
