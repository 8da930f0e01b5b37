//! Pipeline runner: drive a document pipeline through its four stages.
//!
//! ```text
//! classify ──▶ analyze ──▶ parse ──▶ emit ──▶ ConversionOutput
//! ```
//!
//! Stages run strictly in that order on one blocking worker thread
//! (`spawn_blocking`), because PDF interpretation and OCR are CPU-bound and
//! synchronous. A failing stage stops the run; no later stage is invoked and
//! the failure is reported as [`DocParseError::Pipeline`] naming the stage.
//!
//! The whole run is bounded by a timeout. A timeout cannot interrupt a
//! blocking thread, so the runner instead raises a shared [`CancelToken`]
//! that pipelines poll between units of work (stages, OCR calls, pages).
//! The token is also raised when the awaiting future is dropped, e.g. when
//! the client disconnects.

use crate::config::ParseMethod;
use crate::error::DocParseError;
use crate::output::ConversionOutput;
use crate::progress::{PipelineProgressCallback, ProgressCallback};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// The four stages every pipeline implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Classify,
    Analyze,
    Parse,
    Emit,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 4] = [
        PipelineStage::Classify,
        PipelineStage::Analyze,
        PipelineStage::Parse,
        PipelineStage::Emit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Classify => "classify",
            PipelineStage::Analyze => "analyze",
            PipelineStage::Parse => "parse",
            PipelineStage::Emit => "emit",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a stage failed. Converted to [`DocParseError::Pipeline`] by the runner.
#[derive(Debug, Error)]
pub enum PipelineFault {
    #[error("malformed PDF: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("{0}")]
    Invalid(String),

    #[error("cancelled")]
    Cancelled,
}

/// Cooperative cancellation flag shared between the runner and a pipeline.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(PipelineFault::Cancelled)` once the token has been raised.
    pub fn check(&self) -> Result<(), PipelineFault> {
        if self.is_cancelled() {
            Err(PipelineFault::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Raises the token when the awaiting future goes away.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Everything a pipeline needs for one document.
#[derive(Debug, Clone)]
pub struct PipelineJob {
    pub method: ParseMethod,
    pub pdf: Vec<u8>,
    /// Directory extracted images are written to. Must already exist.
    pub image_dir: PathBuf,
    pub cancel: CancelToken,
}

/// A single-use, stateful four-stage parse of one PDF.
///
/// Each stage consumes what the previous one stored on `self`. The runner
/// guarantees the call order and never calls a stage after a failure.
pub trait DocumentPipeline: Send {
    fn classify(&mut self) -> Result<(), PipelineFault>;
    fn analyze(&mut self) -> Result<(), PipelineFault>;
    fn parse(&mut self) -> Result<(), PipelineFault>;
    fn emit(&mut self) -> Result<ConversionOutput, PipelineFault>;
}

/// Builds a fresh [`DocumentPipeline`] per request.
pub trait PipelineFactory: Send + Sync {
    fn create(&self, job: PipelineJob) -> Box<dyn DocumentPipeline>;
}

/// Run a pipeline built by `factory` for `job`, bounded by `timeout`.
///
/// # Errors
/// - [`DocParseError::Pipeline`] naming the first failing stage
/// - [`DocParseError::PipelineTimeout`] when `timeout` elapses
/// - [`DocParseError::Internal`] when the worker thread panics
pub async fn run_pipeline(
    factory: Arc<dyn PipelineFactory>,
    job: PipelineJob,
    timeout: Duration,
    progress: Option<ProgressCallback>,
) -> Result<ConversionOutput, DocParseError> {
    let cancel = job.cancel.clone();
    let _guard = CancelOnDrop(cancel.clone());
    let method = job.method;
    let start = Instant::now();

    let worker_cancel = cancel.clone();
    let handle = tokio::task::spawn_blocking(move || {
        let mut pipeline = factory.create(job);
        drive(pipeline.as_mut(), &worker_cancel, progress.as_deref())
    });

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => {
            if result.is_ok() {
                info!(
                    "Pipeline ({}) finished in {}ms",
                    method,
                    start.elapsed().as_millis()
                );
            }
            result
        }
        Ok(Err(e)) => Err(DocParseError::Internal(format!("Pipeline task panicked: {e}"))),
        Err(_) => {
            cancel.cancel();
            warn!("Pipeline ({}) timed out after {}s", method, timeout.as_secs());
            Err(DocParseError::PipelineTimeout {
                secs: timeout.as_secs(),
            })
        }
    }
}

fn drive(
    pipeline: &mut dyn DocumentPipeline,
    cancel: &CancelToken,
    progress: Option<&dyn PipelineProgressCallback>,
) -> Result<ConversionOutput, DocParseError> {
    run_stage(PipelineStage::Classify, cancel, progress, || pipeline.classify())?;
    run_stage(PipelineStage::Analyze, cancel, progress, || pipeline.analyze())?;
    run_stage(PipelineStage::Parse, cancel, progress, || pipeline.parse())?;
    run_stage(PipelineStage::Emit, cancel, progress, || pipeline.emit())
}

fn run_stage<T>(
    stage: PipelineStage,
    cancel: &CancelToken,
    progress: Option<&dyn PipelineProgressCallback>,
    f: impl FnOnce() -> Result<T, PipelineFault>,
) -> Result<T, DocParseError> {
    if let Some(cb) = progress {
        cb.on_stage_start(stage);
    }
    let start = Instant::now();
    debug!("Stage '{}' started", stage);

    match cancel.check().and_then(|()| f()) {
        Ok(value) => {
            let elapsed_ms = start.elapsed().as_millis() as u64;
            debug!("Stage '{}' completed in {}ms", stage, elapsed_ms);
            if let Some(cb) = progress {
                cb.on_stage_complete(stage, elapsed_ms);
            }
            Ok(value)
        }
        Err(fault) => {
            let cause = fault.to_string();
            warn!("Stage '{}' failed: {}", stage, cause);
            if let Some(cb) = progress {
                cb.on_stage_error(stage, &cause);
            }
            Err(DocParseError::Pipeline { stage, cause })
        }
    }
}
