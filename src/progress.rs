//! Progress-callback trait for pipeline stage events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::ServiceConfigBuilder::progress_callback`] to receive an
//! event as each of the four parsing stages starts, completes or fails.
//! The CLI uses it to drive a spinner; the server leaves it unset and relies
//! on tracing.
//!
//! # Example
//!
//! ```rust
//! use edgequake_docparse::{PipelineProgressCallback, PipelineStage, ServiceConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_stage_complete(&self, stage: PipelineStage, elapsed_ms: u64) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage} done in {elapsed_ms}ms");
//!     }
//! }
//!
//! let config = ServiceConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::runner::PipelineStage;
use std::sync::Arc;

/// Called by the pipeline runner around each stage.
///
/// Stages run on a blocking worker thread, so implementations must be
/// `Send + Sync`. All methods have default no-op implementations.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called before `stage` is invoked.
    fn on_stage_start(&self, stage: PipelineStage) {
        let _ = stage;
    }

    /// Called after `stage` returned successfully.
    fn on_stage_complete(&self, stage: PipelineStage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// Called when `stage` failed; no later stage will run.
    fn on_stage_error(&self, stage: PipelineStage, error: &str) {
        let _ = (stage, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ServiceConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl PipelineProgressCallback for Recorder {
        fn on_stage_start(&self, stage: PipelineStage) {
            self.events.lock().unwrap().push(format!("start:{stage}"));
        }

        fn on_stage_error(&self, stage: PipelineStage, error: &str) {
            self.events.lock().unwrap().push(format!("error:{stage}:{error}"));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(PipelineStage::Classify);
        cb.on_stage_complete(PipelineStage::Classify, 3);
        cb.on_stage_error(PipelineStage::Parse, "boom");
    }

    #[test]
    fn partial_overrides_keep_defaults() {
        let rec = Recorder::default();
        rec.on_stage_start(PipelineStage::Emit);
        rec.on_stage_complete(PipelineStage::Emit, 10);
        rec.on_stage_error(PipelineStage::Emit, "disk full");
        let events = rec.events.lock().unwrap();
        assert_eq!(*events, vec!["start:emit", "error:emit:disk full"]);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_stage_start(PipelineStage::Analyze);
    }
}
