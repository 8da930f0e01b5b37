//! OCR: recognise text in an extracted page image.
//!
//! The built-in pipeline calls a [`TextRecognizer`] once per image while
//! running on a blocking worker thread, so implementations are synchronous.
//! [`TesseractOcr`] runs `tesseract <image> stdout -l <lang>` and reads the
//! recognised text from its standard output. The child is killed as soon as
//! the job's [`CancelToken`] is raised.

use crate::pipeline::runner::{CancelToken, PipelineFault};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// How often a running OCR child is checked for exit or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Synchronous image-to-text capability.
pub trait TextRecognizer: Send + Sync {
    /// Recognised text for the image at `image`; may be empty.
    ///
    /// Long-running implementations should return
    /// [`PipelineFault::Cancelled`] once `cancel` is raised.
    fn recognize(&self, image: &Path, cancel: &CancelToken) -> Result<String, PipelineFault>;
}

/// The `tesseract` command-line OCR engine.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    program: String,
    language: String,
}

impl TesseractOcr {
    pub fn new(program: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            language: language.into(),
        }
    }
}

impl TextRecognizer for TesseractOcr {
    fn recognize(&self, image: &Path, cancel: &CancelToken) -> Result<String, PipelineFault> {
        let mut child = Command::new(&self.program)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PipelineFault::Ocr(format!("cannot run '{}': {e}", self.program)))?;

        // Drained off-thread; the child stalls once a pipe buffer fills.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            if cancel.is_cancelled() {
                kill(&mut child, &self.program);
                return Err(PipelineFault::Cancelled);
            }
            match child.try_wait()? {
                Some(status) => break status,
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        if !status.success() {
            return Err(PipelineFault::Ocr(format!(
                "'{}' exited with {}: {}",
                self.program,
                status,
                String::from_utf8_lossy(&stderr).trim()
            )));
        }

        let text = String::from_utf8_lossy(&stdout).into_owned();
        debug!("OCR produced {} chars for {}", text.len(), image.display());
        Ok(text)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn kill(child: &mut Child, program: &str) {
    if let Err(e) = child.kill() {
        warn!("Failed to kill OCR process '{}': {}", program, e);
    }
    let _ = child.wait();
    debug!("OCR process '{}' killed on cancellation", program);
}

/// Split OCR output into paragraphs on blank lines, joining wrapped lines.
pub fn ocr_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
        } else {
            crate::pipeline::postprocess::join_wrapped(&mut current, line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    paragraphs
}
