//! Error types for the edgequake-docparse library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DocParseError`]: **Fatal**: the request cannot be completed (bad
//!   input, download failure, converter crash, pipeline stage failure). It is
//!   caught at the request boundary and turned into a `success: false`
//!   envelope by [`crate::output::ConversionResult::failure`].
//!
//! * [`RehostError`]: **Non-fatal**: one extracted image could not be
//!   uploaded to object storage. The markdown keeps the local reference for
//!   that image and the request still succeeds.

use crate::pipeline::runner::PipelineStage;
use std::path::PathBuf;
use thiserror::Error;

/// The taxonomy bucket a [`DocParseError`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing or contradictory request fields, disallowed extension.
    Input,
    /// Base64 decode or document download failure.
    Acquisition,
    /// The office-to-PDF converter failed.
    ConversionTool,
    /// A parsing pipeline stage failed or timed out.
    Pipeline,
    /// Workspace, configuration or runtime failure.
    Internal,
}

/// All fatal errors returned by the conversion orchestrator.
#[derive(Debug, Error)]
pub enum DocParseError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Neither `url` nor `base64` was supplied.
    #[error("Both document url and document base64 data are empty.")]
    MissingSource,

    /// The endpoint needs `file_name` to pick a converter but none was given.
    #[error("File name is empty.")]
    MissingFileName,

    /// The file extension is not on the endpoint's allow-list.
    #[error("Unsupported file type '{extension}'. Only {allowed} are allowed.")]
    UnsupportedFormat {
        extension: String,
        allowed: &'static str,
    },

    /// `parse_method` is not one of `auto`, `ocr`, `txt`.
    #[error("Unknown parse method '{0}', only auto, ocr, txt allowed.")]
    UnsupportedMethod(String),

    /// The request body could not be read.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ── Acquisition errors ────────────────────────────────────────────────
    /// Inline document data is not valid base64.
    #[error("Invalid base64 document data: {0}")]
    Decode(#[from] base64::DecodeError),

    /// The document server answered with a non-2xx status.
    #[error("Failed to download '{url}': HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// The download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The redirect chain exceeded the client's limit.
    #[error("Too many redirects while downloading '{url}'")]
    TooManyRedirects { url: String },

    /// Any other transport failure (DNS, TLS, connection reset, bad URL).
    #[error("Network error downloading '{url}': {reason}")]
    Network { url: String, reason: String },

    /// Decoding or download succeeded but produced zero bytes.
    #[error("Cannot get file data: the {source_kind} document is empty.")]
    EmptyDocument { source_kind: &'static str },

    // ── Conversion tool errors ────────────────────────────────────────────
    /// The converter process exited with a nonzero status.
    #[error("PDF conversion failed with return code: {code}")]
    ConversionFailed { code: i32 },

    /// The converter process was terminated by a signal.
    #[error("PDF conversion was terminated before completion")]
    ConversionTerminated,

    /// The converter exited cleanly but the expected PDF is missing.
    #[error("PDF conversion produced no output file at '{path}'")]
    ConversionOutputMissing { path: PathBuf },

    /// The converter process did not finish in time and was killed.
    #[error("PDF conversion timed out after {secs}s")]
    ConversionTimeout { secs: u64 },

    /// The converter binary could not be started.
    #[error("Failed to launch converter '{program}': {source}")]
    ConverterLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// A pipeline stage failed; later stages were not run.
    #[error("Pipeline stage '{stage}' failed: {cause}")]
    Pipeline { stage: PipelineStage, cause: String },

    /// The pipeline did not finish in time.
    #[error("Document parsing timed out after {secs}s")]
    PipelineTimeout { secs: u64 },

    /// The whole office-document flow did not finish in time.
    #[error("Office document conversion timed out after {secs}s")]
    OfficeTimeout { secs: u64 },

    // ── Internal errors ───────────────────────────────────────────────────
    /// Could not create or write inside the request workspace.
    #[error("Workspace I/O failed at '{path}': {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DocParseError {
    /// Which bucket of the error taxonomy this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingSource
            | Self::MissingFileName
            | Self::UnsupportedFormat { .. }
            | Self::UnsupportedMethod(_)
            | Self::InvalidRequest(_) => ErrorCategory::Input,
            Self::Decode(_)
            | Self::HttpStatus { .. }
            | Self::DownloadTimeout { .. }
            | Self::TooManyRedirects { .. }
            | Self::Network { .. }
            | Self::EmptyDocument { .. } => ErrorCategory::Acquisition,
            Self::ConversionFailed { .. }
            | Self::ConversionTerminated
            | Self::ConversionOutputMissing { .. }
            | Self::ConversionTimeout { .. }
            | Self::ConverterLaunch { .. } => ErrorCategory::ConversionTool,
            Self::Pipeline { .. } | Self::PipelineTimeout { .. } | Self::OfficeTimeout { .. } => {
                ErrorCategory::Pipeline
            }
            Self::Workspace { .. } | Self::InvalidConfig(_) | Self::Internal(_) => {
                ErrorCategory::Internal
            }
        }
    }

    pub(crate) fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Workspace {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error for a single extracted image.
///
/// Collected in [`crate::pipeline::rehost::RehostReport`]; never fails the
/// request.
#[derive(Debug, Clone, Error)]
pub enum RehostError {
    /// The local image file could not be read.
    #[error("Cannot read image '{path}': {detail}")]
    Read { path: String, detail: String },

    /// The object store rejected the upload.
    #[error("Upload of '{key}' failed: {detail}")]
    Upload { key: String, detail: String },

    /// The object store could not produce a retrieval URL.
    #[error("URL generation for '{key}' failed: {detail}")]
    Url { key: String, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_source_message_is_stable() {
        assert_eq!(
            DocParseError::MissingSource.to_string(),
            "Both document url and document base64 data are empty."
        );
    }

    #[test]
    fn conversion_failure_mentions_exit_code() {
        let e = DocParseError::ConversionFailed { code: 77 };
        assert!(e.to_string().contains("77"), "got: {e}");
        assert_eq!(e.category(), ErrorCategory::ConversionTool);
    }

    #[test]
    fn unsupported_format_display() {
        let e = DocParseError::UnsupportedFormat {
            extension: ".xls".into(),
            allowed: "PDF, PPT, PPTX, DOC and DOCX",
        };
        let msg = e.to_string();
        assert!(msg.starts_with("Unsupported file type"), "got: {msg}");
        assert!(msg.contains(".xls"));
        assert_eq!(e.category(), ErrorCategory::Input);
    }

    #[test]
    fn pipeline_error_names_stage() {
        let e = DocParseError::Pipeline {
            stage: PipelineStage::Analyze,
            cause: "bad xref".into(),
        };
        assert!(e.to_string().contains("analyze"));
        assert!(e.to_string().contains("bad xref"));
        assert_eq!(e.category(), ErrorCategory::Pipeline);
    }

    #[test]
    fn download_errors_are_acquisition() {
        let e = DocParseError::DownloadTimeout {
            url: "http://x/doc.pdf".into(),
            secs: 60,
        };
        assert!(e.to_string().contains("60s"));
        assert_eq!(e.category(), ErrorCategory::Acquisition);
    }

    #[test]
    fn rehost_error_display() {
        let e = RehostError::Upload {
            key: "abc.png".into(),
            detail: "403".into(),
        };
        assert!(e.to_string().contains("abc.png"));
    }
}
