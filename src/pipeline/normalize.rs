//! Format normalisation: turn office documents into PDF before parsing.
//!
//! The conversion itself is delegated to a [`FormatConverter`]. The
//! production implementation, [`OfficeConverter`], shells out to a headless
//! office binary (`soffice --headless --convert-to pdf --outdir <dir> <file>`)
//! as a child process bounded by a timeout; on expiry the child is killed.
//! Tests substitute a converter that writes a canned PDF.
//!
//! Whatever the converter, [`normalize`] itself checks that the expected
//! output `{outdir}/{stem}.pdf` exists, so a converter that exits 0 without
//! producing anything is reported as [`DocParseError::ConversionOutputMissing`].

use crate::error::DocParseError;
use crate::pipeline::input::RawDocument;
use crate::pipeline::workspace::Workspace;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Document formats the service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Ppt,
    Pptx,
    Doc,
    Docx,
}

impl DocumentFormat {
    /// Infer the format from a file name's extension (case-insensitive).
    pub fn from_file_name(name: &str) -> Option<Self> {
        match extension_of(name)?.to_ascii_lowercase().as_str() {
            ".pdf" => Some(Self::Pdf),
            ".ppt" => Some(Self::Ppt),
            ".pptx" => Some(Self::Pptx),
            ".doc" => Some(Self::Doc),
            ".docx" => Some(Self::Docx),
            _ => None,
        }
    }

    /// Extension including the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => ".pdf",
            Self::Ppt => ".ppt",
            Self::Pptx => ".pptx",
            Self::Doc => ".doc",
            Self::Docx => ".docx",
        }
    }

    pub fn is_pdf(&self) -> bool {
        matches!(self, Self::Pdf)
    }
}

/// The extension allow-list an endpoint enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowList {
    /// PDF passes through; office formats are converted.
    PdfOrOffice,
    /// Office formats only.
    OfficeOnly,
}

impl AllowList {
    fn permits(&self, format: DocumentFormat) -> bool {
        match self {
            AllowList::PdfOrOffice => true,
            AllowList::OfficeOnly => !format.is_pdf(),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            AllowList::PdfOrOffice => "PDF, PPT, PPTX, DOC and DOCX",
            AllowList::OfficeOnly => "MS Office ppt, pptx, doc, and docx",
        }
    }

    /// Validate `file_name` against this allow-list.
    pub fn check(&self, file_name: &str) -> Result<DocumentFormat, DocParseError> {
        DocumentFormat::from_file_name(file_name)
            .filter(|f| self.permits(*f))
            .ok_or_else(|| DocParseError::UnsupportedFormat {
                extension: extension_of(file_name).unwrap_or("").to_string(),
                allowed: self.describe(),
            })
    }
}

/// `".docx"` for `"Quarterly Report.DOCX"`; `None` without a dot.
fn extension_of(name: &str) -> Option<&str> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let idx = base.rfind('.').filter(|&i| i > 0)?;
    Some(&base[idx..])
}

/// Path the converter is expected to write for `source` into `out_dir`.
pub fn expected_output_path(source: &Path, out_dir: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    out_dir.join(format!("{stem}.pdf"))
}

/// Capability that converts an office document on disk into a PDF.
#[async_trait]
pub trait FormatConverter: Send + Sync {
    /// Convert `source`, writing `{out_dir}/{stem}.pdf`.
    async fn convert_to_pdf(&self, source: &Path, out_dir: &Path) -> Result<(), DocParseError>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

/// Headless office suite invoked as a child process.
#[derive(Debug, Clone)]
pub struct OfficeConverter {
    program: String,
    timeout: Duration,
}

impl OfficeConverter {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl FormatConverter for OfficeConverter {
    async fn convert_to_pdf(&self, source: &Path, out_dir: &Path) -> Result<(), DocParseError> {
        let start = Instant::now();
        let child = tokio::process::Command::new(&self.program)
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(out_dir)
            .arg(source)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DocParseError::ConverterLaunch {
                program: self.program.clone(),
                source: e,
            })?;

        // Dropping the `wait_with_output` future on timeout drops the child,
        // and `kill_on_drop` sends it SIGKILL.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| DocParseError::Internal(format!(
                "waiting for '{}' failed: {e}",
                self.program
            )))?,
            Err(_) => {
                warn!(
                    "{} did not finish within {}s, killed",
                    self.program,
                    self.timeout.as_secs()
                );
                return Err(DocParseError::ConversionTimeout {
                    secs: self.timeout.as_secs(),
                });
            }
        };

        match output.status.code() {
            Some(0) => {
                info!(
                    "PDF conversion executed with return code: 0 ({}ms)",
                    start.elapsed().as_millis()
                );
                Ok(())
            }
            Some(code) => {
                warn!(
                    "PDF conversion failed with return code {}: {}",
                    code,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                Err(DocParseError::ConversionFailed { code })
            }
            None => Err(DocParseError::ConversionTerminated),
        }
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Return PDF bytes for `doc`, converting office formats via `converter`.
///
/// PDFs pass through untouched without touching the workspace or the
/// converter. Office documents are staged in `workspace` with their
/// extension preserved, converted, and the resulting PDF read back.
pub async fn normalize(
    doc: RawDocument,
    workspace: &Workspace,
    converter: &dyn FormatConverter,
) -> Result<Vec<u8>, DocParseError> {
    let format = doc.format();
    if format.is_pdf() {
        debug!("Input is already PDF ({} bytes), skipping conversion", doc.len());
        return Ok(doc.into_bytes());
    }

    let source = workspace
        .stage_input(format.extension(), &doc.into_bytes())
        .await?;
    let out_dir = workspace.converted_dir().await?;

    info!(
        "Converting {} to PDF with {}",
        format.extension(),
        converter.name()
    );
    converter.convert_to_pdf(&source, &out_dir).await?;

    let expected = expected_output_path(&source, &out_dir);
    match tokio::fs::read(&expected).await {
        Ok(bytes) => {
            debug!("Converted PDF is {} bytes", bytes.len());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(DocParseError::ConversionOutputMissing { path: expected })
        }
        Err(e) => Err(DocParseError::workspace(expected, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes a canned PDF where a real converter would.
    struct CannedConverter {
        calls: AtomicUsize,
        write_output: bool,
    }

    #[async_trait]
    impl FormatConverter for CannedConverter {
        async fn convert_to_pdf(&self, source: &Path, out_dir: &Path) -> Result<(), DocParseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(source.exists(), "source must be staged before conversion");
            if self.write_output {
                tokio::fs::write(expected_output_path(source, out_dir), b"%PDF-1.4 canned")
                    .await
                    .unwrap();
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    fn canned(write_output: bool) -> CannedConverter {
        CannedConverter {
            calls: AtomicUsize::new(0),
            write_output,
        }
    }

    #[test]
    fn format_from_file_name() {
        assert_eq!(DocumentFormat::from_file_name("deck.PPTX"), Some(DocumentFormat::Pptx));
        assert_eq!(DocumentFormat::from_file_name("a.b.doc"), Some(DocumentFormat::Doc));
        assert_eq!(DocumentFormat::from_file_name("report.xlsx"), None);
        assert_eq!(DocumentFormat::from_file_name(".pdf"), None);
        assert_eq!(DocumentFormat::from_file_name("noext"), None);
    }

    #[test]
    fn allow_lists() {
        assert_eq!(AllowList::PdfOrOffice.check("x.pdf").unwrap(), DocumentFormat::Pdf);
        assert_eq!(AllowList::OfficeOnly.check("x.docx").unwrap(), DocumentFormat::Docx);

        let err = AllowList::OfficeOnly.check("x.pdf").unwrap_err();
        assert!(err.to_string().contains("Unsupported file type"));
        assert!(err.to_string().contains(".pdf"));

        let err = AllowList::PdfOrOffice.check("sheet.xls").unwrap_err();
        assert!(matches!(err, DocParseError::UnsupportedFormat { ref extension, .. } if extension == ".xls"));
    }

    #[test]
    fn expected_output_strips_extension() {
        let p = expected_output_path(Path::new("/w/input/document.pptx"), Path::new("/w/converted"));
        assert_eq!(p, PathBuf::from("/w/converted/document.pdf"));
    }

    #[tokio::test]
    async fn pdf_passes_through_without_converter() {
        let ws = Workspace::acquire(None).unwrap();
        let conv = canned(true);
        let doc = RawDocument::new(b"%PDF-1.7".to_vec(), DocumentFormat::Pdf);
        let bytes = normalize(doc, &ws, &conv).await.unwrap();
        assert_eq!(bytes, b"%PDF-1.7");
        assert_eq!(conv.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn office_document_is_converted() {
        let ws = Workspace::acquire(None).unwrap();
        let conv = canned(true);
        let doc = RawDocument::new(b"PK\x03\x04".to_vec(), DocumentFormat::Pptx);
        let bytes = normalize(doc, &ws, &conv).await.unwrap();
        assert_eq!(bytes, b"%PDF-1.4 canned");
        assert_eq!(conv.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_output_is_reported() {
        let ws = Workspace::acquire(None).unwrap();
        let conv = canned(false);
        let doc = RawDocument::new(b"PK\x03\x04".to_vec(), DocumentFormat::Docx);
        let err = normalize(doc, &ws, &conv).await.unwrap_err();
        assert!(matches!(err, DocParseError::ConversionOutputMissing { .. }), "got: {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_carries_code() {
        let ws = Workspace::acquire(None).unwrap();
        // `false` ignores its arguments and exits 1.
        let conv = OfficeConverter::new("false", Duration::from_secs(10));
        let doc = RawDocument::new(b"PK\x03\x04".to_vec(), DocumentFormat::Docx);
        let err = normalize(doc, &ws, &conv).await.unwrap_err();
        assert!(matches!(err, DocParseError::ConversionFailed { code: 1 }), "got: {err:?}");
        assert!(err.to_string().contains("return code: 1"));
    }

    #[tokio::test]
    async fn missing_binary_is_launch_error() {
        let ws = Workspace::acquire(None).unwrap();
        let conv = OfficeConverter::new("definitely-not-an-office-suite", Duration::from_secs(5));
        let doc = RawDocument::new(b"PK".to_vec(), DocumentFormat::Doc);
        let err = normalize(doc, &ws, &conv).await.unwrap_err();
        assert!(matches!(err, DocParseError::ConverterLaunch { .. }), "got: {err:?}");
    }
}
