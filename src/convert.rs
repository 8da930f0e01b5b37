//! Request orchestration: validate, acquire, normalise, parse, rehost, assemble.
//!
//! [`DocumentConverter`] is built once at startup from a [`ServiceConfig`]
//! and shared by every request. It owns the capabilities a conversion needs
//! (HTTP client, office converter, pipeline factory, optional object store)
//! behind trait objects, so tests can swap any of them.
//!
//! ## Flow
//!
//! ```text
//! validate ─▶ acquire ─▶ workspace ─▶ normalize ─▶ run_pipeline ─▶ rehost ─▶ ResultData
//!  (no I/O)   (bytes)    (temp dir)   (→ PDF)      (4 stages)      (S3)
//! ```
//!
//! Validation is an ordered list of checks that stops at the first failure
//! and runs before any I/O, so rejected requests allocate nothing. The
//! workspace is released on every exit path by its `Drop`.

use crate::config::{ParseMethod, ServiceConfig};
use crate::error::DocParseError;
use crate::output::{ConversionOutput, ConversionResult, ResultData};
use crate::pipeline::input::{self, DocumentSource, RawDocument};
use crate::pipeline::native::NativePipelineFactory;
use crate::pipeline::normalize::{self, AllowList, DocumentFormat, FormatConverter, OfficeConverter};
use crate::pipeline::rehost::{self, ObjectStore, S3ObjectStore};
use crate::pipeline::runner::{self, CancelToken, PipelineFactory, PipelineJob};
use crate::pipeline::workspace::Workspace;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// JSON body accepted by the `/parse_document/*` endpoints.
///
/// Every field is optional at the wire level; which ones are required
/// depends on the [`Endpoint`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ParseRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub base64: Option<String>,
    #[serde(default)]
    pub parse_method: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// The conversion entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `/parse_document/pdf`: PDF only, no file name needed.
    Pdf,
    /// `/parse_document/pdfdocs`: PDF or office document, named by `file_name`.
    PdfDocs,
    /// `/parse_document/docs`: office documents only, Markdown only.
    Docs,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Pdf => "/parse_document/pdf",
            Endpoint::PdfDocs => "/parse_document/pdfdocs",
            Endpoint::Docs => "/parse_document/docs",
        }
    }

    /// Whether `data.json` carries the content list.
    fn structured(&self) -> bool {
        !matches!(self, Endpoint::Docs)
    }
}

/// A request that passed every validation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub source: DocumentSource,
    pub format: DocumentFormat,
    pub method: ParseMethod,
}

/// Check a request for `endpoint`, in order: source, file name, extension, method.
pub fn validate(endpoint: Endpoint, req: &ParseRequest) -> Result<ValidatedRequest, DocParseError> {
    let source = DocumentSource::from_fields(req.url.as_deref(), req.base64.as_deref())?;

    let format = match endpoint {
        Endpoint::Pdf => DocumentFormat::Pdf,
        Endpoint::PdfDocs => AllowList::PdfOrOffice.check(required_file_name(req)?)?,
        Endpoint::Docs => AllowList::OfficeOnly.check(required_file_name(req)?)?,
    };

    let method = match endpoint {
        Endpoint::Docs => ParseMethod::Auto,
        _ => ParseMethod::from_request(req.parse_method.as_deref())?,
    };

    Ok(ValidatedRequest {
        source,
        format,
        method,
    })
}

fn required_file_name(req: &ParseRequest) -> Result<&str, DocParseError> {
    req.file_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or(DocParseError::MissingFileName)
}

/// The conversion orchestrator.
#[derive(Clone)]
pub struct DocumentConverter {
    config: Arc<ServiceConfig>,
    http: reqwest::Client,
    converter: Arc<dyn FormatConverter>,
    pipelines: Arc<dyn PipelineFactory>,
    store: Option<Arc<dyn ObjectStore>>,
}

impl std::fmt::Debug for DocumentConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentConverter")
            .field("config", &self.config)
            .field("converter", &self.converter.name())
            .field("storage_enabled", &self.store.is_some())
            .finish()
    }
}

impl DocumentConverter {
    /// Build the production orchestrator: `soffice`, `tesseract`, and S3
    /// rehosting when storage is configured.
    pub fn new(config: ServiceConfig) -> Result<Self, DocParseError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(concat!("edgequake-docparse/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DocParseError::Internal(format!("HTTP client: {e}")))?;
        let converter = Arc::new(OfficeConverter::new(
            config.converter_program.clone(),
            config.conversion_timeout(),
        ));
        let pipelines = Arc::new(NativePipelineFactory::tesseract(
            config.ocr_program.clone(),
            config.ocr_language.clone(),
        ));
        let store = config
            .storage
            .as_ref()
            .map(|s| Arc::new(S3ObjectStore::new(s)) as Arc<dyn ObjectStore>);
        if store.is_none() {
            info!("Object storage not configured; image rehosting disabled");
        }

        Ok(Self {
            config: Arc::new(config),
            http,
            converter,
            pipelines,
            store,
        })
    }

    pub fn with_converter(mut self, converter: Arc<dyn FormatConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_pipeline_factory(mut self, factory: Arc<dyn PipelineFactory>) -> Self {
        self.pipelines = factory;
        self
    }

    pub fn with_object_store(mut self, store: Option<Arc<dyn ObjectStore>>) -> Self {
        self.store = store;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn storage_enabled(&self) -> bool {
        self.store.is_some()
    }

    // ── Request entry points ─────────────────────────────────────────────

    /// Run one JSON request and wrap the outcome in the response envelope.
    pub async fn handle(&self, endpoint: Endpoint, request: ParseRequest) -> ConversionResult {
        let start = Instant::now();
        let outcome = self.convert_request(endpoint, request).await;
        match &outcome {
            Ok(data) => info!(
                endpoint = endpoint.path(),
                markdown_len = data.markdown.len(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Conversion succeeded"
            ),
            Err(e) => warn!(
                endpoint = endpoint.path(),
                category = ?e.category(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Conversion failed: {}",
                e
            ),
        }
        ConversionResult::from_outcome(outcome)
    }

    /// Validate and convert a JSON request.
    ///
    /// The `/docs` flow as a whole is bounded by `office_timeout_secs`.
    pub async fn convert_request(
        &self,
        endpoint: Endpoint,
        request: ParseRequest,
    ) -> Result<ResultData, DocParseError> {
        let validated = validate(endpoint, &request)?;
        debug!(
            endpoint = endpoint.path(),
            format = validated.format.extension(),
            method = %validated.method,
            "Request validated"
        );

        let flow = self.process(validated.source, validated.format, validated.method);
        let output = match endpoint {
            Endpoint::Docs => {
                let limit = self.config.office_timeout();
                tokio::time::timeout(limit, flow)
                    .await
                    .map_err(|_| DocParseError::OfficeTimeout {
                        secs: limit.as_secs(),
                    })??
            }
            _ => flow.await?,
        };
        assemble(output, endpoint.structured())
    }

    /// Convert a multipart upload (legacy `/parse_document`).
    pub async fn parse_upload(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        parse_method: Option<&str>,
    ) -> Result<ResultData, DocParseError> {
        let format = AllowList::PdfOrOffice.check(file_name)?;
        let method = ParseMethod::from_request(parse_method)?;
        let output = self
            .process(DocumentSource::Bytes(bytes), format, method)
            .await?;
        assemble(output, true)
    }

    /// Convert a local file, copying extracted images into `image_export`
    /// when given so references survive the workspace.
    pub async fn convert_file(
        &self,
        path: &Path,
        method: ParseMethod,
        image_export: Option<&Path>,
    ) -> Result<ConversionOutput, DocParseError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let format = AllowList::PdfOrOffice.check(&name)?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DocParseError::InvalidRequest(format!("cannot read {}: {e}", path.display())))?;
        self.run_flow(DocumentSource::Bytes(bytes), format, method, image_export)
            .await
    }

    // ── Internal flow ────────────────────────────────────────────────────

    async fn process(
        &self,
        source: DocumentSource,
        format: DocumentFormat,
        method: ParseMethod,
    ) -> Result<ConversionOutput, DocParseError> {
        self.run_flow(source, format, method, None).await
    }

    async fn run_flow(
        &self,
        source: DocumentSource,
        format: DocumentFormat,
        method: ParseMethod,
        image_export: Option<&Path>,
    ) -> Result<ConversionOutput, DocParseError> {
        let bytes = input::acquire(source, &self.http, self.config.download_timeout()).await?;
        let document = RawDocument::new(bytes, format);

        let workspace = Workspace::acquire(self.config.work_dir.as_deref())?;
        let pdf = normalize::normalize(document, &workspace, self.converter.as_ref()).await?;
        let image_dir = workspace.images_dir().await?;

        let job = PipelineJob {
            method,
            pdf,
            image_dir,
            cancel: CancelToken::new(),
        };
        let mut output = runner::run_pipeline(
            Arc::clone(&self.pipelines),
            job,
            self.config.pipeline_timeout(),
            self.config.progress_callback.clone(),
        )
        .await?;

        let report = rehost::rehost_images(
            &output.markdown,
            self.store.as_deref(),
            self.config.upload_concurrency,
        )
        .await;
        output.markdown = report.markdown;
        output.rewrite_image_paths(&report.replaced);

        if let Some(dir) = image_export {
            export_images(&mut output, dir).await?;
        }

        workspace.release();
        Ok(output)
    }
}

fn assemble(output: ConversionOutput, structured: bool) -> Result<ResultData, DocParseError> {
    let json = if structured {
        output.content_json()?
    } else {
        String::new()
    };
    Ok(ResultData {
        markdown: output.markdown,
        json,
    })
}

/// Copy still-local images into `dir` and point the output at the copies.
async fn export_images(output: &mut ConversionOutput, dir: &Path) -> Result<(), DocParseError> {
    let refs = rehost::local_image_refs(&output.markdown);
    if refs.is_empty() {
        return Ok(());
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| DocParseError::workspace(dir, e))?;

    let mut moved = HashMap::new();
    for local in refs {
        let src = Path::new(&local);
        let Some(name) = src.file_name() else { continue };
        if !src.exists() {
            continue;
        }
        let dest = dir.join(name);
        tokio::fs::copy(src, &dest)
            .await
            .map_err(|e| DocParseError::workspace(&dest, e))?;
        moved.insert(local, dest.display().to_string());
    }

    for (from, to) in &moved {
        output.markdown = rehost::replace_image_target(&output.markdown, from, to);
    }
    output.rewrite_image_paths(&moved);
    debug!("Exported {} image(s) to {}", moved.len(), dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::ContentBlock;

    fn req(url: Option<&str>, base64: Option<&str>, method: Option<&str>, name: Option<&str>) -> ParseRequest {
        ParseRequest {
            url: url.map(String::from),
            base64: base64.map(String::from),
            parse_method: method.map(String::from),
            file_name: name.map(String::from),
        }
    }

    #[test]
    fn source_is_checked_first() {
        // Bad method and bad extension too, but the missing source wins.
        let err = validate(Endpoint::PdfDocs, &req(None, None, Some("bogus"), Some("x.xls"))).unwrap_err();
        assert!(matches!(err, DocParseError::MissingSource));
    }

    #[test]
    fn file_name_required_for_office_endpoints() {
        for endpoint in [Endpoint::PdfDocs, Endpoint::Docs] {
            let err = validate(endpoint, &req(None, Some("AAAA"), None, Some("  "))).unwrap_err();
            assert!(matches!(err, DocParseError::MissingFileName), "{endpoint:?}: {err:?}");
        }
    }

    #[test]
    fn extension_checked_before_method() {
        let err = validate(Endpoint::PdfDocs, &req(None, Some("AAAA"), Some("bogus"), Some("a.txt"))).unwrap_err();
        assert!(matches!(err, DocParseError::UnsupportedFormat { .. }));
        let err = validate(Endpoint::PdfDocs, &req(None, Some("AAAA"), Some("bogus"), Some("a.pdf"))).unwrap_err();
        assert!(matches!(err, DocParseError::UnsupportedMethod(_)));
    }

    #[test]
    fn docs_rejects_pdf_and_ignores_method() {
        let err = validate(Endpoint::Docs, &req(Some("http://x/a.pdf"), None, None, Some("a.pdf"))).unwrap_err();
        assert!(matches!(err, DocParseError::UnsupportedFormat { .. }));

        let ok = validate(Endpoint::Docs, &req(Some("http://x/a"), None, Some("bogus"), Some("Deck.PPTX"))).unwrap();
        assert_eq!(ok.format, DocumentFormat::Pptx);
        assert_eq!(ok.method, ParseMethod::Auto);
    }

    #[test]
    fn pdf_endpoint_needs_no_file_name() {
        let ok = validate(Endpoint::Pdf, &req(None, Some("JVBERg=="), Some("txt"), None)).unwrap();
        assert_eq!(ok.format, DocumentFormat::Pdf);
        assert_eq!(ok.method, ParseMethod::Txt);
        assert_eq!(ok.source, DocumentSource::Inline("JVBERg==".into()));
    }

    #[test]
    fn request_deserialises_with_missing_fields() {
        let r: ParseRequest = serde_json::from_str(r#"{"url": "http://x/doc.pdf"}"#).unwrap();
        assert_eq!(r.url.as_deref(), Some("http://x/doc.pdf"));
        assert!(r.base64.is_none() && r.file_name.is_none());
    }

    #[tokio::test]
    async fn exported_images_follow_paths_with_spaces() {
        let root = tempfile::tempdir().unwrap();
        let work = root.path().join("doc parse");
        std::fs::create_dir(&work).unwrap();
        let image = work.join("abc.png");
        std::fs::write(&image, b"png").unwrap();
        let local = image.display().to_string();
        let mut output = ConversionOutput {
            markdown: format!("![](<{local}>)\n"),
            content_list: vec![ContentBlock::Image {
                img_path: local,
                img_caption: Vec::new(),
                page_idx: 0,
            }],
        };

        let dest = root.path().join("saved images");
        export_images(&mut output, &dest).await.unwrap();

        let copied = dest.join("abc.png").display().to_string();
        assert_eq!(output.markdown, format!("![](<{copied}>)\n"));
        assert!(matches!(&output.content_list[0], ContentBlock::Image { img_path, .. } if *img_path == copied));
        assert_eq!(std::fs::read(&copied).unwrap(), b"png");
    }

    #[test]
    fn docs_result_has_empty_json() {
        let data = assemble(ConversionOutput::default(), false).unwrap();
        assert_eq!(data.json, "");
        let data = assemble(ConversionOutput::default(), true).unwrap();
        assert_eq!(data.json, "[]");
    }
}
