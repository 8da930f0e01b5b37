//! The built-in document pipeline, backed by `lopdf`.
//!
//! | Stage      | Work                                                         |
//! |------------|--------------------------------------------------------------|
//! | `classify` | load the PDF, census each page, pick text-layer or OCR mode  |
//! | `analyze`  | interpret every page's content stream into a [`PageLayout`]  |
//! | `parse`    | group lines into headings/paragraphs, write images, run OCR  |
//! | `emit`     | render the content list and Markdown, then clean it up       |
//!
//! In text-layer mode the output depends only on the PDF bytes and the image
//! directory. In OCR mode, pages that carry images are read through the
//! [`TextRecognizer`]; pages without images keep their text layer.

use crate::config::ParseMethod;
use crate::output::{ContentBlock, ConversionOutput};
use crate::pipeline::encode::encode_xobject;
use crate::pipeline::layout::{self, PageItem, PageLayout, TextLine};
use crate::pipeline::ocr::{ocr_paragraphs, TesseractOcr, TextRecognizer};
use crate::pipeline::postprocess::{clean_markdown, join_wrapped};
use crate::pipeline::rehost::link_target;
use crate::pipeline::runner::{DocumentPipeline, PipelineFactory, PipelineFault, PipelineJob};
use lopdf::{Document, ObjectId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Lines further apart than this many font sizes start a new paragraph.
const PARAGRAPH_GAP: f32 = 1.5;
/// Lines whose sizes differ by more than this are never merged.
const SIZE_TOLERANCE: f32 = 0.5;

/// How text is obtained for the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extraction {
    TextLayer,
    Ocr,
}

/// Creates [`NativePipeline`]s sharing one OCR engine.
#[derive(Clone)]
pub struct NativePipelineFactory {
    ocr: Arc<dyn TextRecognizer>,
}

impl NativePipelineFactory {
    pub fn new(ocr: Arc<dyn TextRecognizer>) -> Self {
        Self { ocr }
    }

    /// Factory using the `tesseract` binary at `program` with language `lang`.
    pub fn tesseract(program: impl Into<String>, lang: impl Into<String>) -> Self {
        Self::new(Arc::new(TesseractOcr::new(program, lang)))
    }
}

impl PipelineFactory for NativePipelineFactory {
    fn create(&self, job: PipelineJob) -> Box<dyn DocumentPipeline> {
        Box::new(NativePipeline {
            job,
            ocr: Arc::clone(&self.ocr),
            doc: None,
            pages: Vec::new(),
            extraction: Extraction::TextLayer,
            layouts: Vec::new(),
            blocks: Vec::new(),
        })
    }
}

/// State carried from one stage to the next for a single document.
pub struct NativePipeline {
    job: PipelineJob,
    ocr: Arc<dyn TextRecognizer>,
    doc: Option<Document>,
    pages: Vec<ObjectId>,
    extraction: Extraction,
    layouts: Vec<PageLayout>,
    blocks: Vec<ContentBlock>,
}

impl NativePipeline {
    fn document(&self) -> Result<&Document, PipelineFault> {
        self.doc
            .as_ref()
            .ok_or_else(|| PipelineFault::Invalid("document not loaded".into()))
    }
}

impl DocumentPipeline for NativePipeline {
    fn classify(&mut self) -> Result<(), PipelineFault> {
        let doc = Document::load_mem(&self.job.pdf)?;
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        if pages.is_empty() {
            return Err(PipelineFault::Invalid("document has no pages".into()));
        }

        let mut scanned = 0;
        for &page_id in &pages {
            self.job.cancel.check()?;
            if layout::census_page(&doc, page_id)?.is_scanned() {
                scanned += 1;
            }
        }

        self.extraction = match self.job.method {
            ParseMethod::Ocr => Extraction::Ocr,
            ParseMethod::Txt => Extraction::TextLayer,
            ParseMethod::Auto if scanned > 0 => Extraction::Ocr,
            ParseMethod::Auto => Extraction::TextLayer,
        };
        info!(
            "Classified {} pages ({} scanned), method {} → {:?}",
            pages.len(),
            scanned,
            self.job.method,
            self.extraction
        );

        self.pages = pages;
        self.doc = Some(doc);
        Ok(())
    }

    fn analyze(&mut self) -> Result<(), PipelineFault> {
        let doc = self.document()?;
        let mut layouts = Vec::with_capacity(self.pages.len());
        for (idx, &page_id) in self.pages.iter().enumerate() {
            self.job.cancel.check()?;
            layouts.push(layout::analyze_page(doc, page_id, idx)?);
        }
        self.layouts = layouts;
        Ok(())
    }

    fn parse(&mut self) -> Result<(), PipelineFault> {
        let doc = self.document()?;
        let body = layout::body_font_size(&self.layouts);
        debug!("Body font size: {}", body);

        let mut blocks = Vec::new();
        let mut images: HashMap<ObjectId, Option<PathBuf>> = HashMap::new();

        for page in &self.layouts {
            self.job.cancel.check()?;
            let ocr_page = self.extraction == Extraction::Ocr && page.has_images();
            let mut paragraph: Option<Paragraph> = None;

            for item in &page.items {
                match item {
                    PageItem::Line(_) if ocr_page => {}
                    PageItem::Line(line) => {
                        let level = layout::heading_level(line.font_size, body);
                        match paragraph.as_mut() {
                            Some(p) if p.accepts(line, level) => p.push(line),
                            _ => {
                                blocks.extend(paragraph.take().map(|p| p.into_block(page.page_idx)));
                                paragraph = Some(Paragraph::start(line, level));
                            }
                        }
                    }
                    PageItem::Image(id) => {
                        blocks.extend(paragraph.take().map(|p| p.into_block(page.page_idx)));
                        let path = match images.get(id) {
                            Some(cached) => cached.clone(),
                            None => {
                                let path = materialise(doc, *id, &self.job.image_dir)?;
                                images.insert(*id, path.clone());
                                path
                            }
                        };
                        let Some(path) = path else { continue };

                        if ocr_page {
                            self.job.cancel.check()?;
                            let text = self.ocr.recognize(&path, &self.job.cancel)?;
                            let paragraphs = ocr_paragraphs(&text);
                            if !paragraphs.is_empty() {
                                blocks.extend(paragraphs.into_iter().map(|text| ContentBlock::Text {
                                    text,
                                    text_level: None,
                                    page_idx: page.page_idx,
                                }));
                                continue;
                            }
                        }
                        blocks.push(ContentBlock::Image {
                            img_path: path.display().to_string(),
                            img_caption: Vec::new(),
                            page_idx: page.page_idx,
                        });
                    }
                }
            }
            blocks.extend(paragraph.take().map(|p| p.into_block(page.page_idx)));
        }

        debug!("Parsed {} content blocks", blocks.len());
        self.blocks = blocks;
        Ok(())
    }

    fn emit(&mut self) -> Result<ConversionOutput, PipelineFault> {
        let content_list = std::mem::take(&mut self.blocks);
        let markdown = clean_markdown(&render_markdown(&content_list));
        Ok(ConversionOutput {
            markdown,
            content_list,
        })
    }
}

struct Paragraph {
    text: String,
    level: Option<u8>,
    font_size: f32,
    last_y: f32,
}

impl Paragraph {
    fn start(line: &TextLine, level: Option<u8>) -> Self {
        Self {
            text: line.text.clone(),
            level,
            font_size: line.font_size,
            last_y: line.y,
        }
    }

    fn accepts(&self, line: &TextLine, level: Option<u8>) -> bool {
        let gap = self.last_y - line.y;
        self.level == level
            && (self.font_size - line.font_size).abs() <= SIZE_TOLERANCE
            && gap > 0.0
            && gap <= PARAGRAPH_GAP * line.font_size.max(1.0)
    }

    fn push(&mut self, line: &TextLine) {
        join_wrapped(&mut self.text, &line.text);
        self.last_y = line.y;
    }

    fn into_block(self, page_idx: usize) -> ContentBlock {
        ContentBlock::Text {
            text: self.text,
            text_level: self.level,
            page_idx,
        }
    }
}

/// Write an image XObject into `dir`, named by content hash.
fn materialise(doc: &Document, id: ObjectId, dir: &Path) -> Result<Option<PathBuf>, PipelineFault> {
    let stream = doc.get_object(id)?.as_stream()?;
    let Some(encoded) = encode_xobject(doc, stream)? else {
        return Ok(None);
    };
    let path = dir.join(encoded.file_name());
    if !path.exists() {
        std::fs::write(&path, &encoded.bytes)?;
        debug!("Wrote image {} ({} bytes)", path.display(), encoded.bytes.len());
    }
    Ok(Some(path))
}

fn render_markdown(blocks: &[ContentBlock]) -> String {
    let mut md = String::new();
    for block in blocks {
        match block {
            ContentBlock::Text {
                text, text_level, ..
            } => {
                match text_level {
                    Some(1) => md.push_str("# "),
                    Some(_) => md.push_str("## "),
                    None if text.starts_with(['#', '!']) => md.push('\\'),
                    None => {}
                }
                md.push_str(text);
            }
            ContentBlock::Image { img_path, .. } => {
                md.push_str("![](");
                md.push_str(&link_target(img_path));
                md.push(')');
            }
        }
        md.push_str("\n\n");
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocParseError;
    use crate::pipeline::runner::{run_pipeline, CancelToken, PipelineStage};
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeOcr {
        text: &'static str,
        calls: AtomicUsize,
    }

    impl TextRecognizer for FakeOcr {
        fn recognize(&self, image: &Path, _cancel: &CancelToken) -> Result<String, PipelineFault> {
            assert!(image.exists());
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.text.to_string())
        }
    }

    fn fake_ocr(text: &'static str) -> Arc<FakeOcr> {
        Arc::new(FakeOcr {
            text,
            calls: AtomicUsize::new(0),
        })
    }

    /// One page per entry; each page is either text lines `(size, y, text)` or a gray image.
    enum PageFixture {
        Text(Vec<(i64, i64, &'static str)>),
        Image,
    }

    fn build_pdf(pages: Vec<PageFixture>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 2,
                "Height" => 2,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![0, 255, 255, 0],
        ));
        let mut kids: Vec<Object> = Vec::new();
        for fixture in pages {
            let ops = match fixture {
                PageFixture::Text(lines) => {
                    let mut ops = vec![Operation::new("BT", vec![])];
                    for (size, y, text) in lines {
                        ops.push(Operation::new("Tf", vec!["F1".into(), size.into()]));
                        ops.push(Operation::new("Tm", vec![1.into(), 0.into(), 0.into(), 1.into(), 72.into(), y.into()]));
                        ops.push(Operation::new("Tj", vec![Object::string_literal(text)]));
                    }
                    ops.push(Operation::new("ET", vec![]));
                    ops
                }
                PageFixture::Image => vec![
                    Operation::new("q", vec![]),
                    Operation::new("cm", vec![500.into(), 0.into(), 0.into(), 700.into(), 50.into(), 50.into()]),
                    Operation::new("Do", vec!["Im1".into()]),
                    Operation::new("Q", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                Content { operations: ops }.encode().unwrap(),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }
        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => font_id },
                    "XObject" => dictionary! { "Im1" => image_id },
                },
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    fn article() -> Vec<u8> {
        build_pdf(vec![PageFixture::Text(vec![
            (24, 760, "Annual Report"),
            (14, 720, "Overview"),
            (10, 700, "Revenue grew in every"),
            (10, 688, "region this year."),
            (10, 660, "Costs were flat."),
        ])])
    }

    async fn run(
        pdf: Vec<u8>,
        method: ParseMethod,
        ocr: Arc<dyn TextRecognizer>,
        image_dir: &Path,
    ) -> Result<ConversionOutput, DocParseError> {
        let job = PipelineJob {
            method,
            pdf,
            image_dir: image_dir.to_path_buf(),
            cancel: CancelToken::new(),
        };
        let factory = Arc::new(NativePipelineFactory::new(ocr));
        run_pipeline(factory, job, Duration::from_secs(30), None).await
    }

    #[tokio::test]
    async fn text_layer_headings_and_paragraphs() {
        let dir = tempfile::tempdir().unwrap();
        let out = run(article(), ParseMethod::Txt, fake_ocr("unused"), dir.path())
            .await
            .unwrap();
        assert_eq!(
            out.markdown,
            "# Annual Report\n\n## Overview\n\nRevenue grew in every region this year.\n\nCosts were flat.\n"
        );
        assert_eq!(out.content_list.len(), 4);
        assert_eq!(
            out.content_list[0],
            ContentBlock::Text {
                text: "Annual Report".into(),
                text_level: Some(1),
                page_idx: 0
            }
        );
        let json = out.content_json().unwrap();
        assert!(json.starts_with('['));
    }

    #[tokio::test]
    async fn text_mode_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = build_pdf(vec![
            PageFixture::Text(vec![(12, 700, "Hello")]),
            PageFixture::Image,
        ]);
        let a = run(pdf.clone(), ParseMethod::Txt, fake_ocr(""), dir.path()).await.unwrap();
        let b = run(pdf, ParseMethod::Txt, fake_ocr(""), dir.path()).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn auto_ocrs_scanned_documents() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = fake_ocr("Scanned words\nwrapped\n\nSecond block\n");
        let pdf = build_pdf(vec![PageFixture::Image, PageFixture::Text(vec![(12, 700, "Typed page")])]);
        let out = run(pdf, ParseMethod::Auto, ocr.clone(), dir.path()).await.unwrap();

        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            out.markdown,
            "Scanned words wrapped\n\nSecond block\n\nTyped page\n"
        );
        assert!(out
            .content_list
            .iter()
            .all(|b| matches!(b, ContentBlock::Text { .. })));
    }

    #[tokio::test]
    async fn txt_mode_keeps_images_and_skips_ocr() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = fake_ocr("should not appear");
        let pdf = build_pdf(vec![PageFixture::Image]);
        let out = run(pdf, ParseMethod::Txt, ocr.clone(), dir.path()).await.unwrap();

        assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
        let ContentBlock::Image { img_path, page_idx, .. } = &out.content_list[0] else {
            panic!("expected image block, got {:?}", out.content_list);
        };
        assert_eq!(*page_idx, 0);
        assert!(img_path.ends_with(".png"));
        assert!(Path::new(img_path).exists());
        assert_eq!(out.markdown, format!("![]({img_path})\n"));
    }

    #[tokio::test]
    async fn blank_ocr_result_keeps_the_image() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = build_pdf(vec![PageFixture::Image]);
        let out = run(pdf, ParseMethod::Ocr, fake_ocr("  \n"), dir.path()).await.unwrap();
        assert!(matches!(out.content_list[0], ContentBlock::Image { .. }));
    }

    #[tokio::test]
    async fn repeated_image_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = build_pdf(vec![PageFixture::Image, PageFixture::Image]);
        let out = run(pdf, ParseMethod::Txt, fake_ocr(""), dir.path()).await.unwrap();
        assert_eq!(out.content_list.len(), 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn body_text_that_looks_like_markdown_is_escaped() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = build_pdf(vec![PageFixture::Text(vec![
            (10, 700, "# not a heading"),
            (10, 660, "![x](y.png) is literal"),
        ])]);
        let out = run(pdf, ParseMethod::Txt, fake_ocr(""), dir.path()).await.unwrap();
        assert_eq!(
            out.markdown,
            "\\# not a heading\n\n\\![x](y.png) is literal\n"
        );
        assert!(matches!(
            &out.content_list[0],
            ContentBlock::Text { text, text_level: None, .. } if text == "# not a heading"
        ));
    }

    #[tokio::test]
    async fn image_dir_with_space_is_bracketed() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("doc parse");
        std::fs::create_dir(&dir).unwrap();
        let out = run(build_pdf(vec![PageFixture::Image]), ParseMethod::Txt, fake_ocr(""), &dir)
            .await
            .unwrap();
        let ContentBlock::Image { img_path, .. } = &out.content_list[0] else {
            panic!("expected image block, got {:?}", out.content_list);
        };
        assert_eq!(out.markdown, format!("![](<{img_path}>)\n"));
        assert_eq!(crate::pipeline::rehost::local_image_refs(&out.markdown), vec![img_path.clone()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pipeline_timeout_kills_the_ocr_process() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let script = dir.path().join("slow-ocr.sh");
        std::fs::write(
            &script,
            format!("#!/bin/sh\nsleep 2\ntouch '{}'\n", marker.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir(&images).unwrap();

        let job = PipelineJob {
            method: ParseMethod::Ocr,
            pdf: build_pdf(vec![PageFixture::Image]),
            image_dir: images,
            cancel: CancelToken::new(),
        };
        let factory = Arc::new(NativePipelineFactory::tesseract(
            script.display().to_string(),
            "eng",
        ));
        let err = run_pipeline(factory, job, Duration::from_millis(300), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DocParseError::PipelineTimeout { .. }), "got: {err:?}");

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!marker.exists(), "OCR process outlived the pipeline");
    }

    #[tokio::test]
    async fn garbage_fails_in_classify() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(b"not a pdf".to_vec(), ParseMethod::Auto, fake_ocr(""), dir.path())
            .await
            .unwrap_err();
        assert!(
            matches!(err, DocParseError::Pipeline { stage: PipelineStage::Classify, .. }),
            "got: {err:?}"
        );
    }
}
