//! Page layout analysis: interpret PDF content streams.
//!
//! A page's content stream is replayed with a small graphics/text state
//! machine (`q`/`Q`/`cm`, `BT`/`ET`, `Tf`, `TL`, `Td`, `TD`, `Tm`, `T*`,
//! `Tj`, `TJ`, `'`, `"`, `Do`). The output is a [`PageLayout`]: text lines
//! with their effective font size and baseline, and image placements, in
//! content-stream order. Form XObjects are followed a few levels deep.
//!
//! ## String decoding
//!
//! Show-text operands are byte strings in the font's encoding. When the font
//! has a `ToUnicode` CMap it is used; otherwise UTF-16BE strings (with a BOM)
//! are decoded as such and everything else byte-per-char (Latin-1).
//!
//! ## Widths
//!
//! Glyph widths are not read. After each show the text position advances by
//! half an em per character, which is enough to tell word gaps apart from
//! adjacent runs on the same baseline.

use crate::pipeline::runner::PipelineFault;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

const MAX_FORM_DEPTH: usize = 4;
const MAX_BFRANGE_SPAN: u32 = 0xFFFF;
/// TJ adjustments more negative than this (thousandths of an em) are word gaps.
const TJ_SPACE_THRESHOLD: f32 = -250.0;
const EM_ADVANCE: f32 = 0.5;

/// One line of text on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    /// Effective size in user-space units after text and graphics matrices.
    pub font_size: f32,
    pub x: f32,
    /// Baseline, growing upwards.
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageItem {
    Line(TextLine),
    /// An image XObject drawn with `Do`.
    Image(ObjectId),
}

/// Lines and image placements of one page, in content-stream order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLayout {
    pub page_idx: usize,
    pub items: Vec<PageItem>,
}

impl PageLayout {
    pub fn lines(&self) -> impl Iterator<Item = &TextLine> {
        self.items.iter().filter_map(|item| match item {
            PageItem::Line(line) => Some(line),
            PageItem::Image(_) => None,
        })
    }

    pub fn has_images(&self) -> bool {
        self.items.iter().any(|item| matches!(item, PageItem::Image(_)))
    }
}

/// What `classify` needs to know about a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCensus {
    /// Non-space bytes passed to text-showing operators.
    pub text_chars: usize,
    pub images: usize,
}

impl PageCensus {
    /// No text layer but at least one image: a scanned page.
    pub fn is_scanned(&self) -> bool {
        self.text_chars == 0 && self.images > 0
    }
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Count text and image placements on a page without decoding strings.
pub fn census_page(doc: &Document, page_id: ObjectId) -> Result<PageCensus, PipelineFault> {
    let content = Content::decode(&doc.get_page_content(page_id)?)?;
    let mut census = PageCensus::default();
    census_ops(doc, &content.operations, page_resources(doc, page_id), 0, &mut census);
    Ok(census)
}

/// Interpret a page's content stream into a [`PageLayout`].
pub fn analyze_page(
    doc: &Document,
    page_id: ObjectId,
    page_idx: usize,
) -> Result<PageLayout, PipelineFault> {
    let content = Content::decode(&doc.get_page_content(page_id)?)?;
    let mut interp = Interpreter::new(doc);
    interp.run(&content.operations, page_resources(doc, page_id), 0);
    interp.flush_line();
    debug!(
        "Page {}: {} items from {} operations",
        page_idx + 1,
        interp.items.len(),
        content.operations.len()
    );
    Ok(PageLayout {
        page_idx,
        items: interp.items,
    })
}

/// The dominant body-text size across all pages (character-weighted mode).
pub fn body_font_size(layouts: &[PageLayout]) -> f32 {
    let mut histogram: BTreeMap<i64, usize> = BTreeMap::new();
    for line in layouts.iter().flat_map(PageLayout::lines) {
        let bucket = (line.font_size * 2.0).round() as i64;
        *histogram.entry(bucket).or_default() += line.text.chars().count();
    }
    // `max_by_key` keeps the last maximum; iterate largest-first so ties
    // resolve to the smaller size.
    histogram
        .iter()
        .rev()
        .max_by_key(|(_, count)| **count)
        .map(|(bucket, _)| *bucket as f32 / 2.0)
        .unwrap_or(0.0)
}

/// Heading level for a line of `size` given the body size.
pub fn heading_level(size: f32, body: f32) -> Option<u8> {
    if body <= 0.0 {
        return None;
    }
    let ratio = size / body;
    if ratio >= 1.6 {
        Some(1)
    } else if ratio >= 1.2 {
        Some(2)
    } else {
        None
    }
}

// ── Resources ────────────────────────────────────────────────────────────

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    resolve(doc, obj)?.as_dict().ok()
}

/// The page's `/Resources`, inherited through `/Parent` when absent.
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..32 {
        if let Ok(res) = node.get(b"Resources") {
            return resolve_dict(doc, res);
        }
        let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

enum XObject<'a> {
    Image(ObjectId),
    Form(&'a Stream),
    Other,
}

fn lookup_xobject<'a>(
    doc: &'a Document,
    resources: Option<&'a Dictionary>,
    name: &[u8],
) -> XObject<'a> {
    let Some(entry) = resources
        .and_then(|r| r.get(b"XObject").ok())
        .and_then(|x| resolve_dict(doc, x))
        .and_then(|x| x.get(name).ok())
    else {
        return XObject::Other;
    };
    let Ok(id) = entry.as_reference() else {
        return XObject::Other;
    };
    let Some(stream) = doc.get_object(id).ok().and_then(|o| o.as_stream().ok()) else {
        return XObject::Other;
    };
    match stream.dict.get(b"Subtype") {
        Ok(Object::Name(n)) if n == b"Image" => XObject::Image(id),
        Ok(Object::Name(n)) if n == b"Form" => XObject::Form(stream),
        _ => XObject::Other,
    }
}

/// Decoded content of a stream, or the raw bytes when it is not compressed.
pub(crate) fn stream_bytes(stream: &Stream) -> Vec<u8> {
    if stream.dict.has(b"Filter") {
        stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone())
    } else {
        stream.content.clone()
    }
}

fn form_operations(stream: &Stream) -> Option<Vec<Operation>> {
    match Content::decode(&stream_bytes(stream)) {
        Ok(content) => Some(content.operations),
        Err(e) => {
            debug!("Skipping undecodable form XObject: {}", e);
            None
        }
    }
}

fn name_operand(operands: &[Object], idx: usize) -> Option<&[u8]> {
    match operands.get(idx)? {
        Object::Name(n) => Some(n.as_slice()),
        _ => None,
    }
}

fn num(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn nums<const N: usize>(operands: &[Object]) -> Option<[f32; N]> {
    let mut out = [0.0; N];
    for (slot, obj) in out.iter_mut().zip(operands) {
        *slot = num(obj)?;
    }
    (operands.len() >= N).then_some(out)
}

// ── Census ───────────────────────────────────────────────────────────────

fn census_ops(
    doc: &Document,
    ops: &[Operation],
    resources: Option<&Dictionary>,
    depth: usize,
    census: &mut PageCensus,
) {
    let visible = |bytes: &[u8]| bytes.iter().filter(|b| !b.is_ascii_whitespace()).count();
    for op in ops {
        match op.operator.as_str() {
            "Tj" | "'" => {
                if let Some(Object::String(s, _)) = op.operands.first() {
                    census.text_chars += visible(s);
                }
            }
            "\"" => {
                if let Some(Object::String(s, _)) = op.operands.get(2) {
                    census.text_chars += visible(s);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = op.operands.first() {
                    for item in items {
                        if let Object::String(s, _) = item {
                            census.text_chars += visible(s);
                        }
                    }
                }
            }
            "Do" => {
                let Some(name) = name_operand(&op.operands, 0) else {
                    continue;
                };
                match lookup_xobject(doc, resources, name) {
                    XObject::Image(_) => census.images += 1,
                    XObject::Form(stream) if depth < MAX_FORM_DEPTH => {
                        if let Some(form_ops) = form_operations(stream) {
                            let form_res = stream
                                .dict
                                .get(b"Resources")
                                .ok()
                                .and_then(|r| resolve_dict(doc, r))
                                .or(resources);
                            census_ops(doc, &form_ops, form_res, depth + 1, census);
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

// ── Fonts ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct FontDecoder {
    two_byte: bool,
    to_unicode: HashMap<u32, String>,
}

impl FontDecoder {
    fn from_dict(doc: &Document, font: &Dictionary) -> Self {
        let two_byte = matches!(font.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Type0");
        let to_unicode = font
            .get(b"ToUnicode")
            .ok()
            .and_then(|o| resolve(doc, o))
            .and_then(|o| o.as_stream().ok())
            .map(|s| parse_cmap(&stream_bytes(s)))
            .unwrap_or_default();
        Self {
            two_byte,
            to_unicode,
        }
    }

    fn decode(&self, bytes: &[u8]) -> String {
        if self.to_unicode.is_empty() {
            return decode_plain(bytes);
        }
        let width = if self.two_byte { 2 } else { 1 };
        let mut out = String::new();
        for chunk in bytes.chunks(width) {
            let code = chunk.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
            match self.to_unicode.get(&code) {
                Some(s) => out.push_str(s),
                None if width == 1 => out.push(char::from(chunk[0])),
                None => out.extend(char::from_u32(code).filter(|c| !c.is_control())),
            }
        }
        out
    }
}

/// Decode a string without font information.
fn decode_plain(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

fn load_fonts(doc: &Document, resources: Option<&Dictionary>) -> HashMap<Vec<u8>, FontDecoder> {
    let Some(fonts) = resources
        .and_then(|r| r.get(b"Font").ok())
        .and_then(|f| resolve_dict(doc, f))
    else {
        return HashMap::new();
    };
    fonts
        .iter()
        .filter_map(|(name, obj)| {
            let dict = resolve_dict(doc, obj)?;
            Some((name.clone(), FontDecoder::from_dict(doc, dict)))
        })
        .collect()
}

// ── ToUnicode CMaps ──────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum CmapToken {
    Hex(Vec<u8>),
    ArrayStart,
    ArrayEnd,
    Word(Vec<u8>),
}

fn tokenize_cmap(data: &[u8]) -> Vec<CmapToken> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        match b {
            b'%' => {
                while i < data.len() && data[i] != b'\n' && data[i] != b'\r' {
                    i += 1;
                }
            }
            b'<' if data.get(i + 1) == Some(&b'<') => {
                tokens.push(CmapToken::Word(b"<<".to_vec()));
                i += 2;
                continue;
            }
            b'>' if data.get(i + 1) == Some(&b'>') => {
                tokens.push(CmapToken::Word(b">>".to_vec()));
                i += 2;
                continue;
            }
            b'<' => {
                let start = i + 1;
                let end = data[start..]
                    .iter()
                    .position(|&c| c == b'>')
                    .map_or(data.len(), |p| start + p);
                let digits: Vec<u8> = data[start..end]
                    .iter()
                    .copied()
                    .filter(u8::is_ascii_hexdigit)
                    .collect();
                tokens.push(CmapToken::Hex(hex_bytes(&digits)));
                i = end;
            }
            b'(' => {
                let mut level = 0usize;
                while i < data.len() {
                    match data[i] {
                        b'\\' => i += 1,
                        b'(' => level += 1,
                        b')' => {
                            level -= 1;
                            if level == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
            }
            b'[' => tokens.push(CmapToken::ArrayStart),
            b']' => tokens.push(CmapToken::ArrayEnd),
            c if is_cmap_delimiter(c) => {}
            _ => {
                let start = i;
                while i < data.len() && !is_cmap_delimiter(data[i]) {
                    i += 1;
                }
                tokens.push(CmapToken::Word(data[start..i].to_vec()));
                continue;
            }
        }
        i += 1;
    }
    tokens
}

fn is_cmap_delimiter(b: u8) -> bool {
    b.is_ascii_whitespace() || matches!(b, b'<' | b'>' | b'[' | b']' | b'(' | b')' | b'%')
}

fn hex_bytes(digits: &[u8]) -> Vec<u8> {
    let nibble = |c: u8| (c as char).to_digit(16).unwrap_or(0) as u8;
    digits
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => (nibble(*hi) << 4) | nibble(*lo),
            [hi] => nibble(*hi) << 4,
            _ => 0,
        })
        .collect()
}

fn utf16_be(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|c| match c {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [lo] => u16::from(*lo),
            _ => 0,
        })
        .collect()
}

fn code_of(bytes: &[u8]) -> u32 {
    bytes.iter().take(4).fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
}

/// Parse the `bfchar`/`bfrange` sections of a ToUnicode CMap.
fn parse_cmap(data: &[u8]) -> HashMap<u32, String> {
    let tokens = tokenize_cmap(data);
    let mut map = HashMap::new();
    let mut i = 0;
    while i < tokens.len() {
        match &tokens[i] {
            CmapToken::Word(w) if w == b"beginbfchar" => {
                i += 1;
                while let (Some(CmapToken::Hex(src)), Some(CmapToken::Hex(dst))) =
                    (tokens.get(i), tokens.get(i + 1))
                {
                    map.insert(code_of(src), String::from_utf16_lossy(&utf16_be(dst)));
                    i += 2;
                }
            }
            CmapToken::Word(w) if w == b"beginbfrange" => {
                i += 1;
                while let (Some(CmapToken::Hex(lo)), Some(CmapToken::Hex(hi))) =
                    (tokens.get(i), tokens.get(i + 1))
                {
                    let (lo, hi) = (code_of(lo), code_of(hi));
                    let span = hi.saturating_sub(lo).min(MAX_BFRANGE_SPAN);
                    match tokens.get(i + 2) {
                        Some(CmapToken::Hex(dst)) => {
                            let base = utf16_be(dst);
                            for offset in 0..=span {
                                let mut units = base.clone();
                                if let Some(last) = units.last_mut() {
                                    *last = last.wrapping_add(offset as u16);
                                }
                                map.insert(lo + offset, String::from_utf16_lossy(&units));
                            }
                            i += 3;
                        }
                        Some(CmapToken::ArrayStart) => {
                            i += 3;
                            let mut offset = 0;
                            while let Some(CmapToken::Hex(dst)) = tokens.get(i) {
                                if offset <= span {
                                    map.insert(lo + offset, String::from_utf16_lossy(&utf16_be(dst)));
                                }
                                offset += 1;
                                i += 1;
                            }
                            if tokens.get(i) == Some(&CmapToken::ArrayEnd) {
                                i += 1;
                            }
                        }
                        _ => break,
                    }
                }
            }
            _ => i += 1,
        }
    }
    map
}

// ── Interpreter ──────────────────────────────────────────────────────────

/// Row-vector affine matrix `[a b c d e f]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f32; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translate(tx: f32, ty: f32) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    /// `self × other`
    fn then(self, other: Matrix) -> Matrix {
        let [a1, b1, c1, d1, e1, f1] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a1 * a2 + b1 * c2,
            a1 * b2 + b1 * d2,
            c1 * a2 + d1 * c2,
            c1 * b2 + d1 * d2,
            e1 * a2 + f1 * c2 + e2,
            e1 * b2 + f1 * d2 + f2,
        ])
    }

    fn vertical_scale(&self) -> f32 {
        self.0[2].hypot(self.0[3])
    }
}

struct LineBuilder {
    text: String,
    font_size: f32,
    x: f32,
    y: f32,
    end_x: f32,
}

struct Interpreter<'a> {
    doc: &'a Document,
    fonts: HashMap<Vec<u8>, FontDecoder>,
    ctm: Matrix,
    ctm_stack: Vec<Matrix>,
    tm: Matrix,
    tlm: Matrix,
    leading: f32,
    font_size: f32,
    font: Option<Vec<u8>>,
    line: Option<LineBuilder>,
    items: Vec<PageItem>,
}

impl<'a> Interpreter<'a> {
    fn new(doc: &'a Document) -> Self {
        Self {
            doc,
            fonts: HashMap::new(),
            ctm: Matrix::IDENTITY,
            ctm_stack: Vec::new(),
            tm: Matrix::IDENTITY,
            tlm: Matrix::IDENTITY,
            leading: 0.0,
            font_size: 0.0,
            font: None,
            line: None,
            items: Vec::new(),
        }
    }

    fn run(&mut self, ops: &[Operation], resources: Option<&'a Dictionary>, depth: usize) {
        let saved_fonts = std::mem::replace(&mut self.fonts, load_fonts(self.doc, resources));
        for op in ops {
            self.apply(op, resources, depth);
        }
        self.fonts = saved_fonts;
    }

    fn apply(&mut self, op: &Operation, resources: Option<&'a Dictionary>, depth: usize) {
        let operands = op.operands.as_slice();
        match op.operator.as_str() {
            "q" => self.ctm_stack.push(self.ctm),
            "Q" => {
                if let Some(m) = self.ctm_stack.pop() {
                    self.ctm = m;
                }
            }
            "cm" => {
                if let Some(m) = nums::<6>(operands) {
                    self.ctm = Matrix(m).then(self.ctm);
                }
            }
            "BT" => {
                self.tm = Matrix::IDENTITY;
                self.tlm = Matrix::IDENTITY;
            }
            "Tf" => {
                self.font = name_operand(operands, 0).map(<[u8]>::to_vec);
                if let Some(size) = operands.get(1).and_then(num) {
                    self.font_size = size;
                }
            }
            "TL" => {
                if let Some([l]) = nums::<1>(operands) {
                    self.leading = l;
                }
            }
            "Td" => {
                if let Some([tx, ty]) = nums::<2>(operands) {
                    self.move_line(tx, ty);
                }
            }
            "TD" => {
                if let Some([tx, ty]) = nums::<2>(operands) {
                    self.leading = -ty;
                    self.move_line(tx, ty);
                }
            }
            "Tm" => {
                if let Some(m) = nums::<6>(operands) {
                    self.tm = Matrix(m);
                    self.tlm = self.tm;
                }
            }
            "T*" => self.move_line(0.0, -self.leading),
            "Tj" => {
                if let Some(Object::String(s, _)) = operands.first() {
                    let text = self.decode(s);
                    self.show(&text, 0.0);
                }
            }
            "'" => {
                self.move_line(0.0, -self.leading);
                if let Some(Object::String(s, _)) = operands.first() {
                    let text = self.decode(s);
                    self.show(&text, 0.0);
                }
            }
            "\"" => {
                self.move_line(0.0, -self.leading);
                if let Some(Object::String(s, _)) = operands.get(2) {
                    let text = self.decode(s);
                    self.show(&text, 0.0);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    self.show_array(items);
                }
            }
            "Do" => {
                let Some(name) = name_operand(operands, 0) else {
                    return;
                };
                match lookup_xobject(self.doc, resources, name) {
                    XObject::Image(id) => {
                        self.flush_line();
                        self.items.push(PageItem::Image(id));
                    }
                    XObject::Form(stream) if depth < MAX_FORM_DEPTH => {
                        let Some(form_ops) = form_operations(stream) else {
                            return;
                        };
                        let form_res = stream
                            .dict
                            .get(b"Resources")
                            .ok()
                            .and_then(|r| resolve_dict(self.doc, r))
                            .or(resources);
                        let saved = self.ctm;
                        if let Some(m) = stream
                            .dict
                            .get(b"Matrix")
                            .ok()
                            .and_then(|m| m.as_array().ok())
                            .and_then(|m| nums::<6>(m))
                        {
                            self.ctm = Matrix(m).then(self.ctm);
                        }
                        self.run(&form_ops, form_res, depth + 1);
                        self.ctm = saved;
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.tlm = Matrix::translate(tx, ty).then(self.tlm);
        self.tm = self.tlm;
    }

    fn decode(&self, bytes: &[u8]) -> String {
        match self.font.as_ref().and_then(|f| self.fonts.get(f)) {
            Some(decoder) => decoder.decode(bytes),
            None => decode_plain(bytes),
        }
    }

    fn show_array(&mut self, items: &[Object]) {
        let mut text = String::new();
        let mut adjust = 0.0;
        for item in items {
            match item {
                Object::String(s, _) => text.push_str(&self.decode(s)),
                other => {
                    if let Some(n) = num(other) {
                        adjust -= n / 1000.0 * self.font_size;
                        if n < TJ_SPACE_THRESHOLD && !text.is_empty() && !text.ends_with(' ') {
                            text.push(' ');
                        }
                    }
                }
            }
        }
        self.show(&text, adjust);
    }

    /// Record `text` at the current position and advance the text matrix.
    fn show(&mut self, text: &str, extra_advance: f32) {
        let m = self.tm.then(self.ctm);
        let scale = m.vertical_scale();
        let size = (self.font_size * scale).abs();
        let (x, y) = (m.0[4], m.0[5]);
        let chars = text.chars().count() as f32;
        let advance = chars * self.font_size * EM_ADVANCE + extra_advance;
        self.tm = Matrix::translate(advance, 0.0).then(self.tm);

        if text.trim().is_empty() && self.line.is_none() {
            return;
        }
        let end_x = x + chars * size * EM_ADVANCE;

        if let Some(line) = self.line.as_mut() {
            let tolerance = 0.3 * line.font_size.max(size).max(1.0);
            let same_baseline = (line.y - y).abs() <= tolerance;
            let moved_back = x < line.x - line.font_size.max(1.0);
            if same_baseline && !moved_back {
                let gap = x - line.end_x;
                if gap > 0.25 * size && !line.text.ends_with(' ') && !text.starts_with(' ') {
                    line.text.push(' ');
                }
                line.text.push_str(text);
                line.font_size = line.font_size.max(size);
                line.end_x = end_x.max(line.end_x);
                return;
            }
        }

        self.flush_line();
        self.line = Some(LineBuilder {
            text: text.to_string(),
            font_size: size,
            x,
            y,
            end_x,
        });
    }

    fn flush_line(&mut self) {
        if let Some(line) = self.line.take() {
            let text = line.text.trim().to_string();
            if !text.is_empty() {
                self.items.push(PageItem::Line(TextLine {
                    text,
                    font_size: line.font_size,
                    x: line.x,
                    y: line.y,
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn one_page(
        mut doc: Document,
        ops: Vec<Operation>,
        resources: Dictionary,
    ) -> (Document, ObjectId) {
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            Content { operations: ops }.encode().unwrap(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => resources,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        (doc, page_id)
    }

    fn courier(doc: &mut Document) -> ObjectId {
        doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        })
    }

    fn text_op(op: &str, s: &str) -> Operation {
        Operation::new(op, vec![Object::string_literal(s)])
    }

    #[test]
    fn lines_and_sizes() {
        let mut doc = Document::with_version("1.5");
        let font = courier(&mut doc);
        let ops = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 24.into()]),
            Operation::new("Td", vec![72.into(), 700.into()]),
            text_op("Tj", "Title"),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("TL", vec![14.into()]),
            Operation::new("Td", vec![0.into(), (-40).into()]),
            text_op("Tj", "First"),
            text_op("'", "Second"),
            Operation::new("ET", vec![]),
        ];
        let (doc, page_id) = one_page(doc, ops, dictionary! { "Font" => dictionary! { "F1" => font } });

        let layout = analyze_page(&doc, page_id, 0).unwrap();
        let lines: Vec<_> = layout.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].text, "Title");
        assert_eq!(lines[0].font_size, 24.0);
        assert_eq!(lines[1].text, "First");
        assert_eq!(lines[1].y, 660.0);
        assert_eq!(lines[2].text, "Second");
        assert_eq!(lines[2].y, 646.0);
    }

    #[test]
    fn tj_array_gaps_become_spaces() {
        let ops = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 10.into()]),
            Operation::new(
                "TJ",
                vec![Object::Array(vec![
                    Object::string_literal("Hel"),
                    (-20).into(),
                    Object::string_literal("lo"),
                    (-600).into(),
                    Object::string_literal("world"),
                ])],
            ),
            Operation::new("ET", vec![]),
        ];
        let (doc, page_id) = one_page(Document::with_version("1.5"), ops, dictionary! {});
        let layout = analyze_page(&doc, page_id, 0).unwrap();
        assert_eq!(layout.lines().next().unwrap().text, "Hello world");
    }

    #[test]
    fn ctm_scales_font_size() {
        let ops = vec![
            Operation::new("cm", vec![2.into(), 0.into(), 0.into(), 2.into(), 0.into(), 0.into()]),
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 10.into()]),
            text_op("Tj", "Big"),
            Operation::new("ET", vec![]),
        ];
        let (doc, page_id) = one_page(Document::with_version("1.5"), ops, dictionary! {});
        let layout = analyze_page(&doc, page_id, 0).unwrap();
        assert_eq!(layout.lines().next().unwrap().font_size, 20.0);
    }

    #[test]
    fn census_detects_scanned_page() {
        let mut doc = Document::with_version("1.5");
        let img = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 1,
                "Height" => 1,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![0],
        ));
        let ops = vec![
            Operation::new("q", vec![]),
            Operation::new("Do", vec!["Im1".into()]),
            Operation::new("Q", vec![]),
        ];
        let (doc, page_id) =
            one_page(doc, ops, dictionary! { "XObject" => dictionary! { "Im1" => img } });

        let census = census_page(&doc, page_id).unwrap();
        assert_eq!(census, PageCensus { text_chars: 0, images: 1 });
        assert!(census.is_scanned());

        let layout = analyze_page(&doc, page_id, 3).unwrap();
        assert_eq!(layout.page_idx, 3);
        assert_eq!(layout.items, vec![PageItem::Image(img)]);
    }

    #[test]
    fn utf16_strings_are_decoded() {
        assert_eq!(decode_plain(&[0xFE, 0xFF, 0x00, 0x48, 0x00, 0xE9]), "Hé");
        assert_eq!(decode_plain(b"caf\xe9"), "café");
    }

    #[test]
    fn cmap_bfchar_and_bfrange() {
        let cmap = b"/CIDInit /ProcSet findresource begin\n\
            12 dict begin begincmap\n\
            1 begincodespacerange <0000> <FFFF> endcodespacerange\n\
            2 beginbfchar\n<0003> <0020>\n<0011> <00660069>\nendbfchar\n\
            2 beginbfrange\n<0024> <0026> <0041>\n<0030> <0031> [<0078> <0079>]\nendbfrange\n\
            endcmap end end";
        let map = parse_cmap(cmap);
        assert_eq!(map.get(&0x03).map(String::as_str), Some(" "));
        assert_eq!(map.get(&0x11).map(String::as_str), Some("fi"));
        assert_eq!(map.get(&0x24).map(String::as_str), Some("A"));
        assert_eq!(map.get(&0x26).map(String::as_str), Some("C"));
        assert_eq!(map.get(&0x31).map(String::as_str), Some("y"));

        let decoder = FontDecoder {
            two_byte: true,
            to_unicode: map,
        };
        assert_eq!(decoder.decode(&[0x00, 0x24, 0x00, 0x03, 0x00, 0x11]), "A fi");
    }

    #[test]
    fn body_size_and_headings() {
        let line = |text: &str, size: f32| {
            PageItem::Line(TextLine {
                text: text.into(),
                font_size: size,
                x: 0.0,
                y: 0.0,
            })
        };
        let layouts = vec![PageLayout {
            page_idx: 0,
            items: vec![
                line("Heading", 20.0),
                line("a long body paragraph line", 10.0),
                line("another body line", 10.0),
            ],
        }];
        let body = body_font_size(&layouts);
        assert_eq!(body, 10.0);
        assert_eq!(heading_level(20.0, body), Some(1));
        assert_eq!(heading_level(13.0, body), Some(2));
        assert_eq!(heading_level(11.0, body), None);
        assert_eq!(heading_level(11.0, 0.0), None);
    }
}
