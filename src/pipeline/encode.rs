//! Image encoding: PDF image XObject → file bytes a Markdown viewer can show.
//!
//! JPEG streams (`DCTDecode`) are already a complete file and are written
//! out unchanged. Raw or Flate-compressed 8-bit Gray/RGB/CMYK samples are
//! re-encoded as PNG, which is lossless, so OCR sees the same pixels the
//! PDF holds. Anything else (JBIG2, JPX, 1-bit masks, indexed colour) is
//! skipped with a debug log; the page still converts without that image.
//!
//! File names are the SHA-256 of the encoded bytes, so the same picture
//! repeated on many pages is written and uploaded once.

use crate::pipeline::runner::PipelineFault;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, Stream};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use tracing::debug;

/// An image ready to be written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    /// Without the dot: `jpg` or `png`.
    pub extension: &'static str,
}

impl EncodedImage {
    /// `<sha256-hex>.<ext>`
    pub fn file_name(&self) -> String {
        format!("{}.{}", content_hash(&self.bytes), self.extension)
    }
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Encode an image XObject, or `Ok(None)` when its format is unsupported.
pub fn encode_xobject(doc: &Document, stream: &Stream) -> Result<Option<EncodedImage>, PipelineFault> {
    let filters = filter_names(&stream.dict);

    if filters.last().is_some_and(|f| f == b"DCTDecode") {
        if filters.len() > 1 {
            debug!("Skipping image with chained filters before DCTDecode");
            return Ok(None);
        }
        return Ok(Some(EncodedImage {
            bytes: stream.content.clone(),
            extension: "jpg",
        }));
    }

    let supported = filters
        .iter()
        .all(|f| f == b"FlateDecode" || f == b"LZWDecode");
    if !supported {
        debug!(
            "Skipping image with filter {:?}",
            filters.iter().map(|f| String::from_utf8_lossy(f)).collect::<Vec<_>>()
        );
        return Ok(None);
    }

    let samples = if filters.is_empty() {
        stream.content.clone()
    } else {
        match decompress(stream) {
            Ok(samples) => samples,
            Err(e) => {
                debug!("Skipping image whose stream cannot be decompressed: {}", e);
                return Ok(None);
            }
        }
    };

    let Some(img) = raw_to_image(doc, &stream.dict, samples) else {
        return Ok(None);
    };

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    debug!("Encoded {}x{} image → {} bytes PNG", img.width(), img.height(), buf.len());
    Ok(Some(EncodedImage {
        bytes: buf,
        extension: "png",
    }))
}

fn filter_names(dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(n)) => vec![n.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|o| match o {
                Object::Name(n) => Some(n.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn raw_to_image(doc: &Document, dict: &Dictionary, samples: Vec<u8>) -> Option<DynamicImage> {
    let width = dict_u32(dict, b"Width")?;
    let height = dict_u32(dict, b"Height")?;
    let bpc = dict_u32(dict, b"BitsPerComponent").unwrap_or(8);
    if bpc != 8 || width == 0 || height == 0 {
        debug!("Skipping {}x{} image with {} bits per component", width, height, bpc);
        return None;
    }
    let components = color_components(doc, dict.get(b"ColorSpace").ok()?)?;
    let needed = (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(components)?;
    if samples.len() < needed {
        debug!("Image data too short: {} < {} bytes", samples.len(), needed);
        return None;
    }
    let mut samples = samples;
    samples.truncate(needed);

    match components {
        1 => GrayImage::from_raw(width, height, samples).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(width, height, samples).map(DynamicImage::ImageRgb8),
        4 => RgbImage::from_raw(width, height, cmyk_to_rgb(&samples)).map(DynamicImage::ImageRgb8),
        _ => None,
    }
}

/// Number of colour components for the supported colour spaces.
fn color_components(doc: &Document, cs: &Object) -> Option<usize> {
    let cs = match cs {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    match cs {
        Object::Name(n) => match n.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => Some(1),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Some(3),
            b"DeviceCMYK" | b"CMYK" => Some(4),
            _ => None,
        },
        Object::Array(items) => match items.first() {
            Some(Object::Name(n)) if n == b"ICCBased" => {
                let profile = match items.get(1)? {
                    Object::Reference(id) => doc.get_object(*id).ok()?,
                    other => other,
                };
                let dict = &profile.as_stream().ok()?.dict;
                dict_u32(dict, b"N").map(|n| n as usize)
            }
            Some(Object::Name(n)) if n == b"CalGray" => Some(1),
            Some(Object::Name(n)) if n == b"CalRGB" => Some(3),
            _ => None,
        },
        _ => None,
    }
}

fn dict_u32(dict: &Dictionary, key: &[u8]) -> Option<u32> {
    match dict.get(key).ok()? {
        Object::Integer(i) => u32::try_from(*i).ok(),
        Object::Real(r) if *r >= 0.0 => Some(*r as u32),
        _ => None,
    }
}

fn cmyk_to_rgb(samples: &[u8]) -> Vec<u8> {
    samples
        .chunks_exact(4)
        .flat_map(|px| {
            let k = 255 - px[3] as u16;
            [px[0], px[1], px[2]].map(|c| ((255 - c as u16) * k / 255) as u8)
        })
        .collect()
}

/// lopdf refuses to decompress streams tagged `/Subtype /Image`, so decode a copy without the tag.
fn decompress(stream: &Stream) -> Result<Vec<u8>, lopdf::Error> {
    let mut dict = stream.dict.clone();
    dict.remove(b"Subtype");
    Stream::new(dict, stream.content.clone()).decompressed_content()
}
