//! Input acquisition: obtain raw document bytes from inline data or a URL.
//!
//! Every failure comes back as a typed [`DocParseError`]; a download problem
//! is never folded into an empty buffer, so "the server returned 404" and
//! "the document is zero bytes" stay distinguishable. There is exactly one
//! attempt per request; retrying is the caller's business.

use crate::error::DocParseError;
use crate::pipeline::normalize::DocumentFormat;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::time::Duration;
use tracing::{debug, info};

/// Where the document bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    /// Base64 text, optionally with a `data:<mime>;base64,` prefix.
    Inline(String),
    /// HTTP/HTTPS URL fetched with a single GET.
    Url(String),
    /// Bytes already in memory (multipart upload, local file).
    Bytes(Vec<u8>),
}

impl DocumentSource {
    /// Pick the source from the request's optional `url` / `base64` fields.
    ///
    /// Inline data wins when both are given.
    pub fn from_fields(url: Option<&str>, base64: Option<&str>) -> Result<Self, DocParseError> {
        fn non_empty(v: Option<&str>) -> Option<&str> {
            v.map(str::trim).filter(|s| !s.is_empty())
        }
        if let Some(data) = non_empty(base64) {
            return Ok(DocumentSource::Inline(data.to_string()));
        }
        if let Some(url) = non_empty(url) {
            return Ok(DocumentSource::Url(url.to_string()));
        }
        Err(DocParseError::MissingSource)
    }

    fn kind(&self) -> &'static str {
        match self {
            DocumentSource::Inline(_) => "base64",
            DocumentSource::Url(_) => "downloaded",
            DocumentSource::Bytes(_) => "uploaded",
        }
    }
}

/// Immutable document bytes plus the format inferred from the file name.
#[derive(Debug)]
pub struct RawDocument {
    bytes: Vec<u8>,
    format: DocumentFormat,
}

impl RawDocument {
    pub fn new(bytes: Vec<u8>, format: DocumentFormat) -> Self {
        Self { bytes, format }
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Obtain the document bytes for `source`.
///
/// # Errors
/// - [`DocParseError::Decode`] on malformed base64
/// - [`DocParseError::HttpStatus`], [`DocParseError::DownloadTimeout`],
///   [`DocParseError::TooManyRedirects`], [`DocParseError::Network`] on
///   download failures
/// - [`DocParseError::EmptyDocument`] when the result has zero bytes
pub async fn acquire(
    source: DocumentSource,
    client: &reqwest::Client,
    timeout: Duration,
) -> Result<Vec<u8>, DocParseError> {
    let kind = source.kind();
    let bytes = match source {
        DocumentSource::Inline(data) => decode_base64(&data)?,
        DocumentSource::Url(url) => download(&url, client, timeout).await?,
        DocumentSource::Bytes(bytes) => bytes,
    };
    if bytes.is_empty() {
        return Err(DocParseError::EmptyDocument { source_kind: kind });
    }
    Ok(bytes)
}

/// Decode inline document data.
///
/// Accepts a `data:` URI prefix and ignores embedded whitespace (line-wrapped
/// base64 from mail clients and shell pipelines).
pub fn decode_base64(data: &str) -> Result<Vec<u8>, DocParseError> {
    let payload = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD.decode(compact.as_bytes())?;
    debug!("Decoded {} bytes of inline document data", bytes.len());
    Ok(bytes)
}

/// Download a URL with a single GET bounded by `timeout`.
async fn download(
    url: &str,
    client: &reqwest::Client,
    timeout: Duration,
) -> Result<Vec<u8>, DocParseError> {
    info!("Downloading document from: {}", url);

    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| classify_transport_error(url, timeout, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DocParseError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| classify_transport_error(url, timeout, e))?;

    info!("Downloaded {} bytes from {}", bytes.len(), url);
    Ok(bytes.to_vec())
}

fn classify_transport_error(url: &str, timeout: Duration, e: reqwest::Error) -> DocParseError {
    if e.is_timeout() {
        DocParseError::DownloadTimeout {
            url: url.to_string(),
            secs: timeout.as_secs(),
        }
    } else if e.is_redirect() {
        DocParseError::TooManyRedirects {
            url: url.to_string(),
        }
    } else if let Some(status) = e.status() {
        DocParseError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        }
    } else {
        DocParseError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}
