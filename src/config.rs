//! Configuration types for the document conversion service.
//!
//! All service behaviour is controlled through [`ServiceConfig`], built once
//! at process start via its [`ServiceConfigBuilder`] and then shared
//! read-only (behind an `Arc`) by every request. Nothing in the crate reads
//! deployment settings from global state after startup.

use crate::error::DocParseError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the conversion service.
///
/// # Example
/// ```rust
/// use edgequake_docparse::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .port(9010)
///     .converter_program("soffice")
///     .pipeline_timeout_secs(300)
///     .build()
///     .unwrap();
/// assert!(config.storage.is_none());
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Interface the HTTP server binds to. Default: `0.0.0.0`.
    pub host: String,

    /// HTTP port. Default: 9010.
    pub port: u16,

    /// Attach a permissive CORS layer. Default: true.
    pub enable_cors: bool,

    /// When set, `/parse_document/*` requires `Authorization: Bearer <key>`.
    pub api_key: Option<String>,

    /// Headless office binary used for office-to-PDF conversion. Default: `soffice`.
    pub converter_program: String,

    /// OCR binary used by the built-in pipeline. Default: `tesseract`.
    pub ocr_program: String,

    /// OCR language passed as `-l`. Default: `eng`.
    pub ocr_language: String,

    /// Timeout for URL downloads in seconds. Default: 60.
    pub download_timeout_secs: u64,

    /// Timeout for a single office-to-PDF subprocess in seconds. Default: 180.
    ///
    /// On expiry the subprocess is killed.
    pub conversion_timeout_secs: u64,

    /// Timeout for the parsing pipeline in seconds. Default: 600.
    pub pipeline_timeout_secs: u64,

    /// Timeout for the whole `/docs` office flow in seconds. Default: 300.
    pub office_timeout_secs: u64,

    /// Concurrent image uploads per request. Default: 4.
    pub upload_concurrency: usize,

    /// Maximum accepted request body in bytes. Default: 100 MiB.
    ///
    /// Base64 inflates documents by a third, so this must be well above the
    /// largest document the service is expected to handle.
    pub max_body_bytes: usize,

    /// Parent directory for request workspaces. `None` uses the system temp dir.
    pub work_dir: Option<PathBuf>,

    /// Object storage for image rehosting. `None` disables rehosting.
    pub storage: Option<StorageConfig>,

    /// Observer for pipeline stage events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9010,
            enable_cors: true,
            api_key: None,
            converter_program: "soffice".to_string(),
            ocr_program: "tesseract".to_string(),
            ocr_language: "eng".to_string(),
            download_timeout_secs: 60,
            conversion_timeout_secs: 180,
            pipeline_timeout_secs: 600,
            office_timeout_secs: 300,
            upload_concurrency: 4,
            max_body_bytes: 100 * 1024 * 1024,
            work_dir: None,
            storage: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("enable_cors", &self.enable_cors)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("converter_program", &self.converter_program)
            .field("ocr_program", &self.ocr_program)
            .field("ocr_language", &self.ocr_language)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("conversion_timeout_secs", &self.conversion_timeout_secs)
            .field("pipeline_timeout_secs", &self.pipeline_timeout_secs)
            .field("office_timeout_secs", &self.office_timeout_secs)
            .field("upload_concurrency", &self.upload_concurrency)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("work_dir", &self.work_dir)
            .field("storage", &self.storage)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline_timeout_secs)
    }

    pub fn office_timeout(&self) -> Duration {
        Duration::from_secs(self.office_timeout_secs)
    }

    /// `host:port` for the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn enable_cors(mut self, v: bool) -> Self {
        self.config.enable_cors = v;
        self
    }

    /// Require this key on conversion endpoints. Empty strings disable auth.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.config.api_key = (!key.is_empty()).then_some(key);
        self
    }

    pub fn converter_program(mut self, program: impl Into<String>) -> Self {
        self.config.converter_program = program.into();
        self
    }

    pub fn ocr_program(mut self, program: impl Into<String>) -> Self {
        self.config.ocr_program = program.into();
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn conversion_timeout_secs(mut self, secs: u64) -> Self {
        self.config.conversion_timeout_secs = secs;
        self
    }

    pub fn pipeline_timeout_secs(mut self, secs: u64) -> Self {
        self.config.pipeline_timeout_secs = secs;
        self
    }

    pub fn office_timeout_secs(mut self, secs: u64) -> Self {
        self.config.office_timeout_secs = secs;
        self
    }

    pub fn upload_concurrency(mut self, n: usize) -> Self {
        self.config.upload_concurrency = n.max(1);
        self
    }

    pub fn max_body_bytes(mut self, n: usize) -> Self {
        self.config.max_body_bytes = n;
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = Some(dir.into());
        self
    }

    pub fn storage(mut self, storage: Option<StorageConfig>) -> Self {
        self.config.storage = storage;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, DocParseError> {
        let c = &self.config;
        let timeouts = [
            ("download", c.download_timeout_secs),
            ("conversion", c.conversion_timeout_secs),
            ("pipeline", c.pipeline_timeout_secs),
            ("office", c.office_timeout_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(DocParseError::InvalidConfig(format!(
                "{name} timeout must be at least 1 second"
            )));
        }
        if c.converter_program.trim().is_empty() {
            return Err(DocParseError::InvalidConfig(
                "converter program must not be empty".into(),
            ));
        }
        if c.max_body_bytes < 1024 {
            return Err(DocParseError::InvalidConfig(format!(
                "max body size must be at least 1 KiB, got {} bytes",
                c.max_body_bytes
            )));
        }
        Ok(self.config)
    }
}

// ── Object storage ───────────────────────────────────────────────────────

/// Credentials and location of the bucket extracted images are rehosted to.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub access_key: String,
    pub secret_key: String,
    /// S3-compatible endpoint, e.g. `https://s3.example.com`.
    pub endpoint_url: String,
    pub bucket: String,
    /// Signing region. Default: `auto`.
    pub region: String,
    /// Lifetime of presigned URLs in seconds. Default: 7 days (the SigV4 maximum).
    pub url_expiry_secs: u64,
    /// When set, URLs are `{public_base_url}/{key}` and never expire.
    pub public_base_url: Option<String>,
}

impl StorageConfig {
    pub const DEFAULT_REGION: &'static str = "auto";
    pub const DEFAULT_URL_EXPIRY_SECS: u64 = 7 * 24 * 3600;

    /// Assemble a storage config from optional parts.
    ///
    /// Returns `None` when any of access key, secret key, endpoint or bucket
    /// is missing or blank; rehosting is then disabled.
    pub fn from_parts(
        access_key: Option<String>,
        secret_key: Option<String>,
        endpoint_url: Option<String>,
        bucket: Option<String>,
    ) -> Option<Self> {
        let present = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Some(Self {
            access_key: present(access_key)?,
            secret_key: present(secret_key)?,
            endpoint_url: present(endpoint_url)?,
            bucket: present(bucket)?,
            region: Self::DEFAULT_REGION.to_string(),
            url_expiry_secs: Self::DEFAULT_URL_EXPIRY_SECS,
            public_base_url: None,
        })
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        let region = region.into();
        if !region.trim().is_empty() {
            self.region = region;
        }
        self
    }

    pub fn with_url_expiry_secs(mut self, secs: u64) -> Self {
        self.url_expiry_secs = secs.clamp(1, Self::DEFAULT_URL_EXPIRY_SECS);
        self
    }

    pub fn with_public_base_url(mut self, base: impl Into<String>) -> Self {
        let base = base.into();
        let base = base.trim().trim_end_matches('/');
        self.public_base_url = (!base.is_empty()).then(|| base.to_string());
        self
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("endpoint_url", &self.endpoint_url)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("url_expiry_secs", &self.url_expiry_secs)
            .field("public_base_url", &self.public_base_url)
            .finish()
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Parse strategy requested by the caller.
///
/// | Method | Behaviour |
/// |--------|-----------|
/// | `auto` | classify the document, then OCR scanned documents and read the text layer of digital ones (default) |
/// | `ocr`  | force OCR extraction |
/// | `txt`  | force text-layer extraction, never OCR |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMethod {
    #[default]
    Auto,
    Ocr,
    Txt,
}

impl ParseMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseMethod::Auto => "auto",
            ParseMethod::Ocr => "ocr",
            ParseMethod::Txt => "txt",
        }
    }

    /// Resolve an optional request field; absent or blank means `auto`.
    pub fn from_request(method: Option<&str>) -> Result<Self, DocParseError> {
        match method.map(str::trim) {
            None | Some("") => Ok(ParseMethod::Auto),
            Some(m) => m.parse(),
        }
    }
}

impl FromStr for ParseMethod {
    type Err = DocParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ParseMethod::Auto),
            "ocr" => Ok(ParseMethod::Ocr),
            "txt" => Ok(ParseMethod::Txt),
            other => Err(DocParseError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl fmt::Display for ParseMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let c = ServiceConfig::default();
        assert_eq!(c.port, 9010);
        assert_eq!(c.download_timeout_secs, 60);
        assert_eq!(c.office_timeout_secs, 300);
        assert!(c.enable_cors);
        assert!(c.storage.is_none());
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        let err = ServiceConfig::builder()
            .pipeline_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("pipeline"), "got: {err}");
    }

    #[test]
    fn empty_api_key_disables_auth() {
        let c = ServiceConfig::builder().api_key("").build().unwrap();
        assert!(c.api_key.is_none());
        let c = ServiceConfig::builder().api_key("s3cret").build().unwrap();
        assert_eq!(c.api_key.as_deref(), Some("s3cret"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let storage = StorageConfig::from_parts(
            Some("ak".into()),
            Some("very-secret".into()),
            Some("https://s3.local".into()),
            Some("docs".into()),
        );
        let c = ServiceConfig::builder()
            .api_key("api-secret")
            .storage(storage)
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("very-secret"));
        assert!(!dbg.contains("api-secret"));
    }

    #[test]
    fn storage_requires_every_part() {
        let full = StorageConfig::from_parts(
            Some("ak".into()),
            Some("sk".into()),
            Some("https://s3.local".into()),
            Some("bucket".into()),
        );
        assert!(full.is_some());
        assert_eq!(full.unwrap().region, "auto");

        let missing_bucket = StorageConfig::from_parts(
            Some("ak".into()),
            Some("sk".into()),
            Some("https://s3.local".into()),
            None,
        );
        assert!(missing_bucket.is_none());

        let blank_key = StorageConfig::from_parts(
            Some("  ".into()),
            Some("sk".into()),
            Some("https://s3.local".into()),
            Some("bucket".into()),
        );
        assert!(blank_key.is_none());
    }

    #[test]
    fn public_base_url_is_trimmed() {
        let s = StorageConfig::from_parts(
            Some("ak".into()),
            Some("sk".into()),
            Some("https://s3.local".into()),
            Some("bucket".into()),
        )
        .unwrap()
        .with_public_base_url("https://cdn.example.com/img/");
        assert_eq!(s.public_base_url.as_deref(), Some("https://cdn.example.com/img"));
    }

    #[test]
    fn parse_method_from_request() {
        assert_eq!(ParseMethod::from_request(None).unwrap(), ParseMethod::Auto);
        assert_eq!(ParseMethod::from_request(Some("")).unwrap(), ParseMethod::Auto);
        assert_eq!(ParseMethod::from_request(Some("txt")).unwrap(), ParseMethod::Txt);
        assert_eq!(ParseMethod::from_request(Some("ocr")).unwrap(), ParseMethod::Ocr);
        let err = ParseMethod::from_request(Some("vision")).unwrap_err();
        assert!(matches!(err, DocParseError::UnsupportedMethod(ref m) if m == "vision"));
    }
}
