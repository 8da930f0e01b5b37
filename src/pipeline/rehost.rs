//! Image rehosting: upload locally-referenced images and point Markdown at them.
//!
//! The pipeline writes extracted images into the request workspace and
//! references them by absolute path. Those paths die with the workspace, so
//! before the response is assembled every distinct local image reference is
//! uploaded to object storage and replaced with a retrieval URL.
//!
//! This step is best-effort. Each asset is attempted independently; a missing
//! file is left alone, and an upload or URL failure is recorded in the
//! [`RehostReport`] and logged while the reference keeps its local path. The
//! request never fails here. Without configured storage the step is skipped.

use crate::config::StorageConfig;
use crate::error::RehostError;
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Builder as S3ConfigBuilder, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// `![alt](<path.ext>)` or `![alt](path.ext)` for common raster formats.
/// Group 1 is an angle-bracketed path, group 2 a bare one; either may hold spaces.
static RE_IMAGE_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)!\[[^\]]*\]\((?:<([^>\n]+?\.(?:jpg|jpeg|png|gif))>|([^)<>\n]+?\.(?:jpg|jpeg|png|gif)))\)",
    )
    .unwrap()
});

/// Blob storage that can hand out retrieval URLs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key`, overwriting any existing object.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), RehostError>;

    /// A URL from which `key` can be fetched.
    async fn url_for(&self, key: &str) -> Result<String, RehostError>;
}

/// S3-compatible object storage (AWS, R2, MinIO, ...).
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    url_expiry: Duration,
    public_base_url: Option<String>,
}

impl S3ObjectStore {
    pub fn new(config: &StorageConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "docparse-static",
        );
        let s3_config = S3ConfigBuilder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint_url)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            url_expiry: Duration::from_secs(config.url_expiry_secs),
            public_base_url: config.public_base_url.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), RehostError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| RehostError::Upload {
                key: key.to_string(),
                detail: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }

    async fn url_for(&self, key: &str) -> Result<String, RehostError> {
        if let Some(base) = &self.public_base_url {
            return Ok(format!("{base}/{key}"));
        }
        let presigning = PresigningConfig::expires_in(self.url_expiry).map_err(|e| RehostError::Url {
            key: key.to_string(),
            detail: e.to_string(),
        })?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| RehostError::Url {
                key: key.to_string(),
                detail: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(request.uri().to_string())
    }
}

/// Outcome of a rehosting pass.
#[derive(Debug, Clone, Default)]
pub struct RehostReport {
    pub markdown: String,
    /// Local path → URL for every asset that was rehosted.
    pub replaced: HashMap<String, String>,
    /// Per-asset failures; those references kept their local path.
    pub failures: Vec<RehostError>,
}

/// Distinct local image paths referenced by `markdown`, in order of first use.
pub fn local_image_refs(markdown: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    RE_IMAGE_REF
        .captures_iter(markdown)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)).map(|m| m.as_str()))
        .filter(|p| !is_remote(p))
        .filter(|p| seen.insert(p.to_string()))
        .map(str::to_string)
        .collect()
}

/// Link destination for `path`: wrapped in `<>` when it holds whitespace or parentheses.
pub fn link_target(path: &str) -> String {
    if path.contains(|c: char| c.is_whitespace() || c == '(' || c == ')') {
        format!("<{path}>")
    } else {
        path.to_string()
    }
}

/// Point every image link to `from`, bracketed or bare, at `to`.
pub fn replace_image_target(markdown: &str, from: &str, to: &str) -> String {
    let to = format!("]({})", link_target(to));
    markdown
        .replace(&format!("](<{from}>)"), &to)
        .replace(&format!("]({from})"), &to)
}

fn is_remote(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("data:")
}

fn content_type_for(path: &str) -> &'static str {
    match Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

/// Upload every existing local image in `markdown` and rewrite its references.
///
/// `store = None` returns the markdown unchanged.
pub async fn rehost_images(
    markdown: &str,
    store: Option<&dyn ObjectStore>,
    concurrency: usize,
) -> RehostReport {
    let Some(store) = store else {
        debug!("Object storage not configured; image paths left local");
        return RehostReport {
            markdown: markdown.to_string(),
            ..Default::default()
        };
    };

    let paths = local_image_refs(markdown);
    let outcomes: Vec<(String, Result<Option<String>, RehostError>)> = stream::iter(paths)
        .map(|path| async move {
            let outcome = rehost_one(store, &path).await;
            (path, outcome)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut report = RehostReport {
        markdown: markdown.to_string(),
        ..Default::default()
    };
    for (path, outcome) in outcomes {
        match outcome {
            Ok(Some(url)) => {
                report.markdown = replace_image_target(&report.markdown, &path, &url);
                report.replaced.insert(path, url);
            }
            Ok(None) => debug!("Image {} does not exist, reference kept", path),
            Err(e) => {
                warn!("Image rehosting failed, keeping local reference: {}", e);
                report.failures.push(e);
            }
        }
    }

    info!(
        "Rehosted {} image(s), {} failure(s)",
        report.replaced.len(),
        report.failures.len()
    );
    report
}

/// `Ok(None)` when the file is absent.
async fn rehost_one(store: &dyn ObjectStore, path: &str) -> Result<Option<String>, RehostError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(RehostError::Read {
                path: path.to_string(),
                detail: e.to_string(),
            })
        }
    };
    let key = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());

    store.put(&key, bytes, content_type_for(path)).await?;
    let url = store.url_for(&key).await?;
    debug!("Uploaded {} as {}", path, key);
    Ok(Some(url))
}
