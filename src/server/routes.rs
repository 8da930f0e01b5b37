//! Route handlers.
//!
//! The JSON endpoints always answer HTTP 200; the envelope's `success` field
//! carries the outcome. The legacy multipart endpoint answers 400 for input
//! errors.

use crate::convert::{Endpoint, ParseRequest};
use crate::error::{DocParseError, ErrorCategory};
use crate::output::ConversionResult;
use crate::server::state::AppState;
use axum::{
    extract::{
        multipart::{Multipart, MultipartRejection},
        rejection::JsonRejection,
        State,
    },
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::warn;

type JsonBody = Result<Json<ParseRequest>, JsonRejection>;

/// POST /parse_document/pdf
pub async fn parse_pdf(State(state): State<AppState>, body: JsonBody) -> Json<ConversionResult> {
    dispatch(&state, Endpoint::Pdf, body).await
}

/// POST /parse_document/pdfdocs
pub async fn parse_pdfdocs(State(state): State<AppState>, body: JsonBody) -> Json<ConversionResult> {
    dispatch(&state, Endpoint::PdfDocs, body).await
}

/// POST /parse_document/docs
pub async fn parse_docs(State(state): State<AppState>, body: JsonBody) -> Json<ConversionResult> {
    dispatch(&state, Endpoint::Docs, body).await
}

async fn dispatch(state: &AppState, endpoint: Endpoint, body: JsonBody) -> Json<ConversionResult> {
    match body {
        Ok(Json(request)) => Json(state.converter.handle(endpoint, request).await),
        Err(rejection) => {
            warn!(endpoint = endpoint.path(), "Malformed request body: {}", rejection.body_text());
            Json(ConversionResult::failure(&DocParseError::InvalidRequest(
                rejection.body_text(),
            )))
        }
    }
}

/// POST /parse_document (multipart: `file`, optional `parse_method`)
pub async fn parse_upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> (StatusCode, Json<ConversionResult>) {
    let outcome = match read_upload(multipart).await {
        Ok(upload) => {
            state
                .converter
                .parse_upload(&upload.file_name, upload.bytes, upload.parse_method.as_deref())
                .await
        }
        Err(e) => Err(e),
    };

    let status = match &outcome {
        Err(e) if e.category() == ErrorCategory::Input => StatusCode::BAD_REQUEST,
        _ => StatusCode::OK,
    };
    if let Err(e) = &outcome {
        warn!(status = status.as_u16(), "Upload conversion failed: {}", e);
    }
    (status, Json(ConversionResult::from_outcome(outcome)))
}

struct Upload {
    file_name: String,
    bytes: Vec<u8>,
    parse_method: Option<String>,
}

async fn read_upload(multipart: Result<Multipart, MultipartRejection>) -> Result<Upload, DocParseError> {
    let mut multipart = multipart.map_err(|e| DocParseError::InvalidRequest(e.body_text()))?;
    let invalid = |e: axum::extract::multipart::MultipartError| DocParseError::InvalidRequest(e.body_text());

    let mut file = None;
    let mut parse_method = None;
    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        match field.name().map(str::to_owned).as_deref() {
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_owned();
                let bytes = field.bytes().await.map_err(invalid)?;
                file = Some((name, bytes.to_vec()));
            }
            Some("parse_method") => parse_method = Some(field.text().await.map_err(invalid)?),
            _ => {}
        }
    }

    let (file_name, bytes) =
        file.ok_or_else(|| DocParseError::InvalidRequest("multipart field 'file' is required".into()))?;
    if file_name.trim().is_empty() {
        return Err(DocParseError::MissingFileName);
    }
    Ok(Upload {
        file_name,
        bytes,
        parse_method,
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub storage_enabled: bool,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage_enabled: state.converter.storage_enabled(),
    })
}
