use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
};

use crate::AppState;
use crate::errors::{Error, Result};
use crate::extraction::{ExtractionRequest, ExtractionResult};
use crate::preprocess::DocumentKind;

const DEFAULT_TEMPLATE: &str = "default_invoice";

// POST /api/v1/process - run one document through the extraction pipeline
#[utoipa::path(
    post,
    path = "/api/v1/process",
    tag = "extraction",
    request_body(
        content_type = "multipart/form-data",
        description = "Form fields: `file` (required, JPEG/PNG/PDF), `buyer` \
                       (optional buyer name), `template` (optional template \
                       name, defaults to `default_invoice`)"
    ),
    responses(
        (status = 200, description = "Extraction outcome, including parse failures", body = ExtractionResult),
        (status = 400, description = "Malformed multipart payload"),
        (status = 404, description = "Unknown template"),
        (status = 413, description = "File exceeds the size limit"),
        (status = 415, description = "Unsupported file format"),
        (status = 422, description = "Document could not be decoded"),
        (status = 429, description = "Model backend rate limited the request"),
        (status = 502, description = "Model backend unavailable or failing"),
    )
)]
pub async fn process_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ExtractionResult>> {
    let mut upload: Option<(Vec<u8>, Option<String>, Option<String>)> = None;
    let mut buyer: Option<String> = None;
    let mut template: Option<String> = None;

    // A body that blows through the router's length cap surfaces as a
    // multipart read error; report it as the size violation it is so the
    // status matches the exact check in preprocessing
    let bad_multipart = |e: axum::extract::multipart::MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Error::SizeLimitExceeded {
                limit: state.extractor.max_file_size(),
            }
        } else {
            Error::BadRequest {
                message: format!("invalid multipart payload: {e}"),
            }
        }
    };

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        match field.name().unwrap_or_default() {
            "file" => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(bad_multipart)?.to_vec();
                upload = Some((bytes, content_type, filename));
            }
            "buyer" => buyer = Some(field.text().await.map_err(bad_multipart)?),
            "template" => template = Some(field.text().await.map_err(bad_multipart)?),
            other => {
                tracing::debug!(field = other, "Ignoring unknown multipart field");
            }
        }
    }

    let (bytes, content_type, filename) = upload.ok_or_else(|| Error::BadRequest {
        message: "missing 'file' field in multipart payload".to_string(),
    })?;
    let kind = DocumentKind::detect(content_type.as_deref(), filename.as_deref())?;

    let request = ExtractionRequest {
        bytes,
        kind,
        filename,
        buyer: buyer.filter(|b| !b.trim().is_empty()),
        template: template
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
    };

    let result = state.extractor.process(request).await?;
    Ok(Json(result))
}
