use axum::{
    body::Body,
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::IDENTITY_HEADER;
use crate::error::{Result, ShareError};
use crate::identity;
use crate::models::{ExpiryPolicy, ShareSummary};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyFile {
    file_hash: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyFileResponse {
    exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_id: Option<Uuid>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    id: Uuid,
    file_name: String,
    file_size: u64,
    uploaded_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShare {
    file_id: String,
    expiry_type: ExpiryPolicy,
}

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    version: &'static str,
}

fn identity_token(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(IDENTITY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(ShareError::MissingIdentity)
}

fn upload_error(err: MultipartError, limit: usize) -> ShareError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ShareError::ContentTooLarge { limit }
    } else {
        ShareError::InvalidContent(format!("malformed upload: {}", err.body_text()))
    }
}

fn looks_like_json(file_name: &str) -> bool {
    mime_guess::from_path(file_name)
        .iter()
        .any(|mime| mime == mime_guess::mime::APPLICATION_JSON)
}

pub async fn health() -> Json<Health> {
    Json(Health {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn verify_file(
    State(state): State<AppState>,
    Json(request): Json<VerifyFile>,
) -> Result<Json<VerifyFileResponse>> {
    let existing = state.contents.find_by_hash(&request.file_hash).await?;
    Ok(Json(VerifyFileResponse {
        exists: existing.is_some(),
        file_id: existing.map(|content| content.id),
    }))
}

pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let token = identity_token(&headers)?;
    identity::resolve(&state.conn, token).await?;

    let limit = state.contents.max_bytes();
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut declared_hash: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| upload_error(e, limit))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ShareError::InvalidContent("file has no name".to_string()))?;
                let data = field.bytes().await.map_err(|e| upload_error(e, limit))?;
                file = Some((file_name, data.to_vec()));
            }
            Some("fileHash") => {
                let hash = field.text().await.map_err(|e| upload_error(e, limit))?;
                declared_hash = Some(hash).filter(|h| !h.trim().is_empty());
            }
            _ => {}
        }
    }

    let (file_name, data) =
        file.ok_or_else(|| ShareError::InvalidContent("no file uploaded".to_string()))?;

    if !looks_like_json(&file_name) {
        return Err(ShareError::InvalidContent(
            "file must have a .json name".to_string(),
        ));
    }

    let content = state
        .contents
        .ingest(&data, &file_name, declared_hash.as_deref())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadedFile {
            id: content.id,
            file_name: content.display_name,
            file_size: content.size_bytes,
            uploaded_at: content.created_at,
        }),
    ))
}

pub async fn create_share(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateShare>,
) -> Result<impl IntoResponse> {
    let token = identity_token(&headers)?;
    let content_id = Uuid::parse_str(&request.file_id).map_err(|_| ShareError::ContentNotFound)?;

    let share = state
        .shares
        .create_share(token, content_id, request.expiry_type)
        .await?;
    let content = state
        .contents
        .find_by_id(share.content_id)
        .await?
        .ok_or(ShareError::ContentNotFound)?;

    Ok((
        StatusCode::CREATED,
        Json(ShareSummary::new(&share, content.display_name)),
    ))
}

pub async fn list_shares(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ShareSummary>>> {
    let token = identity_token(&headers)?;
    let shares = state.shares.list_for_owner(token).await?;
    Ok(Json(shares))
}

pub async fn delete_share(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(share_id): Path<String>,
) -> Result<StatusCode> {
    let token = identity_token(&headers)?;
    state.shares.revoke(token, &share_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Streams the shared document. Once the body starts, a read failure ends
/// the connection instead of producing an error response.
pub async fn get_share(
    State(state): State<AppState>,
    Path(share_code): Path<String>,
) -> Result<Response> {
    let stream = state.delivery.open_stream(&share_code).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from_stream(stream))
        .map_err(|e| ShareError::Io(std::io::Error::other(e)))
}

pub async fn download_share(
    State(state): State<AppState>,
    Path(share_code): Path<String>,
) -> Result<Response> {
    let attachment = state.delivery.attachment(&share_code).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        urlencoding::encode(&attachment.file_name)
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CONTENT_LENGTH, attachment.bytes.len())
        .body(Body::from(attachment.bytes))
        .map_err(|e| ShareError::Io(std::io::Error::other(e)))
}
