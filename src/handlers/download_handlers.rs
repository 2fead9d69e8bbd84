//! Serves presigned download links issued by the local backend.
//! Streams object bodies to avoid buffering in memory.

use crate::{errors::AppError, handlers::AppState, models::object::StoredObject};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

#[derive(Debug, Deserialize)]
pub struct PresignedQuery {
    pub expires: i64,
    pub signature: String,
}

/// `GET /download/{*key}?expires=&signature=`
pub async fn get_presigned(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<PresignedQuery>,
) -> Result<Response, AppError> {
    let (meta, file) = state
        .backend
        .open_presigned(&key, q.expires, &q.signature)
        .await?;
    tracing::debug!("serving presigned download of {}", meta.key);

    let body = Body::from_stream(ReaderStream::new(file));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

fn set_object_headers(headers: &mut HeaderMap, meta: &StoredObject) {
    let content_type = meta
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&meta.size_bytes.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    if let Some(etag) = meta.etag.as_ref() {
        let quoted = format!("\"{}\"", etag);
        if let Ok(value) = HeaderValue::from_str(&quoted) {
            headers.insert(header::ETAG, value);
        }
    }

    headers.insert(
        header::LAST_MODIFIED,
        HeaderValue::from_str(&meta.last_modified.to_rfc2822())
            .unwrap_or_else(|_| HeaderValue::from_static("")),
    );

    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(&meta.filename)
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
}
