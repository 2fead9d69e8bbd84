//! JSON handlers behind the browsing UI.
//!
//! Every route acts on the shared [`BrowserSession`](crate::services::browser::BrowserSession):
//! listing the cursor's folder, moving the cursor, uploading, polling the
//! upload, and issuing download links.

use crate::{
    errors::AppError,
    handlers::AppState,
    models::{DirectoryPath, StorageEntry},
    services::upload_session::UploadSession,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ListingResponse {
    pub path: DirectoryPath,
    pub at_root: bool,
    pub breadcrumbs: Vec<String>,
    pub entries: Vec<StorageEntry>,
}

#[derive(Debug, Serialize)]
pub struct PathResponse {
    pub path: DirectoryPath,
}

#[derive(Debug, Deserialize)]
pub struct EnterFolderReq {
    pub folder: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateFolderReq {
    pub name: String,
}

/// Query params for `PUT /api/upload`.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Basename of the selected file.
    pub name: String,
    /// Sub-folder of the current directory; empty means the directory itself.
    #[serde(default)]
    pub folder: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct DownloadUrlQuery {
    pub key: String,
    pub ttl: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct DownloadUrlResponse {
    pub key: String,
    pub url: String,
}

/// `GET /api/listing`: folders and files at the cursor.
pub async fn get_listing(State(state): State<AppState>) -> Result<Json<ListingResponse>, AppError> {
    let listing = state.session.listing().await?;
    let navigation = state.session.navigation();
    Ok(Json(ListingResponse {
        path: navigation.current().clone(),
        at_root: navigation.is_at_root(),
        breadcrumbs: navigation
            .breadcrumbs()
            .into_iter()
            .map(str::to_string)
            .collect(),
        entries: listing.entries().collect(),
    }))
}

/// `POST /api/navigate/into`
pub async fn navigate_into(
    State(state): State<AppState>,
    Json(req): Json<EnterFolderReq>,
) -> Result<Json<PathResponse>, AppError> {
    let path = state.session.enter(&req.folder)?;
    Ok(Json(PathResponse { path }))
}

/// `POST /api/navigate/up`
pub async fn navigate_up(State(state): State<AppState>) -> Json<PathResponse> {
    Json(PathResponse {
        path: state.session.up(),
    })
}

/// `PUT /api/upload?name=&folder=`: the raw request body is the file.
pub async fn upload_file(
    State(state): State<AppState>,
    Query(q): Query<UploadQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let key = state.session.upload(&q.name, &q.folder, body).await?;
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            key: key.to_string(),
        }),
    ))
}

/// `GET /api/upload/status`: current upload, or `null` when idle.
pub async fn upload_status(State(state): State<AppState>) -> Json<Option<UploadSession>> {
    Json(state.session.upload_status())
}

/// `POST /api/folders`: create an empty folder under the cursor.
pub async fn create_folder(
    State(state): State<AppState>,
    Json(req): Json<CreateFolderReq>,
) -> Result<impl IntoResponse, AppError> {
    let path = state.session.create_folder(&req.name).await?;
    Ok((StatusCode::CREATED, Json(PathResponse { path })))
}

/// `GET /api/download-url?key=&ttl=`
pub async fn download_url(
    State(state): State<AppState>,
    Query(q): Query<DownloadUrlQuery>,
) -> Result<Json<DownloadUrlResponse>, AppError> {
    let url = state.session.download_url(&q.key, q.ttl).await?;
    Ok(Json(DownloadUrlResponse { key: q.key, url }))
}

/// `DELETE /api/objects/{*key}`
pub async fn delete_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    state.session.delete(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}
