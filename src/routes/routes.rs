//! Defines routes for the browsing API and presigned downloads.
//!
//! ## Structure
//! - **Browsing endpoints** (act on the shared session)
//!   - `GET    /api/listing`            folders and files at the cursor
//!   - `POST   /api/navigate/into`      enter a sub-folder
//!   - `POST   /api/navigate/up`        go to the parent folder
//!   - `PUT    /api/upload`             upload the request body
//!   - `GET    /api/upload/status`      poll the running upload
//!   - `POST   /api/folders`            create an empty folder
//!   - `GET    /api/download-url`       issue a presigned link
//!   - `DELETE /api/objects/{*key}`     delete an object
//!
//! - **Presigned downloads**
//!   - `GET    /download/{*key}`        serve a signed, unexpired link
//!
//! The wildcard `*key` allows nested keys like `uploads/2025/img.jpg`.

use crate::handlers::{
    AppState,
    browse_handlers::{
        create_folder, delete_object, download_url, get_listing, navigate_into, navigate_up,
        upload_file, upload_status,
    },
    download_handlers::get_presigned,
    health_handlers::{healthz, readyz},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
};

/// Uploads are buffered whole; cap them well above the 2 MiB default.
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Build and return the router.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // browsing
        .route("/api/listing", get(get_listing))
        .route("/api/navigate/into", post(navigate_into))
        .route("/api/navigate/up", post(navigate_up))
        .route(
            "/api/upload",
            put(upload_file).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/upload/status", get(upload_status))
        .route("/api/folders", post(create_folder))
        .route("/api/download-url", get(download_url))
        .route("/api/objects/{*key}", delete(delete_object))
        // presigned downloads
        .route("/download/{*key}", get(get_presigned))
}
