//! HTTP handlers and the state they share.

pub mod browse_handlers;
pub mod download_handlers;
pub mod health_handlers;

use crate::services::{browser::BrowserSession, local_backend::LocalBackend};

/// Shared router state.
#[derive(Clone)]
pub struct AppState {
    /// The browsing session every `/api` route acts on.
    pub session: BrowserSession,
    /// Serves presigned downloads and readiness checks.
    pub backend: LocalBackend,
}
