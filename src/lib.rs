//! Hierarchical object-storage gateway.
//!
//! Presents a flat object key space as virtual folders, uploads without
//! clobbering existing names, tracks upload progress, and hands out
//! presigned download URLs. Storage itself sits behind
//! [`services::gateway::StorageBackend`]; [`services::local_backend`] is a
//! self-hosted implementation.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
