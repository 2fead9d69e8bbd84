//! Gateway core and the backends behind it.

pub mod browser;
pub mod gateway;
pub mod local_backend;
pub mod name_resolver;
pub mod navigation;
pub mod path_model;
pub mod upload_session;

#[cfg(test)]
pub(crate) mod testing;
