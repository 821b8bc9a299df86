//! Shared building blocks for the Vidyarth placement portal services.

pub mod caller;
pub mod config;
pub mod error;
pub mod module;
pub mod types;

pub use caller::Caller;
pub use config::ServiceConfig;
pub use error::ServiceError;
pub use module::{Module, shutdown_all};
pub use types::{ListParams, ListResult, MAX_PAGE_SIZE, merge_patch, new_id, now_rfc3339};
