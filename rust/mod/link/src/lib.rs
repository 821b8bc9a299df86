//! Secure dashboard links.
//!
//! Emails and notifications deep-link into a dashboard section through an
//! `auth` query parameter instead of raw path identifiers. The parameter is
//! an authenticated-encryption token carrying a section key and record id.

pub mod api;
pub mod codec;
pub mod error;

use std::sync::Arc;

use axum::Router;

use vidyarth_core::Module;

pub use codec::{LinkTarget, SecureLinkCodec, dashboard_url, normalize_section_key};
pub use error::{DecodeError, INVALID_LINK_MESSAGE, LinkError};

/// Link module: exposes the token resolution endpoint.
pub struct LinkModule {
    codec: Arc<SecureLinkCodec>,
}

impl LinkModule {
    pub fn new(codec: Arc<SecureLinkCodec>) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> &Arc<SecureLinkCodec> {
        &self.codec
    }
}

impl Module for LinkModule {
    fn name(&self) -> &str {
        "link"
    }

    fn routes(&self) -> Router {
        api::routes(Arc::clone(&self.codec))
    }
}
