//! Company directory and company videos.
//!
//! Every route is access-guarded; list queries merge the granted filter and
//! single-record reads hide records outside it. Creating a company and
//! featuring a video publish notification events.

pub mod api;
pub mod model;
pub mod store;

use std::sync::Arc;

use axum::Router;

use access::AccessControl;
use notification::NotificationHandle;
use vidyarth_core::Module;

pub use api::{ContentState, VIDEOS_SECTION, default_permissions};
pub use model::{Company, Video};
pub use store::ContentStore;

pub struct ContentModule {
    state: Arc<ContentState>,
    access: Arc<AccessControl>,
}

impl ContentModule {
    pub fn new(
        store: Arc<ContentStore>,
        notifier: NotificationHandle,
        access: Arc<AccessControl>,
    ) -> Self {
        Self {
            state: Arc::new(ContentState { store, notifier }),
            access,
        }
    }

    pub fn store(&self) -> &Arc<ContentStore> {
        &self.state.store
    }
}

impl Module for ContentModule {
    fn name(&self) -> &str {
        "content"
    }

    fn routes(&self) -> Router {
        api::router(Arc::clone(&self.state), Arc::clone(&self.access))
    }
}
