//! Email notifications for portal activity.
//!
//! Handlers publish a [`NotificationEvent`] through a [`NotificationHandle`]
//! and return immediately. A background worker records each event as a
//! dispatch, applies the per-type [`NotificationProperty`] (email on/off,
//! delay, target-only and role restrictions), renders the type's template
//! and mails every recipient.

pub mod api;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod mailer;
pub mod model;
pub mod store;
pub mod template;
pub mod worker;

use std::sync::Arc;

use axum::Router;
use tokio_util::sync::CancellationToken;

use access::AccessControl;
use link::SecureLinkCodec;
use vidyarth_core::Module;

pub use api::{MANAGE_ANNOUNCEMENTS, default_permissions};
pub use directory::{InMemoryDirectory, RecipientDirectory, SqlDirectory};
pub use dispatcher::{Dispatcher, MAX_DELAY_MINUTES, NotificationHandle};
pub use error::NotifyError;
pub use mailer::{HttpMailer, LogMailer, MailError, Mailer, MemoryMailer};
pub use model::{
    Dispatch, DispatchStatus, EventLink, NotificationEvent, NotificationProperty,
    NotificationType, RecipientScope, TargetKind,
};
pub use store::NotificationStore;
pub use worker::WorkerConfig;

/// Runtime settings for the module.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// Public portal URL used in email links.
    pub base_url: String,
    /// Events buffered between handlers and the intake loop.
    pub queue_capacity: usize,
    pub worker: WorkerConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            queue_capacity: 1024,
            worker: WorkerConfig::default(),
        }
    }
}

/// The notification module: dispatcher, background worker and settings API.
pub struct NotificationModule {
    dispatcher: Arc<Dispatcher>,
    handle: NotificationHandle,
    access: Arc<AccessControl>,
    worker_cancel: CancellationToken,
}

impl NotificationModule {
    /// Initialise storage and start the background worker.
    pub fn new(
        store: Arc<NotificationStore>,
        directory: Arc<dyn RecipientDirectory>,
        mailer: Arc<dyn Mailer>,
        codec: Arc<SecureLinkCodec>,
        access: Arc<AccessControl>,
        config: NotificationConfig,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            store,
            directory,
            mailer,
            codec,
            config.base_url,
        ));
        let (handle, rx) = NotificationHandle::channel(config.queue_capacity);
        let worker_cancel = worker::start(Arc::clone(&dispatcher), rx, config.worker);

        Self {
            dispatcher,
            handle,
            access,
            worker_cancel,
        }
    }

    /// Publisher for request handlers.
    pub fn handle(&self) -> NotificationHandle {
        self.handle.clone()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

}

impl Drop for NotificationModule {
    fn drop(&mut self) {
        self.worker_cancel.cancel();
    }
}

impl Module for NotificationModule {
    fn name(&self) -> &str {
        "notification"
    }

    fn routes(&self) -> Router {
        api::router(Arc::clone(&self.dispatcher), Arc::clone(&self.access))
    }

    /// Stop the background loops.
    fn shutdown(&self) {
        self.worker_cancel.cancel();
    }
}
