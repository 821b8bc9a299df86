use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::dispatcher::Dispatcher;
use crate::model::NotificationEvent;

/// Configuration for the background notification loops.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to send dispatches whose delay has elapsed (seconds).
    pub due_check_interval: u64,
    /// How often to look for dispatches stuck in SENDING (seconds).
    pub stale_check_interval: u64,
    /// A SENDING dispatch older than this many seconds is considered interrupted.
    pub stale_threshold: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            due_check_interval: 15,
            stale_check_interval: 60,
            stale_threshold: 600,
        }
    }
}

/// Start background loops.
///
/// - **Intake**: turns published events into dispatches.
/// - **Due scan**: sends PENDING dispatches whose delay has elapsed, including
///   those left over from before a restart.
/// - **Stale scan**: fails dispatches interrupted mid-send.
///
/// Returns a CancellationToken that stops the loops when cancelled.
pub fn start(
    dispatcher: Arc<Dispatcher>,
    mut events: mpsc::Receiver<NotificationEvent>,
    config: WorkerConfig,
) -> CancellationToken {
    let cancel = CancellationToken::new();

    // --- Intake ---
    {
        let dispatcher = Arc::clone(&dispatcher);
        let cancel = cancel.clone();

        tokio::spawn(async move {
            info!("notification intake started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("notification intake stopped");
                        break;
                    }
                    event = events.recv() => {
                        let Some(event) = event else {
                            info!("notification channel closed, intake stopped");
                            break;
                        };
                        let kind = event.notification_type;
                        match dispatcher.create_notification(event).await {
                            Ok(d) => debug!("{kind} event recorded as dispatch {} ({})", d.id, d.status.as_str()),
                            Err(e) => error!("{kind} notification not created: {e}"),
                        }
                    }
                }
            }
        });
    }

    // --- Due scan ---
    {
        let dispatcher = Arc::clone(&dispatcher);
        let cancel = cancel.clone();
        let interval = Duration::from_secs(config.due_check_interval);

        tokio::spawn(async move {
            info!("notification due scan started (interval={interval:?})");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("notification due scan stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        match dispatcher.deliver_due(Utc::now()).await {
                            Ok(0) => {}
                            Ok(n) => info!("due scan: handled {n} dispatches"),
                            Err(e) => error!("due scan error: {e}"),
                        }
                    }
                }
            }
        });
    }

    // --- Stale scan ---
    {
        let cancel = cancel.clone();
        let interval = Duration::from_secs(config.stale_check_interval);
        let threshold = config.stale_threshold;

        tokio::spawn(async move {
            info!(
                "notification stale scan started (interval={interval:?}, threshold={threshold}s)"
            );
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("notification stale scan stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        match dispatcher.check_stale(threshold, Utc::now()) {
                            Ok(0) => {}
                            Ok(n) => info!("stale scan: failed {n} interrupted dispatches"),
                            Err(e) => error!("stale scan error: {e}"),
                        }
                    }
                }
            }
        });
    }

    cancel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use crate::dispatcher::NotificationHandle;
    use crate::mailer::MemoryMailer;
    use crate::model::{DispatchListQuery, NotificationType};
    use crate::store::NotificationStore;
    use link::SecureLinkCodec;
    use vidyarth_sql::SqliteStore;

    #[tokio::test]
    async fn published_event_is_sent_by_worker() {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let store = Arc::new(NotificationStore::new(db).unwrap());
        let directory = InMemoryDirectory::new();
        directory.add_user("s1", "s1@campus.example", "student");
        let mailer = Arc::new(MemoryMailer::new());
        let dispatcher = Arc::new(Dispatcher::new(
            store,
            Arc::new(directory),
            mailer.clone(),
            Arc::new(SecureLinkCodec::new("worker-test").unwrap()),
            "https://portal.example.edu",
        ));

        let (handle, rx) = NotificationHandle::channel(8);
        let cancel = start(Arc::clone(&dispatcher), rx, WorkerConfig::default());

        handle.publish(
            NotificationEvent::new(NotificationType::Prep, "updated")
                .with_var("domain", "Data Science")
                .with_var("updated_at", "today"),
        );

        let mut delivered = false;
        for _ in 0..100 {
            if !mailer.sent().is_empty() {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();

        assert!(delivered);
        assert_eq!(
            mailer.sent()[0].subject,
            "Data Science Preparation Material Updated"
        );
        assert_eq!(
            dispatcher
                .list_dispatches(&DispatchListQuery::default())
                .unwrap()
                .total,
            1
        );
    }
}
