use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use link::{SecureLinkCodec, dashboard_url};
use vidyarth_core::{ListResult, new_id};

use crate::directory::RecipientDirectory;
use crate::error::NotifyError;
use crate::mailer::Mailer;
use crate::model::{
    Dispatch, DispatchListQuery, DispatchStatus, EmailMessage, NotificationEvent,
    NotificationProperty, NotificationType, PropertyUpdate, Recipient, RecipientScope,
};
use crate::store::NotificationStore;
use crate::template::{RenderedLink, TemplateSet};

/// Maximum dispatches sent per due scan.
const DUE_BATCH: usize = 100;

/// Longest hold an administrator may configure: one year.
pub const MAX_DELAY_MINUTES: i64 = 525_600;

/// Turns notification events into emails.
///
/// Events are persisted as dispatches before anything is sent, so a restart
/// never loses a pending notification. Every send goes through a
/// PENDING -> SENDING claim, which at most one caller can win.
pub struct Dispatcher {
    store: Arc<NotificationStore>,
    directory: Arc<dyn RecipientDirectory>,
    mailer: Arc<dyn Mailer>,
    codec: Arc<SecureLinkCodec>,
    templates: TemplateSet,
    base_url: String,
}

impl Dispatcher {
    pub fn new(
        store: Arc<NotificationStore>,
        directory: Arc<dyn RecipientDirectory>,
        mailer: Arc<dyn Mailer>,
        codec: Arc<SecureLinkCodec>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            directory,
            mailer,
            codec,
            templates: TemplateSet::default(),
            base_url: base_url.into(),
        }
    }

    /// Replace the built-in templates.
    pub fn with_templates(mut self, templates: TemplateSet) -> Self {
        self.templates = templates;
        self
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    pub async fn create_notification(&self, event: NotificationEvent) -> Result<Dispatch, NotifyError> {
        self.create_at(event, Utc::now()).await
    }

    /// Record an event and, when its type has no delay, send it right away.
    ///
    /// With a delay, an event matching a dispatch that is still pending for
    /// the same type, subtype and target is merged into it and keeps the
    /// earlier due time.
    pub async fn create_at(
        &self,
        event: NotificationEvent,
        now: DateTime<Utc>,
    ) -> Result<Dispatch, NotifyError> {
        if event.subtype.trim().is_empty() {
            return Err(NotifyError::Validation("subtype must not be empty".into()));
        }
        if let Some(link) = event.links.iter().find(|l| l.section.trim().is_empty()) {
            return Err(NotifyError::Validation(format!(
                "link '{}' has no section",
                link.link_name
            )));
        }

        let prop = self.store.property(event.notification_type)?;

        if !prop.send_email {
            let mut dispatch = new_dispatch(event, now, now);
            dispatch.status = DispatchStatus::Suppressed;
            self.store.insert(&dispatch)?;
            info!(
                "{} notification {} suppressed: email disabled",
                dispatch.event.notification_type, dispatch.id
            );
            return Ok(dispatch);
        }

        if prop.only_for_target && event.target_id.is_none() {
            return Err(NotifyError::MissingTarget(
                event.notification_type.to_string(),
            ));
        }

        if prop.delay > 0 {
            if let Some(merged) = self.coalesce(&event)? {
                return Ok(merged);
            }
        }

        let due = Duration::try_minutes(prop.delay.max(0))
            .and_then(|delay| now.checked_add_signed(delay))
            .ok_or_else(|| {
                NotifyError::Validation(format!(
                    "{}: delay of {} minutes is out of range",
                    event.notification_type, prop.delay
                ))
            })?;
        let dispatch = new_dispatch(event, now, due);
        self.store.insert(&dispatch)?;
        debug!(
            "{} notification {} pending until {}",
            dispatch.event.notification_type, dispatch.id, dispatch.due_at
        );

        if prop.delay <= 0 {
            return self.deliver_at(&dispatch.id, now).await;
        }
        Ok(dispatch)
    }

    fn coalesce(&self, event: &NotificationEvent) -> Result<Option<Dispatch>, NotifyError> {
        let Some(mut existing) = self.store.find_pending(
            event.notification_type,
            &event.subtype,
            event.target_id,
        )?
        else {
            return Ok(None);
        };

        if !existing.event.absorb(event.clone()) {
            debug!(
                "{} notification not merged into {}: audiences differ",
                event.notification_type, existing.id
            );
            return Ok(None);
        }
        existing.coalesced += 1;
        if self.store.update_pending(&existing)? {
            info!(
                "{} notification merged into pending dispatch {} ({} merged)",
                event.notification_type, existing.id, existing.coalesced
            );
            Ok(Some(existing))
        } else {
            // Claimed by a sender in the meantime; start a fresh dispatch.
            Ok(None)
        }
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    pub async fn deliver(&self, id: &str) -> Result<Dispatch, NotifyError> {
        self.deliver_at(id, Utc::now()).await
    }

    /// Claim and send one dispatch. A dispatch that is no longer pending is
    /// returned unchanged.
    pub async fn deliver_at(&self, id: &str, now: DateTime<Utc>) -> Result<Dispatch, NotifyError> {
        if !self.store.claim(id, now)? {
            debug!("dispatch {id} already claimed");
            return self.store.get(id);
        }
        let mut dispatch = self.store.get(id)?;

        if let Err(e) = self.send(&mut dispatch).await {
            error!("dispatch {id} failed: {e}");
            dispatch.status = DispatchStatus::Failed;
            dispatch.error = Some(e.to_string());
        }
        dispatch.sent_at = Some(Utc::now().to_rfc3339());

        if !self.store.finish(&dispatch)? {
            warn!("dispatch {id} was finalised elsewhere");
            return self.store.get(id);
        }
        Ok(dispatch)
    }

    /// Resolve, render and mail. Sets the dispatch's final status.
    async fn send(&self, dispatch: &mut Dispatch) -> Result<(), NotifyError> {
        let event = &dispatch.event;

        // Settings may have changed while the dispatch waited.
        let prop = self.store.property(event.notification_type)?;
        if !prop.send_email {
            info!("dispatch {} suppressed at send time", dispatch.id);
            dispatch.status = DispatchStatus::Suppressed;
            return Ok(());
        }

        let recipients = self.recipients(&prop, event)?;
        let template = self
            .templates
            .get(event.notification_type, &event.subtype)
            .ok_or_else(|| {
                NotifyError::Validation(format!(
                    "no template for {} {}",
                    event.notification_type, event.subtype
                ))
            })?;

        let links = event
            .links
            .iter()
            .map(|l| {
                let token = self.codec.encode(&l.section, l.id)?;
                Ok(RenderedLink {
                    name: l.link_name.clone(),
                    url: dashboard_url(&self.base_url, &token),
                })
            })
            .collect::<Result<Vec<_>, NotifyError>>()?;

        let rendered = template.render(&event.variables, &links);
        if !rendered.unresolved.is_empty() {
            warn!(
                "dispatch {}: template variables not supplied: {:?}",
                dispatch.id, rendered.unresolved
            );
        }

        if recipients.is_empty() {
            info!("dispatch {} has no recipients", dispatch.id);
        }

        let mut last_error = None;
        for r in &recipients {
            let message = EmailMessage {
                to: r.email.clone(),
                subject: rendered.subject.clone(),
                brief: rendered.brief.clone(),
                html: rendered.html.clone(),
            };
            match self.mailer.send(&message).await {
                Ok(()) => dispatch.delivered += 1,
                Err(e) => {
                    warn!("dispatch {} to {} failed: {e}", dispatch.id, r.user_id);
                    dispatch.failed += 1;
                    last_error = Some(e.to_string());
                }
            }
        }

        if dispatch.delivered == 0 && dispatch.failed > 0 {
            dispatch.status = DispatchStatus::Failed;
        } else {
            dispatch.status = DispatchStatus::Sent;
        }
        dispatch.error = last_error;
        info!(
            "dispatch {} {}: {} delivered, {} failed",
            dispatch.id,
            dispatch.status.as_str(),
            dispatch.delivered,
            dispatch.failed
        );
        Ok(())
    }

    /// Audience for an event: the event's scope, narrowed to the target's
    /// members and to the property's role when configured.
    fn recipients(
        &self,
        prop: &NotificationProperty,
        event: &NotificationEvent,
    ) -> Result<Vec<Recipient>, NotifyError> {
        let mut audience = if prop.only_for_target {
            let target = event
                .target_id
                .ok_or_else(|| NotifyError::MissingTarget(event.notification_type.to_string()))?;
            self.directory
                .target_members(event.notification_type.target_kind(), target)?
        } else {
            self.directory.everyone()?
        };

        match &event.scope {
            RecipientScope::All => {}
            RecipientScope::Role { role } => audience.retain(|r| &r.role == role),
            RecipientScope::Users { ids } => {
                let ids: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
                audience.retain(|r| ids.contains(r.user_id.as_str()));
            }
        }
        if let Some(role) = &prop.role {
            audience.retain(|r| &r.role == role);
        }

        // One email per address.
        let mut seen = BTreeSet::new();
        audience.retain(|r| seen.insert(r.email.to_ascii_lowercase()));
        Ok(audience)
    }

    /// Send every pending dispatch whose due time has passed. A failing
    /// dispatch does not stop the batch.
    pub async fn deliver_due(&self, now: DateTime<Utc>) -> Result<u32, NotifyError> {
        let due = self.store.due(now, DUE_BATCH)?;
        let mut handled = 0;
        for dispatch in due {
            match self.deliver_at(&dispatch.id, now).await {
                Ok(d) if d.status.is_terminal() => handled += 1,
                Ok(_) => {}
                Err(e) => error!("deliver {}: {e}", dispatch.id),
            }
        }
        Ok(handled)
    }

    /// Fail dispatches stuck in SENDING for longer than `threshold_secs`.
    ///
    /// They are never returned to PENDING: some emails may already be out.
    pub fn check_stale(&self, threshold_secs: i64, now: DateTime<Utc>) -> Result<u32, NotifyError> {
        let cutoff = now - Duration::seconds(threshold_secs);
        let mut count = 0;
        for mut dispatch in self.store.stale_sending(cutoff)? {
            dispatch.status = DispatchStatus::Failed;
            dispatch.error = Some("interrupted while sending".into());
            if self.store.finish(&dispatch)? {
                warn!("dispatch {} interrupted while sending, marked failed", dispatch.id);
                count += 1;
            }
        }
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Settings and audit
    // -----------------------------------------------------------------------

    pub fn properties(&self) -> Result<Vec<NotificationProperty>, NotifyError> {
        self.store.properties()
    }

    pub fn property(&self, t: NotificationType) -> Result<NotificationProperty, NotifyError> {
        self.store.property(t)
    }

    /// Apply partial updates. All are validated before any is saved.
    pub fn update_properties(
        &self,
        updates: Vec<PropertyUpdate>,
    ) -> Result<Vec<NotificationProperty>, NotifyError> {
        let now = Utc::now().to_rfc3339();
        let mut changed = Vec::with_capacity(updates.len());
        for u in updates {
            let mut prop = self.store.property(u.notification_type)?;
            if let Some(v) = u.send_email {
                prop.send_email = v;
            }
            if let Some(v) = u.delay {
                if !(0..=MAX_DELAY_MINUTES).contains(&v) {
                    return Err(NotifyError::Validation(format!(
                        "{}: delay must be between 0 and {MAX_DELAY_MINUTES} minutes",
                        u.notification_type
                    )));
                }
                prop.delay = v;
            }
            if let Some(v) = u.only_for_target {
                prop.only_for_target = v;
            }
            if let Some(role) = u.role {
                prop.role = role.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
            }
            prop.updated_at = now.clone();
            changed.push(prop);
        }
        for prop in &changed {
            self.store.save_property(prop)?;
            info!(
                "notification settings for {} updated: send_email={} delay={} only_for_target={}",
                prop.notification_type, prop.send_email, prop.delay, prop.only_for_target
            );
        }
        self.store.properties()
    }

    pub fn get_dispatch(&self, id: &str) -> Result<Dispatch, NotifyError> {
        self.store.get(id)
    }

    pub fn list_dispatches(&self, query: &DispatchListQuery) -> Result<ListResult<Dispatch>, NotifyError> {
        self.store.list(query)
    }
}

fn new_dispatch(event: NotificationEvent, now: DateTime<Utc>, due: DateTime<Utc>) -> Dispatch {
    Dispatch {
        id: new_id(),
        event,
        status: DispatchStatus::Pending,
        created_at: now.to_rfc3339(),
        due_at: due.to_rfc3339(),
        sent_at: None,
        delivered: 0,
        failed: 0,
        coalesced: 0,
        error: None,
    }
}

/// Fire-and-forget entry point for request handlers.
///
/// Publishing never blocks and never fails the caller: if the queue is
/// full or the worker is gone, the event is logged and dropped.
#[derive(Clone)]
pub struct NotificationHandle {
    tx: mpsc::Sender<NotificationEvent>,
}

impl NotificationHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<NotificationEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn publish(&self, event: NotificationEvent) {
        let kind = event.notification_type;
        match self.tx.try_send(event) {
            Ok(()) => debug!("{kind} notification queued"),
            Err(e) => error!("{kind} notification dropped: {e}"),
        }
    }
}
