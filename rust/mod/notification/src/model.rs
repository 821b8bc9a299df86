use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of portal activity that can produce an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Shortlist,
    Company,
    Content,
    Prep,
    Custom,
}

impl NotificationType {
    pub const ALL: [NotificationType; 5] = [
        NotificationType::Shortlist,
        NotificationType::Company,
        NotificationType::Content,
        NotificationType::Prep,
        NotificationType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Shortlist => "SHORTLIST",
            NotificationType::Company => "COMPANY",
            NotificationType::Content => "CONTENT",
            NotificationType::Prep => "PREP",
            NotificationType::Custom => "CUSTOM",
        }
    }

    /// What this type's `target_id` refers to.
    pub fn target_kind(&self) -> TargetKind {
        match self {
            NotificationType::Shortlist | NotificationType::Company | NotificationType::Content => {
                TargetKind::Company
            }
            NotificationType::Prep => TargetKind::Domain,
            NotificationType::Custom => TargetKind::Announcement,
        }
    }
}

/// Namespace of event target ids. Member lists are kept per kind, so a
/// company and a prep domain with the same numeric id never share members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Company,
    Domain,
    Announcement,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Company => "company",
            TargetKind::Domain => "domain",
            TargetKind::Announcement => "announcement",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown notification type '{s}'"))
    }
}

/// A deep link to embed in the email, rendered through the secure link codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLink {
    /// Visible anchor text.
    pub link_name: String,
    /// Dashboard section key, e.g. "Company Videos".
    pub section: String,
    pub id: i64,
}

impl EventLink {
    pub fn new(link_name: impl Into<String>, section: impl Into<String>, id: i64) -> Self {
        Self {
            link_name: link_name.into(),
            section: section.into(),
            id,
        }
    }
}

/// Who an event is addressed to before property rules apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecipientScope {
    /// Every active user in the directory.
    #[default]
    All,
    /// Active users with this role.
    Role { role: String },
    /// An explicit list of user ids.
    Users { ids: Vec<String> },
}

impl RecipientScope {
    /// Smallest scope covering both audiences, if one exists.
    ///
    /// `All` absorbs anything and user lists are unioned. Two different
    /// roles, or a role and a user list, have no common scope.
    pub fn union(&self, other: &RecipientScope) -> Option<RecipientScope> {
        match (self, other) {
            (RecipientScope::All, _) | (_, RecipientScope::All) => Some(RecipientScope::All),
            (RecipientScope::Users { ids: a }, RecipientScope::Users { ids: b }) => {
                let mut ids = a.clone();
                for id in b {
                    if !ids.contains(id) {
                        ids.push(id.clone());
                    }
                }
                Some(RecipientScope::Users { ids })
            }
            (a, b) if a == b => Some(a.clone()),
            _ => None,
        }
    }
}

/// A notification request raised by a portal write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    /// Finer classification inside the type, e.g. "added" or "updated".
    pub subtype: String,
    /// The company, shortlist or other record the event is about.
    #[serde(default)]
    pub target_id: Option<i64>,
    #[serde(default)]
    pub links: Vec<EventLink>,
    /// Template variables. Callers supply every variable their template uses.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub scope: RecipientScope,
}

impl NotificationEvent {
    pub fn new(notification_type: NotificationType, subtype: impl Into<String>) -> Self {
        Self {
            notification_type,
            subtype: subtype.into(),
            target_id: None,
            links: Vec::new(),
            variables: BTreeMap::new(),
            scope: RecipientScope::All,
        }
    }

    pub fn with_target(mut self, target_id: i64) -> Self {
        self.target_id = Some(target_id);
        self
    }

    pub fn with_link(mut self, link: EventLink) -> Self {
        self.links.push(link);
        self
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_scope(mut self, scope: RecipientScope) -> Self {
        self.scope = scope;
        self
    }

    /// Fold a later event for the same notification into this one.
    ///
    /// Links are unioned in arrival order; later variable values win.
    ///
    /// Returns false, leaving `self` untouched, when the two audiences have
    /// no common scope.
    pub fn absorb(&mut self, later: NotificationEvent) -> bool {
        let Some(scope) = self.scope.union(&later.scope) else {
            return false;
        };
        for link in later.links {
            if !self.links.contains(&link) {
                self.links.push(link);
            }
        }
        self.variables.extend(later.variables);
        self.scope = scope;
        true
    }
}

/// Per-type delivery rules, editable by placement administrators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationProperty {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub send_email: bool,
    /// Minutes to hold a notification before sending; 0 sends immediately.
    pub delay: i64,
    /// Restrict recipients to users associated with the event's target.
    pub only_for_target: bool,
    /// Restrict recipients to one role.
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub updated_at: String,
}

impl NotificationProperty {
    /// Built-in settings used to seed storage: send immediately to the
    /// whole audience.
    pub fn default_for(notification_type: NotificationType) -> Self {
        Self {
            notification_type,
            send_email: true,
            delay: 0,
            only_for_target: false,
            role: None,
            updated_at: String::new(),
        }
    }
}

/// Request body for `PUT /api/email/props`.
#[derive(Debug, Clone, Deserialize)]
pub struct PropertyUpdate {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub send_email: Option<bool>,
    pub delay: Option<i64>,
    pub only_for_target: Option<bool>,
    /// `Some(None)` clears the role restriction.
    #[serde(default, with = "double_option")]
    pub role: Option<Option<String>>,
}

mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(d: D) -> Result<Option<Option<String>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(d).map(Some)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
    /// Waiting for its due time.
    Pending,
    /// Claimed by a sender.
    Sending,
    Sent,
    /// Email disabled for the type when the event arrived or was sent.
    Suppressed,
    Failed,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Pending => "PENDING",
            DispatchStatus::Sending => "SENDING",
            DispatchStatus::Sent => "SENT",
            DispatchStatus::Suppressed => "SUPPRESSED",
            DispatchStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DispatchStatus::Sent | DispatchStatus::Suppressed | DispatchStatus::Failed
        )
    }
}

impl FromStr for DispatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(DispatchStatus::Pending),
            "SENDING" => Ok(DispatchStatus::Sending),
            "SENT" => Ok(DispatchStatus::Sent),
            "SUPPRESSED" => Ok(DispatchStatus::Suppressed),
            "FAILED" => Ok(DispatchStatus::Failed),
            other => Err(format!("unknown dispatch status '{other}'")),
        }
    }
}

/// A persisted notification and its delivery outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispatch {
    pub id: String,
    pub event: NotificationEvent,
    pub status: DispatchStatus,
    pub created_at: String,
    /// When the dispatch becomes eligible for sending.
    pub due_at: String,
    #[serde(default)]
    pub sent_at: Option<String>,
    /// Emails accepted by the mailer.
    #[serde(default)]
    pub delivered: u32,
    /// Emails the mailer rejected.
    #[serde(default)]
    pub failed: u32,
    /// Later events merged into this dispatch while it was pending.
    #[serde(default)]
    pub coalesced: u32,
    #[serde(default)]
    pub error: Option<String>,
}

/// A resolved email recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub user_id: String,
    pub email: String,
    pub role: String,
}

/// One rendered email ready for the mailer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    /// Preview line shown by mail clients.
    pub brief: String,
    pub html: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatchListQuery {
    pub status: Option<DispatchStatus>,
    #[serde(rename = "type")]
    pub notification_type: Option<NotificationType>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}
