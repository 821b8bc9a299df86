//! Recipient lookup.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use vidyarth_sql::{Row, SQLStore};

use crate::error::NotifyError;
use crate::model::{Recipient, TargetKind};

/// Source of email recipients.
pub trait RecipientDirectory: Send + Sync {
    /// Every active user with an email address.
    fn everyone(&self) -> Result<Vec<Recipient>, NotifyError>;

    /// Users directly associated with a target, e.g. students who
    /// shortlisted or follow a company.
    fn target_members(
        &self,
        kind: TargetKind,
        target_id: i64,
    ) -> Result<Vec<Recipient>, NotifyError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id      TEXT PRIMARY KEY,
    email   TEXT NOT NULL,
    role    TEXT NOT NULL,
    active  INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS target_members (
    kind       TEXT NOT NULL,
    target_id  INTEGER NOT NULL,
    user_id    TEXT NOT NULL,
    PRIMARY KEY (kind, target_id, user_id)
);
CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
";

/// Directory backed by the `users` and `target_members` tables.
pub struct SqlDirectory {
    db: Arc<dyn SQLStore>,
}

impl SqlDirectory {
    pub fn new(db: Arc<dyn SQLStore>) -> Result<Self, NotifyError> {
        db.exec_batch(SCHEMA)
            .map_err(|e| NotifyError::Storage(format!("directory schema init: {e}")))?;
        Ok(Self { db })
    }

    pub fn upsert_user(&self, user: &Recipient, active: bool) -> Result<(), NotifyError> {
        self.db.exec(
            "INSERT INTO users (id, email, role, active) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(id) DO UPDATE SET email = excluded.email, role = excluded.role, \
             active = excluded.active",
            &[
                user.user_id.clone().into(),
                user.email.clone().into(),
                user.role.clone().into(),
                active.into(),
            ],
        )?;
        Ok(())
    }

    pub fn add_member(
        &self,
        kind: TargetKind,
        target_id: i64,
        user_id: &str,
    ) -> Result<(), NotifyError> {
        self.db.exec(
            "INSERT OR IGNORE INTO target_members (kind, target_id, user_id) VALUES (?1, ?2, ?3)",
            &[kind.as_str().into(), target_id.into(), user_id.into()],
        )?;
        Ok(())
    }
}

impl RecipientDirectory for SqlDirectory {
    fn everyone(&self) -> Result<Vec<Recipient>, NotifyError> {
        let rows = self.db.query(
            "SELECT id, email, role FROM users WHERE active = 1 AND email <> '' ORDER BY id",
            &[],
        )?;
        rows.iter().map(row_to_recipient).collect()
    }

    fn target_members(
        &self,
        kind: TargetKind,
        target_id: i64,
    ) -> Result<Vec<Recipient>, NotifyError> {
        let rows = self.db.query(
            "SELECT u.id, u.email, u.role FROM users u \
             JOIN target_members m ON m.user_id = u.id \
             WHERE m.kind = ?1 AND m.target_id = ?2 AND u.active = 1 AND u.email <> '' \
             ORDER BY u.id",
            &[kind.as_str().into(), target_id.into()],
        )?;
        rows.iter().map(row_to_recipient).collect()
    }
}

fn row_to_recipient(row: &Row) -> Result<Recipient, NotifyError> {
    let field = |name: &str| {
        row.get_str(name)
            .map(str::to_string)
            .ok_or_else(|| NotifyError::Directory(format!("user row missing {name}")))
    };
    Ok(Recipient {
        user_id: field("id")?,
        email: field("email")?,
        role: field("role")?,
    })
}

/// In-process directory, for tests and fixtures.
#[derive(Default)]
pub struct InMemoryDirectory {
    users: RwLock<BTreeMap<String, Recipient>>,
    members: RwLock<BTreeMap<(TargetKind, i64), BTreeSet<String>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user_id: &str, email: &str, role: &str) {
        if let Ok(mut users) = self.users.write() {
            users.insert(
                user_id.to_string(),
                Recipient {
                    user_id: user_id.to_string(),
                    email: email.to_string(),
                    role: role.to_string(),
                },
            );
        }
    }

    pub fn add_member(&self, kind: TargetKind, target_id: i64, user_id: &str) {
        if let Ok(mut members) = self.members.write() {
            members
                .entry((kind, target_id))
                .or_default()
                .insert(user_id.to_string());
        }
    }
}

impl RecipientDirectory for InMemoryDirectory {
    fn everyone(&self) -> Result<Vec<Recipient>, NotifyError> {
        let users = self
            .users
            .read()
            .map_err(|e| NotifyError::Directory(e.to_string()))?;
        Ok(users.values().cloned().collect())
    }

    fn target_members(
        &self,
        kind: TargetKind,
        target_id: i64,
    ) -> Result<Vec<Recipient>, NotifyError> {
        let users = self
            .users
            .read()
            .map_err(|e| NotifyError::Directory(e.to_string()))?;
        let members = self
            .members
            .read()
            .map_err(|e| NotifyError::Directory(e.to_string()))?;
        Ok(members
            .get(&(kind, target_id))
            .into_iter()
            .flatten()
            .filter_map(|id| users.get(id).cloned())
            .collect())
    }
}
