use std::sync::Arc;

use chrono::{DateTime, Utc};

use vidyarth_core::{ListResult, MAX_PAGE_SIZE};
use vidyarth_sql::{Row, SQLStore, Value};

use crate::error::NotifyError;
use crate::model::{
    Dispatch, DispatchListQuery, DispatchStatus, NotificationProperty, NotificationType,
};

/// `status`, `due_ms` and `claimed_ms` are authoritative; the JSON in `data`
/// carries everything else.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS notification_props (
    type        TEXT PRIMARY KEY,
    data        TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS notification_dispatches (
    id          TEXT PRIMARY KEY,
    data        TEXT NOT NULL,
    type        TEXT NOT NULL,
    subtype     TEXT NOT NULL,
    target_id   INTEGER,
    status      TEXT NOT NULL,
    due_ms      INTEGER NOT NULL,
    claimed_ms  INTEGER,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_dispatch_due ON notification_dispatches(status, due_ms);
CREATE INDEX IF NOT EXISTS idx_dispatch_key ON notification_dispatches(type, subtype, target_id, status);
";

/// Persistent storage for notification properties and dispatches.
pub struct NotificationStore {
    db: Arc<dyn SQLStore>,
}

impl NotificationStore {
    /// Create the store, initialise the schema and seed missing properties.
    pub fn new(db: Arc<dyn SQLStore>) -> Result<Self, NotifyError> {
        db.exec_batch(SCHEMA)
            .map_err(|e| NotifyError::Storage(format!("notification schema init: {e}")))?;
        let store = Self { db };
        store.seed_defaults()?;
        Ok(store)
    }

    fn seed_defaults(&self) -> Result<(), NotifyError> {
        let now = Utc::now().to_rfc3339();
        for t in NotificationType::ALL {
            let mut prop = NotificationProperty::default_for(t);
            prop.updated_at = now.clone();
            self.db.exec(
                "INSERT OR IGNORE INTO notification_props (type, data, updated_at) \
                 VALUES (?1, ?2, ?3)",
                &[t.as_str().into(), to_json(&prop)?.into(), now.clone().into()],
            )?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    pub fn property(&self, t: NotificationType) -> Result<NotificationProperty, NotifyError> {
        let rows = self.db.query(
            "SELECT data FROM notification_props WHERE type = ?1",
            &[t.as_str().into()],
        )?;
        match rows.first() {
            Some(row) => from_json(row.get_str("data")),
            None => Ok(NotificationProperty::default_for(t)),
        }
    }

    pub fn properties(&self) -> Result<Vec<NotificationProperty>, NotifyError> {
        let rows = self
            .db
            .query("SELECT data FROM notification_props ORDER BY type", &[])?;
        rows.iter().map(|r| from_json(r.get_str("data"))).collect()
    }

    pub fn save_property(&self, prop: &NotificationProperty) -> Result<(), NotifyError> {
        self.db.exec(
            "INSERT INTO notification_props (type, data, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(type) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            &[
                prop.notification_type.as_str().into(),
                to_json(prop)?.into(),
                prop.updated_at.clone().into(),
            ],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Dispatches
    // -----------------------------------------------------------------------

    pub fn insert(&self, dispatch: &Dispatch) -> Result<(), NotifyError> {
        let due_ms = millis(&dispatch.due_at)?;
        self.db.exec(
            "INSERT INTO notification_dispatches \
             (id, data, type, subtype, target_id, status, due_ms, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            &[
                dispatch.id.clone().into(),
                to_json(dispatch)?.into(),
                dispatch.event.notification_type.as_str().into(),
                dispatch.event.subtype.clone().into(),
                dispatch.event.target_id.into(),
                dispatch.status.as_str().into(),
                due_ms.into(),
                dispatch.created_at.clone().into(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Dispatch, NotifyError> {
        let rows = self.db.query(
            "SELECT data, status FROM notification_dispatches WHERE id = ?1",
            &[id.into()],
        )?;
        let row = rows
            .first()
            .ok_or_else(|| NotifyError::NotFound(format!("dispatch {id}")))?;
        row_to_dispatch(row)
    }

    /// The oldest still-pending dispatch for the same notification key.
    pub fn find_pending(
        &self,
        t: NotificationType,
        subtype: &str,
        target_id: Option<i64>,
    ) -> Result<Option<Dispatch>, NotifyError> {
        let rows = self.db.query(
            "SELECT data, status FROM notification_dispatches \
             WHERE type = ?1 AND subtype = ?2 AND target_id IS ?3 AND status = 'PENDING' \
             ORDER BY due_ms ASC LIMIT 1",
            &[t.as_str().into(), subtype.into(), target_id.into()],
        )?;
        rows.first().map(row_to_dispatch).transpose()
    }

    /// Rewrite a dispatch's payload only while it is still PENDING.
    /// Returns false if a sender claimed it first.
    pub fn update_pending(&self, dispatch: &Dispatch) -> Result<bool, NotifyError> {
        let affected = self.db.exec(
            "UPDATE notification_dispatches SET data = ?1 WHERE id = ?2 AND status = 'PENDING'",
            &[to_json(dispatch)?.into(), dispatch.id.clone().into()],
        )?;
        Ok(affected > 0)
    }

    /// Claim a dispatch for sending: PENDING -> SENDING (CAS).
    /// Returns false if it was not pending.
    pub fn claim(&self, id: &str, now: DateTime<Utc>) -> Result<bool, NotifyError> {
        let affected = self.db.exec(
            "UPDATE notification_dispatches SET status = 'SENDING', claimed_ms = ?2 \
             WHERE id = ?1 AND status = 'PENDING'",
            &[id.into(), now.timestamp_millis().into()],
        )?;
        Ok(affected > 0)
    }

    /// Record the outcome of a claimed dispatch: SENDING -> terminal (CAS).
    pub fn finish(&self, dispatch: &Dispatch) -> Result<bool, NotifyError> {
        if !dispatch.status.is_terminal() {
            return Err(NotifyError::Internal(format!(
                "dispatch {} cannot finish as {}",
                dispatch.id,
                dispatch.status.as_str()
            )));
        }
        let affected = self.db.exec(
            "UPDATE notification_dispatches SET data = ?1, status = ?2 \
             WHERE id = ?3 AND status = 'SENDING'",
            &[
                to_json(dispatch)?.into(),
                dispatch.status.as_str().into(),
                dispatch.id.clone().into(),
            ],
        )?;
        Ok(affected > 0)
    }

    /// Pending dispatches whose due time has passed, oldest first.
    pub fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Dispatch>, NotifyError> {
        let rows = self.db.query(
            "SELECT data, status FROM notification_dispatches \
             WHERE status = 'PENDING' AND due_ms <= ?1 ORDER BY due_ms ASC LIMIT ?2",
            &[now.timestamp_millis().into(), (limit as i64).into()],
        )?;
        rows.iter().map(row_to_dispatch).collect()
    }

    /// Dispatches claimed before `cutoff` that never finished.
    pub fn stale_sending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Dispatch>, NotifyError> {
        let rows = self.db.query(
            "SELECT data, status FROM notification_dispatches \
             WHERE status = 'SENDING' AND claimed_ms < ?1",
            &[cutoff.timestamp_millis().into()],
        )?;
        rows.iter().map(row_to_dispatch).collect()
    }

    pub fn list(&self, query: &DispatchListQuery) -> Result<ListResult<Dispatch>, NotifyError> {
        let limit = query.limit.unwrap_or(50).clamp(1, MAX_PAGE_SIZE);
        let offset = query.offset.unwrap_or(0);

        let mut where_clauses: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();
        let mut idx = 1;

        if let Some(status) = query.status {
            where_clauses.push(format!("status = ?{idx}"));
            params.push(status.as_str().into());
            idx += 1;
        }
        if let Some(t) = query.notification_type {
            where_clauses.push(format!("type = ?{idx}"));
            params.push(t.as_str().into());
            idx += 1;
        }

        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        let count_rows = self.db.query(
            &format!("SELECT COUNT(*) AS cnt FROM notification_dispatches {where_sql}"),
            &params,
        )?;
        let total = count_rows
            .first()
            .and_then(|r| r.get_i64("cnt"))
            .unwrap_or(0) as usize;

        let sql = format!(
            "SELECT data, status FROM notification_dispatches {where_sql} \
             ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
            idx,
            idx + 1
        );
        params.push((limit as i64).into());
        params.push((offset as i64).into());

        let rows = self.db.query(&sql, &params)?;
        let items = rows
            .iter()
            .map(row_to_dispatch)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ListResult { items, total })
    }
}

fn row_to_dispatch(row: &Row) -> Result<Dispatch, NotifyError> {
    let mut dispatch: Dispatch = from_json(row.get_str("data"))?;
    if let Some(status) = row.get_str("status") {
        dispatch.status = status.parse().map_err(NotifyError::Storage)?;
    }
    Ok(dispatch)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, NotifyError> {
    serde_json::to_string(value).map_err(|e| NotifyError::Internal(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(data: Option<&str>) -> Result<T, NotifyError> {
    let data = data.ok_or_else(|| NotifyError::Storage("missing data column".into()))?;
    serde_json::from_str(data).map_err(|e| NotifyError::Storage(format!("corrupt row: {e}")))
}

fn millis(ts: &str) -> Result<i64, NotifyError> {
    vidyarth_core::types::parse_rfc3339(ts)
        .map(|t| t.timestamp_millis())
        .ok_or_else(|| NotifyError::Internal(format!("bad timestamp '{ts}'")))
}
