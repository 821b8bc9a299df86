use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use access::Filter;
use vidyarth_core::{ListResult, ServiceError};
use vidyarth_sql::{Row, SQLError, SQLStore, Value};

use crate::model::{Company, Video};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS companies (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    data        TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS videos (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id  INTEGER NOT NULL,
    data        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_videos_company ON videos(company_id);
";

/// Persistent storage for companies and videos.
///
/// Each row keeps the full record as JSON in `data`, so access filters can
/// address any field through `json_extract`.
pub struct ContentStore {
    db: Arc<dyn SQLStore>,
}

impl ContentStore {
    pub fn new(db: Arc<dyn SQLStore>) -> Result<Self, ServiceError> {
        db.exec_batch(SCHEMA)
            .map_err(|e| ServiceError::Storage(format!("content schema init: {e}")))?;
        Ok(Self { db })
    }

    // -----------------------------------------------------------------------
    // Companies
    // -----------------------------------------------------------------------

    pub fn create_company(&self, company: &Company) -> Result<Company, ServiceError> {
        let id = self
            .db
            .insert(
                "INSERT INTO companies (name, data) VALUES (?1, ?2)",
                &[company.name.clone().into(), to_json(company)?.into()],
            )
            .map_err(|e| conflict(e, format!("company '{}'", company.name)))?;

        let mut created = company.clone();
        created.id = id;
        self.update_company(&created)?;
        Ok(created)
    }

    pub fn get_company(&self, id: i64) -> Result<Company, ServiceError> {
        self.get("companies", id)?
            .ok_or_else(|| ServiceError::NotFound(format!("company {id}")))
    }

    pub fn update_company(&self, company: &Company) -> Result<(), ServiceError> {
        let affected = self
            .db
            .exec(
                "UPDATE companies SET name = ?1, data = ?2 WHERE id = ?3",
                &[
                    company.name.clone().into(),
                    to_json(company)?.into(),
                    company.id.into(),
                ],
            )
            .map_err(|e| conflict(e, format!("company '{}'", company.name)))?;
        if affected == 0 {
            return Err(ServiceError::NotFound(format!("company {}", company.id)));
        }
        Ok(())
    }

    /// Delete a company together with its videos.
    pub fn delete_company(&self, id: i64) -> Result<(), ServiceError> {
        self.db
            .exec("DELETE FROM videos WHERE company_id = ?1", &[id.into()])
            .map_err(storage)?;
        let affected = self
            .db
            .exec("DELETE FROM companies WHERE id = ?1", &[id.into()])
            .map_err(storage)?;
        if affected == 0 {
            return Err(ServiceError::NotFound(format!("company {id}")));
        }
        Ok(())
    }

    pub fn list_companies(
        &self,
        filter: &Filter,
        limit: usize,
        offset: usize,
    ) -> Result<ListResult<Company>, ServiceError> {
        self.list("companies", filter, Vec::new(), limit, offset)
    }

    // -----------------------------------------------------------------------
    // Videos
    // -----------------------------------------------------------------------

    pub fn create_video(&self, video: &Video) -> Result<Video, ServiceError> {
        let id = self
            .db
            .insert(
                "INSERT INTO videos (company_id, data) VALUES (?1, ?2)",
                &[video.company_id.into(), to_json(video)?.into()],
            )
            .map_err(storage)?;

        let mut created = video.clone();
        created.id = id;
        self.update_video(&created)?;
        Ok(created)
    }

    pub fn get_video(&self, id: i64) -> Result<Video, ServiceError> {
        self.get("videos", id)?
            .ok_or_else(|| ServiceError::NotFound(format!("video {id}")))
    }

    pub fn update_video(&self, video: &Video) -> Result<(), ServiceError> {
        let affected = self
            .db
            .exec(
                "UPDATE videos SET company_id = ?1, data = ?2 WHERE id = ?3",
                &[video.company_id.into(), to_json(video)?.into(), video.id.into()],
            )
            .map_err(storage)?;
        if affected == 0 {
            return Err(ServiceError::NotFound(format!("video {}", video.id)));
        }
        Ok(())
    }

    pub fn delete_video(&self, id: i64) -> Result<(), ServiceError> {
        let affected = self
            .db
            .exec("DELETE FROM videos WHERE id = ?1", &[id.into()])
            .map_err(storage)?;
        if affected == 0 {
            return Err(ServiceError::NotFound(format!("video {id}")));
        }
        Ok(())
    }

    pub fn list_videos(
        &self,
        filter: &Filter,
        company_id: Option<i64>,
        limit: usize,
        offset: usize,
    ) -> Result<ListResult<Video>, ServiceError> {
        let extra = company_id
            .map(|c| vec![("company_id", Value::Integer(c))])
            .unwrap_or_default();
        self.list("videos", filter, extra, limit, offset)
    }

    // -----------------------------------------------------------------------
    // Shared
    // -----------------------------------------------------------------------

    fn get<T: DeserializeOwned>(&self, table: &str, id: i64) -> Result<Option<T>, ServiceError> {
        let rows = self
            .db
            .query(&format!("SELECT data FROM {table} WHERE id = ?1"), &[id.into()])
            .map_err(storage)?;
        rows.first().map(from_row).transpose()
    }

    /// List rows matching the access filter plus indexed column equalities.
    fn list<T: DeserializeOwned + Serialize>(
        &self,
        table: &str,
        filter: &Filter,
        columns: Vec<(&str, Value)>,
        limit: usize,
        offset: usize,
    ) -> Result<ListResult<T>, ServiceError> {
        let mut where_clauses: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        for (column, value) in columns {
            params.push(value);
            where_clauses.push(format!("{column} = ?{}", params.len()));
        }
        let (clauses, values) = filter.sql_clauses("data", params.len() + 1);
        where_clauses.extend(clauses);
        params.extend(values);

        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        let count_rows = self
            .db
            .query(&format!("SELECT COUNT(*) AS cnt FROM {table} {where_sql}"), &params)
            .map_err(storage)?;
        let total = count_rows
            .first()
            .and_then(|r| r.get_i64("cnt"))
            .unwrap_or(0) as usize;

        let idx = params.len() + 1;
        let sql = format!(
            "SELECT data FROM {table} {where_sql} ORDER BY id ASC LIMIT ?{} OFFSET ?{}",
            idx,
            idx + 1
        );
        params.push((limit as i64).into());
        params.push((offset as i64).into());

        let rows = self.db.query(&sql, &params).map_err(storage)?;
        let items = rows.iter().map(from_row).collect::<Result<Vec<T>, _>>()?;
        Ok(ListResult { items, total })
    }
}

fn from_row<T: DeserializeOwned>(row: &Row) -> Result<T, ServiceError> {
    let data = row
        .get_str("data")
        .ok_or_else(|| ServiceError::Storage("missing data column".into()))?;
    serde_json::from_str(data).map_err(|e| ServiceError::Storage(format!("corrupt row: {e}")))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, ServiceError> {
    serde_json::to_string(value).map_err(|e| ServiceError::Internal(e.to_string()))
}

fn storage(e: SQLError) -> ServiceError {
    ServiceError::Storage(e.to_string())
}

fn conflict(e: SQLError, what: String) -> ServiceError {
    if e.is_conflict() {
        ServiceError::Conflict(format!("{what} already exists"))
    } else {
        storage(e)
    }
}
