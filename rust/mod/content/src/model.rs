use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// A recruiting company listed in the directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    #[serde(default)]
    pub id: i64,
    /// Short handle, unique across companies.
    pub name: String,
    /// Display name used in emails, e.g. "ACME Corp".
    pub full_name: String,
    /// Hidden companies are only listed for managers.
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCompany {
    pub name: String,
    pub full_name: String,
    #[serde(default = "default_true")]
    pub visible: bool,
}

/// A company video (pitch, interview walkthrough, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    #[serde(default)]
    pub id: i64,
    pub company_id: i64,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateVideo {
    pub company_id: i64,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub is_featured: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoListQuery {
    pub company_id: Option<i64>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Fields a client may never set through an update.
pub const READ_ONLY_FIELDS: [&str; 4] = ["id", "created_by", "created_at", "updated_at"];
