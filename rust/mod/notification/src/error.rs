use thiserror::Error;

use vidyarth_core::ServiceError;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation: {0}")]
    Validation(String),

    /// The property restricts delivery to the target, but the event has none.
    #[error("{0} notification requires a target")]
    MissingTarget(String),

    #[error("link: {0}")]
    Link(String),

    #[error("directory: {0}")]
    Directory(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl From<vidyarth_sql::SQLError> for NotifyError {
    fn from(e: vidyarth_sql::SQLError) -> Self {
        NotifyError::Storage(e.to_string())
    }
}

impl From<link::LinkError> for NotifyError {
    fn from(e: link::LinkError) -> Self {
        NotifyError::Link(e.to_string())
    }
}

impl From<NotifyError> for ServiceError {
    fn from(e: NotifyError) -> Self {
        match e {
            NotifyError::NotFound(m) => ServiceError::NotFound(m),
            NotifyError::Validation(m) => ServiceError::Validation(m),
            e @ NotifyError::MissingTarget(_) => ServiceError::Validation(e.to_string()),
            NotifyError::Storage(m) => ServiceError::Storage(m),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}
