use thiserror::Error;

#[derive(Error, Debug)]
pub enum SQLError {
    #[error("query error: {0}")]
    Query(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("connection error: {0}")]
    Connection(String),
}

impl SQLError {
    /// True when the failure was a UNIQUE / PRIMARY KEY violation.
    pub fn is_conflict(&self) -> bool {
        match self {
            SQLError::Execution(msg) => msg.contains("UNIQUE constraint"),
            _ => false,
        }
    }
}
