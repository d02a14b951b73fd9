use std::time::Duration;

use thiserror::Error;
use tokio_postgres::error::SqlState;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database error: {}", describe_postgres(.0))]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Transaction exceeded its {0:?} timeout and was rolled back")]
    Timeout(Duration),

    #[error("Required tables are missing: {}", .0.join(", "))]
    SchemaMissing(Vec<String>),

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Failed to (de)serialize payload: {0}")]
    Serialization(#[from] serde_json::Error)
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Server errors keep their SQLSTATE, message and detail; client-side errors keep their cause.
fn describe_postgres(e: &tokio_postgres::Error) -> String {
    if let Some(db) = e.as_db_error() {
        let mut text = format!("{} {}: {}", db.severity(), db.code().code(), db.message());
        if let Some(detail) = db.detail() {
            text.push_str(&format!(" ({})", detail));
        }
        return text;
    }

    match std::error::Error::source(e) {
        Some(cause) => format!("{}: {}", e, cause),
        None => e.to_string()
    }
}

impl DbError {
    fn sql_state(&self) -> Option<&SqlState> {
        match self {
            DbError::Postgres(e) => e.code(),
            _ => None
        }
    }

    /// Errors worth retrying the whole unit for: timeouts, serialization failures and
    /// deadlocks, cancelled statements and dropped connections.
    pub fn is_transient(&self) -> bool {
        match self {
            DbError::Timeout(_) => true,
            DbError::Postgres(e) if e.is_closed() => true,
            DbError::Postgres(_) => self
                .sql_state()
                .map(|state| {
                    let code = state.code();
                    code.starts_with("40") || code.starts_with("08") || code == SqlState::QUERY_CANCELED.code()
                })
                .unwrap_or(false),
            _ => false
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        self.sql_state() == Some(&SqlState::UNIQUE_VIOLATION)
    }

    pub fn is_serialization_failure(&self) -> bool {
        self.sql_state() == Some(&SqlState::T_R_SERIALIZATION_FAILURE)
    }
}
