use std::sync::Arc;
use thiserror::Error;

use crate::endpoint::QueryVerb;

/// Cheap to clone; foreign errors are shared behind `Arc`.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("{0}")]
    Internal(Arc<anyhow::Error>),
    #[error(transparent)]
    Serde(Arc<serde_json::Error>),
    #[error("Request error: {0}")]
    Request(#[source] Arc<reqwest::Error>),
    #[error("Database error: {0}")]
    Db(#[source] Arc<sea_orm::DbErr>),
    /// The endpoint answered with an error envelope.
    #[error("{message}\nquery: {sql}")]
    Backend { message: String, sql: String },
    #[error("HTTP {status} on /query/{verb}\nquery: {sql}")]
    Status {
        status: u16,
        verb: QueryVerb,
        sql: String,
    },
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("Incomplete select fragment: {0}")]
    IncompleteFragment(&'static str),
    #[error("Form has no {0} template")]
    MissingTemplate(&'static str),
    #[error("{err}\n{context}")]
    WithContext {
        context: String,
        #[source]
        err: Arc<EngineError>,
    },
}

impl EngineError {
    pub fn context(self, context: impl Into<String>) -> Self {
        EngineError::WithContext {
            context: context.into(),
            err: Arc::new(self),
        }
    }

    /// Literal statement that failed, when the error came from executing one.
    pub fn sql(&self) -> Option<&str> {
        match self {
            EngineError::Backend { sql, .. } | EngineError::Status { sql, .. } => Some(sql),
            EngineError::WithContext { err, .. } => err.sql(),
            _ => None,
        }
    }

    /// Human readable message without the attached statement.
    pub fn message(&self) -> String {
        match self {
            EngineError::Backend { message, .. } => message.clone(),
            EngineError::Status { status, verb, .. } => format!("HTTP {} on /query/{}", status, verb),
            EngineError::WithContext { err, .. } => err.message(),
            e => e.to_string(),
        }
    }
}

macro_rules! shared_from {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for EngineError {
                fn from(e: $ty) -> Self {
                    EngineError::$variant(Arc::new(e))
                }
            }
        )*
    };
}

shared_from! {
    Internal => anyhow::Error,
    Serde => serde_json::Error,
    Request => reqwest::Error,
    Db => sea_orm::DbErr,
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_keeps_sql() {
        let err = EngineError::Backend {
            message: "Unknown column 'x'".to_string(),
            sql: "SELECT x FROM t".to_string(),
        };
        assert_eq!(err.sql(), Some("SELECT x FROM t"));
        assert_eq!(err.message(), "Unknown column 'x'");
        assert_eq!(err.to_string(), "Unknown column 'x'\nquery: SELECT x FROM t");
    }

    #[test]
    fn test_context_forwards_sql() {
        let err = EngineError::Backend {
            message: "boom".to_string(),
            sql: "DELETE FROM t".to_string(),
        }
        .context("while deleting row 5");
        assert_eq!(err.sql(), Some("DELETE FROM t"));
        assert_eq!(err.message(), "boom");
        assert!(err.to_string().ends_with("while deleting row 5"));
    }

    #[test]
    fn test_clone_keeps_source() {
        let err: EngineError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        let copy = err.clone();
        assert!(matches!(copy, EngineError::Serde(_)));
        assert_eq!(copy.to_string(), err.to_string());
    }
}
