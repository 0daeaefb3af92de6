use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::error::EngineResult;

/// One result row, column name to JSON value.
pub type Row = Map<String, Value>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QueryVerb {
    Select,
    Insert,
    Update,
    Delete,
}

impl QueryVerb {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, QueryVerb::Select)
    }
}

/// Executes literal SQL on behalf of the engine.
///
/// Implementations return the rows of a select, and whatever rows the backend reports (usually none)
/// for mutations. A backend-reported failure must come back as [`crate::EngineError::Backend`]
/// carrying the statement text.
#[async_trait::async_trait]
pub trait QueryEndpoint: Send + Sync {
    fn name(&self) -> &str;
    async fn query(&self, verb: QueryVerb, sql: &str) -> EngineResult<Vec<Row>>;

    async fn select(&self, sql: &str) -> EngineResult<Vec<Row>> {
        self.query(QueryVerb::Select, sql).await
    }
}

/// Reads a column as text; numbers and booleans are rendered, null and containers are absent.
pub fn column_text(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
