use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr,
    FromQueryResult, JsonValue, Statement,
};
use serde_json::Value;
use std::path::Path;

use crate::endpoint::{QueryEndpoint, QueryVerb, Row};
use crate::error::{EngineError, EngineResult};

/// Endpoint executing statements on a local SQLite metadata store.
pub struct SqliteEndpoint {
    name: String,
    db: DatabaseConnection,
}

impl SqliteEndpoint {
    pub async fn open(path: &Path) -> EngineResult<Self> {
        let url = format!("sqlite://{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url).await
    }

    /// Private in-memory store; one connection so every statement sees the same database.
    pub async fn memory() -> EngineResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn connect(url: &str) -> EngineResult<Self> {
        let mut opt = ConnectOptions::new(url.to_owned());
        opt.max_connections(1).min_connections(1).sqlx_logging(false);
        let db = Database::connect(opt).await?;
        log::info!("sqlite store at {}", url);
        Ok(Self {
            name: url.to_owned(),
            db,
        })
    }

    /// Runs a batch of statements separated by `;`, e.g. a schema script.
    pub async fn execute_script(&self, script: &str) -> EngineResult<()> {
        self.db
            .execute_unprepared(script)
            .await
            .map_err(|e| backend_error(e, script))?;
        Ok(())
    }
}

fn backend_error(e: DbErr, sql: &str) -> EngineError {
    EngineError::Backend {
        message: e.to_string(),
        sql: sql.to_owned(),
    }
}

#[async_trait::async_trait]
impl QueryEndpoint for SqliteEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, verb: QueryVerb, sql: &str) -> EngineResult<Vec<Row>> {
        let stmt = Statement::from_string(DatabaseBackend::Sqlite, sql.to_owned());
        log::debug!("{} {}", verb, sql);
        if verb.is_mutation() {
            let res = self
                .db
                .execute(stmt)
                .await
                .map_err(|e| backend_error(e, sql))?;
            log::debug!("{} rows affected", res.rows_affected());
            return Ok(Vec::new());
        }

        let rows = JsonValue::find_by_statement(stmt)
            .all(&self.db)
            .await
            .map_err(|e| backend_error(e, sql))?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(row) => Some(row),
                _ => None,
            })
            .collect())
    }
}
