pub use reqwest::Client as HttpClient;
pub use reqwest::ClientBuilder as HttpClientBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::endpoint::{QueryEndpoint, QueryVerb, Row};
use crate::error::{EngineError, EngineResult};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Session credentials sent along with every statement.
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    pub token: Option<String>,
    pub u_hash: Option<String>,
}

#[derive(Serialize)]
struct QueryBody<'a> {
    sql: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    u_hash: Option<&'a str>,
}

#[derive(Deserialize, Debug, Default)]
struct Envelope {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Endpoint posting statements to `<base>/query/<verb>`.
pub struct HttpEndpoint {
    base: String,
    client: HttpClient,
    credentials: Credentials,
}

impl HttpEndpoint {
    pub fn new(base: &str, credentials: Credentials, timeout: Duration) -> EngineResult<Self> {
        let client = HttpClientBuilder::new().timeout(timeout).build()?;
        Ok(Self::with_client(base, credentials, client))
    }

    pub fn with_client(base: &str, credentials: Credentials, client: HttpClient) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            client,
            credentials,
        }
    }

    pub fn url(&self, verb: QueryVerb) -> String {
        format!("{}/query/{}", self.base, verb)
    }
}

/// Turns a response body into rows, or the error the backend reported.
fn decode_envelope(verb: QueryVerb, sql: &str, status: u16, body: &[u8]) -> EngineResult<Vec<Row>> {
    let envelope: Option<Envelope> = serde_json::from_slice(body).ok();

    if let Some(Envelope {
        status: Some(s),
        message,
        ..
    }) = &envelope
    {
        if s.eq_ignore_ascii_case("error") {
            return Err(EngineError::Backend {
                message: message.clone().unwrap_or_else(|| "Unknown error".to_string()),
                sql: sql.to_string(),
            });
        }
    }
    if !(200..300).contains(&status) {
        return Err(EngineError::Status {
            status,
            verb,
            sql: sql.to_string(),
        });
    }

    let data = match envelope {
        Some(e) => e.data,
        None => {
            if verb.is_mutation() {
                return Ok(Vec::new());
            }
            serde_json::from_slice::<Envelope>(body)?.data
        }
    };
    match data {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(row) => Some(row),
                _ => None,
            })
            .collect()),
        _ => Ok(Vec::new()),
    }
}

#[async_trait::async_trait]
impl QueryEndpoint for HttpEndpoint {
    fn name(&self) -> &str {
        &self.base
    }

    async fn query(&self, verb: QueryVerb, sql: &str) -> EngineResult<Vec<Row>> {
        let body = QueryBody {
            sql,
            token: self.credentials.token.as_deref(),
            u_hash: self.credentials.u_hash.as_deref(),
        };
        log::debug!("{} {}", verb, sql);
        let rsp = self.client.post(self.url(verb)).json(&body).send().await?;
        let status = rsp.status().as_u16();
        let bytes = rsp.bytes().await?;
        decode_envelope(verb, sql, status, &bytes).inspect_err(|e| {
            log::error!("query failed: {}", e.message());
        })
    }
}
