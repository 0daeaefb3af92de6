use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::endpoint::{QueryEndpoint, QueryVerb, Row};
use crate::error::{EngineError, EngineResult};

enum Reply {
    Rows(Vec<Row>),
    Error(String),
}

/// Endpoint answering by substring match on the statement; unmatched statements return no rows.
pub struct MockEndpoint {
    replies: Vec<(String, Reply)>,
    issued: Mutex<Vec<(QueryVerb, String)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Option<Duration>,
}

impl MockEndpoint {
    pub fn new() -> Self {
        Self {
            replies: Vec::new(),
            issued: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn with_select(mut self, pattern: &str, rows: Vec<Row>) -> Self {
        self.replies.push((pattern.to_string(), Reply::Rows(rows)));
        self
    }

    pub fn with_error(mut self, pattern: &str, message: &str) -> Self {
        self.replies
            .push((pattern.to_string(), Reply::Error(message.to_string())));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn issued(&self) -> Vec<(QueryVerb, String)> {
        self.issued.lock().unwrap().clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.issued
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, sql)| sql.contains(pattern))
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl QueryEndpoint for MockEndpoint {
    fn name(&self) -> &str {
        "mock"
    }

    async fn query(&self, verb: QueryVerb, sql: &str) -> EngineResult<Vec<Row>> {
        self.issued.lock().unwrap().push((verb, sql.to_string()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = self
            .replies
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()));
        match reply {
            Some((_, Reply::Rows(rows))) => Ok(rows.clone()),
            Some((_, Reply::Error(message))) => Err(EngineError::Backend {
                message: message.clone(),
                sql: sql.to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }
}
