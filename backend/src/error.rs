use metaform_core::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Invalid JSON for --{arg}: {err}")]
    InvalidJson {
        arg: &'static str,
        #[source]
        err: serde_json::Error,
    },
    #[error("--{0} must be a JSON object")]
    NotAnObject(&'static str),
    #[error("Missing endpoint: pass --endpoint or --sqlite")]
    NoEndpoint,
}

impl CliError {
    /// Statement that failed, for errors raised while executing one.
    pub fn sql(&self) -> Option<&str> {
        match self {
            CliError::Engine(e) => e.sql(),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            CliError::Engine(e) => e.message(),
            e => e.to_string(),
        }
    }
}
