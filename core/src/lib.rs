pub mod cache;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod http;
pub mod meta;
pub mod model;
pub mod nav;
pub mod options;
pub mod resolve;
pub mod sql;
pub mod store;
pub mod template;

#[cfg(test)]
mod testing;

pub use endpoint::{QueryEndpoint, QueryVerb, Row};
pub use engine::{EngineConfig, FormEngine};
pub use error::{EngineError, EngineResult};
pub use model::form::FormDescriptor;
pub use template::{apply_template, TemplateInput, Values};
