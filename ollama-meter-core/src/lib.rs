pub mod annotate;
pub mod config;
pub mod error;
pub mod http_client;
pub mod metering;
pub mod middleware;
pub mod model;
pub mod provider;
pub mod providers;
pub mod stream;
pub mod telemetry;
pub mod trace_fields;
pub mod usage;
#[cfg(test)]
pub mod test_util;

pub use annotate::Annotated;
pub use error::{CoreResult, MeterError};
pub use middleware::MeteredOllama;
pub use provider::{Completion, OllamaApi};
pub use usage::UsageMetadata;
