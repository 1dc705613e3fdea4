//! The remote metering collaborator.

pub mod revenium;

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::telemetry::TelemetryRecord;

/// Receives one telemetry record per completed call.
///
/// Implementations must be thread-safe; submissions run on background tasks
/// and may overlap.
#[async_trait]
pub trait MeteringClient: Send + Sync + 'static {
    async fn create_completion(&self, record: &TelemetryRecord) -> CoreResult<serde_json::Value>;
}
