use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{CoreResult, MeterError};
use crate::http_client::HttpClient;
use crate::metering::MeteringClient;
use crate::telemetry::TelemetryRecord;

const COMPLETIONS_PATH: &str = "/meter/v2/ai/completions";

/// HTTP metering client posting completion records to the Revenium API.
#[derive(Debug, Clone)]
pub struct ReveniumClient {
    http: HttpClient,
    base: String,
    api_key: SecretString,
}

impl ReveniumClient {
    pub fn new(http: HttpClient, api_key: SecretString, base: String) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str) -> Self {
        ReveniumClient::new(
            HttpClient::new_default().unwrap(),
            SecretString::new("hak_test".into()),
            server_base.to_string(),
        )
    }
}

#[async_trait]
impl MeteringClient for ReveniumClient {
    async fn create_completion(&self, record: &TelemetryRecord) -> CoreResult<serde_json::Value> {
        let api_key = self.api_key.expose_secret();
        if api_key.trim().is_empty() {
            return Err(MeterError::Metering("metering API key is blank".into()));
        }
        let url = format!("{}{}", self.base, COMPLETIONS_PATH);
        let headers = [
            ("x-api-key", api_key),
            ("Content-Type", "application/json"),
        ];
        self.http
            .post_json_lenient(&url, record, &headers)
            .await
            .map_err(|e| e.with_provider("revenium"))
    }
}
