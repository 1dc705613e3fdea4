use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CoreResult, MeterError};
use crate::http_client::{HttpClient, LineStreamBox};
use crate::model::{ChatRequest, ChatResponse, GenerateRequest, GenerateResponse};
use crate::provider::{Completion, FragmentStream, OllamaApi};

/// HTTP client for a local Ollama server (`/api/chat`, `/api/generate`).
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: HttpClient,
    base: String,
    name: String, // "ollama"
}

impl OllamaClient {
    pub fn new(http: HttpClient, base: String) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            name: "ollama".into(),
        }
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str) -> Self {
        OllamaClient::new(HttpClient::new_default().unwrap(), server_base.to_string())
    }

    async fn call<B, R>(&self, path: &str, body: &B, stream: bool) -> CoreResult<Completion<R>>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Send + 'static,
    {
        let url = format!("{}{}", self.base, path);
        if stream {
            let lines = self
                .http
                .post_ndjson_lines(&url, body, &[])
                .await
                .map_err(|e| e.with_provider(&self.name))?;
            Ok(Completion::Stream(decode_fragments(lines)))
        } else {
            let (resp, latency_ms) = self
                .http
                .post_json::<_, R>(&url, body, &[])
                .await
                .map_err(|e| e.with_provider(&self.name))?;
            tracing::debug!(path, latency_ms, "ollama call complete");
            Ok(Completion::Single(resp))
        }
    }
}

#[async_trait]
impl OllamaApi for OllamaClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, req: ChatRequest) -> CoreResult<Completion<ChatResponse>> {
        self.call("/api/chat", &req, req.stream).await
    }

    async fn generate(&self, req: GenerateRequest) -> CoreResult<Completion<GenerateResponse>> {
        self.call("/api/generate", &req, req.stream).await
    }
}

fn decode_fragments<R: DeserializeOwned + Send + 'static>(lines: LineStreamBox) -> FragmentStream<R> {
    lines
        .filter_map(|line| {
            futures::future::ready(match line {
                Ok(l) if l.line.trim().is_empty() => None,
                Ok(l) => Some(decode_fragment::<R>(&l.line)),
                Err(e) => Some(Err(e.with_provider("ollama"))),
            })
        })
        .boxed()
}

// Mid-stream failures arrive as a line of the form {"error": "..."}.
fn decode_fragment<R: DeserializeOwned>(line: &str) -> CoreResult<R> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| MeterError::ProviderError {
            provider: "ollama".into(),
            code: "stream".into(),
            message: format!("json decode error: {e}"),
        })?;
    if let Some(msg) = value.get("error").and_then(|e| e.as_str()) {
        return Err(MeterError::ProviderError {
            provider: "ollama".into(),
            code: "stream".into(),
            message: msg.to_string(),
        });
    }
    serde_json::from_value(value).map_err(|e| MeterError::ProviderError {
        provider: "ollama".into(),
        code: "stream".into(),
        message: format!("json decode error: {e}"),
    })
}
