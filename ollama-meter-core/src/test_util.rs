#![cfg(test)]

use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;

use crate::error::{CoreResult, MeterError};
use crate::metering::MeteringClient;
use crate::model::{ChatMessage, ChatRequest, ChatResponse, GenerateRequest, GenerateResponse, Role};
use crate::provider::{Completion, OllamaApi};
use crate::telemetry::TelemetryRecord;

/// Scripted stand-in for the Ollama server.
///
/// Non-streaming calls return the last scripted fragment; streaming calls
/// replay every fragment, optionally failing after `fail_stream_after` of them.
#[derive(Default)]
pub struct FakeOllama {
    pub chat_fragments: Vec<ChatResponse>,
    pub generate_fragments: Vec<GenerateResponse>,
    pub fail_call: bool,
    pub fail_stream_after: Option<usize>,
    pub seen_chat: Mutex<Vec<ChatRequest>>,
    pub seen_generate: Mutex<Vec<GenerateRequest>>,
}

impl FakeOllama {
    pub fn chatting(fragments: Vec<ChatResponse>) -> Self {
        Self {
            chat_fragments: fragments,
            ..Default::default()
        }
    }

    pub fn generating(fragments: Vec<GenerateResponse>) -> Self {
        Self {
            generate_fragments: fragments,
            ..Default::default()
        }
    }

    fn complete<T: Clone + Default + Send + 'static>(&self, fragments: &[T], stream: bool) -> CoreResult<Completion<T>> {
        if self.fail_call {
            return Err(MeterError::ProviderUnavailable { provider: "ollama".into() });
        }
        if !stream {
            return Ok(Completion::Single(fragments.last().cloned().unwrap_or_default()));
        }
        let mut items: Vec<CoreResult<T>> = fragments.iter().cloned().map(Ok).collect();
        if let Some(n) = self.fail_stream_after {
            items.truncate(n);
            items.push(Err(MeterError::ProviderError {
                provider: "ollama".into(),
                code: "stream".into(),
                message: "connection reset".into(),
            }));
        }
        Ok(Completion::Stream(futures::stream::iter(items).boxed()))
    }
}

#[async_trait]
impl OllamaApi for FakeOllama {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, req: ChatRequest) -> CoreResult<Completion<ChatResponse>> {
        let stream = req.stream;
        self.seen_chat.lock().unwrap().push(req);
        self.complete(&self.chat_fragments, stream)
    }

    async fn generate(&self, req: GenerateRequest) -> CoreResult<Completion<GenerateResponse>> {
        let stream = req.stream;
        self.seen_generate.lock().unwrap().push(req);
        self.complete(&self.generate_fragments, stream)
    }
}

pub fn chat_fragment(content: &str, done: bool) -> ChatResponse {
    ChatResponse {
        model: "qwen2.5:0.5b".into(),
        message: Some(ChatMessage::new(Role::Assistant, content)),
        done,
        ..Default::default()
    }
}

pub fn final_chat(content: &str, prompt: u32, completion: u32, reason: &str) -> ChatResponse {
    ChatResponse {
        done_reason: Some(reason.into()),
        prompt_eval_count: Some(prompt),
        eval_count: Some(completion),
        ..chat_fragment(content, true)
    }
}

/// Keeps every record it is given.
#[derive(Default)]
pub struct RecordingMeter {
    records: Mutex<Vec<TelemetryRecord>>,
}

impl RecordingMeter {
    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl MeteringClient for RecordingMeter {
    async fn create_completion(&self, record: &TelemetryRecord) -> CoreResult<serde_json::Value> {
        self.records.lock().unwrap().push(record.clone());
        Ok(serde_json::json!({"status": "accepted"}))
    }
}

/// Rejects every record.
pub struct FailingMeter;

#[async_trait]
impl MeteringClient for FailingMeter {
    async fn create_completion(&self, _record: &TelemetryRecord) -> CoreResult<serde_json::Value> {
        Err(MeterError::Metering("remote rejected the record".into()))
    }
}
