use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Meterable;
use crate::trace_fields::{OperationType, TraceFields};
use crate::usage::{Subscriber, UsageMetadata};

pub const COST_TYPE: &str = "AI";
pub const PROVIDER: &str = "OLLAMA";
pub const MODEL_SOURCE: &str = "OLLAMA";
pub const MIDDLEWARE_SOURCE: &str = "RUST";
pub const FALLBACK_MODEL: &str = "ollama-model";

/// Normalized stop reason reported to the metering service.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    #[default]
    End,
    TokenLimit,
    Error,
    Cancelled,
    EndSequence,
}

impl StopReason {
    /// Maps Ollama's `done_reason`; anything unrecognized (or missing) is `End`.
    pub fn from_done_reason(reason: Option<&str>) -> Self {
        match reason {
            Some("stop") => Self::End,
            Some("length") => Self::TokenLimit,
            Some("error") => Self::Error,
            Some("cancelled") | Some("canceled") => Self::Cancelled,
            Some("tool_calls") => Self::EndSequence,
            _ => Self::End,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::End => "END",
            Self::TokenLimit => "TOKEN_LIMIT",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
            Self::EndSequence => "END_SEQUENCE",
        }
    }
}

/// Flat field set submitted to the metering service for one completed call.
/// Serialized with camelCase keys; every field is always present.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub cache_creation_token_count: u64,
    pub cache_read_token_count: u64,
    pub input_token_cost: Option<f64>,
    pub output_token_cost: Option<f64>,
    pub total_cost: Option<f64>,
    pub output_token_count: u64,
    pub cost_type: String,
    pub model: String,
    pub input_token_count: u64,
    pub provider: String,
    pub model_source: String,
    pub reasoning_token_count: u64,
    pub request_time: String,
    pub response_time: String,
    pub completion_start_time: String,
    pub request_duration: u64,
    pub stop_reason: StopReason,
    pub total_token_count: u64,
    pub transaction_id: String,
    pub trace_id: Option<String>,
    pub task_type: Option<String>,
    pub subscriber: Option<Subscriber>,
    pub organization_id: Option<String>,
    pub subscription_id: Option<String>,
    pub product_id: Option<String>,
    pub agent: Option<String>,
    pub response_quality_score: Option<f64>,
    pub is_streamed: bool,
    pub middleware_source: String,

    pub environment: Option<String>,
    pub region: Option<String>,
    pub credential_alias: Option<String>,
    pub trace_type: Option<String>,
    pub trace_name: Option<String>,
    pub parent_transaction_id: Option<String>,
    pub transaction_name: Option<String>,
    pub retry_number: u32,
    pub operation_type: OperationType,
}

impl Default for TelemetryRecord {
    fn default() -> Self {
        Self {
            cache_creation_token_count: 0,
            cache_read_token_count: 0,
            input_token_cost: None,
            output_token_cost: None,
            total_cost: None,
            output_token_count: 0,
            cost_type: COST_TYPE.into(),
            model: FALLBACK_MODEL.into(),
            input_token_count: 0,
            provider: PROVIDER.into(),
            model_source: MODEL_SOURCE.into(),
            reasoning_token_count: 0,
            request_time: String::new(),
            response_time: String::new(),
            completion_start_time: String::new(),
            request_duration: 0,
            stop_reason: StopReason::End,
            total_token_count: 0,
            transaction_id: String::new(),
            trace_id: None,
            task_type: None,
            subscriber: None,
            organization_id: None,
            subscription_id: None,
            product_id: None,
            agent: None,
            response_quality_score: None,
            is_streamed: false,
            middleware_source: MIDDLEWARE_SOURCE.into(),
            environment: None,
            region: None,
            credential_alias: None,
            trace_type: None,
            trace_name: None,
            parent_transaction_id: None,
            transaction_name: None,
            retry_number: 0,
            operation_type: OperationType::Chat,
        }
    }
}

/// The usage-relevant part of a response or fragment.
/// A stream keeps only the latest one of these, never the fragments themselves.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompletionSnapshot {
    pub model: String,
    pub prompt_eval_count: Option<u32>,
    pub eval_count: Option<u32>,
    pub done_reason: Option<String>,
}

impl CompletionSnapshot {
    pub fn of<T: Meterable + ?Sized>(resp: &T) -> Self {
        Self {
            model: resp.model().to_string(),
            prompt_eval_count: resp.prompt_eval_count(),
            eval_count: resp.eval_count(),
            done_reason: resp.done_reason().map(str::to_string),
        }
    }
}

/// Per-call state captured when the call starts.
#[derive(Debug, Clone)]
pub struct RecordContext {
    pub transaction_id: Arc<str>,
    pub request_start: DateTime<Utc>,
    pub metadata: UsageMetadata,
    pub trace: TraceFields,
    pub operation: OperationType,
}

impl RecordContext {
    /// Build the record, stamping the response time now.
    pub fn finish(&self, snapshot: &CompletionSnapshot, is_streamed: bool) -> TelemetryRecord {
        self.finish_at(snapshot, is_streamed, Utc::now())
    }

    pub fn finish_at(
        &self,
        snapshot: &CompletionSnapshot,
        is_streamed: bool,
        completed_at: DateTime<Utc>,
    ) -> TelemetryRecord {
        let prompt_tokens = u64::from(snapshot.prompt_eval_count.unwrap_or(0));
        let completion_tokens = u64::from(snapshot.eval_count.unwrap_or(0));
        let response_time = format_timestamp(completed_at);
        let model = if snapshot.model.is_empty() {
            FALLBACK_MODEL.to_string()
        } else {
            snapshot.model.clone()
        };
        let meta = &self.metadata;
        let trace = self.trace.clone();

        TelemetryRecord {
            output_token_count: completion_tokens,
            model,
            input_token_count: prompt_tokens,
            request_time: format_timestamp(self.request_start),
            completion_start_time: response_time.clone(),
            response_time,
            request_duration: duration_ms(self.request_start, completed_at),
            stop_reason: StopReason::from_done_reason(snapshot.done_reason.as_deref()),
            total_token_count: prompt_tokens + completion_tokens,
            transaction_id: self.transaction_id.to_string(),
            trace_id: meta.trace_id.clone(),
            task_type: meta.task_type.clone(),
            subscriber: meta.subscriber_payload(),
            organization_id: meta.organization_id.clone(),
            subscription_id: meta.subscription_id.clone(),
            product_id: meta.product_id.clone(),
            agent: meta.agent.clone(),
            response_quality_score: meta.response_quality_score,
            is_streamed,
            environment: trace.environment,
            region: trace.region,
            credential_alias: trace.credential_alias,
            trace_type: trace.trace_type,
            trace_name: trace.trace_name,
            parent_transaction_id: trace.parent_transaction_id,
            transaction_name: trace.transaction_name,
            retry_number: trace.retry_number,
            operation_type: self.operation,
            ..TelemetryRecord::default()
        }
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Whole milliseconds between two instants, rounded; never negative.
pub fn duration_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    let micros = (end - start).num_microseconds().unwrap_or(i64::MAX).max(0);
    (micros as f64 / 1000.0).round() as u64
}
