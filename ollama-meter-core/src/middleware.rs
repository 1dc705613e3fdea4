//! Metering wrapper around an [`OllamaApi`] client.
//!
//! `chat` and `generate` take the same request the underlying client takes
//! plus optional [`UsageMetadata`], which is consumed here and never
//! forwarded. The call itself runs inline; only the telemetry submission is
//! handed off to the [`DispatchHandle`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;

use crate::annotate::{Annotated, annotate};
use crate::error::CoreResult;
use crate::model::{ChatRequest, ChatResponse, GenerateRequest, GenerateResponse, Meterable};
use crate::provider::{Completion, OllamaApi};
use crate::stream::MeteredStream;
use crate::telemetry::{
    CompletionSnapshot, DispatchHandle, KEY_ERROR_MESSAGE, KEY_MODEL, KEY_OPERATION, KEY_PROVIDER, KEY_STREAMED,
    KEY_TRANSACTION_ID, RecordContext,
};
use crate::trace_fields::{EnvSource, ProcessEnv, TraceFields, detect_operation_type};
use crate::usage::UsageMetadata;

/// `"<provider>-<epoch seconds with fraction>"`, e.g. `ollama-1700000000.123456`.
/// Whole seconds keep one decimal place (`ollama-1700000000.0`).
pub fn transaction_id_at(provider: &str, at: DateTime<Utc>) -> String {
    let secs = at.timestamp_micros() as f64 / 1_000_000.0;
    if secs.fract() == 0.0 {
        format!("{provider}-{secs:.1}")
    } else {
        format!("{provider}-{secs}")
    }
}

#[derive(Clone)]
pub struct MeteredOllama {
    inner: Arc<dyn OllamaApi>,
    dispatch: DispatchHandle,
    env: Arc<dyn EnvSource>,
}

impl std::fmt::Debug for MeteredOllama {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeteredOllama")
            .field("provider", &self.inner.name())
            .field("dispatch", &self.dispatch)
            .finish()
    }
}

impl MeteredOllama {
    pub fn new(inner: Arc<dyn OllamaApi>, dispatch: DispatchHandle) -> Self {
        Self {
            inner,
            dispatch,
            env: Arc::new(ProcessEnv),
        }
    }

    /// Resolve trace fields from `env` instead of the process environment.
    pub fn with_env(mut self, env: Arc<dyn EnvSource>) -> Self {
        self.env = env;
        self
    }

    pub fn dispatch(&self) -> &DispatchHandle {
        &self.dispatch
    }

    pub async fn chat(
        &self,
        req: ChatRequest,
        usage_metadata: Option<UsageMetadata>,
    ) -> CoreResult<Completion<Annotated<ChatResponse>>> {
        let body = serde_json::json!({ "tools": req.tools });
        let ctx = self.begin("chat", &body, &req.model, req.stream, usage_metadata);
        let completion = self.inner.chat(req).await.inspect_err(|e| {
            tracing::debug!(
                { KEY_TRANSACTION_ID } = %ctx.transaction_id,
                { KEY_ERROR_MESSAGE } = %e,
                "chat failed; not metered"
            );
        })?;
        Ok(self.finish(completion, ctx))
    }

    pub async fn generate(
        &self,
        req: GenerateRequest,
        usage_metadata: Option<UsageMetadata>,
    ) -> CoreResult<Completion<Annotated<GenerateResponse>>> {
        let ctx = self.begin("generate", &serde_json::Value::Null, &req.model, req.stream, usage_metadata);
        let completion = self.inner.generate(req).await.inspect_err(|e| {
            tracing::debug!(
                { KEY_TRANSACTION_ID } = %ctx.transaction_id,
                { KEY_ERROR_MESSAGE } = %e,
                "generate failed; not metered"
            );
        })?;
        Ok(self.finish(completion, ctx))
    }

    fn begin(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
        model: &str,
        stream: bool,
        usage_metadata: Option<UsageMetadata>,
    ) -> RecordContext {
        let request_start = Utc::now();
        let provider = self.inner.name();
        let transaction_id: Arc<str> = Arc::from(transaction_id_at(provider, request_start));
        let metadata = usage_metadata.unwrap_or_default();
        let operation = detect_operation_type(endpoint, body);
        let trace = TraceFields::resolve(&metadata, self.env.as_ref());

        tracing::debug!(
            { KEY_PROVIDER } = provider,
            { KEY_MODEL } = model,
            { KEY_TRANSACTION_ID } = %transaction_id,
            { KEY_OPERATION } = operation.as_str(),
            { KEY_STREAMED } = stream,
            "metered call"
        );

        RecordContext {
            transaction_id,
            request_start,
            metadata,
            trace,
            operation,
        }
    }

    fn finish<T>(&self, completion: Completion<T>, ctx: RecordContext) -> Completion<Annotated<T>>
    where
        T: Meterable + Send + 'static,
    {
        match completion {
            Completion::Single(resp) => {
                let annotated = annotate(resp, &ctx.transaction_id);
                self.dispatch
                    .submit(ctx.finish(&CompletionSnapshot::of(annotated.inner()), false));
                Completion::Single(annotated)
            }
            Completion::Stream(fragments) => {
                Completion::Stream(MeteredStream::new(fragments, ctx, self.dispatch.clone()).boxed())
            }
        }
    }
}
