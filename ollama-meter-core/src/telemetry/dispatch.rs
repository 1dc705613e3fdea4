//! Background submission of telemetry records.
//!
//! Callers hand records to a [`DispatchHandle`], which enqueues them on a
//! bounded channel and returns immediately. A single worker task drains the
//! channel and runs every submission on its own task, so submissions are
//! independent of each other and of the caller. Failures are logged and
//! dropped; nothing is retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::metering::MeteringClient;
use crate::telemetry::TelemetryRecord;
use crate::telemetry::keys::{
    KEY_ERROR_DETAIL, KEY_ERROR_MESSAGE, KEY_LATENCY_MS, KEY_MODEL, KEY_STOP_REASON, KEY_TOKENS_COMPLETION,
    KEY_TOKENS_PROMPT, KEY_TOKENS_TOTAL, KEY_TRANSACTION_ID,
};

/// Process-wide "stop metering" flag. Set once at teardown, never cleared.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum Job {
    Submit(Box<TelemetryRecord>),
    Flush(oneshot::Sender<()>),
}

/// Cheap, cloneable entry point to the dispatch worker.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: Option<mpsc::Sender<Job>>,
    shutdown: ShutdownSignal,
}

impl std::fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchHandle")
            .field("enabled", &self.tx.is_some())
            .field("shutdown", &self.shutdown.is_triggered())
            .finish()
    }
}

impl DispatchHandle {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(client: Arc<dyn MeteringClient>, shutdown: ShutdownSignal, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(run_worker(rx, client, shutdown.clone()));
        Self {
            tx: Some(tx),
            shutdown,
        }
    }

    /// A handle that accepts records and discards them.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Enqueue a record without waiting. Never fails from the caller's point of view.
    pub fn submit(&self, record: TelemetryRecord) {
        let Some(tx) = &self.tx else {
            tracing::debug!({ KEY_TRANSACTION_ID } = %record.transaction_id, "metering disabled; dropping record");
            return;
        };
        if self.shutdown.is_triggered() {
            tracing::debug!({ KEY_TRANSACTION_ID } = %record.transaction_id, "skipping metering call during shutdown");
            return;
        }
        match tx.try_send(Job::Submit(Box::new(record))) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("metering queue full; dropping record");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("metering worker stopped; dropping record");
            }
        }
    }

    /// Resolves once every record queued before this call has been submitted
    /// (or has failed).
    pub async fn flush(&self) {
        let Some(tx) = &self.tx else { return };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(Job::Flush(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Job>,
    client: Arc<dyn MeteringClient>,
    shutdown: ShutdownSignal,
) {
    let mut in_flight = JoinSet::new();
    while let Some(job) = rx.recv().await {
        while let Some(res) = in_flight.try_join_next() {
            log_join(res);
        }
        match job {
            Job::Submit(record) => {
                in_flight.spawn(submit_one(client.clone(), record, shutdown.clone()));
            }
            Job::Flush(done) => {
                while let Some(res) = in_flight.join_next().await {
                    log_join(res);
                }
                let _ = done.send(());
            }
        }
    }
    while let Some(res) = in_flight.join_next().await {
        log_join(res);
    }
}

async fn submit_one(client: Arc<dyn MeteringClient>, record: Box<TelemetryRecord>, shutdown: ShutdownSignal) {
    if shutdown.is_triggered() {
        tracing::debug!({ KEY_TRANSACTION_ID } = %record.transaction_id, "skipping metering call during shutdown");
        return;
    }
    tracing::debug!(
        { KEY_TRANSACTION_ID } = %record.transaction_id,
        { KEY_MODEL } = %record.model,
        { KEY_TOKENS_PROMPT } = record.input_token_count,
        { KEY_TOKENS_COMPLETION } = record.output_token_count,
        { KEY_TOKENS_TOTAL } = record.total_token_count,
        { KEY_STOP_REASON } = record.stop_reason.as_str(),
        { KEY_LATENCY_MS } = record.request_duration,
        "metering call"
    );
    match client.create_completion(&record).await {
        Ok(result) => tracing::debug!({ KEY_TRANSACTION_ID } = %record.transaction_id, ?result, "metering call result"),
        Err(e) => {
            if !shutdown.is_triggered() {
                tracing::warn!(
                    { KEY_TRANSACTION_ID } = %record.transaction_id,
                    { KEY_ERROR_MESSAGE } = %e,
                    { KEY_ERROR_DETAIL } = ?e,
                    "error in metering call"
                );
            }
        }
    }
}

fn log_join(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res
        && e.is_panic()
    {
        tracing::warn!({ KEY_ERROR_MESSAGE } = %e, "metering task panicked");
    }
}
