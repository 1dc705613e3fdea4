//! Pass-through stream adapter that meters a streamed call at its end.
//!
//! Contract:
//! - Fragments are yielded in order, unmodified, each tagged with the call's
//!   transaction id.
//! - Only the usage-relevant part of the latest fragment is retained.
//! - When the inner stream ends normally after at least one fragment, exactly
//!   one record is handed to the dispatcher.
//! - An error from the inner stream is passed on and ends the stream; no
//!   record is produced for it. Neither is one produced if the consumer drops
//!   the stream early.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use futures::stream::FusedStream;

use crate::annotate::{Annotated, annotate};
use crate::error::CoreResult;
use crate::model::Meterable;
use crate::provider::FragmentStream;
use crate::telemetry::{CompletionSnapshot, DispatchHandle, KEY_ERROR_MESSAGE, KEY_TRANSACTION_ID, RecordContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Streaming,
    Done,
}

pub struct MeteredStream<T> {
    inner: FragmentStream<T>,
    state: State,
    last: Option<CompletionSnapshot>,
    ctx: Option<RecordContext>,
    transaction_id: Arc<str>,
    dispatch: DispatchHandle,
}

impl<T> MeteredStream<T> {
    pub fn new(inner: FragmentStream<T>, ctx: RecordContext, dispatch: DispatchHandle) -> Self {
        Self {
            inner,
            state: State::Streaming,
            last: None,
            transaction_id: ctx.transaction_id.clone(),
            ctx: Some(ctx),
            dispatch,
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    fn finish(&mut self) {
        self.state = State::Done;
        let Some(ctx) = self.ctx.take() else { return };
        match self.last.take() {
            Some(snapshot) => self.dispatch.submit(ctx.finish(&snapshot, true)),
            None => {
                tracing::debug!({ KEY_TRANSACTION_ID } = %self.transaction_id, "stream ended without fragments")
            }
        }
    }
}

impl<T> std::fmt::Debug for MeteredStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeteredStream")
            .field("transaction_id", &self.transaction_id)
            .field("state", &self.state)
            .finish()
    }
}

impl<T: Meterable> Stream for MeteredStream<T> {
    type Item = CoreResult<Annotated<T>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.state == State::Done {
            return Poll::Ready(None);
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(fragment))) => {
                this.last = Some(CompletionSnapshot::of(&fragment));
                Poll::Ready(Some(Ok(annotate(fragment, &this.transaction_id))))
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::debug!(
                    { KEY_TRANSACTION_ID } = %this.transaction_id,
                    { KEY_ERROR_MESSAGE } = %e,
                    "stream failed; not metered"
                );
                this.state = State::Done;
                this.ctx = None;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.state {
            State::Done => (0, Some(0)),
            State::Streaming => self.inner.size_hint(),
        }
    }
}

impl<T: Meterable> FusedStream for MeteredStream<T> {
    fn is_terminated(&self) -> bool {
        self.state == State::Done
    }
}
