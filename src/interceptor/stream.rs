//! Server-streaming and bidi call tracking.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_util::Stream;

use crate::classify::{CallStatus, ClassifyError};
use crate::interceptor::CallPermit;

/// A stream that reports its terminal status once.
///
/// The outcome is recorded on the first error, on normal end of stream, or
/// as a cancellation when the stream is dropped early.
pub struct GuardedStream<S> {
    inner: Pin<Box<S>>,
    permit: Option<CallPermit>,
}

impl<S> GuardedStream<S> {
    pub(crate) fn new(inner: S, permit: CallPermit) -> Self {
        Self {
            inner: Box::pin(inner),
            permit: Some(permit),
        }
    }

    /// Whether the terminal status has already been recorded.
    pub fn is_terminated(&self) -> bool {
        self.permit.is_none()
    }

    fn finish(&mut self, status: &CallStatus) {
        if let Some(permit) = self.permit.take() {
            permit.complete(status);
        }
    }
}

impl<S, T, E> Stream for GuardedStream<S>
where
    S: Stream<Item = Result<T, E>>,
    E: ClassifyError,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match ready!(this.inner.as_mut().poll_next(cx)) {
            Some(Ok(item)) => Poll::Ready(Some(Ok(item))),
            Some(Err(e)) => {
                this.finish(&e.call_status());
                Poll::Ready(Some(Err(e)))
            }
            None => {
                this.finish(&CallStatus::ok());
                Poll::Ready(None)
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
