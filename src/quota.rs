//! Streaming byte counter enforcing a remaining-bytes budget.
//!
//! The guard sits between an ingestion source and the store. When the
//! cumulative count reaches the budget before end-of-stream it drops the
//! source, surfaces `LimitReached` exactly once and fuses, even if
//! upstream keeps emitting.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use tracing::debug;

use crate::store::ByteStream;

#[derive(Debug, thiserror::Error)]
#[error("storage limit reached")]
struct LimitReachedError;

/// The canonical trip error. Stores that pass stream errors through
/// unmodified keep it classifiable with [`is_limit_reached`].
pub fn limit_error() -> io::Error {
    io::Error::new(io::ErrorKind::Other, LimitReachedError)
}

/// Whether a stream error is a quota trip (as opposed to plain I/O).
pub fn is_limit_reached(err: &io::Error) -> bool {
    err.get_ref().map_or(false, |e| e.is::<LimitReachedError>())
}

/// Shared trip flag. Stores may rewrap or stringify the error the guard
/// injects into the stream, so the consumer side checks this flag
/// instead of relying on the error surviving the store boundary.
#[derive(Clone, Default)]
pub struct QuotaStatus(Arc<AtomicBool>);

impl QuotaStatus {
    pub fn tripped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn trip(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Wraps `stream` with a budget of `remaining` bytes.
///
/// `None` means no active quota and the guard is a pass-through. A zero
/// or negative budget fails immediately without reading any bytes.
pub fn guard(stream: ByteStream, remaining: Option<i64>) -> (ByteStream, QuotaStatus) {
    let status = QuotaStatus::default();
    let guarded: ByteStream = match remaining {
        None => stream,
        Some(n) if n <= 0 => {
            debug!(remaining = n, "quota already exhausted, rejecting stream");
            drop(stream);
            status.trip();
            Box::pin(futures::stream::once(async { Err(limit_error()) }))
        }
        Some(n) => Box::pin(QuotaGuard {
            inner: Some(stream),
            remaining: n as u64,
            consumed: 0,
            status: status.clone(),
        }),
    };
    (guarded, status)
}

pin_project! {
    struct QuotaGuard<S> {
        // Dropped on trip so the source receives its cancellation signal.
        #[pin]
        inner: Option<S>,
        remaining: u64,
        consumed: u64,
        status: QuotaStatus,
    }
}

impl<S> Stream for QuotaGuard<S>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        let Some(inner) = this.inner.as_mut().as_pin_mut() else {
            return Poll::Ready(None);
        };

        match inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                *this.consumed += chunk.len() as u64;
                if *this.consumed >= *this.remaining {
                    debug!(
                        consumed = *this.consumed,
                        remaining = *this.remaining,
                        "quota budget reached mid-stream"
                    );
                    this.inner.set(None);
                    this.status.trip();
                    Poll::Ready(Some(Err(limit_error())))
                } else {
                    Poll::Ready(Some(Ok(chunk)))
                }
            }
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err))),
            Poll::Ready(None) => {
                this.inner.set(None);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
