//! Body capture that never holds back what the handler or the client sees
//!
//! Request bodies are read ahead only up to the logging limit and replayed
//! to the handler. Response bodies of unknown length are teed: chunks flow
//! to the client as they are produced and a bounded copy is handed over once
//! the stream ends or is dropped.

use axum::body::{Body, Bytes};
use futures::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Read at most `limit + 1` bytes of `body` ahead of the handler
///
/// Returns a body with the same content as the original and the captured
/// prefix. A prefix longer than `limit` means the body is too large to log.
/// `None` means reading failed; the error is replayed to the handler after
/// the chunks that did arrive.
pub async fn peek(body: Body, limit: usize) -> (Body, Option<Bytes>) {
    let mut rest = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut size = 0usize;

    while size <= limit {
        match rest.next().await {
            Some(Ok(chunk)) => {
                size = size.saturating_add(chunk.len());
                chunks.push(chunk);
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Failed to read request body for logging");
                let replay = chunks
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(e)));
                return (Body::from_stream(stream::iter(replay).chain(rest)), None);
            }
            None => {
                let full = concat(&chunks, usize::MAX);
                return (Body::from(full.clone()), Some(full));
            }
        }
    }

    let captured = concat(&chunks, limit.saturating_add(1));
    let replay = stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
    (Body::from_stream(replay.chain(rest)), Some(captured))
}

fn concat(chunks: &[Bytes], max: usize) -> Bytes {
    if let [only] = chunks {
        return only.slice(..only.len().min(max));
    }

    let mut buf = Vec::new();
    for chunk in chunks {
        let room = max - buf.len();
        if room == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
    Bytes::from(buf)
}

/// What a tee saw of a response body
#[derive(Debug)]
pub struct Captured {
    /// At most `cap` bytes from the start of the body
    pub bytes: Bytes,
    /// The body yielded an error before it ended
    pub failed: bool,
}

/// Wrap `body` so a copy of its first `cap` bytes arrives on the receiver
///
/// The copy is sent when the stream ends, fails or is dropped unfinished,
/// whichever comes first.
pub fn tee(body: Body, cap: usize) -> (Body, oneshot::Receiver<Captured>) {
    let (done, captured) = oneshot::channel();
    let tee = Tee {
        inner: body.into_data_stream(),
        buf: Vec::new(),
        cap,
        failed: false,
        done: Some(done),
    };
    (Body::from_stream(tee), captured)
}

struct Tee<S> {
    inner: S,
    buf: Vec<u8>,
    cap: usize,
    failed: bool,
    done: Option<oneshot::Sender<Captured>>,
}

impl<S> Tee<S> {
    fn finish(&mut self) {
        if let Some(done) = self.done.take() {
            let captured = Captured {
                bytes: Bytes::from(std::mem::take(&mut self.buf)),
                failed: self.failed,
            };
            let _ = done.send(captured);
        }
    }
}

impl<S> Stream for Tee<S>
where
    S: Stream<Item = Result<Bytes, axum::Error>> + Unpin,
{
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                let room = this.cap.saturating_sub(this.buf.len());
                this.buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.failed = true;
                this.finish();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for Tee<S> {
    fn drop(&mut self) {
        self.finish();
    }
}
