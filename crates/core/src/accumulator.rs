//! Turns a stream of text fragments into cumulative snapshots.

use std::fmt::{self, Display};
use std::pin::{Pin, pin};
use std::task::{Context, Poll, ready};

use futures_util::{Stream, StreamExt};
use lingolift_model::{ModelFinishReason, ModelResponse, ModelResponseEvent};
use pin_project_lite::pin_project;
use tokio_util::sync::CancellationToken;

/// The text generated so far for one request.
///
/// Every snapshot carries the *full* accumulated text, so observers never
/// need to remember earlier snapshots. The fragment that produced this
/// snapshot is still available through [`Snapshot::delta`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Snapshot {
    text: String,
    delta_start: usize,
}

impl Snapshot {
    /// Returns the accumulated text.
    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the fragment appended since the previous snapshot.
    #[inline]
    pub fn delta(&self) -> &str {
        &self.text[self.delta_start..]
    }

    /// Consumes the snapshot, returning the accumulated text.
    #[inline]
    pub fn into_text(self) -> String {
        self.text
    }
}

impl Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl PartialEq<str> for Snapshot {
    fn eq(&self, other: &str) -> bool {
        self.text == other
    }
}

impl PartialEq<&str> for Snapshot {
    fn eq(&self, other: &&str) -> bool {
        self.text == *other
    }
}

pin_project! {
    /// A stream of [`Snapshot`]s over a [`ModelResponse`].
    ///
    /// Empty fragments are skipped, so every item differs from the one
    /// before it. The stream ends when the response ends, and yields
    /// nothing more after the first error.
    pub struct SnapshotStream<R> {
        #[pin]
        response: R,
        text: String,
        finish_reason: Option<ModelFinishReason>,
        done: bool,
    }
}

impl<R: ModelResponse> SnapshotStream<R> {
    /// Creates a snapshot stream with an empty accumulator.
    #[inline]
    pub fn new(response: R) -> Self {
        Self {
            response,
            text: String::new(),
            finish_reason: None,
            done: false,
        }
    }

    /// Returns the text accumulated so far.
    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the finish reason reported by the provider, if any.
    #[inline]
    pub fn finish_reason(&self) -> Option<ModelFinishReason> {
        self.finish_reason
    }
}

impl<R: ModelResponse> Stream for SnapshotStream<R> {
    type Item = Result<Snapshot, R::Error>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }

        loop {
            let event_or_err =
                ready!(this.response.as_mut().poll_next_event(cx));
            match event_or_err {
                Ok(Some(ModelResponseEvent::MessageDelta(delta))) => {
                    if delta.is_empty() {
                        trace!("skipped an empty fragment");
                        continue;
                    }
                    let delta_start = this.text.len();
                    this.text.push_str(&delta);
                    return Poll::Ready(Some(Ok(Snapshot {
                        text: this.text.clone(),
                        delta_start,
                    })));
                }
                Ok(Some(ModelResponseEvent::Completed(reason))) => {
                    trace!("response completed: {reason:?}");
                    *this.finish_reason = Some(reason);
                }
                Ok(None) => {
                    *this.done = true;
                    return Poll::Ready(None);
                }
                Err(err) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
            }
        }
    }
}

/// The reason why draining a snapshot stream stopped early.
#[derive(Debug, PartialEq, Eq)]
pub enum DrainError<E> {
    /// The stream failed with this error.
    Stream(E),
    /// The cancellation token was triggered.
    Cancelled,
}

/// Drains a snapshot stream, calling `on_update` once per snapshot in
/// arrival order, and returns the final text.
///
/// A stream that ends without any snapshot yields an empty string and
/// `on_update` is never called. On failure the error is returned as-is,
/// and text accumulated before it is discarded.
///
/// # Cancel safety
///
/// When `cancel` is triggered, draining stops at the next suspension point,
/// no further snapshots are delivered, and the stream is dropped.
pub async fn drain<S, E, F>(
    stream: S,
    mut on_update: F,
    cancel: Option<&CancellationToken>,
) -> Result<String, DrainError<E>>
where
    S: Stream<Item = Result<Snapshot, E>>,
    F: FnMut(Snapshot),
{
    let mut stream = pin!(stream);
    let mut text = String::new();

    loop {
        let next = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("draining cancelled");
                    return Err(DrainError::Cancelled);
                }
                next = stream.next() => next,
            },
            None => stream.next().await,
        };

        match next {
            Some(Ok(snapshot)) => {
                text.push_str(snapshot.delta());
                on_update(snapshot);
            }
            Some(Err(err)) => return Err(DrainError::Stream(err)),
            None => return Ok(text),
        }
    }
}

/// Drains a model response directly. See [`drain`].
#[inline]
pub async fn accumulate<R, F>(
    response: R,
    on_update: F,
    cancel: Option<&CancellationToken>,
) -> Result<String, DrainError<R::Error>>
where
    R: ModelResponse,
    F: FnMut(Snapshot),
{
    drain(SnapshotStream::new(response), on_update, cancel).await
}
