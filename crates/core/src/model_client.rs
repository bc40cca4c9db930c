use std::pin::Pin;
use std::sync::Arc;

use futures_util::{Stream, TryStreamExt};
use lingolift_model::{ModelProvider, ModelRequest};
use tracing::Instrument;

use crate::accumulator::{Snapshot, SnapshotStream};
use crate::error::ProviderError;

/// A boxed stream of snapshots with type-erased errors.
pub type BoxSnapshotStream =
    Pin<Box<dyn Stream<Item = Result<Snapshot, ProviderError>> + Send>>;

type SendRequestResult = Result<BoxSnapshotStream, ProviderError>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
type HandlerFn =
    Arc<dyn Fn(ModelRequest) -> BoxedSendRequestFuture + Send + Sync>;

/// A wrapper around a model provider that provides a type-erased
/// interface for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since the session manager doesn't
        // have a generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    let message_count = req.messages.len();
                    trace!("sending a request with {message_count} messages");
                    let resp = fut.await.map_err(|err| {
                        error!("request rejected: {err:?}");
                        ProviderError::new(err)
                    })?;
                    trace!("start receiving events");
                    let stream = SnapshotStream::new(resp).map_err(|err| {
                        error!("response failed: {err:?}");
                        ProviderError::new(err)
                    });
                    Ok(Box::pin(stream) as BoxSnapshotStream)
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self { handler_fn }
    }

    /// Sends a request and returns the stream of snapshots.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. Dropping the returned future or stream
    /// drops the underlying response.
    #[inline]
    pub async fn send_request(
        &self,
        req: ModelRequest,
    ) -> Result<BoxSnapshotStream, ProviderError> {
        (self.handler_fn)(req).await
    }
}
