use std::pin::Pin;
use std::task::{Context, Poll, ready};

use lingolift_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
};
use pin_project_lite::pin_project;

use crate::io::{Sse, SseError};
use crate::proto::GenerateContentResponse;
use crate::{Error, kind_from_status};

struct PartialState {
    sse: Sse,
    // A chunk may carry both the last fragment and the finish reason. The
    // fragment is emitted first, and this field holds the reason until the
    // next poll.
    pending_finish_reason: Option<ModelFinishReason>,
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    pub struct GeminiResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
    }
}

impl GeminiResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            pending_finish_reason: None,
        };
        let next_event_fut = async move { next_event(partial_state).await };
        Self {
            next_event_fut: Some(Box::pin(next_event_fut)),
        }
    }
}

impl ModelResponse for GeminiResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            // The stream has been exhausted or has failed.
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        let next_event_fut = async move { next_event(partial_state).await };
        *this.next_event_fut = Some(Box::pin(next_event_fut));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(mut partial_state: PartialState) -> NextEvent {
    if let Some(reason) = partial_state.pending_finish_reason.take() {
        return Ok((Some(ModelResponseEvent::Completed(reason)), partial_state));
    }

    let sse_event = match partial_state.sse.next_event().await {
        Ok(Some(event)) => event,
        Ok(None) => return Ok((None, partial_state)),
        Err(SseError::ChunksError(err)) => {
            return Err(Error::new(
                format!("stream interrupted: {}", err.0),
                ErrorKind::Other,
            ));
        }
        Err(SseError::InvalidPayload) => {
            return Err(Error::new(
                "invalid server-sent event payload",
                ErrorKind::MalformedResponse,
            ));
        }
    };
    trace!("got sse event: {sse_event}");

    let chunk = serde_json::from_str::<GenerateContentResponse>(&sse_event)
        .map_err(|err| {
            Error::new(format!("{err}"), ErrorKind::MalformedResponse)
        })?;

    if let Some(error) = chunk.error {
        let kind = error.code.map(kind_from_status).unwrap_or(ErrorKind::Other);
        return Err(Error::new(error.message, kind));
    }
    if let Some(block_reason) = chunk
        .prompt_feedback
        .as_ref()
        .and_then(|feedback| feedback.block_reason.as_deref())
    {
        return Err(Error::new(
            format!("prompt blocked: {block_reason}"),
            ErrorKind::Moderated,
        ));
    }

    partial_state.pending_finish_reason = chunk.finish_reason();
    let delta = ModelResponseEvent::MessageDelta(chunk.text());
    Ok((Some(delta), partial_state))
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use bytes::Bytes;

    use super::*;
    use crate::io::Chunks;

    async fn collect_events(
        payload: &'static [u8],
    ) -> (Vec<ModelResponseEvent>, Option<Error>) {
        let chunks = Chunks::from_vec_deque(
            vec![Bytes::from_static(payload)].into(),
        );
        let mut resp = pin!(GeminiResponse::from_sse(Sse::new(chunks)));
        let mut events = vec![];
        loop {
            match poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await {
                Ok(Some(event)) => events.push(event),
                Ok(None) => return (events, None),
                Err(err) => return (events, Some(err)),
            }
        }
    }

    #[tokio::test]
    async fn test_simple_events() {
        let (events, err) =
            collect_events(include_bytes!("../fixtures/test_response.txt"))
                .await;
        assert!(err.is_none());

        let text: String = events
            .iter()
            .filter_map(|event| match event {
                ModelResponseEvent::MessageDelta(delta) => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            text,
            "**Feedback**\n✅ Your English is natural and correct.\n\n**Response**\nGood morning!"
        );
        assert_eq!(
            events.last(),
            Some(&ModelResponseEvent::Completed(ModelFinishReason::Stop))
        );
        // The chunk without text still produces an (empty) fragment.
        assert!(events.contains(&ModelResponseEvent::MessageDelta(
            String::new()
        )));
    }

    #[tokio::test]
    async fn test_error_in_stream() {
        let (events, err) = collect_events(
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hi\"}]}}]}\r\n\r\n\
              data: {\"error\":{\"code\":429,\"message\":\"Resource exhausted\",\"status\":\"RESOURCE_EXHAUSTED\"}}\r\n\r\n",
        )
        .await;
        assert_eq!(
            events,
            vec![ModelResponseEvent::MessageDelta("Hi".to_owned())]
        );
        let err = err.unwrap();
        assert_eq!(err.kind, ErrorKind::RateLimitExceeded);
        assert_eq!(err.message(), "Resource exhausted");
    }

    #[tokio::test]
    async fn test_blocked_prompt() {
        let (events, err) = collect_events(
            b"data: {\"promptFeedback\":{\"blockReason\":\"SAFETY\"}}\n\n",
        )
        .await;
        assert!(events.is_empty());
        assert_eq!(err.unwrap().kind, ErrorKind::Moderated);
    }

    #[tokio::test]
    async fn test_malformed_chunk() {
        let (_, err) = collect_events(b"data: {not json\n\n").await;
        assert_eq!(err.unwrap().kind, ErrorKind::MalformedResponse);
    }
}
