//! A model provider for the Gemini API.

#[macro_use]
extern crate tracing;

mod config;
mod io;
mod proto;
mod response;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;

use lingolift_model::{
    ErrorKind, ModelProvider, ModelProviderError, ModelRequest,
};
use mime::Mime;
use reqwest::{Client, Response, StatusCode, header};

pub use config::{DEFAULT_BASE_URL, GeminiConfig, GeminiConfigBuilder};
use io::{Chunks, Sse};
use proto::ErrorEnvelope;
pub use response::GeminiResponse;

/// Error type for [`GeminiProvider`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

fn kind_from_status(status: u16) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::Unauthenticated,
        429 => ErrorKind::RateLimitExceeded,
        _ => ErrorKind::Other,
    }
}

/// Gemini model provider.
#[derive(Clone, Debug)]
pub struct GeminiProvider {
    client: Client,
    config: Arc<GeminiConfig>,
}

impl GeminiProvider {
    /// Creates a new `GeminiProvider` with the given configuration.
    ///
    /// Fails with [`ErrorKind::Unauthenticated`] when the API key is empty,
    /// since every request would be rejected anyway.
    pub fn new(config: GeminiConfig) -> Result<Self, Error> {
        if config.api_key.trim().is_empty() {
            return Err(Error::new(
                "the Gemini API key is empty",
                ErrorKind::Unauthenticated,
            ));
        }
        let client = Client::builder().build().map_err(|err| {
            Error::new(format!("cannot build http client: {err}"), ErrorKind::Other)
        })?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }
}

impl ModelProvider for GeminiProvider {
    type Error = Error;
    type Response = GeminiResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let gemini_req = proto::create_request(req);
        let resp_fut = self
            .client
            .post(self.config.stream_url(&req.config.model))
            .header("x-goog-api-key", &self.config.api_key)
            .header(header::ACCEPT, "text/event-stream")
            .json(&gemini_req)
            .send();

        async move {
            let resp = match resp_fut.await {
                Ok(resp) => resp,
                Err(err) => {
                    return Err(Error::new(format!("{err}"), ErrorKind::Other));
                }
            };

            let status = resp.status();
            if !status.is_success() {
                return Err(error_from_response(status, resp).await);
            }

            let content_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            let is_event_stream = content_type
                .and_then(|v| v.parse().ok())
                .map(|m: Mime| m.essence_str() == "text/event-stream")
                .unwrap_or(false);
            if !is_event_stream {
                return Err(Error::new(
                    format!("Unexpected content type: {content_type:?}"),
                    ErrorKind::MalformedResponse,
                ));
            }

            // Here we got a successful response.
            let chunks = Chunks::from_response(resp);
            let sse = Sse::new(chunks);
            Ok(GeminiResponse::from_sse(sse))
        }
    }
}

async fn error_from_response(status: StatusCode, resp: Response) -> Error {
    let kind = kind_from_status(status.as_u16());
    let body = match resp.text().await {
        Ok(body) => body,
        Err(err) => {
            warn!("cannot read the error body: {err}");
            String::new()
        }
    };
    let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => envelope.error.message,
        Err(_) => format!("request failed with status {status}"),
    };
    error!("gemini request failed ({status}): {message}");
    Error::new(message, kind)
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use lingolift_model::{
        GenerationConfig, ModelFinishReason, ModelMessage, ModelResponse,
        ModelResponseEvent,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    /// Serves `response` verbatim to a single connection and returns the
    /// base URL to reach it.
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request(&mut stream).await;
            stream.write_all(response.as_bytes()).await.unwrap();
            // The client may already be gone once it has what it needs.
            stream.shutdown().await.ok();
        });
        format!("http://{addr}")
    }

    async fn read_request(stream: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0; 1024];
        let header_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert_ne!(n, 0, "connection closed before the request ended");
            buf.extend_from_slice(&chunk[..n]);
            let end = buf.windows(4).position(|w| w == b"\r\n\r\n");
            if let Some(pos) = end {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
        let content_length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < header_end + content_length {
            let n = stream.read(&mut chunk).await.unwrap();
            assert_ne!(n, 0, "connection closed before the body ended");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn provider_for(base_url: String) -> GeminiProvider {
        let config = GeminiConfigBuilder::with_api_key("key")
            .with_base_url(base_url)
            .build();
        GeminiProvider::new(config).unwrap()
    }

    fn request() -> ModelRequest {
        ModelRequest {
            config: GenerationConfig::default(),
            messages: vec![ModelMessage::User("Hi".to_owned())],
        }
    }

    async fn send_expecting_error(response: &'static str) -> Error {
        let provider = provider_for(serve_once(response).await);
        match provider.send_request(&request()).await {
            Ok(_) => panic!("expected the request to fail"),
            Err(err) => err,
        }
    }

    #[test]
    fn test_empty_api_key() {
        let config = GeminiConfigBuilder::with_api_key("  ").build();
        let err = GeminiProvider::new(config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    }

    #[test]
    fn test_kind_from_status() {
        assert_eq!(kind_from_status(401), ErrorKind::Unauthenticated);
        assert_eq!(kind_from_status(403), ErrorKind::Unauthenticated);
        assert_eq!(kind_from_status(429), ErrorKind::RateLimitExceeded);
        assert_eq!(kind_from_status(500), ErrorKind::Other);
    }

    #[tokio::test]
    async fn test_error_status_uses_envelope() {
        let err = send_expecting_error(concat!(
            "HTTP/1.1 429 Too Many Requests\r\n",
            "Content-Type: application/json\r\n",
            "Content-Length: 79\r\n",
            "Connection: close\r\n\r\n",
            r#"{"error":{"code":429,"message":"Quota exceeded","#,
            r#""status":"RESOURCE_EXHAUSTED"}}"#,
        ))
        .await;
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        assert_eq!(err.message(), "Quota exceeded");
    }

    #[tokio::test]
    async fn test_error_status_without_envelope() {
        let err = send_expecting_error(concat!(
            "HTTP/1.1 500 Internal Server Error\r\n",
            "Content-Type: text/plain\r\n",
            "Content-Length: 4\r\n",
            "Connection: close\r\n\r\n",
            "oops",
        ))
        .await;
        assert_eq!(err.kind(), ErrorKind::Other);
        assert!(
            err.message().starts_with("request failed with status 500"),
            "unexpected message: {}",
            err.message()
        );
    }

    #[tokio::test]
    async fn test_error_body_cut_short() {
        // The body ends long before the announced length.
        let err = send_expecting_error(concat!(
            "HTTP/1.1 500 Internal Server Error\r\n",
            "Content-Type: application/json\r\n",
            "Content-Length: 100\r\n",
            "Connection: close\r\n\r\n",
            r#"{"error":"#,
        ))
        .await;
        assert_eq!(err.kind(), ErrorKind::Other);
        assert_eq!(
            err.message(),
            "request failed with status 500 Internal Server Error"
        );
    }

    #[tokio::test]
    async fn test_rejects_non_event_stream() {
        let err = send_expecting_error(concat!(
            "HTTP/1.1 200 OK\r\n",
            "Content-Type: application/json\r\n",
            "Content-Length: 2\r\n",
            "Connection: close\r\n\r\n",
            "{}",
        ))
        .await;
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
        assert_eq!(
            err.message(),
            r#"Unexpected content type: Some("application/json")"#
        );
    }

    #[tokio::test]
    async fn test_streams_event_stream_body() {
        let base_url = serve_once(concat!(
            "HTTP/1.1 200 OK\r\n",
            "Content-Type: text/event-stream; charset=utf-8\r\n",
            "Connection: close\r\n\r\n",
            r#"data: {"candidates":[{"content":{"parts":[{"text":"Hi"}],"#,
            r#""role":"model"},"finishReason":"STOP"}]}"#,
            "\r\n\r\n",
        ))
        .await;
        let provider = provider_for(base_url);
        let Ok(resp) = provider.send_request(&request()).await else {
            panic!("expected an event stream");
        };

        let mut resp = pin!(resp);
        let mut events = Vec::new();
        while let Some(event) =
            poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await.unwrap()
        {
            events.push(event);
        }
        assert_eq!(
            events,
            [
                ModelResponseEvent::MessageDelta("Hi".to_owned()),
                ModelResponseEvent::Completed(ModelFinishReason::Stop),
            ]
        );
    }
}
