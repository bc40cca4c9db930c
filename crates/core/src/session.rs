//! Conversation handles and the session manager that owns them.

use std::fmt::{self, Debug};

use lingolift_model::{
    GenerationConfig, ModelMessage, ModelProvider, ModelRequest,
};
use tokio_util::sync::CancellationToken;

use crate::accumulator::{Snapshot, drain};
use crate::error::{Error, ProviderError};
use crate::model_client::{BoxSnapshotStream, ModelClient};

type ConnectFn =
    Box<dyn Fn() -> Result<ModelClient, ProviderError> + Send + Sync>;

/// Identifies a conversation handle within its [`SessionManager`].
///
/// Ids are never reused, so a handle created after a reset always has a
/// different id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

/// A live conversation with the model.
///
/// The handle keeps the dialogue history and replays it on every request,
/// together with the generation configuration it was created with. Only
/// turns that completed successfully are recorded.
pub struct ConversationHandle {
    id: HandleId,
    client: ModelClient,
    config: GenerationConfig,
    history: Vec<ModelMessage>,
}

impl ConversationHandle {
    /// Returns the id of this handle.
    #[inline]
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Returns the generation configuration of this conversation.
    #[inline]
    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Returns the completed turns of this conversation.
    #[inline]
    pub fn history(&self) -> &[ModelMessage] {
        &self.history
    }

    fn build_request(&self, message: &str) -> ModelRequest {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.extend(self.history.iter().cloned());
        messages.push(ModelMessage::User(message.to_owned()));
        ModelRequest {
            config: self.config.clone(),
            messages,
        }
    }

    /// Issues a streaming request for `message` without recording it in
    /// the history.
    pub async fn send_message_stream(
        &self,
        message: &str,
    ) -> Result<BoxSnapshotStream, ProviderError> {
        self.client.send_request(self.build_request(message)).await
    }

    /// Sends a user message and streams the reply.
    ///
    /// `on_update` is called with a [`Snapshot`] of the whole reply so far
    /// each time a non-empty fragment arrives. On success the message and
    /// the reply are appended to the history and the reply is returned.
    /// On failure or cancellation the history is left untouched.
    pub async fn send_turn<F>(
        &mut self,
        message: &str,
        on_update: F,
        cancel: Option<&CancellationToken>,
    ) -> Result<String, Error>
    where
        F: FnMut(Snapshot),
    {
        let message = message.trim();
        if message.is_empty() {
            return Err(Error::EmptyMessage);
        }

        let send_fut = self.send_message_stream(message);
        let stream = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Cancelled),
                stream = send_fut => stream,
            },
            None => send_fut.await,
        }
        .map_err(Error::Stream)?;

        let reply = drain(stream, on_update, cancel).await?;

        self.history.push(ModelMessage::User(message.to_owned()));
        self.history.push(ModelMessage::Model(reply.clone()));
        trace!(
            "conversation {:?} now has {} messages",
            self.id,
            self.history.len()
        );
        Ok(reply)
    }
}

impl Debug for ConversationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationHandle")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("history_len", &self.history.len())
            .finish_non_exhaustive()
    }
}

/// Owns at most one [`ConversationHandle`] at a time.
///
/// The handle is created lazily on first use, with the configuration given
/// to the manager, and dropped on [`SessionManager::reset_session`]. All
/// mutating operations take `&mut self`, so at most one request can be in
/// flight per manager.
pub struct SessionManager {
    connect: ConnectFn,
    config: GenerationConfig,
    current: Option<ConversationHandle>,
    next_handle_id: u64,
}

impl SessionManager {
    /// Creates a manager that talks to `provider`.
    pub fn with_model_provider<P>(provider: P, config: GenerationConfig) -> Self
    where
        P: ModelProvider + Clone + 'static,
    {
        Self::from_connect_fn(
            Box::new(move || Ok(ModelClient::new(provider.clone()))),
            config,
        )
    }

    /// Creates a manager that calls `connect` each time a conversation is
    /// created. Errors returned by `connect` are propagated unchanged.
    pub fn with_connector<P, F>(connect: F, config: GenerationConfig) -> Self
    where
        P: ModelProvider + 'static,
        F: Fn() -> Result<P, P::Error> + Send + Sync + 'static,
    {
        Self::from_connect_fn(
            Box::new(move || {
                connect().map(ModelClient::new).map_err(ProviderError::new)
            }),
            config,
        )
    }

    fn from_connect_fn(connect: ConnectFn, config: GenerationConfig) -> Self {
        Self {
            connect,
            config,
            current: None,
            next_handle_id: 1,
        }
    }

    /// Returns the configuration used for new conversations.
    #[inline]
    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Returns the id of the live conversation, if any.
    #[inline]
    pub fn current_handle_id(&self) -> Option<HandleId> {
        self.current.as_ref().map(ConversationHandle::id)
    }

    /// Returns the live conversation, creating one if there is none.
    pub fn get_or_create_session(
        &mut self,
    ) -> Result<&mut ConversationHandle, Error> {
        let handle = match self.current.take() {
            Some(handle) => handle,
            None => self.create_handle()?,
        };
        Ok(self.current.insert(handle))
    }

    fn create_handle(&mut self) -> Result<ConversationHandle, Error> {
        let client = (self.connect)().map_err(|err| {
            error!("cannot create a conversation: {err}");
            Error::Session(err)
        })?;
        let id = HandleId(self.next_handle_id);
        self.next_handle_id += 1;
        debug!("created conversation {id:?} with model {}", self.config.model);
        Ok(ConversationHandle {
            id,
            client,
            config: self.config.clone(),
            history: vec![],
        })
    }

    /// Drops the live conversation, if any.
    ///
    /// The next request starts a fresh conversation without any of the
    /// previous context. Calling this repeatedly is harmless.
    pub fn reset_session(&mut self) {
        if let Some(handle) = self.current.take() {
            debug!("dropped conversation {:?}", handle.id);
        }
    }

    /// Sends a user message on the live conversation and streams the reply.
    ///
    /// See [`ConversationHandle::send_turn`].
    #[inline]
    pub async fn send_turn<F>(
        &mut self,
        message: &str,
        on_update: F,
    ) -> Result<String, Error>
    where
        F: FnMut(Snapshot),
    {
        self.send_turn_inner(message, on_update, None).await
    }

    /// Like [`SessionManager::send_turn`], but stops early when `cancel` is
    /// triggered and returns [`Error::Cancelled`].
    #[inline]
    pub async fn send_turn_with_cancel<F>(
        &mut self,
        message: &str,
        on_update: F,
        cancel: &CancellationToken,
    ) -> Result<String, Error>
    where
        F: FnMut(Snapshot),
    {
        self.send_turn_inner(message, on_update, Some(cancel)).await
    }

    async fn send_turn_inner<F>(
        &mut self,
        message: &str,
        on_update: F,
        cancel: Option<&CancellationToken>,
    ) -> Result<String, Error>
    where
        F: FnMut(Snapshot),
    {
        // Reject before touching the session, so an empty message never
        // creates a conversation.
        if message.trim().is_empty() {
            return Err(Error::EmptyMessage);
        }
        let handle = self.get_or_create_session()?;
        handle.send_turn(message, on_update, cancel).await
    }
}

impl Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use lingolift_model::{ErrorKind, GenerationConfigBuilder};
    use lingolift_test_model::{
        Error as TestError, PresetEvent, PresetResponse, TestModelProvider,
    };

    use super::*;

    fn config() -> GenerationConfig {
        GenerationConfigBuilder::new()
            .with_model("test-model")
            .with_system_instruction("Reply politely.")
            .build()
    }

    #[tokio::test]
    async fn test_lazy_creation() {
        let mut manager = SessionManager::with_model_provider(
            TestModelProvider::default(),
            config(),
        );
        assert_eq!(manager.current_handle_id(), None);

        let id = manager.get_or_create_session().unwrap().id();
        assert_eq!(manager.current_handle_id(), Some(id));
        // The same handle is returned while it is alive.
        assert_eq!(manager.get_or_create_session().unwrap().id(), id);

        let handle = manager.get_or_create_session().unwrap();
        assert_eq!(handle.config().model, "test-model");
        assert_eq!(handle.config().temperature, 0.7);
        assert!(handle.history().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_replayed() {
        let mut provider = TestModelProvider::default();
        provider.add_exchange(PresetResponse::with_fragments(["Hi!"]));
        provider.add_exchange(PresetResponse::with_fragments(["Fine."]));
        let mut manager =
            SessionManager::with_model_provider(provider.clone(), config());

        let first = manager.send_turn("Hello", |_| {}).await.unwrap();
        assert_eq!(first, "Hi!");
        let second = manager.send_turn("  How are you? ", |_| {}).await;
        assert_eq!(second.unwrap(), "Fine.");

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[1].messages,
            vec![
                ModelMessage::User("Hello".to_owned()),
                ModelMessage::Model("Hi!".to_owned()),
                ModelMessage::User("How are you?".to_owned()),
            ]
        );
        assert_eq!(
            requests[1].config.system_instruction.as_deref(),
            Some("Reply politely.")
        );
    }

    #[tokio::test]
    async fn test_reset_discards_context() {
        let mut provider = TestModelProvider::default();
        provider.add_exchange(PresetResponse::with_fragments(["First"]));
        provider.add_exchange(PresetResponse::with_fragments(["Second"]));
        let mut manager =
            SessionManager::with_model_provider(provider.clone(), config());

        manager.send_turn("one", |_| {}).await.unwrap();
        let before = manager.current_handle_id().unwrap();

        manager.reset_session();
        assert_eq!(manager.current_handle_id(), None);

        let handle = manager.get_or_create_session().unwrap();
        assert_ne!(handle.id(), before);
        assert!(handle.history().is_empty());

        // The fresh conversation starts from the first script step again.
        let reply = manager.send_turn("one again", |_| {}).await.unwrap();
        assert_eq!(reply, "First");
        assert_eq!(provider.requests()[1].messages.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let mut manager = SessionManager::with_model_provider(
            TestModelProvider::default(),
            config(),
        );
        manager.reset_session();
        manager.reset_session();
        assert_eq!(manager.current_handle_id(), None);

        let id = manager.get_or_create_session().unwrap().id();
        manager.reset_session();
        manager.reset_session();
        assert_eq!(manager.current_handle_id(), None);
        assert_ne!(manager.get_or_create_session().unwrap().id(), id);
    }

    #[tokio::test]
    async fn test_connector_failure() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut manager = SessionManager::with_connector(
            {
                let attempts = Arc::clone(&attempts);
                move || {
                    attempts.fetch_add(1, Ordering::Relaxed);
                    Err::<TestModelProvider, _>(TestError::new(
                        "missing api key",
                        ErrorKind::Unauthenticated,
                    ))
                }
            },
            config(),
        );

        let err = manager.get_or_create_session().unwrap_err();
        assert!(matches!(err, Error::Session(_)));
        assert_eq!(err.kind(), Some(ErrorKind::Unauthenticated));

        // Every later call fails the same way until the cause is fixed.
        let err = manager.send_turn("Hello", |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::Session(_)));
        assert_eq!(attempts.load(Ordering::Relaxed), 2);
        assert_eq!(manager.current_handle_id(), None);
    }

    #[tokio::test]
    async fn test_empty_message() {
        let mut manager = SessionManager::with_model_provider(
            TestModelProvider::default(),
            config(),
        );
        let err = manager.send_turn(" \n\t", |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::EmptyMessage));
        assert_eq!(manager.current_handle_id(), None);
    }

    #[tokio::test]
    async fn test_failed_turn_keeps_history() {
        let mut provider = TestModelProvider::default();
        provider.add_exchange(PresetResponse::with_events([
            PresetEvent::delta("Partial"),
            PresetEvent::failure(ErrorKind::Other, "server error"),
        ]));
        let mut manager =
            SessionManager::with_model_provider(provider, config());

        let mut updates = vec![];
        let err = manager
            .send_turn("Hello", |s| updates.push(s.into_text()))
            .await
            .unwrap_err();
        assert_eq!(updates, ["Partial"]);
        let Error::Stream(err) = err else {
            panic!("expected a stream error");
        };
        let original = err.downcast_ref::<TestError>().unwrap();
        assert_eq!(original.message(), "server error");

        let handle = manager.get_or_create_session().unwrap();
        assert!(handle.history().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_keeps_history() {
        let mut provider = TestModelProvider::default();
        provider.add_exchange(PresetResponse::with_fragments(["a", "b", "c"]));
        let mut manager =
            SessionManager::with_model_provider(provider, config());

        let token = CancellationToken::new();
        let mut updates = 0;
        let err = manager
            .send_turn_with_cancel(
                "Hello",
                |_| {
                    updates += 1;
                    token.cancel();
                },
                &token,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(updates, 1);
        assert!(manager.get_or_create_session().unwrap().history().is_empty());
    }
}
