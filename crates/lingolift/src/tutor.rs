use lingolift_core::transcript::Transcript;
use lingolift_core::{
    CancellationToken, Error as CoreError, SessionManager, Snapshot,
};
use lingolift_model::{
    GenerationConfig, GenerationConfigBuilder, ModelProvider,
};

/// The instruction that makes the model act as an English tutor.
pub const SYSTEM_INSTRUCTION: &str = include_str!("./system_prompt.md");

/// The model turn every conversation starts with.
pub const GREETING: &str = "**Hello!** I'm LingoLift. 👋\n\n\
    I can help you practice English. \n\n\
    🔹 **Send Chinese:** I'll translate it first, then answer.\n\
    🔹 **Send English:** I'll check your grammar, then answer.\n\n\
    Let's get started!";

/// Shown in place of a reply that failed.
pub const ERROR_MESSAGE: &str =
    "**Error:** Something went wrong. Please try again.";

/// Errors returned by [`Tutor::submit`].
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Another reply is still pending.
    #[error("a reply is still pending")]
    Busy,
    /// The message was empty after trimming.
    #[error("the message is empty")]
    EmptyMessage,
    /// The reply failed or was cancelled.
    #[error(transparent)]
    Core(#[from] CoreError),
}

type ManagerFn = Box<dyn FnOnce(GenerationConfig) -> SessionManager>;

/// A tutor builder.
///
/// See [`Tutor`].
pub struct TutorBuilder {
    make_manager: ManagerFn,
    config: GenerationConfigBuilder,
    greeting: String,
}

impl TutorBuilder {
    /// Creates a tutor builder with a specified model provider.
    pub fn with_model_provider<P>(provider: P) -> Self
    where
        P: ModelProvider + Clone + 'static,
    {
        Self::new(Box::new(move |config| {
            SessionManager::with_model_provider(provider, config)
        }))
    }

    /// Creates a tutor builder that calls `connect` whenever a new
    /// conversation starts.
    pub fn with_connector<P, F>(connect: F) -> Self
    where
        P: ModelProvider + 'static,
        F: Fn() -> Result<P, P::Error> + Send + Sync + 'static,
    {
        Self::new(Box::new(move |config| {
            SessionManager::with_connector(connect, config)
        }))
    }

    fn new(make_manager: ManagerFn) -> Self {
        Self {
            make_manager,
            config: GenerationConfigBuilder::new()
                .with_system_instruction(SYSTEM_INSTRUCTION),
            greeting: GREETING.to_owned(),
        }
    }

    /// Sets the model identifier.
    #[inline]
    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.config = self.config.with_model(model);
        self
    }

    /// Sets the sampling temperature.
    #[inline]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.config = self.config.with_temperature(temperature);
        self
    }

    /// Replaces the tutor instruction.
    #[inline]
    pub fn with_system_instruction<S: Into<String>>(
        mut self,
        instruction: S,
    ) -> Self {
        self.config = self.config.with_system_instruction(instruction);
        self
    }

    /// Replaces the greeting shown at the start of every conversation.
    #[inline]
    pub fn with_greeting<S: Into<String>>(mut self, greeting: S) -> Self {
        self.greeting = greeting.into();
        self
    }

    /// Builds a new tutor.
    pub fn build(self) -> Tutor {
        let config = self.config.build();
        debug!(
            "building tutor with model {} at temperature {}",
            config.model, config.temperature
        );
        Tutor {
            sessions: (self.make_manager)(config),
            transcript: Transcript::with_greeting(self.greeting.as_str()),
            greeting: self.greeting,
        }
    }
}

/// A chat with the tutor, like a window that displays messages and has an
/// input box.
///
/// The tutor keeps the visible [`Transcript`] in sync with the conversation
/// held by its [`SessionManager`]. A failed reply is replaced with
/// [`ERROR_MESSAGE`] in the transcript while the error is still returned to
/// the caller.
#[derive(Debug)]
pub struct Tutor {
    sessions: SessionManager,
    transcript: Transcript,
    greeting: String,
}

impl Tutor {
    /// Returns the visible conversation.
    #[inline]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Returns the session manager behind this tutor.
    #[inline]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Returns `true` while a reply is pending.
    #[inline]
    pub fn is_busy(&self) -> bool {
        self.transcript.has_pending_reply()
    }

    /// Submits a user message and streams the reply into the transcript.
    ///
    /// `on_update` receives every snapshot after the pending reply has been
    /// updated with it. Returns the complete reply.
    ///
    /// Dropping the returned future closes the pending reply with whatever
    /// text has arrived so far.
    #[inline]
    pub async fn submit<F>(
        &mut self,
        text: &str,
        on_update: F,
    ) -> Result<String, SubmitError>
    where
        F: FnMut(Snapshot),
    {
        self.submit_inner(text, on_update, None).await
    }

    /// Like [`Tutor::submit`], but stops early when `cancel` is triggered.
    ///
    /// A cancelled reply keeps the text received so far and is not
    /// remembered by the model.
    #[inline]
    pub async fn submit_with_cancel<F>(
        &mut self,
        text: &str,
        on_update: F,
        cancel: &CancellationToken,
    ) -> Result<String, SubmitError>
    where
        F: FnMut(Snapshot),
    {
        self.submit_inner(text, on_update, Some(cancel)).await
    }

    async fn submit_inner<F>(
        &mut self,
        text: &str,
        mut on_update: F,
        cancel: Option<&CancellationToken>,
    ) -> Result<String, SubmitError>
    where
        F: FnMut(Snapshot),
    {
        if self.transcript.has_pending_reply() {
            return Err(SubmitError::Busy);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SubmitError::EmptyMessage);
        }

        self.transcript
            .push_user(text)
            .map_err(|_| SubmitError::Busy)?;
        self.transcript
            .begin_reply()
            .map_err(|_| SubmitError::Busy)?;

        let mut reply = PendingReply {
            transcript: &mut self.transcript,
        };
        let on_snapshot = |snapshot: Snapshot| {
            reply.update(snapshot.text());
            on_update(snapshot);
        };
        let result = match cancel {
            Some(cancel) => {
                self.sessions
                    .send_turn_with_cancel(text, on_snapshot, cancel)
                    .await
            }
            None => self.sessions.send_turn(text, on_snapshot).await,
        };

        match result {
            Ok(text) => {
                reply.update(&text);
                reply.finish();
                Ok(text)
            }
            Err(CoreError::Cancelled) => {
                debug!("reply cancelled");
                reply.finish();
                Err(CoreError::Cancelled.into())
            }
            Err(err) => {
                error!("reply failed: {err}");
                reply.fail();
                Err(err.into())
            }
        }
    }

    /// Clears the conversation.
    ///
    /// The model forgets every previous turn and the transcript goes back
    /// to the greeting.
    pub fn reset(&mut self) {
        self.sessions.reset_session();
        self.transcript = Transcript::with_greeting(self.greeting.as_str());
        debug!("conversation cleared");
    }
}

/// The model turn being streamed.
///
/// Closes the turn when dropped, so an abandoned submission never leaves
/// the transcript blocked.
struct PendingReply<'a> {
    transcript: &'a mut Transcript,
}

impl PendingReply<'_> {
    fn update(&mut self, text: &str) {
        if let Err(err) = self.transcript.update_reply(text) {
            error!("cannot update the reply: {err}");
        }
    }

    fn finish(self) {
        if let Err(err) = self.transcript.finish_reply() {
            error!("cannot finish the reply: {err}");
        }
    }

    fn fail(self) {
        if let Err(err) = self.transcript.fail_reply(ERROR_MESSAGE) {
            error!("cannot fail the reply: {err}");
        }
    }
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        if self.transcript.has_pending_reply() {
            trace!("closing an abandoned reply");
            self.transcript.finish_reply().ok();
        }
    }
}
