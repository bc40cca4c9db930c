use std::error::Error as StdError;
use std::fmt::{self, Debug, Display};

use lingolift_model::{ErrorKind, ModelProviderError};

use crate::accumulator::DrainError;

/// Errors returned by the chat core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The message was empty after trimming.
    #[error("the message is empty")]
    EmptyMessage,
    /// The conversation could not be created.
    #[error("cannot create a conversation: {0}")]
    Session(#[source] ProviderError),
    /// The generation request failed before or while streaming.
    #[error("generation failed: {0}")]
    Stream(#[source] ProviderError),
    /// The generation request was cancelled by the caller.
    #[error("generation was cancelled")]
    Cancelled,
}

impl Error {
    /// Returns the underlying provider error, if any.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Error::Session(err) | Error::Stream(err) => Some(err),
            Error::EmptyMessage | Error::Cancelled => None,
        }
    }

    /// Returns the kind of the underlying provider error, if any.
    #[inline]
    pub fn kind(&self) -> Option<ErrorKind> {
        self.provider_error().map(ProviderError::kind)
    }
}

/// A type-erased error from a model provider.
///
/// The original error is kept as-is and can be recovered with
/// [`ProviderError::downcast_ref`].
pub struct ProviderError(Box<dyn ModelProviderError>);

impl ProviderError {
    /// Wraps a provider error.
    #[inline]
    pub fn new<E: ModelProviderError>(err: E) -> Self {
        Self(Box::new(err))
    }

    /// Returns the kind of the original error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.0.kind()
    }

    /// Returns a reference to the original error if it is of type `E`.
    pub fn downcast_ref<E: ModelProviderError>(&self) -> Option<&E> {
        let err: &(dyn StdError + 'static) = &*self.0;
        err.downcast_ref()
    }
}

impl Debug for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl StdError for ProviderError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

impl From<DrainError<ProviderError>> for Error {
    fn from(err: DrainError<ProviderError>) -> Self {
        match err {
            DrainError::Stream(err) => Error::Stream(err),
            DrainError::Cancelled => Error::Cancelled,
        }
    }
}
