//! Core logic of the chat: conversation sessions, streamed replies, and
//! the transcript model.
//!
//! A [`SessionManager`] owns at most one live [`ConversationHandle`].
//! Sending a turn drains the model's fragment stream into cumulative
//! [`Snapshot`]s, so an observer always sees the whole reply so far.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod accumulator;
mod error;
mod model_client;
mod session;
pub mod transcript;

pub use accumulator::{Snapshot, SnapshotStream};
pub use error::{Error, ProviderError};
pub use model_client::BoxSnapshotStream;
pub use session::{ConversationHandle, HandleId, SessionManager};
pub use tokio_util::sync::CancellationToken;
