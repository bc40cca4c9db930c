//! A provider-neutral protocol for streaming text generation.
//!
//! This crate establishes how the chat core talks to a hosted language
//! model: a request carries the dialogue so far plus the generation
//! settings, and the response is a stream of text fragments terminated
//! by a completion event, the natural end of the stream, or an error.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod config;
mod error;
mod provider;
mod request;
mod response;

pub use config::*;
pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
