//! LingoLift, an English tutor for native Chinese speakers.
//!
//! The crate assembles the tutor configuration, a [`Tutor`] that keeps the
//! visible transcript in sync with the model conversation, and a markdown
//! renderer for terminals. It also ships a CLI for chatting in the
//! terminal.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod markdown;
mod tutor;

pub use tutor::{
    ERROR_MESSAGE, GREETING, SYSTEM_INSTRUCTION, SubmitError, Tutor,
    TutorBuilder,
};

/// Re-exports of [`lingolift_core`] crate.
pub mod core {
    pub use lingolift_core::*;
}
