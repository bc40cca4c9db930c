//! Transcript-related types.
//!
//! A [`Transcript`] is the visible conversation: an insertion-ordered list
//! of [`Turn`]s. At most one model turn can be pending at a time, and a
//! model turn always answers the user turn right before it.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// The author of a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// The person chatting.
    User,
    /// The language model.
    Model,
}

/// A single message in the transcript.
#[derive(Clone, Debug, PartialEq)]
pub struct Turn {
    id: Uuid,
    role: Role,
    content: String,
    created_at: DateTime<Utc>,
    pending: bool,
}

impl Turn {
    fn new(role: Role, content: String, pending: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            created_at: Utc::now(),
            pending,
        }
    }

    /// Creates a complete user turn.
    #[inline]
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self::new(Role::User, content.into(), false)
    }

    /// Creates a complete model turn.
    #[inline]
    pub fn model<S: Into<String>>(content: S) -> Self {
        Self::new(Role::Model, content.into(), false)
    }

    /// Returns the locally generated id of this turn.
    #[inline]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns who wrote this turn.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the text of this turn, which may be partial while pending.
    #[inline]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns when this turn was inserted.
    #[inline]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns `true` while the model is still streaming this turn.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

/// Errors from operations that would break the transcript invariants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TranscriptError {
    /// A model reply is still pending.
    #[error("a reply is still pending")]
    ReplyPending,
    /// There is no pending reply to update.
    #[error("there is no pending reply")]
    NoPendingReply,
    /// The last turn is not a user turn waiting for a reply.
    #[error("the last turn is not awaiting a reply")]
    NotAwaitingReply,
}

/// The ordered list of turns in a conversation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transcript {
    turns: Vec<Turn>,
    pending: Option<usize>,
}

impl Transcript {
    /// Creates an empty transcript.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transcript that starts with a model greeting.
    pub fn with_greeting<S: Into<String>>(greeting: S) -> Self {
        Self {
            turns: vec![Turn::model(greeting)],
            pending: None,
        }
    }

    /// Returns all turns in insertion order.
    #[inline]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Returns the number of turns.
    #[inline]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Returns `true` if there are no turns.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Returns the most recent turn.
    #[inline]
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Returns the pending model turn, if any.
    #[inline]
    pub fn pending_reply(&self) -> Option<&Turn> {
        self.pending.map(|idx| &self.turns[idx])
    }

    /// Returns `true` while a model reply is streaming.
    #[inline]
    pub fn has_pending_reply(&self) -> bool {
        self.pending.is_some()
    }

    /// Appends a user turn. Fails while a reply is pending.
    pub fn push_user<S: Into<String>>(
        &mut self,
        content: S,
    ) -> Result<Uuid, TranscriptError> {
        if self.pending.is_some() {
            return Err(TranscriptError::ReplyPending);
        }
        let turn = Turn::user(content);
        let id = turn.id;
        self.turns.push(turn);
        Ok(id)
    }

    /// Inserts an empty, pending model turn answering the last user turn.
    pub fn begin_reply(&mut self) -> Result<Uuid, TranscriptError> {
        if self.pending.is_some() {
            return Err(TranscriptError::ReplyPending);
        }
        if self.turns.last().map(Turn::role) != Some(Role::User) {
            return Err(TranscriptError::NotAwaitingReply);
        }
        let turn = Turn::new(Role::Model, String::new(), true);
        let id = turn.id;
        self.pending = Some(self.turns.len());
        self.turns.push(turn);
        Ok(id)
    }

    /// Replaces the content of the pending reply.
    pub fn update_reply<S: Into<String>>(
        &mut self,
        content: S,
    ) -> Result<(), TranscriptError> {
        let turn = self.pending_turn_mut()?;
        turn.content = content.into();
        Ok(())
    }

    /// Marks the pending reply as complete, leaving its content as is.
    pub fn finish_reply(&mut self) -> Result<&Turn, TranscriptError> {
        let idx = self.pending.take().ok_or(TranscriptError::NoPendingReply)?;
        let turn = &mut self.turns[idx];
        turn.pending = false;
        Ok(turn)
    }

    /// Replaces the pending reply with `message` and marks it complete.
    pub fn fail_reply<S: Into<String>>(
        &mut self,
        message: S,
    ) -> Result<&Turn, TranscriptError> {
        self.update_reply(message)?;
        self.finish_reply()
    }

    /// Removes every turn.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.pending = None;
    }

    fn pending_turn_mut(&mut self) -> Result<&mut Turn, TranscriptError> {
        let idx = self.pending.ok_or(TranscriptError::NoPendingReply)?;
        Ok(&mut self.turns[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_lifecycle() {
        let mut transcript = Transcript::with_greeting("**Hello!**");
        transcript.push_user("I goed home").unwrap();
        let reply_id = transcript.begin_reply().unwrap();

        let pending = transcript.pending_reply().unwrap();
        assert_eq!(pending.id(), reply_id);
        assert_eq!(pending.role(), Role::Model);
        assert_eq!(pending.content(), "");
        assert!(pending.is_pending());

        transcript.update_reply("**Feedback**").unwrap();
        transcript.update_reply("**Feedback**\nUse \"went\".").unwrap();
        let turn = transcript.finish_reply().unwrap();
        assert_eq!(turn.content(), "**Feedback**\nUse \"went\".");
        assert!(!turn.is_pending());
        assert!(!transcript.has_pending_reply());
        assert_eq!(transcript.len(), 3);
    }

    #[test]
    fn test_single_pending_reply() {
        let mut transcript = Transcript::new();
        transcript.push_user("Hi").unwrap();
        transcript.begin_reply().unwrap();
        assert_eq!(
            transcript.begin_reply(),
            Err(TranscriptError::ReplyPending)
        );
        assert_eq!(
            transcript.push_user("Again"),
            Err(TranscriptError::ReplyPending)
        );
    }

    #[test]
    fn test_reply_needs_user_turn() {
        let mut transcript = Transcript::with_greeting("Hello");
        assert_eq!(
            transcript.begin_reply(),
            Err(TranscriptError::NotAwaitingReply)
        );

        transcript.push_user("Hi").unwrap();
        transcript.begin_reply().unwrap();
        transcript.finish_reply().unwrap();
        // Only one reply per user turn.
        assert_eq!(
            transcript.begin_reply(),
            Err(TranscriptError::NotAwaitingReply)
        );
    }

    #[test]
    fn test_fail_reply() {
        let mut transcript = Transcript::new();
        transcript.push_user("Hi").unwrap();
        transcript.begin_reply().unwrap();
        transcript.update_reply("partial").unwrap();
        let turn = transcript.fail_reply("**Error:** oops").unwrap();
        assert_eq!(turn.content(), "**Error:** oops");
        assert!(!turn.is_pending());
        assert_eq!(
            transcript.update_reply("late"),
            Err(TranscriptError::NoPendingReply)
        );
    }

    #[test]
    fn test_clear() {
        let mut transcript = Transcript::with_greeting("Hello");
        transcript.push_user("Hi").unwrap();
        transcript.begin_reply().unwrap();
        transcript.clear();
        assert!(transcript.is_empty());
        assert!(!transcript.has_pending_reply());
    }

    #[test]
    fn test_unique_ids() {
        let a = Turn::user("same");
        let b = Turn::user("same");
        assert_ne!(a.id(), b.id());
        assert!(a.created_at() <= b.created_at());
    }
}
