use crate::config::GenerationConfig;

/// A request to be sent to the model provider.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelRequest {
    /// The generation settings for this request.
    pub config: GenerationConfig,
    /// The dialogue so far, ending with the new user message.
    pub messages: Vec<ModelMessage>,
}

impl ModelRequest {
    /// Returns the last user message in this request, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|msg| match msg {
            ModelMessage::User(text) => Some(text.as_str()),
            ModelMessage::Model(_) => None,
        })
    }
}

/// A complete message in the dialogue.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModelMessage {
    /// A user input text.
    User(String),
    /// A text previously generated by the model.
    Model(String),
}

impl ModelMessage {
    /// Returns the text of this message.
    #[inline]
    pub fn text(&self) -> &str {
        match self {
            ModelMessage::User(text) | ModelMessage::Model(text) => text,
        }
    }
}
